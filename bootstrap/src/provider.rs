//! Provider 能力接口
//!
//! - [`Provider`]：可初始化、可关闭的组件
//! - [`RunProvider`]：额外拥有一个阻塞的 `run` 步骤，并暴露就绪状态
//!
//! 每个 `RunProvider` 以值的方式持有一个 [`LifecycleState`] 作为就绪闸门。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use project_errors::{ProviderError, ProviderResult};
use tracing::{debug, warn};

/// 就绪轮询间隔
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 可初始化的组件
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// 日志中使用的名称
    fn name(&self) -> &str;

    /// 初始化，Stack 按注册顺序串行调用
    async fn init(&self) -> ProviderResult<()> {
        Ok(())
    }

    /// 释放资源，Stack 按注册的逆序调用
    async fn close(&self) -> ProviderResult<()> {
        Ok(())
    }

    /// 若组件同时实现了 [`RunProvider`]，返回对应的句柄
    fn into_runnable(self: Arc<Self>) -> Option<Arc<dyn RunProvider>> {
        None
    }
}

/// 长期运行的组件
#[async_trait]
pub trait RunProvider: Provider {
    /// 阻塞直到服务结束
    async fn run(&self) -> ProviderResult<()>;

    fn lifecycle(&self) -> &LifecycleState;

    fn is_running(&self) -> bool {
        self.lifecycle().is_running()
    }
}

/// 就绪闸门
///
/// 只会从 `false` 变为 `true` 一次，之后不再重置。
#[derive(Debug, Default)]
pub struct LifecycleState {
    running: AtomicBool,
}

impl LifecycleState {
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    /// 标记为运行中，首次调用返回 `true`
    ///
    /// 必须在监听资源创建之后、进入服务循环之前调用。
    pub fn set_running(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// 等待 Provider 进入运行状态
pub async fn wait_for_running<P>(provider: &P, max_attempts: u32) -> ProviderResult<()>
where
    P: RunProvider + ?Sized,
{
    wait_for_running_every(provider, max_attempts, READINESS_POLL_INTERVAL).await
}

/// 以指定间隔轮询 Provider 的就绪状态
///
/// 恰好轮询 `max_attempts` 次，仍未就绪则返回 [`ProviderError::NotReady`]。
pub async fn wait_for_running_every<P>(
    provider: &P,
    max_attempts: u32,
    interval: Duration,
) -> ProviderResult<()>
where
    P: RunProvider + ?Sized,
{
    for attempt in 1..=max_attempts {
        if provider.is_running() {
            debug!(provider = provider.name(), attempt, "Provider is running");
            return Ok(());
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    warn!(
        provider = provider.name(),
        max_attempts, "Provider did not become ready"
    );
    Err(ProviderError::not_ready(provider.name(), max_attempts))
}

//! Stack - Provider 生命周期编排
//!
//! 按注册顺序串行初始化，所有可运行组件并发运行，
//! 收到中断信号或任一组件运行失败时按注册逆序关闭。
//!
//! ```ignore
//! let mut stack = Stack::new();
//! stack.register(app);
//! stack.register(grpc_server);
//! stack.register(gateway);
//!
//! stack.init_all().await?;
//! stack.run_all(shutdown_signal()).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use project_errors::{ProviderError, StackError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::provider::Provider;

/// 关闭后等待 run 任务退出的默认时长
const DEFAULT_TASK_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    NotStarted,
    Running,
    Stopped,
}

/// Provider 编排器
pub struct Stack {
    providers: Vec<Arc<dyn Provider>>,
    state: Mutex<StackState>,
    closed: AtomicBool,
    /// 启动流程与关闭流程互斥
    lifecycle: tokio::sync::Mutex<()>,
    task_grace: Duration,
}

impl Stack {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            state: Mutex::new(StackState::NotStarted),
            closed: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            task_grace: DEFAULT_TASK_GRACE,
        }
    }

    /// 关闭完成后等待 run 任务退出的时长，超时的任务会被 abort
    pub fn with_task_grace(mut self, grace: Duration) -> Self {
        self.task_grace = grace;
        self
    }

    /// 追加一个组件
    pub fn register<P: Provider>(&mut self, provider: Arc<P>) -> &mut Self {
        self.providers.push(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn state(&self) -> StackState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: StackState) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    /// NotStarted → Running，仅第一次调用成功
    fn try_start(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != StackState::NotStarted {
            return false;
        }
        *state = StackState::Running;
        true
    }

    /// 按注册顺序初始化所有组件
    ///
    /// 第一个失败即中止，已初始化的组件不做回滚。
    pub async fn init_all(&self) -> Result<(), StackError> {
        for provider in &self.providers {
            debug!(provider = provider.name(), "Initializing provider");
            provider.init().await.map_err(|source| StackError::Init {
                provider: provider.name().to_string(),
                source,
            })?;
            info!(provider = provider.name(), "Provider initialized");
        }
        Ok(())
    }

    /// 并发运行所有可运行组件，直到 `shutdown` 完成或某个组件运行失败
    ///
    /// 返回前总会执行 [`Stack::close_all`]。重复调用直接返回。
    pub async fn run_all<F>(&self, shutdown: F) -> Result<(), StackError>
    where
        F: Future<Output = ()> + Send,
    {
        if !self.try_start() {
            warn!("Stack is already running, ignoring run request");
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        {
            let _launch = self.lifecycle.lock().await;
            for provider in &self.providers {
                let Some(runnable) = Arc::clone(provider).into_runnable() else {
                    continue;
                };
                let name = runnable.name().to_string();
                info!(provider = %name, "Starting provider");
                let handle = tasks.spawn(async move { runnable.run().await });
                names.insert(handle.id(), name);
            }
        }

        tokio::pin!(shutdown);
        let failure = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupt received, stopping providers");
                    break None;
                }
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    let (id, result) = match joined {
                        Ok((id, result)) => (id, result),
                        Err(err) => (err.id(), Err(ProviderError::Aborted(err.to_string()))),
                    };
                    let name = names.remove(&id).unwrap_or_default();
                    match result {
                        Ok(()) => info!(provider = %name, "Provider finished"),
                        Err(source) => {
                            error!(provider = %name, error = %source, "Provider failed to run");
                            break Some(StackError::Run { provider: name, source });
                        }
                    }
                }
            }
        };

        let closed = self.close_all().await;
        self.drain(&mut tasks).await;

        match failure {
            Some(err) => {
                if let Err(close_err) = closed {
                    error!(error = %close_err, "Close after run failure also failed");
                }
                Err(err)
            }
            None => closed,
        }
    }

    async fn drain(&self, tasks: &mut JoinSet<Result<(), ProviderError>>) {
        let drained = tokio::time::timeout(self.task_grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok(Err(err)) = joined {
                    debug!(error = %err, "Provider returned after close");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = tasks.len(), "Aborting providers that did not stop in time");
            tasks.abort_all();
        }
    }

    /// 按注册逆序关闭所有组件，只执行一次
    ///
    /// 第一个失败即中止剩余的关闭。
    pub async fn close_all(&self) -> Result<(), StackError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Stack already closed");
            return Ok(());
        }

        let _guard = self.lifecycle.lock().await;
        let result = self.close_in_reverse().await;
        self.set_state(StackState::Stopped);
        result
    }

    async fn close_in_reverse(&self) -> Result<(), StackError> {
        for provider in self.providers.iter().rev() {
            debug!(provider = provider.name(), "Closing provider");
            provider.close().await.map_err(|source| StackError::Close {
                provider: provider.name().to_string(),
                source,
            })?;
            info!(provider = provider.name(), "Provider closed");
        }
        Ok(())
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LifecycleState, RunProvider};
    use async_trait::async_trait;
    use project_errors::ProviderResult;
    use tokio::sync::Barrier;
    use tokio_util::sync::CancellationToken;

    type Log = Arc<Mutex<Vec<String>>>;

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    struct Component {
        name: &'static str,
        log: Log,
        fail_init: bool,
        fail_close: bool,
    }

    impl Component {
        fn new(name: &'static str, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: log.clone(),
                fail_init: false,
                fail_close: false,
            })
        }
    }

    #[async_trait]
    impl Provider for Component {
        fn name(&self) -> &str {
            self.name
        }

        async fn init(&self) -> ProviderResult<()> {
            self.log.lock().unwrap().push(format!("init {}", self.name));
            if self.fail_init {
                return Err(ProviderError::config("bad settings"));
            }
            Ok(())
        }

        async fn close(&self) -> ProviderResult<()> {
            self.log.lock().unwrap().push(format!("close {}", self.name));
            if self.fail_close {
                return Err(ProviderError::config("stuck"));
            }
            Ok(())
        }
    }

    struct Worker {
        name: &'static str,
        log: Log,
        lifecycle: LifecycleState,
        stop: CancellationToken,
        barrier: Option<Arc<Barrier>>,
        fail_run: bool,
    }

    impl Worker {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: log.clone(),
                lifecycle: LifecycleState::new(),
                stop: CancellationToken::new(),
                barrier: None,
                fail_run: false,
            }
        }
    }

    #[async_trait]
    impl Provider for Worker {
        fn name(&self) -> &str {
            self.name
        }

        async fn close(&self) -> ProviderResult<()> {
            self.log.lock().unwrap().push(format!("close {}", self.name));
            self.stop.cancel();
            Ok(())
        }

        fn into_runnable(self: Arc<Self>) -> Option<Arc<dyn RunProvider>> {
            Some(self)
        }
    }

    #[async_trait]
    impl RunProvider for Worker {
        async fn run(&self) -> ProviderResult<()> {
            self.lifecycle.set_running();
            if self.fail_run {
                return Err(ProviderError::config("port in use"));
            }
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            self.stop.cancelled().await;
            Ok(())
        }

        fn lifecycle(&self) -> &LifecycleState {
            &self.lifecycle
        }
    }

    #[tokio::test]
    async fn test_init_runs_in_registration_order() {
        let log = Log::default();
        let mut stack = Stack::new();
        stack
            .register(Component::new("a", &log))
            .register(Component::new("b", &log))
            .register(Component::new("c", &log));

        stack.init_all().await.unwrap();
        assert_eq!(entries(&log), ["init a", "init b", "init c"]);
    }

    #[tokio::test]
    async fn test_init_failure_stops_remaining() {
        let log = Log::default();
        let mut stack = Stack::new();
        stack.register(Component::new("a", &log));
        stack.register(Arc::new(Component {
            name: "b",
            log: log.clone(),
            fail_init: true,
            fail_close: false,
        }));
        stack.register(Component::new("c", &log));

        let err = stack.init_all().await.unwrap_err();
        assert!(matches!(err, StackError::Init { .. }));
        assert_eq!(err.provider(), "b");
        assert_eq!(entries(&log), ["init a", "init b"]);
    }

    #[tokio::test]
    async fn test_close_reverse_order_exactly_once() {
        let log = Log::default();
        let mut stack = Stack::new();
        stack
            .register(Component::new("a", &log))
            .register(Component::new("b", &log))
            .register(Component::new("c", &log));

        stack.close_all().await.unwrap();
        stack.close_all().await.unwrap();

        assert_eq!(entries(&log), ["close c", "close b", "close a"]);
        assert_eq!(stack.state(), StackState::Stopped);
    }

    #[tokio::test]
    async fn test_close_failure_aborts_loop() {
        let log = Log::default();
        let mut stack = Stack::new();
        stack.register(Component::new("a", &log));
        stack.register(Arc::new(Component {
            name: "b",
            log: log.clone(),
            fail_init: false,
            fail_close: true,
        }));
        stack.register(Component::new("c", &log));

        let err = stack.close_all().await.unwrap_err();
        assert!(matches!(err, StackError::Close { .. }));
        assert_eq!(entries(&log), ["close c", "close b"]);
    }

    #[tokio::test]
    async fn test_runnables_run_concurrently() {
        let log = Log::default();
        let barrier = Arc::new(Barrier::new(4));
        let mut stack = Stack::new();
        for name in ["one", "two", "three"] {
            let mut worker = Worker::new(name, &log);
            worker.barrier = Some(barrier.clone());
            stack.register(Arc::new(worker));
        }
        stack.init_all().await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let stack = Arc::new(stack);
        let running = tokio::spawn({
            let stack = stack.clone();
            async move {
                stack
                    .run_all(async {
                        let _ = rx.await;
                    })
                    .await
            }
        });

        // 三个组件都到达 barrier 才能通过
        tokio::time::timeout(Duration::from_secs(5), barrier.wait())
            .await
            .unwrap();
        tx.send(()).unwrap();

        running.await.unwrap().unwrap();
        assert_eq!(entries(&log), ["close three", "close two", "close one"]);
        assert_eq!(stack.state(), StackState::Stopped);
    }

    #[tokio::test]
    async fn test_run_failure_closes_everything() {
        let log = Log::default();
        let mut stack = Stack::new();
        stack.register(Component::new("config", &log));
        stack.register(Arc::new(Worker::new("server", &log)));
        let mut broken = Worker::new("gateway", &log);
        broken.fail_run = true;
        stack.register(Arc::new(broken));

        let err = stack
            .run_all(std::future::pending::<()>())
            .await
            .unwrap_err();

        assert!(matches!(err, StackError::Run { .. }));
        assert_eq!(err.provider(), "gateway");
        assert_eq!(
            entries(&log),
            ["close gateway", "close server", "close config"]
        );
    }

    #[tokio::test]
    async fn test_run_is_launched_once() {
        let log = Log::default();
        let mut stack = Stack::new();
        stack.register(Arc::new(Worker::new("server", &log)));

        stack.run_all(async {}).await.unwrap();
        stack.run_all(std::future::pending::<()>()).await.unwrap();

        assert_eq!(entries(&log), ["close server"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_runnable_is_aborted_after_grace() {
        struct Stuck {
            lifecycle: LifecycleState,
        }

        #[async_trait]
        impl Provider for Stuck {
            fn name(&self) -> &str {
                "stuck"
            }

            fn into_runnable(self: Arc<Self>) -> Option<Arc<dyn RunProvider>> {
                Some(self)
            }
        }

        #[async_trait]
        impl RunProvider for Stuck {
            async fn run(&self) -> ProviderResult<()> {
                std::future::pending::<()>().await;
                Ok(())
            }

            fn lifecycle(&self) -> &LifecycleState {
                &self.lifecycle
            }
        }

        let mut stack = Stack::new().with_task_grace(Duration::from_secs(1));
        stack.register(Arc::new(Stuck {
            lifecycle: LifecycleState::new(),
        }));

        stack.run_all(async {}).await.unwrap();
        assert_eq!(stack.state(), StackState::Stopped);
    }
}

//! Graceful Shutdown

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::info;

/// Shutdown 控制器
///
/// 基于 [`CancellationToken`]：先于 `wait` 触发的关闭也能被观察到。
#[derive(Debug, Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("Triggering shutdown");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待关闭信号
    pub fn wait(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_before_wait_is_observed() {
        let controller = ShutdownController::new();
        controller.shutdown();
        assert!(controller.is_shutdown());

        tokio::time::timeout(Duration::from_secs(1), controller.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let controller = ShutdownController::new();
        let waiter = tokio::spawn(controller.clone().wait());

        controller.clone().shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}

//! gRPC 服务器 Provider

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use project_config::GrpcSettings;
use project_errors::{ProviderError, ProviderResult};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;
use tonic::transport::Server;
use tower::Service;
use tracing::{debug, info, warn};

use super::health::{HealthReporter, HealthServer, ServingStatus};
use crate::hooks::{AllowAll, Authenticator};
use crate::interceptor::{GrpcRequest, GrpcResponse, Hook, InterceptorChain, ServerChainOptions, server_chain};
use crate::provider::{LifecycleState, Provider, RunProvider};
use crate::shutdown::ShutdownController;

/// gRPC 服务器
///
/// - `init` 构建拦截器链
/// - `run` 绑定端口、发布地址、打开就绪闸门，然后一直服务到关闭
/// - `close` 触发优雅关闭，并在宽限期内等待 `run` 返回
pub struct GrpcServer {
    settings: GrpcSettings,
    lifecycle: LifecycleState,
    routes: Mutex<Option<RoutesBuilder>>,
    authenticator: Arc<dyn Authenticator>,
    custom_hooks: Vec<Hook>,
    chain: OnceLock<InterceptorChain>,
    health: Arc<HealthReporter>,
    local_addr: OnceLock<SocketAddr>,
    shutdown: ShutdownController,
    stopped: CancellationToken,
}

impl GrpcServer {
    pub fn new(settings: GrpcSettings) -> Self {
        Self {
            settings,
            lifecycle: LifecycleState::new(),
            routes: Mutex::new(Some(RoutesBuilder::default())),
            authenticator: Arc::new(AllowAll),
            custom_hooks: Vec::new(),
            chain: OnceLock::new(),
            health: Arc::new(HealthReporter::new()),
            local_addr: OnceLock::new(),
            shutdown: ShutdownController::new(),
            stopped: CancellationToken::new(),
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// 追加在内置拦截器之后的自定义拦截器
    pub fn with_hooks(mut self, hooks: impl IntoIterator<Item = Hook>) -> Self {
        self.custom_hooks.extend(hooks);
        self
    }

    pub fn settings(&self) -> &GrpcSettings {
        &self.settings
    }

    /// 注册 tonic 服务，必须在 `run` 之前调用
    pub fn add_service<S>(&self, service: S) -> ProviderResult<()>
    where
        S: Service<GrpcRequest, Response = GrpcResponse, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let mut routes = self
            .routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(routes) = routes.as_mut() else {
            return Err(ProviderError::AlreadyServing(self.name().to_string()));
        };

        routes.add_service(service);
        self.health.set_serving_status(S::NAME, ServingStatus::Serving);
        debug!(service = S::NAME, "gRPC service registered");
        Ok(())
    }

    /// 实际监听的地址，`run` 绑定端口之后可用
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn health(&self) -> &Arc<HealthReporter> {
        &self.health
    }
}

#[async_trait]
impl Provider for GrpcServer {
    fn name(&self) -> &str {
        "GrpcServer"
    }

    async fn init(&self) -> ProviderResult<()> {
        let chain = server_chain(ServerChainOptions {
            log_calls: self.settings.log_interceptor,
            log_payload: self.settings.log_payload,
            authenticator: self.authenticator.clone(),
            custom: self.custom_hooks.clone(),
        });
        debug!(hooks = chain.len(), "gRPC interceptor chain built");

        if self.chain.set(chain).is_err() {
            warn!("gRPC server initialized twice, keeping the first interceptor chain");
        }
        Ok(())
    }

    async fn close(&self) -> ProviderResult<()> {
        self.shutdown.shutdown();
        if !self.lifecycle.is_running() {
            return Ok(());
        }

        let grace = self.settings.shutdown_grace();
        tokio::time::timeout(grace, self.stopped.cancelled())
            .await
            .map_err(|_| ProviderError::timeout("gRPC graceful stop", grace))?;
        info!("gRPC server stopped");
        Ok(())
    }

    fn into_runnable(self: Arc<Self>) -> Option<Arc<dyn RunProvider>> {
        Some(self)
    }
}

#[async_trait]
impl RunProvider for GrpcServer {
    async fn run(&self) -> ProviderResult<()> {
        let chain = self
            .chain
            .get()
            .cloned()
            .ok_or_else(|| ProviderError::NotInitialized(self.name().to_string()))?;
        let routes = self
            .routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut routes) = routes else {
            return Err(ProviderError::AlreadyServing(self.name().to_string()));
        };

        let listener = TcpListener::bind((self.settings.host.as_str(), self.settings.port)).await?;
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);
        self.lifecycle.set_running();

        if self.settings.health_enabled {
            routes.add_service(HealthServer::from_arc(self.health.clone()));
        }

        info!(%addr, "gRPC server listening");

        let result = Server::builder()
            .layer(chain)
            .add_routes(routes.routes())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), self.shutdown.wait())
            .await;
        self.stopped.cancel();

        result.map_err(ProviderError::from)
    }

    fn lifecycle(&self) -> &LifecycleState {
        &self.lifecycle
    }
}

//! HTTP 网关 Provider
//!
//! 等待 gRPC 服务器就绪后拨号，构建路由表并以 HTTP 对外服务。

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use project_bootstrap::grpc::GrpcServer;
use project_bootstrap::{
    App, LifecycleState, Provider, RunProvider, ShutdownController, client_chain, wait_for_running,
};
use project_config::GatewaySettings;
use project_errors::{ProviderError, ProviderResult};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::marshaler::JsonPb;
use crate::mux::{GatewayClient, MuxOptions, RegisterFn, ServeMux};
use crate::wrapper::MuxWrapper;

/// 网关状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Disabled,
    WaitingForUpstream,
    Connecting,
    Serving,
    Closing,
    Closed,
}

#[derive(Default)]
struct Registrations {
    pending: Vec<RegisterFn>,
    sealed: bool,
}

/// HTTP 网关
pub struct Gateway {
    settings: GatewaySettings,
    app: Arc<App>,
    upstream: Arc<GrpcServer>,
    lifecycle: LifecycleState,
    state: Mutex<GatewayState>,
    registrations: Mutex<Registrations>,
    client: Mutex<Option<GatewayClient>>,
    metrics: Option<PrometheusHandle>,
    local_addr: OnceLock<SocketAddr>,
    shutdown: ShutdownController,
    stopped: CancellationToken,
}

impl Gateway {
    pub fn new(settings: GatewaySettings, app: Arc<App>, upstream: Arc<GrpcServer>) -> Self {
        let state = if settings.enabled {
            GatewayState::WaitingForUpstream
        } else {
            GatewayState::Disabled
        };
        Self {
            settings,
            app,
            upstream,
            lifecycle: LifecycleState::new(),
            state: Mutex::new(state),
            registrations: Mutex::new(Registrations::default()),
            client: Mutex::new(None),
            metrics: None,
            local_addr: OnceLock::new(),
            shutdown: ShutdownController::new(),
            stopped: CancellationToken::new(),
        }
    }

    /// 在网关上暴露 Prometheus `/metrics`
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn state(&self) -> GatewayState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: GatewayState) {
        let mut current = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(from = ?*current, to = ?state, "gateway state changed");
        *current = state;
    }

    /// 关闭开始后状态不再前进，返回 false
    fn advance(&self, next: GatewayState) -> bool {
        let mut current = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(*current, GatewayState::Closing | GatewayState::Closed) {
            debug!(state = ?*current, skipped = ?next, "gateway is closing");
            return false;
        }
        debug!(from = ?*current, to = ?next, "gateway state changed");
        *current = next;
        true
    }

    /// 保存客户端、打开就绪闸门并进入 Serving
    ///
    /// 与 `close` 互斥：关闭已经开始时什么也不做，客户端随之丢弃。
    fn start_serving(&self, client: GatewayClient) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(*state, GatewayState::Closing | GatewayState::Closed) {
            debug!(state = ?*state, "gateway closed before serving");
            return false;
        }
        *self.client.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(client);
        self.lifecycle.set_running();
        *state = GatewayState::Serving;
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.state() != GatewayState::Disabled
    }

    /// 实际监听的地址，开始服务之后可用
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// 登记服务注册函数
    ///
    /// 注册函数在上游就绪、客户端建立之后才会执行；网关开始服务后再登记会被拒绝。
    /// 网关关闭时直接忽略。
    pub fn register_services(&self, register: &[RegisterFn]) -> ProviderResult<()> {
        if !self.is_enabled() {
            debug!(count = register.len(), "gateway disabled, ignoring service registrations");
            return Ok(());
        }

        let mut registrations = self
            .registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if registrations.sealed {
            return Err(ProviderError::AlreadyServing(self.name().to_string()));
        }
        registrations.pending.extend_from_slice(register);
        Ok(())
    }

    async fn connect(&self, addr: SocketAddr) -> ProviderResult<Channel> {
        let target = dial_target(addr);
        let timeout = self.settings.dial_timeout();
        let endpoint = Endpoint::from_shared(format!("http://{}", target))?.connect_timeout(timeout);

        debug!(%target, ?timeout, "dialing gRPC server");
        let channel = tokio::time::timeout(timeout, endpoint.connect())
            .await
            .map_err(|_| ProviderError::timeout("gRPC dial", timeout))??;
        Ok(channel)
    }

    fn build_mux(&self, client: &GatewayClient) -> ProviderResult<ServeMux> {
        let grpc = self.upstream.settings();
        let marshaler = JsonPb::new()
            .with_emit_defaults(!grpc.disable_emit_defaults)
            .with_enums_as_ints(grpc.use_enum_as_int);
        let mut mux = ServeMux::new(MuxOptions {
            marshaler: Arc::new(marshaler),
            ..Default::default()
        });

        let pending = {
            let mut registrations = self
                .registrations
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registrations.sealed = true;
            std::mem::take(&mut registrations.pending)
        };
        for register in pending {
            register(&mut mux, client)?;
        }

        if let Some(handle) = &self.metrics {
            let handle = handle.clone();
            mux.handle_get("/metrics", move || {
                let handle = handle.clone();
                async move { handle.render() }
            })?;
        }

        info!(routes = mux.len(), "gateway routes registered");
        Ok(mux)
    }
}

/// 未指定地址（`0.0.0.0` / `::`）换成回环地址
fn dial_target(mut addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        let loopback: IpAddr = match addr {
            SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
        };
        addr.set_ip(loopback);
    }
    addr
}

#[async_trait]
impl Provider for Gateway {
    fn name(&self) -> &str {
        "Gateway"
    }

    async fn init(&self) -> ProviderResult<()> {
        if !self.is_enabled() {
            info!("HTTP gateway disabled");
        }
        Ok(())
    }

    async fn close(&self) -> ProviderResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        self.set_state(GatewayState::Closing);
        self.shutdown.shutdown();

        if self.lifecycle.is_running() {
            let grace = self.settings.shutdown_grace();
            if tokio::time::timeout(grace, self.stopped.cancelled()).await.is_err() {
                warn!(?grace, "HTTP gateway did not drain in time");
                return Err(ProviderError::timeout("gateway drain", grace));
            }
        }

        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.set_state(GatewayState::Closed);
        info!("HTTP gateway closed");
        Ok(())
    }

    fn into_runnable(self: Arc<Self>) -> Option<Arc<dyn RunProvider>> {
        Some(self)
    }
}

#[async_trait]
impl RunProvider for Gateway {
    async fn run(&self) -> ProviderResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        tokio::select! {
            ready = wait_for_running(self.upstream.as_ref(), self.settings.upstream_attempts) => ready?,
            _ = self.shutdown.wait() => {
                debug!("gateway closed while waiting for the gRPC server");
                return Ok(());
            }
        }

        if !self.advance(GatewayState::Connecting) {
            return Ok(());
        }
        let upstream_addr = self
            .upstream
            .local_addr()
            .ok_or_else(|| ProviderError::not_ready(self.upstream.name(), self.settings.upstream_attempts))?;
        let channel = tokio::select! {
            channel = self.connect(upstream_addr) => channel?,
            _ = self.shutdown.wait() => {
                debug!("gateway closed while dialing the gRPC server");
                return Ok(());
            }
        };
        let client = tonic::client::Grpc::new(client_chain(self.settings.log_payload).wrap(channel));
        let mux = self.build_mux(&client)?;

        let listener = TcpListener::bind((self.settings.host.as_str(), self.settings.port)).await?;
        let addr = listener.local_addr()?;

        let base_path = self.app.parse_path(&[]);
        let service = MuxWrapper::new(mux.into_router(), base_path.as_str(), self.app.special_url_path());

        if !self.start_serving(client) {
            return Ok(());
        }
        let _ = self.local_addr.set(addr);
        info!(%addr, %base_path, upstream = %upstream_addr, "HTTP gateway listening");

        let make_service =
            axum::ServiceExt::<axum::extract::Request>::into_make_service(service);
        let result = axum::serve(listener, make_service)
            .with_graceful_shutdown(self.shutdown.wait())
            .await;
        self.stopped.cancel();

        result.map_err(ProviderError::from)
    }

    fn lifecycle(&self) -> &LifecycleState {
        &self.lifecycle
    }
}

//! gRPC 拦截器链
//!
//! 每个拦截器是一个 `Fn(BoxGrpcService) -> BoxGrpcService`，
//! 第一个拦截器位于最外层：hook₁(hook₂(…(service)))。
//! tonic 的一元调用与流式调用走同一个 HTTP service，所以一条链同时覆盖两种调用。

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tonic::body::Body;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};

use crate::hooks::{self, AllowAll, Authenticator, MetricNames};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type GrpcRequest = http::Request<Body>;
pub type GrpcResponse = http::Response<Body>;
pub type BoxGrpcService = BoxCloneSyncService<GrpcRequest, GrpcResponse, BoxError>;

/// 单个拦截器
pub type Hook = Arc<dyn Fn(BoxGrpcService) -> BoxGrpcService + Send + Sync>;

/// 有序的拦截器列表，初始化时构建，之后只读
#[derive(Clone, Default)]
pub struct InterceptorChain {
    hooks: Vec<Hook>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加到链尾（更靠近被包装的服务）
    pub fn push<F>(mut self, hook: F) -> Self
    where
        F: Fn(BoxGrpcService) -> BoxGrpcService + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn extend(mut self, hooks: impl IntoIterator<Item = Hook>) -> Self {
        self.hooks.extend(hooks);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// 用整条链包装服务
    pub fn wrap<S, B>(&self, inner: S) -> BoxGrpcService
    where
        S: Service<GrpcRequest, Response = http::Response<B>> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let terminal = inner
            .map_response(|response: http::Response<B>| response.map(Body::new))
            .map_err(|err: S::Error| -> BoxError { err.into() });

        self.hooks
            .iter()
            .rev()
            .fold(BoxCloneSyncService::new(terminal), |service, hook| hook(service))
    }
}

impl<S, B> Layer<S> for InterceptorChain
where
    S: Service<GrpcRequest, Response = http::Response<B>> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Service = BoxGrpcService;

    fn layer(&self, inner: S) -> Self::Service {
        self.wrap(inner)
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// 服务端拦截器选项
pub struct ServerChainOptions {
    /// 记录每次调用的结果与耗时
    pub log_calls: bool,
    /// 记录请求/响应内容
    pub log_payload: bool,
    pub authenticator: Arc<dyn Authenticator>,
    /// 追加在内置拦截器之后的自定义拦截器
    pub custom: Vec<Hook>,
}

impl Default for ServerChainOptions {
    fn default() -> Self {
        Self {
            log_calls: true,
            log_payload: false,
            authenticator: Arc::new(AllowAll),
            custom: Vec::new(),
        }
    }
}

/// 服务端链：tags → metrics → auth → recovery → [logging] → [payload] → custom
pub fn server_chain(options: ServerChainOptions) -> InterceptorChain {
    let authenticator = options.authenticator;
    let mut chain = InterceptorChain::new()
        .push(hooks::tags)
        .push(|inner| hooks::metrics(inner, &MetricNames::SERVER))
        .push(move |inner| hooks::auth(inner, authenticator.clone()))
        .push(hooks::recovery);

    if options.log_calls {
        chain = chain.push(|inner| hooks::logging(inner, "server"));
    }
    if options.log_payload {
        chain = chain.push(|inner| hooks::payload_logging(inner, "server"));
    }
    chain.extend(options.custom)
}

/// 客户端链：tags → metrics → logging → [payload]
pub fn client_chain(log_payload: bool) -> InterceptorChain {
    let chain = InterceptorChain::new()
        .push(hooks::tags)
        .push(|inner| hooks::metrics(inner, &MetricNames::CLIENT))
        .push(|inner| hooks::logging(inner, "client"));

    if log_payload {
        chain.push(|inner| hooks::payload_logging(inner, "client"))
    } else {
        chain
    }
}

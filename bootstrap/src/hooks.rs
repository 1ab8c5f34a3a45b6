//! 内置拦截器
//!
//! tags、metrics、auth、recovery、logging、payload logging。

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use http::HeaderMap;
use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::BodyExt;
use metrics::{counter, histogram};
use tonic::body::Body;
use tonic::{Code, Status};
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::interceptor::{BoxGrpcService, GrpcRequest, GrpcResponse};

const REQUEST_ID_HEADERS: [&str; 2] = ["x-request-id", "x-trace-id"];

/// 请求 ID，由 tags 拦截器写入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// 从请求头获取请求 ID，没有则生成一个 UUID v7
pub fn request_id(headers: &HeaderMap) -> String {
    REQUEST_ID_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string())
}

/// `/pkg.Service/Method` → (`pkg.Service`, `Method`)
pub fn split_method(path: &str) -> (&str, &str) {
    path.trim_start_matches('/')
        .split_once('/')
        .unwrap_or(("unknown", "unknown"))
}

/// 从头部或尾部读取 grpc-status
pub fn grpc_code(headers: &HeaderMap) -> Option<Code> {
    headers
        .get("grpc-status")
        .map(|value| Code::from_bytes(value.as_bytes()))
}

/// 构造只含状态的 gRPC 响应
pub fn status_response(status: &Status) -> GrpcResponse {
    let mut response = http::Response::new(Body::empty());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    if let Err(err) = status.add_header(response.headers_mut()) {
        warn!(error = %err, "Failed to encode grpc status headers");
    }
    response
}

/// 调用结束（收到 grpc-status）时执行 `done`
///
/// 只含状态的响应在头部携带 grpc-status，普通响应在尾部携带。
fn on_completion<F>(response: GrpcResponse, done: F) -> GrpcResponse
where
    F: FnOnce(Code) + Send + 'static,
{
    if let Some(code) = grpc_code(response.headers()) {
        done(code);
        return response;
    }

    let mut done = Some(done);
    let (parts, body) = response.into_parts();
    let body = body.map_frame(move |frame| {
        if let Some(trailers) = frame.trailers_ref() {
            if let Some(done) = done.take() {
                done(grpc_code(trailers).unwrap_or(Code::Ok));
            }
        }
        frame
    });
    http::Response::from_parts(parts, Body::new(body))
}

/// 生成 span 并写入请求 ID
pub fn tags(inner: BoxGrpcService) -> BoxGrpcService {
    BoxCloneSyncService::new(tower::service_fn(move |mut req: GrpcRequest| {
        let mut inner = inner.clone();
        let id = request_id(req.headers());
        let span = info_span!("grpc", grpc.method = %req.uri().path(), request_id = %id);
        req.extensions_mut().insert(RequestId(id));
        async move { inner.ready().await?.call(req).await }.instrument(span)
    }))
}

/// Prometheus 指标名称
#[derive(Debug)]
pub struct MetricNames {
    pub started: &'static str,
    pub handled: &'static str,
    pub seconds: &'static str,
}

impl MetricNames {
    pub const SERVER: Self = Self {
        started: "grpc_server_started_total",
        handled: "grpc_server_handled_total",
        seconds: "grpc_server_handling_seconds",
    };

    pub const CLIENT: Self = Self {
        started: "grpc_client_started_total",
        handled: "grpc_client_handled_total",
        seconds: "grpc_client_handling_seconds",
    };
}

/// 记录调用次数、结果和耗时
pub fn metrics(inner: BoxGrpcService, names: &'static MetricNames) -> BoxGrpcService {
    BoxCloneSyncService::new(tower::service_fn(move |req: GrpcRequest| {
        let mut inner = inner.clone();
        let (service, method) = split_method(req.uri().path());
        let labels = [
            ("grpc_service", service.to_string()),
            ("grpc_method", method.to_string()),
        ];
        async move {
            counter!(names.started, &labels).increment(1);
            let started = Instant::now();

            let record = move |code: Code| {
                let mut labels = labels.to_vec();
                labels.push(("grpc_code", format!("{:?}", code)));
                counter!(names.handled, labels.as_slice()).increment(1);
                histogram!(names.seconds, labels.as_slice()).record(started.elapsed().as_secs_f64());
            };

            match inner.ready().await?.call(req).await {
                Ok(response) => Ok(on_completion(response, record)),
                Err(err) => {
                    record(Code::Unavailable);
                    Err(err)
                }
            }
        }
    }))
}

/// 请求认证
///
/// 失败时直接返回错误状态，不再调用内部服务。
pub trait Authenticator: Send + Sync + 'static {
    #[allow(clippy::result_large_err)]
    fn authenticate(&self, request: &mut GrpcRequest) -> Result<(), Status>;
}

/// 放行所有请求
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _request: &mut GrpcRequest) -> Result<(), Status> {
        Ok(())
    }
}

pub fn auth(inner: BoxGrpcService, authenticator: Arc<dyn Authenticator>) -> BoxGrpcService {
    BoxCloneSyncService::new(tower::service_fn(move |mut req: GrpcRequest| {
        let mut inner = inner.clone();
        let verdict = authenticator.authenticate(&mut req);
        async move {
            match verdict {
                Ok(()) => inner.ready().await?.call(req).await,
                Err(status) => {
                    debug!(code = ?status.code(), "Request rejected by authenticator");
                    Ok(status_response(&status))
                }
            }
        }
    }))
}

/// 捕获内部服务与后续拦截器中的 panic，转换为 Internal 状态
pub fn recovery(inner: BoxGrpcService) -> BoxGrpcService {
    BoxCloneSyncService::new(tower::service_fn(move |req: GrpcRequest| {
        let mut inner = inner.clone();
        async move {
            let inner = inner.ready().await?;
            let call = match std::panic::catch_unwind(AssertUnwindSafe(|| inner.call(req))) {
                Ok(call) => call,
                Err(panic) => return Ok(recovered(panic)),
            };
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Ok(recovered(panic)),
            }
        }
    }))
}

fn recovered(panic: Box<dyn Any + Send>) -> GrpcResponse {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    error!(
        panic = %message,
        backtrace = %Backtrace::force_capture(),
        "Recovered from panic in grpc handler"
    );
    status_response(&Status::internal(message))
}

/// 记录每次调用的结果与耗时
pub fn logging(inner: BoxGrpcService, side: &'static str) -> BoxGrpcService {
    BoxCloneSyncService::new(tower::service_fn(move |req: GrpcRequest| {
        let mut inner = inner.clone();
        let method = req.uri().path().to_string();
        async move {
            let started = Instant::now();
            match inner.ready().await?.call(req).await {
                Ok(response) => Ok(on_completion(response, move |code| {
                    let elapsed = started.elapsed().as_nanos() as u64;
                    if code == Code::Ok {
                        info!(grpc.side = side, grpc.method = %method, grpc.code = ?code, grpc.time_ns = elapsed, "finished call");
                    } else {
                        warn!(grpc.side = side, grpc.method = %method, grpc.code = ?code, grpc.time_ns = elapsed, "finished call");
                    }
                })),
                Err(err) => {
                    error!(grpc.side = side, grpc.method = %method, error = %err, "call failed");
                    Err(err)
                }
            }
        }
    }))
}

/// 记录请求与响应的每个数据帧
pub fn payload_logging(inner: BoxGrpcService, side: &'static str) -> BoxGrpcService {
    BoxCloneSyncService::new(tower::service_fn(move |req: GrpcRequest| {
        let mut inner = inner.clone();
        let method = req.uri().path().to_string();
        let req = req.map(|body| Body::new(log_frames(body, side, "request", method.clone())));
        async move {
            let response = inner.ready().await?.call(req).await?;
            Ok(response.map(|body| Body::new(log_frames(body, side, "response", method))))
        }
    }))
}

fn log_frames(
    body: Body,
    side: &'static str,
    direction: &'static str,
    method: String,
) -> impl http_body::Body<Data = bytes::Bytes, Error = <Body as http_body::Body>::Error> + Send + 'static
{
    body.map_frame(move |frame| {
        if let Some(data) = frame.data_ref() {
            debug!(
                grpc.side = side,
                grpc.method = %method,
                direction,
                size = data.len(),
                payload = ?data,
                "grpc payload"
            );
        }
        frame
    })
}

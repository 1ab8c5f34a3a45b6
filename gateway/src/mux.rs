//! REST 路由表
//!
//! 每条路由把一个 HTTP 方法 + 路径模板映射到一个 gRPC unary 方法：
//! 请求 JSON 由请求体、路径参数和查询参数合成，经网关客户端调用上游，
//! 响应按 protojson 规则编码；失败统一交给错误处理函数。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use axum::extract::RawPathParams;
use axum::extract::rejection::RawPathParamsRejection;
use axum::handler::Handler;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, get, on};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::uri::PathAndQuery;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use project_bootstrap::BoxGrpcService;
use project_bootstrap::BoxError;
use project_bootstrap::json;
use project_errors::{ProviderError, ProviderResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tonic::Status;
use tonic::codec::ProstCodec;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::{
    ErrorContext, ErrorHandler, GatewayError, ServerMetadata, http_error, metadata_to_headers,
};
use crate::header::{HeaderMatcher, incoming_header_matcher, incoming_metadata};
use crate::marshaler::{JsonPb, MarshalError, Marshaler};

/// 经过客户端拦截器链的上游 gRPC 客户端
pub type GatewayClient = tonic::client::Grpc<BoxGrpcService>;

/// 服务注册函数：向路由表登记一个 gRPC 服务的全部 REST 路由
pub type RegisterFn = fn(&mut ServeMux, &GatewayClient) -> ProviderResult<()>;

/// 请求体映射到请求消息的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMapping {
    /// 忽略请求体
    None,
    /// 整个请求体就是请求消息（`body: "*"`）
    Whole,
    /// 请求体是请求消息中的一个字段
    Field(&'static str),
}

/// 一条 REST 路由
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    /// axum 路径模板，例如 `/v1/projects/{project_id}`
    pub pattern: &'static str,
    /// gRPC 方法全路径，例如 `/platform.v1.ProjectAPI/GetProject`
    pub grpc_method: &'static str,
    pub body: BodyMapping,
}

impl Route {
    pub fn new(method: Method, pattern: &'static str, grpc_method: &'static str) -> Self {
        Self {
            method,
            pattern,
            grpc_method,
            body: BodyMapping::None,
        }
    }

    pub fn with_body(mut self, body: BodyMapping) -> Self {
        self.body = body;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Call {
    grpc_method: &'static str,
    body: BodyMapping,
}

/// 路由表选项
pub struct MuxOptions {
    pub marshaler: Arc<dyn Marshaler>,
    pub error_handler: ErrorHandler,
    pub header_matcher: HeaderMatcher,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            marshaler: Arc::new(JsonPb::new()),
            error_handler: http_error,
            header_matcher: incoming_header_matcher,
        }
    }
}

impl MuxOptions {
    pub fn handle_error(
        &self,
        request_headers: &HeaderMap,
        metadata: ServerMetadata,
        err: GatewayError,
    ) -> Response {
        (self.error_handler)(
            ErrorContext {
                metadata,
                marshaler: self.marshaler.as_ref(),
                request_headers,
                response_headers: HeaderMap::new(),
            },
            err,
        )
    }
}

/// HTTP 路由表
pub struct ServeMux {
    router: Router,
    /// (方法, 去掉参数名的路径模板)
    registered: HashSet<(Method, String)>,
    /// 去掉参数名的路径模板 -> 第一次登记时的原始模板
    patterns: HashMap<String, &'static str>,
    options: Arc<MuxOptions>,
}

impl Default for ServeMux {
    fn default() -> Self {
        Self::new(MuxOptions::default())
    }
}

impl ServeMux {
    pub fn new(options: MuxOptions) -> Self {
        Self {
            router: Router::new(),
            registered: HashSet::new(),
            patterns: HashMap::new(),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &MuxOptions {
        &self.options
    }

    /// 已登记的路由数
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// 登记一条转发到 gRPC unary 方法的路由
    pub fn handle_unary<Req, Resp>(&mut self, route: Route, client: &GatewayClient) -> ProviderResult<()>
    where
        Req: prost::Message + DeserializeOwned + Default + 'static,
        Resp: prost::Message + Serialize + Default + 'static,
    {
        let filter = self.claim(&route.method, route.pattern)?;
        let call = Call {
            grpc_method: route.grpc_method,
            body: route.body,
        };
        let client = client.clone();
        let options = self.options.clone();
        let handler = move |params: Result<RawPathParams, RawPathParamsRejection>,
                            uri: Uri,
                            headers: HeaderMap,
                            body: Bytes| {
            forward::<Req, Resp>(client.clone(), options.clone(), call, params, uri, headers, body)
        };

        self.router = std::mem::take(&mut self.router).route(route.pattern, on(filter, handler));
        debug!(
            method = %route.method,
            pattern = route.pattern,
            grpc_method = route.grpc_method,
            "gateway route registered"
        );
        Ok(())
    }

    /// 登记一个普通的 GET 处理函数，例如 `/metrics`
    pub fn handle_get<H, T>(&mut self, pattern: &'static str, handler: H) -> ProviderResult<()>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.claim(&Method::GET, pattern)?;
        self.router = std::mem::take(&mut self.router).route(pattern, get(handler));
        Ok(())
    }

    fn claim(&mut self, method: &Method, pattern: &'static str) -> ProviderResult<MethodFilter> {
        if !pattern.starts_with('/') {
            return Err(ProviderError::registration(format!(
                "route pattern must start with '/': {}",
                pattern
            )));
        }
        let filter = MethodFilter::try_from(method.clone()).map_err(|err| {
            ProviderError::registration(format!("{} {}: {}", method, pattern, err))
        })?;
        let shape = route_shape(pattern);
        if let Some(existing) = self.patterns.get(&shape) {
            if *existing != pattern {
                return Err(ProviderError::registration(format!(
                    "route {} {} conflicts with {}",
                    method, pattern, existing
                )));
            }
        }
        if !self.registered.insert((method.clone(), shape.clone())) {
            return Err(ProviderError::registration(format!(
                "duplicate route {} {}",
                method, pattern
            )));
        }
        self.patterns.insert(shape, pattern);
        Ok(filter)
    }

    /// 装上 404/405 处理与请求追踪，得到最终的 axum Router
    pub fn into_router(self) -> Router {
        let not_found = self.options.clone();
        let not_allowed = self.options.clone();
        self.router
            .fallback(move |headers: HeaderMap| {
                let options = not_found.clone();
                async move {
                    let err = GatewayError::http_status(
                        StatusCode::NOT_FOUND,
                        Status::not_found("Not Found"),
                    );
                    options.handle_error(&headers, ServerMetadata::default(), err)
                }
            })
            .method_not_allowed_fallback(move |headers: HeaderMap| {
                let options = not_allowed.clone();
                async move {
                    let err = GatewayError::http_status(
                        StatusCode::METHOD_NOT_ALLOWED,
                        Status::unimplemented("Method Not Allowed"),
                    );
                    options.handle_error(&headers, ServerMetadata::default(), err)
                }
            })
            .layer(TraceLayer::new_for_http())
    }
}

/// 参数名不参与比较：`/x/{id}` 与 `/x/{project_id}` 在路由树里是同一个位置
fn route_shape(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if !(segment.starts_with('{') && segment.ends_with('}')) {
                segment
            } else if segment.starts_with("{*") {
                "{*}"
            } else {
                "{}"
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

async fn forward<Req, Resp>(
    mut client: GatewayClient,
    options: Arc<MuxOptions>,
    call: Call,
    params: Result<RawPathParams, RawPathParamsRejection>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    Req: prost::Message + DeserializeOwned + Default + 'static,
    Resp: prost::Message + Serialize + Default + 'static,
{
    let message = match decode_request::<Req>(options.marshaler.as_ref(), call.body, params, &uri, &body) {
        Ok(message) => message,
        Err(err) => return options.handle_error(&headers, ServerMetadata::default(), err),
    };

    let mut request = tonic::Request::new(message);
    *request.metadata_mut() = incoming_metadata(&headers, options.header_matcher);

    let ready: Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + '_>> =
        Box::pin(client.ready());
    if let Err(err) = ready.await {
        let status = Status::unavailable(format!("upstream not ready: {}", err));
        return options.handle_error(&headers, ServerMetadata::default(), status.into());
    }

    let codec = ProstCodec::<Req, Resp>::default();
    let unary: Pin<Box<dyn Future<Output = Result<tonic::Response<Resp>, Status>> + Send + '_>> =
        Box::pin(client.unary(request, PathAndQuery::from_static(call.grpc_method), codec));
    match unary.await {
        Ok(response) => forward_response(&options, &headers, response),
        Err(status) => {
            let metadata = ServerMetadata::from_status(&status);
            options.handle_error(&headers, metadata, status.into())
        }
    }
}

/// 合成请求 JSON：请求体 -> 路径参数 -> 查询参数（`Whole` 时忽略查询参数）
fn decode_request<Req: DeserializeOwned>(
    marshaler: &dyn Marshaler,
    mapping: BodyMapping,
    params: Result<RawPathParams, RawPathParamsRejection>,
    uri: &Uri,
    body: &[u8],
) -> Result<Req, GatewayError> {
    let mut fields = match mapping {
        BodyMapping::None => Map::new(),
        BodyMapping::Whole => match marshaler.unmarshal(body)? {
            Value::Object(fields) => fields,
            _ => return Err(MarshalError::invalid("request body must be a JSON object").into()),
        },
        BodyMapping::Field(field) => {
            let mut fields = Map::new();
            fields.insert(field.to_string(), marshaler.unmarshal(body)?);
            fields
        }
    };

    let mut path_keys = Vec::new();
    match params {
        Ok(params) => {
            for (key, value) in params.iter() {
                set_field(&mut fields, key, Value::String(value.to_string()));
                path_keys.push(key.to_string());
            }
        }
        Err(RawPathParamsRejection::MissingPathParams(_)) => {}
        Err(rejection) => {
            return Err(Status::invalid_argument(rejection.body_text()).into());
        }
    }

    if mapping != BodyMapping::Whole {
        if let Some(query) = uri.query() {
            populate_query(&mut fields, query, &path_keys);
        }
    }

    serde_json::from_value(Value::Object(fields))
        .map_err(|err| GatewayError::from(MarshalError::from(err)))
}

/// 重复的键合并为数组；与路径参数同名的键被忽略
fn populate_query(fields: &mut Map<String, Value>, query: &str, path_keys: &[String]) {
    let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if path_keys.iter().any(|path_key| path_key.as_str() == key.as_ref()) {
            continue;
        }
        values
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    for (key, mut list) in values {
        let value = if list.len() == 1 {
            Value::String(list.remove(0))
        } else {
            Value::Array(list.into_iter().map(Value::String).collect())
        };
        set_field(fields, &key, value);
    }
}

/// `a.b.c` 形式的键写入嵌套对象
fn set_field(fields: &mut Map<String, Value>, dotted: &str, value: Value) {
    let mut segments = dotted.split('.').peekable();
    let mut current = fields;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
}

fn forward_response<Resp: Serialize>(
    options: &MuxOptions,
    request_headers: &HeaderMap,
    response: tonic::Response<Resp>,
) -> Response {
    let (metadata, message, _) = response.into_parts();

    let body = match json::to_value(&message, options.marshaler.encode_options())
        .map_err(MarshalError::from)
        .and_then(|value| options.marshaler.marshal(&value))
    {
        Ok(body) => body,
        Err(err) => {
            let status = Status::internal(format!("failed to marshal response: {}", err));
            return options.handle_error(request_headers, ServerMetadata::default(), status.into());
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(options.marshaler.content_type()));
    for (name, value) in &metadata_to_headers(&metadata) {
        if name.as_str().starts_with("grpc-") {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(format!("grpc-metadata-{}", name).as_bytes()) else {
            continue;
        };
        headers.append(name, value.clone());
    }

    (StatusCode::OK, headers, body).into_response()
}

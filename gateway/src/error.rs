//! gRPC 错误到 HTTP 响应的翻译

use std::convert::Infallible;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, TE, TRAILER, TRANSFER_ENCODING, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::StreamBody;
use http_body::Frame;
use serde::Serialize;
use thiserror::Error;
use tonic::metadata::{KeyAndValueRef, MetadataMap};
use tonic::{Code, Status};
use tracing::warn;

use crate::details::{ErrorDetail, status_details};
use crate::header::{METADATA_TRAILER_PREFIX, canonical_header_key};
use crate::marshaler::{MarshalError, Marshaler};

/// 序列化错误体失败时的固定响应体
pub const FALLBACK_ERROR_BODY: &str = r#"{"error": "failed to marshal error message"}"#;

const HEADER_METADATA_PREFIX: &str = "grpc-metadata-";

/// 网关处理请求时产生的错误
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Status(#[from] Status),

    /// 路由阶段产生的错误，携带建议的 HTTP 状态码；翻译时只使用内部状态
    #[error("HTTP {status}: {source}")]
    HttpStatus {
        status: StatusCode,
        #[source]
        source: Status,
    },

    #[error("request decoding failed: {0}")]
    Marshal(#[from] MarshalError),
}

impl GatewayError {
    pub fn http_status(status: StatusCode, source: Status) -> Self {
        Self::HttpStatus { status, source }
    }

    /// 去掉 HTTP 状态包装，得到最终用于翻译的 gRPC 状态
    pub fn into_status(self) -> Status {
        match self {
            Self::Status(status) | Self::HttpStatus { source: status, .. } => status,
            Self::Marshal(err) => Status::invalid_argument(err.to_string()),
        }
    }
}

/// gRPC 状态码到 HTTP 状态码
pub fn http_status_from_code(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        // nginx 的 499 Client Closed Request
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::BAD_REQUEST,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
    }
}

/// HTTP 错误体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub code: i32,
    pub message: String,
    pub details: Vec<ErrorDetail>,
}

impl ErrorEnvelope {
    /// 未识别的详情被丢弃
    pub fn from_status(status: &Status) -> Self {
        let details = status_details(status)
            .into_iter()
            .filter(|detail| {
                let keep = detail.is_recognized();
                if !keep {
                    warn!(detail = detail.type_name(), "dropping unrecognized error detail");
                }
                keep
            })
            .collect();
        Self {
            code: status.code() as i32,
            message: status.message().to_string(),
            details,
        }
    }
}

/// 上游返回的 header 与 trailer metadata
#[derive(Debug, Clone, Default)]
pub struct ServerMetadata {
    pub header: HeaderMap,
    pub trailer: HeaderMap,
}

impl ServerMetadata {
    /// tonic 把响应头与 trailer 合并进状态的 metadata，两边都取同一份
    pub fn from_status(status: &Status) -> Self {
        let metadata = metadata_to_headers(status.metadata());
        Self {
            header: metadata.clone(),
            trailer: metadata,
        }
    }
}

/// 不合法的 HTTP 头会被跳过
pub fn metadata_to_headers(metadata: &MetadataMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(metadata.len());
    for entry in metadata.iter() {
        let (key, value) = match entry {
            KeyAndValueRef::Ascii(key, value) => (key.as_str(), value.as_encoded_bytes()),
            KeyAndValueRef::Binary(key, value) => (key.as_str(), value.as_encoded_bytes()),
        };
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_bytes(value),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

/// 错误处理所需的上下文
pub struct ErrorContext<'a> {
    pub metadata: ServerMetadata,
    pub marshaler: &'a dyn Marshaler,
    pub request_headers: &'a HeaderMap,
    /// 已经写入的响应头
    pub response_headers: HeaderMap,
}

/// 可替换的错误处理函数
pub type ErrorHandler = fn(ErrorContext<'_>, GatewayError) -> Response;

/// 默认错误处理：把错误翻译为带 JSON 错误体的 HTTP 响应
pub fn http_error(ctx: ErrorContext<'_>, err: GatewayError) -> Response {
    let status = err.into_status();
    let envelope = ErrorEnvelope::from_status(&status);

    let mut headers = ctx.response_headers;
    headers.remove(TRAILER);
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ctx.marshaler.content_type()));

    if status.code() == Code::Unauthenticated {
        match HeaderValue::from_str(status.message()) {
            Ok(value) => {
                headers.insert(WWW_AUTHENTICATE, value);
            }
            Err(_) => warn!("status message is not a valid WWW-Authenticate value"),
        }
    }

    let body = match serde_json::to_value(&envelope)
        .map_err(MarshalError::from)
        .and_then(|value| ctx.marshaler.marshal_envelope(&value))
    {
        Ok(body) => body,
        Err(err) => {
            warn!(error = %err, "failed to marshal error message");
            return (StatusCode::INTERNAL_SERVER_ERROR, headers, FALLBACK_ERROR_BODY)
                .into_response();
        }
    };

    for (name, value) in &ctx.metadata.header {
        let Some(stripped) = name.as_str().strip_prefix(HEADER_METADATA_PREFIX) else {
            continue;
        };
        if let Ok(name) = HeaderName::from_bytes(stripped.as_bytes()) {
            headers.append(name, value.clone());
        }
    }

    let http_status = http_status_from_code(status.code());

    if !accepts_trailers(ctx.request_headers) {
        return (http_status, headers, body).into_response();
    }

    let mut trailers = HeaderMap::new();
    for name in ctx.metadata.trailer.keys() {
        let declared = canonical_header_key(&format!("{}{}", METADATA_TRAILER_PREFIX, name));
        let Ok(trailer_name) = HeaderName::from_bytes(declared.as_bytes()) else {
            continue;
        };
        if let Ok(value) = HeaderValue::from_str(&declared) {
            headers.append(TRAILER, value);
        }
        for value in ctx.metadata.trailer.get_all(name) {
            trailers.append(trailer_name.clone(), value.clone());
        }
    }
    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

    let frames = futures::stream::iter([
        Ok::<_, Infallible>(Frame::data(Bytes::from(body))),
        Ok(Frame::trailers(trailers)),
    ]);
    (http_status, headers, Body::new(StreamBody::new(frames))).into_response()
}

fn accepts_trailers(request_headers: &HeaderMap) -> bool {
    request_headers.get_all(TE).iter().any(|value| {
        value
            .to_str()
            .map(|te| te.to_ascii_lowercase().contains("trailers"))
            .unwrap_or(false)
    })
}

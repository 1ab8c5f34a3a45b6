//! project-gateway - gRPC 到 HTTP/JSON 的网关
//!
//! - [`Gateway`]：等待 gRPC 服务器就绪、拨号、构建路由表并对外服务的 Provider
//! - [`ServeMux`]：REST 路由到 gRPC unary 方法的映射
//! - [`MuxWrapper`]：路由前去掉 base path 前缀
//! - [`http_error`]：gRPC 错误到 HTTP 响应的翻译

pub mod details;
pub mod error;
pub mod header;
pub mod marshaler;
pub mod mux;
mod provider;
mod wrapper;

pub use project_bootstrap::json;

pub use details::{ErrorDetail, status_details, status_with_details};
pub use error::{
    ErrorContext, ErrorEnvelope, ErrorHandler, GatewayError, ServerMetadata, http_error,
    http_status_from_code,
};
pub use header::{HeaderMatcher, default_header_matcher, incoming_header_matcher};
pub use json::EncodeOptions;
pub use marshaler::{JsonPb, MarshalError, Marshaler};
pub use mux::{BodyMapping, GatewayClient, MuxOptions, RegisterFn, Route, ServeMux};
pub use provider::{Gateway, GatewayState};
pub use wrapper::MuxWrapper;

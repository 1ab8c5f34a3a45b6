//! project-bootstrap - 服务启动骨架
//!
//! Provider 生命周期编排、就绪等待、gRPC 拦截器链与 gRPC 服务器。
//! [`json`] 放 protojson 的 serde 辅助，健康检查消息与网关共用。

mod app;
pub mod grpc;
pub mod hooks;
mod interceptor;
pub mod json;
mod provider;
mod runtime;
mod shutdown;
mod stack;

pub use app::*;
pub use interceptor::*;
pub use provider::*;
pub use runtime::*;
pub use shutdown::*;
pub use stack::*;

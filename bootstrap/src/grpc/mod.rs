//! gRPC 服务器 Provider 与健康检查服务

pub mod health;
mod server;

pub use health::{
    HEALTH_CHECK_PATH, Health, HealthCheckRequest, HealthCheckResponse, HealthReporter,
    HealthServer, ServingStatus,
};
pub use server::GrpcServer;

//! 把 ProjectAPI 挂到 gRPC 服务器和 HTTP 网关上

use std::sync::Arc;

use async_trait::async_trait;
use project_bootstrap::Provider;
use project_bootstrap::grpc::GrpcServer;
use project_errors::ProviderResult;
use project_gateway::Gateway;
use tracing::info;

use crate::api::{ProjectApiServer, register_health_handler, register_project_api_handler};
use crate::controller::ProjectController;

/// 路由 Provider
///
/// 在 `init` 中注册 gRPC 服务并登记网关路由；网关在上游就绪后才真正应用这些路由。
pub struct Router {
    controller: Arc<ProjectController>,
    grpc: Arc<GrpcServer>,
    gateway: Arc<Gateway>,
}

impl Router {
    pub fn new(grpc: Arc<GrpcServer>, gateway: Arc<Gateway>, controller: Arc<ProjectController>) -> Self {
        Self {
            controller,
            grpc,
            gateway,
        }
    }
}

#[async_trait]
impl Provider for Router {
    fn name(&self) -> &str {
        "Router"
    }

    async fn init(&self) -> ProviderResult<()> {
        self.grpc
            .add_service(ProjectApiServer::from_arc(self.controller.clone()))?;
        self.gateway
            .register_services(&[register_project_api_handler, register_health_handler])?;
        info!("Router initialized");
        Ok(())
    }
}

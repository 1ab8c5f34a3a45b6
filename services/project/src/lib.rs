//! grpc-project-service
//!
//! Provider 的装配顺序：App -> GrpcServer -> Gateway -> ProjectService -> Router，
//! 关闭时逆序进行。

pub mod api;
pub mod controller;
pub mod model;
pub mod router;
pub mod service;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use project_bootstrap::grpc::GrpcServer;
use project_bootstrap::{App, Stack};
use project_config::ServiceConfig;
use project_gateway::Gateway;

use crate::controller::ProjectController;
use crate::router::Router;
use crate::service::ProjectService;

/// 装配好的服务
pub struct Assembly {
    pub app: Arc<App>,
    pub grpc: Arc<GrpcServer>,
    pub gateway: Arc<Gateway>,
    pub stack: Stack,
}

pub fn assemble(config: &ServiceConfig, metrics: Option<PrometheusHandle>) -> Assembly {
    let app = Arc::new(App::new(&config.app));
    let grpc = Arc::new(GrpcServer::new(config.grpc.clone()));

    let mut gateway = Gateway::new(config.gateway.clone(), app.clone(), grpc.clone());
    if let Some(handle) = metrics {
        gateway = gateway.with_metrics(handle);
    }
    let gateway = Arc::new(gateway);

    let service = Arc::new(ProjectService::new());
    let controller = Arc::new(ProjectController::new(service.clone()));
    let router = Arc::new(Router::new(grpc.clone(), gateway.clone(), controller));

    let mut stack = Stack::new();
    stack
        .register(app.clone())
        .register(grpc.clone())
        .register(gateway.clone())
        .register(service)
        .register(router);

    Assembly {
        app,
        grpc,
        gateway,
        stack,
    }
}

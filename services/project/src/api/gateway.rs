//! ProjectAPI 与健康检查的 HTTP 路由

use http::Method;
use project_bootstrap::grpc::{HEALTH_CHECK_PATH, HealthCheckRequest, HealthCheckResponse};
use project_errors::ProviderResult;
use project_gateway::{BodyMapping, GatewayClient, Route, ServeMux};

use super::proto::platform::*;

const CREATE_PROJECT_PATH: &str = "/platform.v1.ProjectAPI/CreateProject";
const GET_PROJECT_PATH: &str = "/platform.v1.ProjectAPI/GetProject";
const UPDATE_PROJECT_PATH: &str = "/platform.v1.ProjectAPI/UpdateProject";
const DELETE_PROJECT_PATH: &str = "/platform.v1.ProjectAPI/DeleteProject";
const LIST_PROJECTS_PATH: &str = "/platform.v1.ProjectAPI/ListProjects";

pub fn register_project_api_handler(mux: &mut ServeMux, client: &GatewayClient) -> ProviderResult<()> {
    mux.handle_unary::<CreateProjectRequest, CreateProjectResponse>(
        Route::new(Method::POST, "/v1/projects", CREATE_PROJECT_PATH).with_body(BodyMapping::Whole),
        client,
    )?;
    mux.handle_unary::<ListProjectsRequest, ListProjectsResponse>(
        Route::new(Method::GET, "/v1/projects", LIST_PROJECTS_PATH),
        client,
    )?;
    mux.handle_unary::<GetProjectRequest, GetProjectResponse>(
        Route::new(Method::GET, "/v1/projects/{project_id}", GET_PROJECT_PATH),
        client,
    )?;
    mux.handle_unary::<UpdateProjectRequest, UpdateProjectResponse>(
        Route::new(Method::PATCH, "/v1/projects/{project_id}", UPDATE_PROJECT_PATH)
            .with_body(BodyMapping::Field("body")),
        client,
    )?;
    mux.handle_unary::<DeleteProjectRequest, DeleteProjectResponse>(
        Route::new(Method::DELETE, "/v1/projects/{project_id}", DELETE_PROJECT_PATH),
        client,
    )
}

/// `GET /health` -> grpc.health.v1.Health/Check
pub fn register_health_handler(mux: &mut ServeMux, client: &GatewayClient) -> ProviderResult<()> {
    mux.handle_unary::<HealthCheckRequest, HealthCheckResponse>(
        Route::new(Method::GET, "/health", HEALTH_CHECK_PATH),
        client,
    )
}

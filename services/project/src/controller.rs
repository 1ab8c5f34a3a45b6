//! ProjectAPI 的 gRPC 入口：校验请求后交给服务层

use std::sync::Arc;

use project_gateway::details::{BadRequest, ErrorDetail, FieldViolation, status_with_details};
use tonic::{Code, Request, Response, Status};
use tracing::instrument;
use uuid::Uuid;

use crate::api::{self, ProjectApi};
use crate::service::ProjectService;

pub const MAX_LIMIT: i64 = 100;

/// 单个字段的校验失败
#[derive(Debug, Clone, PartialEq, Eq)]
struct Violation {
    field: &'static str,
    description: String,
}

impl Violation {
    fn new(field: &'static str, description: impl Into<String>) -> Self {
        Self {
            field,
            description: description.into(),
        }
    }
}

fn require(field: &'static str, value: &str) -> Option<Violation> {
    value
        .is_empty()
        .then(|| Violation::new(field, "cannot be blank"))
}

fn require_uuid(field: &'static str, value: &str) -> Option<Violation> {
    require(field, value).or_else(|| {
        Uuid::parse_str(value)
            .is_err()
            .then(|| Violation::new(field, "must be a valid UUID"))
    })
}

fn in_range(field: &'static str, value: i64, min: i64, max: Option<i64>) -> Option<Violation> {
    if value < min {
        return Some(Violation::new(field, format!("must be no less than {}", min)));
    }
    match max {
        Some(max) if value > max => {
            Some(Violation::new(field, format!("must be no greater than {}", max)))
        }
        _ => None,
    }
}

/// 有违规时返回带 `BadRequest` 详情的 InvalidArgument
fn validate(violations: impl IntoIterator<Item = Option<Violation>>) -> Result<(), Status> {
    let violations: Vec<Violation> = violations.into_iter().flatten().collect();
    if violations.is_empty() {
        return Ok(());
    }

    let message = violations
        .iter()
        .map(|v| format!("{}: {}.", v.field, v.description))
        .collect::<Vec<_>>()
        .join("; ");
    let detail = BadRequest {
        field_violations: violations
            .into_iter()
            .map(|v| FieldViolation {
                field: v.field.to_string(),
                description: v.description,
            })
            .collect(),
    };
    Err(status_with_details(
        Code::InvalidArgument,
        message,
        [ErrorDetail::BadRequest(detail)],
    ))
}

pub struct ProjectController {
    service: Arc<ProjectService>,
}

impl ProjectController {
    pub fn new(service: Arc<ProjectService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl ProjectApi for ProjectController {
    #[instrument(skip_all, name = "Controller::CreateProject")]
    async fn create_project(
        &self,
        request: Request<api::CreateProjectRequest>,
    ) -> Result<Response<api::CreateProjectResponse>, Status> {
        let req = request.into_inner();
        validate([require("name", &req.name)])?;
        Ok(Response::new(self.service.create_project(req).await?))
    }

    #[instrument(skip_all, name = "Controller::GetProject")]
    async fn get_project(
        &self,
        request: Request<api::GetProjectRequest>,
    ) -> Result<Response<api::GetProjectResponse>, Status> {
        let req = request.into_inner();
        validate([require_uuid("project_id", &req.project_id)])?;
        Ok(Response::new(self.service.get_project(req).await?))
    }

    #[instrument(skip_all, name = "Controller::UpdateProject")]
    async fn update_project(
        &self,
        request: Request<api::UpdateProjectRequest>,
    ) -> Result<Response<api::UpdateProjectResponse>, Status> {
        let req = request.into_inner();
        validate([require_uuid("project_id", &req.project_id)])?;
        Ok(Response::new(self.service.update_project(req).await?))
    }

    #[instrument(skip_all, name = "Controller::DeleteProject")]
    async fn delete_project(
        &self,
        request: Request<api::DeleteProjectRequest>,
    ) -> Result<Response<api::DeleteProjectResponse>, Status> {
        let req = request.into_inner();
        validate([require_uuid("project_id", &req.project_id)])?;
        Ok(Response::new(self.service.delete_project(req).await?))
    }

    #[instrument(skip_all, name = "Controller::ListProjects")]
    async fn list_projects(
        &self,
        request: Request<api::ListProjectsRequest>,
    ) -> Result<Response<api::ListProjectsResponse>, Status> {
        let req = request.into_inner();
        validate([
            in_range("offset", req.offset, 0, None),
            in_range("limit", req.limit, 0, Some(MAX_LIMIT)),
        ])?;
        Ok(Response::new(self.service.list_projects(req).await?))
    }
}

//! 项目服务
//!
//! 目前没有持久化，返回固定的示例数据。

use async_trait::async_trait;
use project_bootstrap::Provider;
use project_errors::{AppError, ProviderResult};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::api;
use crate::model::{ListProjectsFilter, PageProjects, Project};

const SAMPLE_PROJECT_NAME: &str = "Project 1";

#[derive(Debug, Default)]
pub struct ProjectService;

impl ProjectService {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, name = "Service::CreateProject")]
    pub async fn create_project(
        &self,
        req: api::CreateProjectRequest,
    ) -> Result<api::CreateProjectResponse, AppError> {
        let project = Project::new(req.name);
        debug!(project_id = %project.id, "project created");
        Ok(api::CreateProjectResponse {
            project: Some(project.to_api()),
        })
    }

    #[instrument(skip_all, name = "Service::ListProjects")]
    pub async fn list_projects(
        &self,
        req: api::ListProjectsRequest,
    ) -> Result<api::ListProjectsResponse, AppError> {
        let filter = ListProjectsFilter::from(&req);
        let page = PageProjects {
            count: 1,
            page: filter.page,
            elements: vec![Project::new(SAMPLE_PROJECT_NAME)],
        };
        Ok(page.to_api())
    }

    #[instrument(skip_all, name = "Service::GetProject")]
    pub async fn get_project(
        &self,
        req: api::GetProjectRequest,
    ) -> Result<api::GetProjectResponse, AppError> {
        let project = Project::with_id(parse_id(&req.project_id), SAMPLE_PROJECT_NAME);
        Ok(api::GetProjectResponse {
            project: Some(project.to_api()),
        })
    }

    #[instrument(skip_all, name = "Service::UpdateProject")]
    pub async fn update_project(
        &self,
        req: api::UpdateProjectRequest,
    ) -> Result<api::UpdateProjectResponse, AppError> {
        let name = req
            .body
            .map(|body| body.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| SAMPLE_PROJECT_NAME.to_string());
        let project = Project::with_id(parse_id(&req.project_id), name);
        Ok(api::UpdateProjectResponse {
            project: Some(project.to_api()),
        })
    }

    #[instrument(skip_all, name = "Service::DeleteProject")]
    pub async fn delete_project(
        &self,
        req: api::DeleteProjectRequest,
    ) -> Result<api::DeleteProjectResponse, AppError> {
        debug!(project_id = %req.project_id, "project deleted");
        Ok(api::DeleteProjectResponse {})
    }
}

/// 无法解析时返回 nil UUID
fn parse_id(raw: &str) -> Uuid {
    Uuid::parse_str(raw).unwrap_or_default()
}

#[async_trait]
impl Provider for ProjectService {
    fn name(&self) -> &str {
        "ProjectService"
    }
}

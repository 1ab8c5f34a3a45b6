//! 项目领域模型

use uuid::Uuid;

use crate::api;

pub const DEFAULT_LIMIT: i64 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub user_name: String,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::now_v7(), name)
    }

    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            user_name: String::new(),
        }
    }

    pub fn to_api(&self) -> api::Project {
        api::Project {
            id: self.id.to_string(),
            name: self.name.clone(),
        }
    }
}

/// 分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    pub offset: i64,
    pub limit: i64,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// 列表查询条件，零值的分页参数取默认值
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListProjectsFilter {
    pub page: Filter,
    pub name: Option<String>,
    pub order_by: Vec<String>,
}

impl From<&api::ListProjectsRequest> for ListProjectsFilter {
    fn from(req: &api::ListProjectsRequest) -> Self {
        let mut page = Filter::default();
        if req.offset != 0 {
            page.offset = req.offset;
        }
        if req.limit != 0 {
            page.limit = req.limit;
        }
        Self {
            page,
            name: (!req.name.is_empty()).then(|| req.name.clone()),
            order_by: req.order_by.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageProjects {
    pub count: i64,
    pub page: Filter,
    pub elements: Vec<Project>,
}

impl PageProjects {
    pub fn to_api(&self) -> api::ListProjectsResponse {
        api::ListProjectsResponse {
            count: self.count,
            offset: self.page.offset,
            limit: self.page.limit,
            elements: self.elements.iter().map(Project::to_api).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_filter_defaults() {
        let filter = ListProjectsFilter::from(&api::ListProjectsRequest::default());
        assert_eq!(filter.page, Filter { offset: 0, limit: 20 });
        assert_eq!(filter.name, None);

        let filter = ListProjectsFilter::from(&api::ListProjectsRequest {
            offset: 40,
            limit: 5,
            name: "alpha".to_string(),
            order_by: vec!["name".to_string()],
        });
        assert_eq!(filter.page, Filter { offset: 40, limit: 5 });
        assert_eq!(filter.name.as_deref(), Some("alpha"));
        assert_eq!(filter.order_by, ["name"]);
    }

    #[test]
    fn test_project_to_api() {
        let id = Uuid::now_v7();
        let project = Project::with_id(id, "Project 1");
        assert_eq!(
            project.to_api(),
            api::Project {
                id: id.to_string(),
                name: "Project 1".to_string(),
            }
        );
    }
}

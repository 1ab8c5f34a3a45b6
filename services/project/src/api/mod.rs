//! platform.v1.ProjectAPI 接口层
//!
//! 消息与服务端由 `proto/platform/v1/project.proto` 生成。

mod gateway;

pub use gateway::{register_health_handler, register_project_api_handler};
pub use proto::platform::project_api_server::{ProjectApi, ProjectApiServer};
pub use proto::platform::*;

pub mod proto {
    pub mod platform {
        tonic::include_proto!("platform.v1");
    }
}

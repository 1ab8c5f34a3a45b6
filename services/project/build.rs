const INT64: &str = r#"#[serde(with = "project_gateway::json::int64", skip_serializing_if = "project_gateway::json::int64::is_omitted")]"#;
const REPEATED: &str = r#"#[serde(with = "project_gateway::json::repeated")]"#;

fn main() {
    // 消息同时实现 serde，供 HTTP 网关编解码 JSON
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .type_attribute(".platform.v1", "#[derive(serde::Serialize, serde::Deserialize)]")
        .type_attribute(".platform.v1", "#[serde(default)]")
        .field_attribute(".platform.v1.ListProjectsRequest.offset", INT64)
        .field_attribute(".platform.v1.ListProjectsRequest.limit", INT64)
        .field_attribute(".platform.v1.ListProjectsRequest.order_by", REPEATED)
        .field_attribute(".platform.v1.ListProjectsResponse.count", INT64)
        .field_attribute(".platform.v1.ListProjectsResponse.offset", INT64)
        .field_attribute(".platform.v1.ListProjectsResponse.limit", INT64)
        .compile_protos(&["../../proto/platform/v1/project.proto"], &["../../proto"])
        .expect("Failed to compile project.proto");

    println!("cargo:rerun-if-changed=../../proto/platform/v1/project.proto");
}

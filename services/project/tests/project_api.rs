//! 通过 HTTP 网关调用 ProjectAPI 的端到端测试

use std::time::Duration;

use project_bootstrap::wait_for_running_every;
use project_config::{AppSettings, GatewaySettings, GrpcSettings, ServiceConfig};
use project_service::assemble;
use serde_json::{Value, json};

fn config() -> ServiceConfig {
    ServiceConfig {
        app: AppSettings {
            name: "grpc-project-service".to_string(),
            base_path: "api".to_string(),
            special_url_path: vec!["/health".to_string()],
            ..Default::default()
        },
        grpc: GrpcSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        },
        gateway: GatewaySettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        },
        ..Default::default()
    }
}

struct Running {
    base: String,
    stop: tokio::sync::oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<Result<(), project_errors::StackError>>,
}

impl Running {
    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

async fn start(config: &ServiceConfig) -> Running {
    let assembly = assemble(config, None);
    assembly.stack.init_all().await.unwrap();

    let gateway = assembly.gateway.clone();
    let (stop, rx) = tokio::sync::oneshot::channel::<()>();
    let stack = assembly.stack;
    let handle = tokio::spawn(async move {
        stack
            .run_all(async {
                let _ = rx.await;
            })
            .await
    });

    wait_for_running_every(gateway.as_ref(), 100, Duration::from_millis(50))
        .await
        .unwrap();
    Running {
        base: format!("http://{}", gateway.local_addr().unwrap()),
        stop,
        handle,
    }
}

#[tokio::test]
async fn test_project_api_over_http() {
    let running = start(&config()).await;
    let base = running.base.clone();
    let http = reqwest::Client::new();

    let created: Value = http
        .post(format!("{}/api/v1/projects", base))
        .json(&json!({"name": "alpha"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["project"]["name"], "alpha");
    let id = created["project"]["id"].as_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    let response = http
        .post(format!("{}/api/v1/projects", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 3);
    assert_eq!(
        body["details"],
        json!([{
            "@type": "type.googleapis.com/google.rpc.BadRequest",
            "field_violations": [{"field": "name", "description": "cannot be blank"}]
        }])
    );

    let listed: Value = http
        .get(format!("{}/api/v1/projects?limit=5&order_by=name", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], "1");
    assert_eq!(listed["limit"], "5");
    assert_eq!(listed["offset"], "0");

    let response = http
        .get(format!("{}/api/v1/projects?limit=500", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let fetched: Value = http
        .get(format!("{}/api/v1/projects/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["project"]["id"], id.as_str());

    let updated: Value = http
        .patch(format!("{}/api/v1/projects/{}", base, id))
        .json(&json!({"name": "renamed"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["project"], json!({"id": id, "name": "renamed"}));

    let response = http
        .delete(format!("{}/api/v1/projects/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({}));

    let response = http
        .get(format!("{}/api/v1/projects/not-a-uuid", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let health: Value = http
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "SERVING"}));

    running.shutdown().await;
}

#[tokio::test]
async fn test_defaults_omitted_when_disabled() {
    let mut config = config();
    config.grpc.disable_emit_defaults = true;
    let running = start(&config).await;
    let http = reqwest::Client::new();

    let listed: Value = http
        .get(format!("{}/api/v1/projects?limit=5", running.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.get("offset").is_none(), "{}", listed);
    assert_eq!(listed["count"], "1");
    assert_eq!(listed["limit"], "5");

    // 错误体不受影响
    let response = http
        .get(format!("{}/api/v1/projects/not-a-uuid", running.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 3);
    assert_eq!(body["message"], "project_id: must be a valid UUID.");
    assert_eq!(body["details"].as_array().map(Vec::len), Some(1));

    let response = http
        .delete(format!("{}/api/v1/projects/{}", running.base, uuid::Uuid::now_v7()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({}));

    running.shutdown().await;
}

//! grpc-project-service 入口

use project_bootstrap::{init_runtime, shutdown_signal};
use project_config::ServiceConfig;
use project_service::assemble;
use project_telemetry::init_metrics;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // 加载配置
    let config = match ServiceConfig::load("config") {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };

    // 初始化运行时
    init_runtime(&config);

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "Prometheus recorder not installed, /metrics disabled");
            None
        }
    };

    let assembly = assemble(&config, metrics);
    info!(version = %assembly.app.version(), "Starting {}", assembly.app.app_name());

    if let Err(err) = assembly.stack.init_all().await {
        error!(provider = err.provider(), error = %err, "Initialization failed");
        if let Err(close_err) = assembly.stack.close_all().await {
            error!(provider = close_err.provider(), error = %close_err, "Close failed");
        }
        std::process::exit(1);
    }

    if let Err(err) = assembly.stack.run_all(shutdown_signal()).await {
        error!(provider = err.provider(), error = %err, "Service stopped with error");
        std::process::exit(1);
    }

    info!("Service stopped");
}

//! project-config - 配置加载库
//!
//! 加载顺序：默认值 → `{dir}/default.toml` → `{dir}/{APP_ENV}.toml` → 环境变量。

use std::time::Duration;

use figment::{
    Figment,
    value::{Uncased, UncasedStr},
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize, de};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub name: String,
    pub env: String,
    pub base_path: String,
    /// 不加 base path 前缀的路径，例如 `["/health", "/ping"]`
    #[serde(deserialize_with = "deserialize_path_list")]
    pub special_url_path: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: "development".to_string(),
            base_path: "/".to_string(),
            special_url_path: Vec::new(),
        }
    }
}

fn default_app_name() -> String {
    std::env::args()
        .next()
        .and_then(|arg0| {
            std::path::Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "grpc-project-service".to_string())
}

/// gRPC 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcSettings {
    pub host: String,
    pub port: u16,
    /// 是否启用日志拦截器
    pub log_interceptor: bool,
    /// 是否记录请求/响应内容，生产环境应关闭
    pub log_payload: bool,
    /// 是否注册 grpc.health.v1 健康检查服务
    pub health_enabled: bool,
    /// JSON 编码时省略默认值
    pub disable_emit_defaults: bool,
    /// JSON 编码时枚举输出数值而不是名称
    pub use_enum_as_int: bool,
    pub shutdown_grace_secs: u64,
}

impl Default for GrpcSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_interceptor: true,
            log_payload: false,
            health_enabled: true,
            disable_emit_defaults: false,
            use_enum_as_int: false,
            shutdown_grace_secs: 10,
        }
    }
}

impl GrpcSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// gRPC Gateway 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub log_payload: bool,
    pub dial_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    /// 等待 gRPC 服务器就绪的最大轮询次数
    pub upstream_attempts: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_payload: false,
            dial_timeout_secs: 15,
            shutdown_grace_secs: 5,
            upstream_attempts: 10,
        }
    }
}

impl GatewaySettings {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// 遥测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    pub log_level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// 服务配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub app: AppSettings,
    pub grpc: GrpcSettings,
    pub gateway: GatewaySettings,
    pub telemetry: TelemetrySettings,
}

impl ServiceConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let mut config: Self = Self::figment(config_dir, &env).extract()?;
        config.app.base_path = clean_path(&format!("/{}", config.app.base_path));

        Ok(config)
    }

    fn figment(config_dir: &str, env: &str) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("APP_").map(|key| nest("app", key)))
            .merge(
                Env::raw()
                    .only(&["SPECIAL_URL_PATH"])
                    .map(|_| "app.special_url_path".into()),
            )
            .merge(
                Env::prefixed("GRPC_GATEWAY_").map(|key| nest("gateway", key)),
            )
            .merge(
                Env::prefixed("GRPC_")
                    .filter(|key| !key.as_str().to_ascii_lowercase().starts_with("gateway_"))
                    .map(|key| nest("grpc", key)),
            )
            .merge(
                Env::raw()
                    .only(&["LOG_LEVEL"])
                    .map(|_| "telemetry.log_level".into()),
            )
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app.env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app.env == "development"
    }
}

/// 环境变量名映射为 `section.key`
fn nest(section: &str, key: &UncasedStr) -> Uncased<'static> {
    format!("{}.{}", section, key.as_str().to_ascii_lowercase()).into()
}

/// 接受 `["/health", "/ping"]` 形式的列表，或者 JSON 数组 / 逗号分隔的字符串
fn deserialize_path_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(paths) => Ok(paths),
        Raw::Text(text) => parse_path_list(&text).map_err(de::Error::custom),
    }
}

/// 解析路径列表字符串
pub fn parse_path_list(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if raw.starts_with('[') {
        return serde_json::from_str(raw);
    }
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// 按词法规则清理 URL 路径：合并多余的 `/`，处理 `.` 与 `..`，去掉末尾的 `/`
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() && !rooted {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

#[cfg(test)]
mod tests;

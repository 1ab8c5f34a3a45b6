//! App Provider - 应用基本信息（名称、版本、URL 前缀）

use std::fmt;

use async_trait::async_trait;
use project_config::{AppSettings, clean_path};
use project_errors::ProviderResult;
use tracing::info;

use crate::provider::Provider;

/// 应用版本
///
/// 语义化版本取自 Cargo 包版本，git 信息在构建时通过
/// `GIT_REVISION` / `GIT_AUTHOR_DATE` 环境变量注入。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub git_revision: Option<String>,
    pub git_author_date: Option<String>,
}

impl Version {
    pub fn current() -> Self {
        Self {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or_default(),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or_default(),
            patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or_default(),
            git_revision: option_env!("GIT_REVISION").map(str::to_string),
            git_author_date: option_env!("GIT_AUTHOR_DATE").map(str::to_string),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(revision) = &self.git_revision {
            write!(f, " {}", revision)?;
        }
        if let Some(date) = &self.git_author_date {
            write!(f, " {}", date)?;
        }
        Ok(())
    }
}

/// 应用 Provider
#[derive(Debug, Clone)]
pub struct App {
    name: String,
    base_path: String,
    special_url_path: Vec<String>,
    version: Version,
}

impl App {
    pub fn new(settings: &AppSettings) -> Self {
        Self {
            name: settings.name.clone(),
            base_path: clean_path(&format!("/{}", settings.base_path)),
            special_url_path: settings.special_url_path.clone(),
            version: Version::current(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.name
    }

    /// 清理后的 base path，不以 `/` 结尾（根路径除外）
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// 不加 base path 前缀的路径，例如 `["/health", "/ping"]`
    pub fn special_url_path(&self) -> &[String] {
        &self.special_url_path
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// 拼接到 base path 之后并清理，结果总以 `/` 结尾
    pub fn parse_path(&self, elems: &[&str]) -> String {
        let endpoint = self.parse_endpoint(elems);
        if endpoint == "/" {
            endpoint
        } else {
            endpoint + "/"
        }
    }

    /// 拼接到 base path 之后并清理，结果不以 `/` 结尾（根路径除外）
    pub fn parse_endpoint(&self, elems: &[&str]) -> String {
        let joined = std::iter::once(self.base_path.as_str())
            .chain(elems.iter().copied())
            .filter(|elem| !elem.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        clean_path(&joined)
    }
}

#[async_trait]
impl Provider for App {
    fn name(&self) -> &str {
        "App"
    }

    async fn init(&self) -> ProviderResult<()> {
        info!(
            name = %self.name,
            version = %self.version,
            base_path = %self.base_path,
            "App provider initialized"
        );
        Ok(())
    }
}

//! project-errors - 统一错误处理
//!
//! 生命周期错误（Init / Run / Close）一律视为致命错误，
//! 单次 RPC 调用中的错误则转换为 `tonic::Status`。

use std::time::Duration;

use thiserror::Error;

/// 单个 Provider 的错误类型
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 等待依赖的 Provider 就绪超时
    #[error("{provider} is not running after {attempts} attempts")]
    NotReady { provider: String, attempts: u32 },

    #[error("{0} has not been initialized")]
    NotInitialized(String),

    #[error("{0} is already serving")]
    AlreadyServing(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("Route registration failed: {0}")]
    Registration(String),

    /// run 任务异常退出（panic 或被取消）
    #[error("Task aborted: {0}")]
    Aborted(String),
}

impl ProviderError {
    pub fn not_ready(provider: impl Into<String>, attempts: u32) -> Self {
        Self::NotReady {
            provider: provider.into(),
            attempts,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    pub fn timeout(operation: &'static str, elapsed: Duration) -> Self {
        Self::Timeout { operation, elapsed }
    }

    /// 是否为就绪等待失败
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

/// Provider Result 类型别名
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Stack 生命周期错误
///
/// 三种错误都是致命的：调用方记录日志后应当终止进程。
#[derive(Debug, Error)]
pub enum StackError {
    #[error("{provider} failed to initialize: {source}")]
    Init {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("{provider} failed to run: {source}")]
    Run {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("{provider} failed to close: {source}")]
    Close {
        provider: String,
        #[source]
        source: ProviderError,
    },
}

impl StackError {
    /// 出错的 Provider 名称
    pub fn provider(&self) -> &str {
        match self {
            Self::Init { provider, .. } | Self::Run { provider, .. } | Self::Close { provider, .. } => {
                provider
            }
        }
    }
}

/// 业务层错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 转换为 gRPC 状态码
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            Self::NotFound(_) => tonic::Code::NotFound,
            Self::Validation(_) => tonic::Code::InvalidArgument,
            Self::Unauthenticated(_) => tonic::Code::Unauthenticated,
            Self::Forbidden(_) => tonic::Code::PermissionDenied,
            Self::Conflict(_) => tonic::Code::AlreadyExists,
            Self::Internal(_) => tonic::Code::Internal,
        }
    }
}

impl From<AppError> for tonic::Status {
    fn from(err: AppError) -> Self {
        tonic::Status::new(err.grpc_code(), err.to_string())
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_message() {
        let err = ProviderError::not_ready("GrpcServer", 3);
        assert!(err.is_not_ready());
        assert_eq!(err.to_string(), "GrpcServer is not running after 3 attempts");
    }

    #[test]
    fn test_stack_error_provider() {
        let err = StackError::Close {
            provider: "Gateway".to_string(),
            source: ProviderError::timeout("gateway drain", Duration::from_secs(5)),
        };
        assert_eq!(err.provider(), "Gateway");
        assert!(err.to_string().starts_with("Gateway failed to close"));
    }

    #[test]
    fn test_app_error_to_status() {
        let status: tonic::Status = AppError::validation("name is required").into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert_eq!(status.message(), "Validation error: name is required");

        let status: tonic::Status = AppError::not_found("project").into();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }
}

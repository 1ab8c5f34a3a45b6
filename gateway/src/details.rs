//! google.rpc 错误详情
//!
//! gRPC 状态的 details 是编码后的 `google.rpc.Status`，其中每个详情都是 `Any`。
//! 网关只识别 `ErrorInfo`、`BadRequest`、`RequestInfo`、`QuotaFailure` 四种，
//! 其余详情在翻译为 HTTP 错误时被丢弃。

use std::collections::HashMap;

use bytes::Bytes;
use prost::Message;
use prost_types::Any;
use serde::{Deserialize, Serialize, Serializer};
use tonic::{Code, Status};

const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub reason: String,
    #[prost(string, tag = "2")]
    #[serde(default)]
    pub domain: String,
    #[prost(map = "string, string", tag = "3")]
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct BadRequest {
    #[prost(message, repeated, tag = "1")]
    #[serde(default)]
    pub field_violations: Vec<FieldViolation>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct FieldViolation {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub field: String,
    #[prost(string, tag = "2")]
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct RequestInfo {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub request_id: String,
    #[prost(string, tag = "2")]
    #[serde(default)]
    pub serving_data: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct QuotaFailure {
    #[prost(message, repeated, tag = "1")]
    #[serde(default)]
    pub violations: Vec<QuotaViolation>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct QuotaViolation {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub subject: String,
    #[prost(string, tag = "2")]
    #[serde(default)]
    pub description: String,
}

/// google.rpc.Status
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<Any>,
}

/// 解码后的错误详情
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetail {
    ErrorInfo(ErrorInfo),
    BadRequest(BadRequest),
    RequestInfo(RequestInfo),
    QuotaFailure(QuotaFailure),
    Unrecognized(Any),
}

impl ErrorDetail {
    pub fn type_name(&self) -> &str {
        match self {
            Self::ErrorInfo(_) => "google.rpc.ErrorInfo",
            Self::BadRequest(_) => "google.rpc.BadRequest",
            Self::RequestInfo(_) => "google.rpc.RequestInfo",
            Self::QuotaFailure(_) => "google.rpc.QuotaFailure",
            Self::Unrecognized(any) => any.type_url.rsplit('/').next().unwrap_or_default(),
        }
    }

    pub fn type_url(&self) -> String {
        match self {
            Self::Unrecognized(any) => any.type_url.clone(),
            known => format!("{}{}", TYPE_URL_PREFIX, known.type_name()),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    /// 无法解码的已知类型按未识别处理
    pub fn from_any(any: &Any) -> Self {
        let name = any.type_url.rsplit('/').next().unwrap_or_default();
        let value = any.value.as_slice();
        let decoded = match name {
            "google.rpc.ErrorInfo" => ErrorInfo::decode(value).map(Self::ErrorInfo),
            "google.rpc.BadRequest" => BadRequest::decode(value).map(Self::BadRequest),
            "google.rpc.RequestInfo" => RequestInfo::decode(value).map(Self::RequestInfo),
            "google.rpc.QuotaFailure" => QuotaFailure::decode(value).map(Self::QuotaFailure),
            _ => return Self::Unrecognized(any.clone()),
        };
        decoded.unwrap_or_else(|_| Self::Unrecognized(any.clone()))
    }

    pub fn to_any(&self) -> Any {
        let value = match self {
            Self::ErrorInfo(m) => m.encode_to_vec(),
            Self::BadRequest(m) => m.encode_to_vec(),
            Self::RequestInfo(m) => m.encode_to_vec(),
            Self::QuotaFailure(m) => m.encode_to_vec(),
            Self::Unrecognized(any) => return any.clone(),
        };
        Any {
            type_url: self.type_url(),
            value,
        }
    }
}

#[derive(Serialize)]
struct Typed<'a, T> {
    #[serde(rename = "@type")]
    type_url: String,
    #[serde(flatten)]
    message: &'a T,
}

impl Serialize for ErrorDetail {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let type_url = self.type_url();
        match self {
            Self::ErrorInfo(m) => Typed { type_url, message: m }.serialize(serializer),
            Self::BadRequest(m) => Typed { type_url, message: m }.serialize(serializer),
            Self::RequestInfo(m) => Typed { type_url, message: m }.serialize(serializer),
            Self::QuotaFailure(m) => Typed { type_url, message: m }.serialize(serializer),
            Self::Unrecognized(_) => Typed {
                type_url,
                message: &HashMap::<String, String>::new(),
            }
            .serialize(serializer),
        }
    }
}

/// 构造携带详情的 gRPC 状态
pub fn status_with_details(
    code: Code,
    message: impl Into<String>,
    details: impl IntoIterator<Item = ErrorDetail>,
) -> Status {
    let message = message.into();
    let rpc_status = RpcStatus {
        code: code as i32,
        message: message.clone(),
        details: details.into_iter().map(|detail| detail.to_any()).collect(),
    };
    Status::with_details(code, message, Bytes::from(rpc_status.encode_to_vec()))
}

/// 解码状态中的详情，details 缺失或损坏时返回空列表
pub fn status_details(status: &Status) -> Vec<ErrorDetail> {
    if status.details().is_empty() {
        return Vec::new();
    }
    match RpcStatus::decode(status.details()) {
        Ok(rpc_status) => rpc_status.details.iter().map(ErrorDetail::from_any).collect(),
        Err(err) => {
            tracing::debug!(error = %err, "failed to decode grpc status details");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_details() -> Vec<ErrorDetail> {
        vec![
            ErrorDetail::ErrorInfo(ErrorInfo {
                reason: "PROJECT_LOCKED".to_string(),
                domain: "platform.example.com".to_string(),
                metadata: HashMap::from([("project".to_string(), "p-1".to_string())]),
            }),
            ErrorDetail::BadRequest(BadRequest {
                field_violations: vec![FieldViolation {
                    field: "name".to_string(),
                    description: "must not be empty".to_string(),
                }],
            }),
            ErrorDetail::RequestInfo(RequestInfo {
                request_id: "req-7".to_string(),
                serving_data: String::new(),
            }),
            ErrorDetail::QuotaFailure(QuotaFailure {
                violations: vec![QuotaViolation {
                    subject: "project:p-1".to_string(),
                    description: "daily limit".to_string(),
                }],
            }),
        ]
    }

    #[test]
    fn test_recognized_details_survive_status() {
        let status = status_with_details(Code::FailedPrecondition, "locked", sample_details());
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert_eq!(status_details(&status), sample_details());
    }

    #[test]
    fn test_unknown_detail_is_unrecognized() {
        let any = Any {
            type_url: "type.googleapis.com/google.rpc.DebugInfo".to_string(),
            value: vec![0x0a, 0x01, b'x'],
        };
        let status = status_with_details(
            Code::Internal,
            "oops",
            [ErrorDetail::Unrecognized(any.clone())],
        );
        let details = status_details(&status);
        assert_eq!(details, vec![ErrorDetail::Unrecognized(any)]);
        assert!(!details[0].is_recognized());
        assert_eq!(details[0].type_name(), "google.rpc.DebugInfo");
    }

    #[test]
    fn test_detail_json_carries_type() {
        let detail = ErrorDetail::BadRequest(BadRequest {
            field_violations: vec![FieldViolation {
                field: "name".to_string(),
                description: "required".to_string(),
            }],
        });
        assert_eq!(
            serde_json::to_value(&detail).unwrap(),
            json!({
                "@type": "type.googleapis.com/google.rpc.BadRequest",
                "field_violations": [{"field": "name", "description": "required"}]
            })
        );
    }

    #[test]
    fn test_status_without_details() {
        assert!(status_details(&Status::not_found("missing")).is_empty());
    }
}

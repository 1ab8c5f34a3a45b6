//! JSON 编解码
//!
//! 网关内部统一以 `serde_json::Value` 表示消息，[`Marshaler`] 只负责字节层面的编码。

use project_bootstrap::json::EncodeOptions;
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

impl MarshalError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

pub trait Marshaler: Send + Sync + 'static {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    /// 消息转换为 [`Value`] 时使用的选项
    fn encode_options(&self) -> EncodeOptions {
        EncodeOptions::default()
    }

    fn marshal(&self, value: &Value) -> Result<Vec<u8>, MarshalError>;

    /// 编码错误体 `{code, message, details}`，三个字段总是输出
    fn marshal_envelope(&self, value: &Value) -> Result<Vec<u8>, MarshalError> {
        self.marshal(value)
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Value, MarshalError>;
}

/// protojson 风格的 JSON 编码
///
/// 字段名使用 proto 原名（snake_case），默认输出默认值，枚举输出名称，缩进为一个空格。
#[derive(Debug, Clone)]
pub struct JsonPb {
    emit_defaults: bool,
    enums_as_ints: bool,
    indent: &'static [u8],
}

impl Default for JsonPb {
    fn default() -> Self {
        Self {
            emit_defaults: true,
            enums_as_ints: false,
            indent: b" ",
        }
    }
}

impl JsonPb {
    pub fn new() -> Self {
        Self::default()
    }

    /// 关闭后省略值为默认值的字段
    pub fn with_emit_defaults(mut self, emit_defaults: bool) -> Self {
        self.emit_defaults = emit_defaults;
        self
    }

    pub fn with_enums_as_ints(mut self, enums_as_ints: bool) -> Self {
        self.enums_as_ints = enums_as_ints;
        self
    }

    /// 空缩进表示紧凑输出
    pub fn with_indent(mut self, indent: &'static [u8]) -> Self {
        self.indent = indent;
        self
    }

    fn write(&self, value: &Value) -> Result<Vec<u8>, MarshalError> {
        if self.indent.is_empty() {
            return Ok(serde_json::to_vec(value)?);
        }

        let mut buf = Vec::new();
        let mut serializer =
            Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(self.indent));
        value.serialize(&mut serializer)?;
        Ok(buf)
    }
}

impl Marshaler for JsonPb {
    fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            emit_defaults: self.emit_defaults,
            enums_as_ints: self.enums_as_ints,
        }
    }

    fn marshal(&self, value: &Value) -> Result<Vec<u8>, MarshalError> {
        if self.emit_defaults {
            return self.write(value);
        }
        self.write(&prune_defaults(value.clone()))
    }

    fn marshal_envelope(&self, value: &Value) -> Result<Vec<u8>, MarshalError> {
        self.write(value)
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Value, MarshalError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_slice(data)?)
    }
}

/// 删除对象中值为默认值的字段（null、false、0、""、[]）
fn prune_defaults(value: Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(_, v)| !is_default(v))
                .map(|(k, v)| (k, prune_defaults(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(prune_defaults).collect()),
        other => other,
    }
}

fn is_default(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_marshal_uses_single_space_indent() {
        let out = JsonPb::new().marshal(&json!({"id": "p-1"})).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n \"id\": \"p-1\"\n}");
    }

    #[test]
    fn test_marshal_compact() {
        let out = JsonPb::new()
            .with_indent(b"")
            .marshal(&json!({"id": "p-1", "tags": []}))
            .unwrap();
        assert_eq!(out, br#"{"id":"p-1","tags":[]}"#);
    }

    #[test]
    fn test_disable_emit_defaults_prunes_nested_fields() {
        let marshaler = JsonPb::new().with_emit_defaults(false).with_indent(b"");
        let value = json!({
            "count": 0,
            "name": "",
            "elements": [{"id": "a", "name": ""}],
            "filter": {"limit": 0},
            "archived": false
        });
        let out: Value = serde_json::from_slice(&marshaler.marshal(&value).unwrap()).unwrap();
        assert_eq!(out, json!({"elements": [{"id": "a"}], "filter": {}}));
    }

    #[test]
    fn test_envelope_keeps_empty_fields() {
        let marshaler = JsonPb::new().with_emit_defaults(false).with_indent(b"");
        let envelope = json!({"code": 5, "message": "", "details": []});
        assert_eq!(marshaler.marshal(&envelope).unwrap(), br#"{"code":5}"#);
        assert_eq!(
            marshaler.marshal_envelope(&envelope).unwrap(),
            br#"{"code":5,"message":"","details":[]}"#
        );
    }

    #[test]
    fn test_encode_options_follow_settings() {
        let marshaler = JsonPb::new().with_emit_defaults(false).with_enums_as_ints(true);
        assert_eq!(
            marshaler.encode_options(),
            EncodeOptions {
                emit_defaults: false,
                enums_as_ints: true,
            }
        );
        assert_eq!(JsonPb::new().encode_options(), EncodeOptions::default());
    }

    #[test]
    fn test_unmarshal_empty_body_is_empty_object() {
        assert_eq!(JsonPb::new().unmarshal(b"  ").unwrap(), json!({}));
        assert!(JsonPb::new().unmarshal(b"{oops").is_err());
    }
}

//! protojson 兼容的 serde 辅助
//!
//! 网关从路径与查询参数构造的字段都是字符串，数值字段需要同时接受数字和字符串。
//! 输出时是否省略默认值、枚举是否输出数值由 [`EncodeOptions`] 决定，
//! 网关通过 [`to_value`] 在序列化期间设置它们。
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! pub struct ListProjectsResponse {
//!     #[serde(
//!         with = "project_gateway::json::int64",
//!         skip_serializing_if = "project_gateway::json::int64::is_omitted"
//!     )]
//!     pub count: i64,
//!     #[serde(with = "project_gateway::json::number")]
//!     pub limit: i32,
//! }
//! ```

use std::cell::Cell;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

/// JSON 输出选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// 输出值为默认值的字段
    pub emit_defaults: bool,
    /// 枚举输出数值而不是名称
    pub enums_as_ints: bool,
}

impl EncodeOptions {
    pub const DEFAULT: Self = Self {
        emit_defaults: true,
        enums_as_ints: false,
    };
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

thread_local! {
    static OPTIONS: Cell<EncodeOptions> = const { Cell::new(EncodeOptions::DEFAULT) };
}

/// 当前线程上生效的输出选项
pub fn current_options() -> EncodeOptions {
    OPTIONS.with(Cell::get)
}

struct Restore(EncodeOptions);

impl Drop for Restore {
    fn drop(&mut self) {
        OPTIONS.with(|cell| cell.set(self.0));
    }
}

/// 按给定选项把消息转换为 JSON 值
pub fn to_value<T>(value: &T, options: EncodeOptions) -> serde_json::Result<Value>
where
    T: Serialize + ?Sized,
{
    let _restore = Restore(OPTIONS.with(|cell| cell.replace(options)));
    serde_json::to_value(value)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText<T> {
    Number(T),
    Text(String),
}

fn from_number_or_text<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
    D: Deserializer<'de>,
{
    match NumberOrText::<T>::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

/// 32 位整数、浮点数与布尔值：输出原样，输入接受字符串
pub mod number {
    use super::*;
    use serde::Serializer;

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        from_number_or_text(deserializer)
    }
}

/// 64 位整数按 protojson 规则编码为字符串
pub mod int64 {
    use super::*;
    use serde::Serializer;

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        from_number_or_text(deserializer)
    }

    /// 关闭 emit defaults 时省略 0，配合 `skip_serializing_if` 使用
    ///
    /// 编码成字符串之后 `"0"` 与普通字符串无法区分，只能在序列化时省略。
    pub fn is_omitted<T>(value: &T) -> bool
    where
        T: Default + PartialEq,
    {
        !current_options().emit_defaults && *value == T::default()
    }
}

/// 枚举字段以 `i32` 存储，默认输出名称
pub mod enumeration {
    use super::*;
    use serde::Serializer;

    /// `name` 为 `None`（未知取值）时总是输出数值
    pub fn serialize<S>(value: i32, name: Option<&'static str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match name {
            Some(name) if !current_options().enums_as_ints => serializer.serialize_str(name),
            _ => serializer.serialize_i32(value),
        }
    }

    /// 接受数值或名称
    pub fn deserialize<'de, D, F>(deserializer: D, from_name: F) -> Result<i32, D::Error>
    where
        D: Deserializer<'de>,
        F: FnOnce(&str) -> Option<i32>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i32),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Name(name) => from_name(&name)
                .ok_or_else(|| de::Error::custom(format!("unknown enum value {}", name))),
        }
    }
}

/// repeated 字段：查询参数只出现一次时是单个值
pub mod repeated {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    pub fn serialize<V, S>(values: &V, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize + ?Sized,
        S: Serializer,
    {
        values.serialize(serializer)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Ok(match OneOrMany::<T>::deserialize(deserializer)? {
            OneOrMany::Many(values) => values,
            OneOrMany::One(value) => vec![value],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Page {
        #[serde(default, with = "super::int64", skip_serializing_if = "super::int64::is_omitted")]
        count: i64,
        #[serde(default, with = "super::number")]
        limit: i32,
        #[serde(default, with = "super::number")]
        archived: bool,
        #[serde(default, with = "super::repeated")]
        tags: Vec<String>,
    }

    #[test]
    fn test_int64_is_encoded_as_string() {
        let page = Page {
            count: 9_007_199_254_740_993,
            limit: 20,
            archived: false,
            tags: vec![],
        };
        assert_eq!(
            serde_json::to_value(&page).unwrap(),
            json!({"count": "9007199254740993", "limit": 20, "archived": false, "tags": []})
        );
    }

    #[test]
    fn test_zero_int64_omitted_without_emit_defaults() {
        let page = Page {
            count: 0,
            limit: 0,
            archived: false,
            tags: vec![],
        };
        let options = EncodeOptions {
            emit_defaults: false,
            ..Default::default()
        };
        let value = to_value(&page, options).unwrap();
        assert!(value.get("count").is_none());

        // 选项只在本次转换中生效
        assert_eq!(current_options(), EncodeOptions::default());
        assert_eq!(serde_json::to_value(&page).unwrap()["count"], "0");
    }

    #[test]
    fn test_numbers_accept_strings() {
        let page: Page = serde_json::from_value(json!({
            "count": "42",
            "limit": "10",
            "archived": "true",
            "tags": "urgent"
        }))
        .unwrap();
        assert_eq!(page.count, 42);
        assert_eq!(page.limit, 10);
        assert!(page.archived);
        assert_eq!(page.tags, ["urgent"]);

        let page: Page = serde_json::from_value(json!({"count": 7, "limit": 3})).unwrap();
        assert_eq!((page.count, page.limit), (7, 3));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let result = serde_json::from_value::<Page>(json!({"limit": "ten"}));
        assert!(result.is_err());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Light {
        #[serde(serialize_with = "serialize_color", deserialize_with = "deserialize_color")]
        color: i32,
    }

    fn color_name(value: i32) -> Option<&'static str> {
        match value {
            0 => Some("RED"),
            1 => Some("GREEN"),
            _ => None,
        }
    }

    fn serialize_color<S: serde::Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        enumeration::serialize(*value, color_name(*value), serializer)
    }

    fn deserialize_color<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        enumeration::deserialize(deserializer, |name| match name {
            "RED" => Some(0),
            "GREEN" => Some(1),
            _ => None,
        })
    }

    #[test]
    fn test_enum_names_or_numbers() {
        let light = Light { color: 1 };
        assert_eq!(serde_json::to_value(&light).unwrap(), json!({"color": "GREEN"}));

        let options = EncodeOptions {
            enums_as_ints: true,
            ..Default::default()
        };
        assert_eq!(to_value(&light, options).unwrap(), json!({"color": 1}));
        assert_eq!(
            serde_json::to_value(Light { color: 7 }).unwrap(),
            json!({"color": 7})
        );

        let parsed: Light = serde_json::from_value(json!({"color": "RED"})).unwrap();
        assert_eq!(parsed.color, 0);
        let parsed: Light = serde_json::from_value(json!({"color": 1})).unwrap();
        assert_eq!(parsed.color, 1);
        assert!(serde_json::from_value::<Light>(json!({"color": "BLUE"})).is_err());
    }
}

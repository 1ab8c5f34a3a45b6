//! HTTP 头与 gRPC metadata 之间的映射

use http::HeaderMap;
use http::header::{AUTHORIZATION, HOST};
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tracing::debug;

/// 响应头中 gRPC header metadata 的前缀
pub const METADATA_HEADER_PREFIX: &str = "Grpc-Metadata-";
/// HTTP trailer 中 gRPC trailer metadata 的前缀
pub const METADATA_TRAILER_PREFIX: &str = "Grpc-Trailer-";
/// 透传的固定 HTTP 头在 metadata 中的前缀
pub const METADATA_PREFIX: &str = "grpcgateway-";

/// 原样（小写）透传到 gRPC 的请求头
pub const ALLOWED_INCOMING_HEADERS: [&str; 10] = [
    "X-Github-Event",
    "X-Hub-Signature",
    "X-Github-Content",
    "X-Github-Delivery",
    "X-Github-Enterprise-Host",
    "X-Github-Hook-Id",
    "X-Github-Hook-Installation-Target-Id",
    "X-Github-Hook-Installation-Target-Type",
    "X-Hub-Signature-256",
    "Oc-Qa-Key",
];

const PERMANENT_HTTP_HEADERS: [&str; 24] = [
    "Accept",
    "Accept-Charset",
    "Accept-Language",
    "Accept-Ranges",
    "Authorization",
    "Cache-Control",
    "Content-Type",
    "Cookie",
    "Date",
    "Expect",
    "From",
    "Host",
    "If-Match",
    "If-Modified-Since",
    "If-None-Match",
    "If-Schedule-Tag-Match",
    "If-Unmodified-Since",
    "Max-Forwards",
    "Origin",
    "Pragma",
    "Referer",
    "User-Agent",
    "Via",
    "Warning",
];

/// 输入为规范化的头名称，返回 metadata 键；`None` 表示丢弃
pub type HeaderMatcher = fn(&str) -> Option<String>;

/// `x-github-event` -> `X-Github-Event`
pub fn canonical_header_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

pub fn is_permanent_http_header(key: &str) -> bool {
    PERMANENT_HTTP_HEADERS.contains(&key)
}

/// 固定 HTTP 头加 `grpcgateway-` 前缀，`Grpc-Metadata-` 开头的去掉前缀，其余丢弃
pub fn default_header_matcher(key: &str) -> Option<String> {
    if is_permanent_http_header(key) {
        return Some(format!("{}{}", METADATA_PREFIX, key).to_ascii_lowercase());
    }
    key.strip_prefix(METADATA_HEADER_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(str::to_ascii_lowercase)
}

/// 白名单中的头原样透传，其余交给 [`default_header_matcher`]
pub fn incoming_header_matcher(key: &str) -> Option<String> {
    if ALLOWED_INCOMING_HEADERS.contains(&key) {
        return Some(key.to_ascii_lowercase());
    }
    default_header_matcher(key)
}

/// 把请求头转换为转发给 gRPC 的 metadata
///
/// `Authorization` 总是以 `authorization` 转发，`Host` 以 `x-forwarded-host` 转发。
pub fn incoming_metadata(headers: &HeaderMap, matcher: HeaderMatcher) -> MetadataMap {
    let mut metadata = MetadataMap::new();

    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            debug!(header = %name, "skipping non-ASCII header value");
            continue;
        };
        if name == AUTHORIZATION {
            append(&mut metadata, "authorization", value);
        }
        if let Some(key) = matcher(&canonical_header_key(name.as_str())) {
            append(&mut metadata, &key, value);
        }
    }

    if let Some(host) = headers.get(HOST).and_then(|v| v.to_str().ok()) {
        append(&mut metadata, "x-forwarded-host", host);
    }
    metadata
}

fn append(metadata: &mut MetadataMap, key: &str, value: &str) {
    let (Ok(key), Ok(value)) = (
        MetadataKey::<Ascii>::from_bytes(key.as_bytes()),
        MetadataValue::<Ascii>::try_from(value),
    ) else {
        debug!(key, "skipping header that is not valid gRPC metadata");
        return;
    };
    metadata.append(key, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_canonical_header_key() {
        assert_eq!(canonical_header_key("x-github-event"), "X-Github-Event");
        assert_eq!(canonical_header_key("CONTENT-TYPE"), "Content-Type");
        assert_eq!(canonical_header_key("oc-qa-key"), "Oc-Qa-Key");
    }

    #[test]
    fn test_default_header_matcher() {
        assert_eq!(
            default_header_matcher("User-Agent").as_deref(),
            Some("grpcgateway-user-agent")
        );
        assert_eq!(
            default_header_matcher("Grpc-Metadata-Tenant").as_deref(),
            Some("tenant")
        );
        assert_eq!(default_header_matcher("X-Custom"), None);
        assert_eq!(default_header_matcher("Grpc-Metadata-"), None);
    }

    #[test]
    fn test_incoming_header_matcher_allow_list() {
        assert_eq!(
            incoming_header_matcher("X-Hub-Signature-256").as_deref(),
            Some("x-hub-signature-256")
        );
        assert_eq!(
            incoming_header_matcher("Oc-Qa-Key").as_deref(),
            Some("oc-qa-key")
        );
        assert_eq!(
            incoming_header_matcher("Cookie").as_deref(),
            Some("grpcgateway-cookie")
        );
        assert_eq!(incoming_header_matcher("X-Forwarded-Proto"), None);
    }

    #[test]
    fn test_incoming_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer t0ken"));
        headers.insert("host", HeaderValue::from_static("api.example.com"));
        headers.insert("x-github-event", HeaderValue::from_static("push"));
        headers.insert("x-dropped", HeaderValue::from_static("1"));

        let metadata = incoming_metadata(&headers, incoming_header_matcher);
        assert_eq!(metadata.get("authorization").unwrap(), "Bearer t0ken");
        assert_eq!(metadata.get("grpcgateway-authorization").unwrap(), "Bearer t0ken");
        assert_eq!(metadata.get("x-forwarded-host").unwrap(), "api.example.com");
        assert_eq!(metadata.get("grpcgateway-host").unwrap(), "api.example.com");
        assert_eq!(metadata.get("x-github-event").unwrap(), "push");
        assert!(metadata.get("x-dropped").is_none());
    }
}

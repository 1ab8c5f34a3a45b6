//! 在路由之前去掉 URL 的 base path 前缀

use std::sync::Arc;
use std::task::{Context, Poll};

use http::Request;
use http::uri::{PathAndQuery, Uri};
use tower::Service;
use tracing::debug;

/// 路径改写包装
///
/// - 与特殊路径完全相同的请求原样转发
/// - 以 base path 开头的请求去掉前缀，结果总以 `/` 开头
/// - 其余请求原样转发
#[derive(Debug, Clone)]
pub struct MuxWrapper<S> {
    inner: S,
    base_path: Arc<str>,
    special_paths: Arc<[String]>,
}

impl<S> MuxWrapper<S> {
    /// `base_path` 通常取 `App::parse_path(&[])`，以 `/` 结尾
    pub fn new(inner: S, base_path: impl Into<String>, special_paths: &[String]) -> Self {
        let base_path: String = base_path.into();
        Self {
            inner,
            base_path: Arc::from(base_path),
            special_paths: special_paths.into(),
        }
    }

    pub fn rewrite_path(&self, path: &str) -> Option<String> {
        if self.special_paths.iter().any(|special| special == path) {
            return None;
        }
        if &*self.base_path == "/" {
            return None;
        }
        let stripped = path.strip_prefix(&*self.base_path).or_else(|| {
            // 没有结尾斜杠的 base path 本身，例如 `/api`
            (path == self.base_path.trim_end_matches('/')).then_some("")
        })?;
        Some(format!("/{}", stripped))
    }
}

impl<S, B> Service<Request<B>> for MuxWrapper<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> S::Future {
        if let Some(path) = self.rewrite_path(req.uri().path()) {
            let path_and_query = match req.uri().query() {
                Some(query) => format!("{}?{}", path, query),
                None => path,
            };
            match rewrite_uri(req.uri(), &path_and_query) {
                Ok(uri) => {
                    debug!(from = %req.uri(), to = %uri, "request path rewritten");
                    *req.uri_mut() = uri;
                }
                Err(err) => debug!(error = %err, "keeping original request path"),
            }
        }
        self.inner.call(req)
    }
}

fn rewrite_uri(uri: &Uri, path_and_query: &str) -> Result<Uri, http::Error> {
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query)?);
    Ok(Uri::from_parts(parts)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::{ServiceExt, service_fn};

    fn wrapper(base: &str) -> MuxWrapper<()> {
        MuxWrapper::new((), base, &["/health".to_string(), "/metrics".to_string()])
    }

    #[test]
    fn test_rewrite_path() {
        let wrapper = wrapper("/api/");
        assert_eq!(wrapper.rewrite_path("/api/v1/projects").as_deref(), Some("/v1/projects"));
        assert_eq!(wrapper.rewrite_path("/api/").as_deref(), Some("/"));
        assert_eq!(wrapper.rewrite_path("/api").as_deref(), Some("/"));
        assert_eq!(wrapper.rewrite_path("/health"), None);
        assert_eq!(wrapper.rewrite_path("/other/v1"), None);
        assert_eq!(wrapper.rewrite_path("/apiary"), None);
    }

    #[test]
    fn test_root_base_path_is_identity() {
        let wrapper = wrapper("/");
        assert_eq!(wrapper.rewrite_path("/v1/projects"), None);
    }

    #[tokio::test]
    async fn test_query_string_is_preserved() {
        let echo = service_fn(|req: Request<()>| async move {
            Ok::<_, Infallible>(req.uri().to_string())
        });
        let wrapper = MuxWrapper::new(echo, "/api/", &["/health".to_string()]);

        let uri = wrapper
            .clone()
            .oneshot(Request::get("/api/v1/projects?limit=5&tag=a").body(()).unwrap())
            .await
            .unwrap();
        assert_eq!(uri, "/v1/projects?limit=5&tag=a");

        let uri = wrapper
            .oneshot(Request::get("/health?verbose=1").body(()).unwrap())
            .await
            .unwrap();
        assert_eq!(uri, "/health?verbose=1");
    }
}

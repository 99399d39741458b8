//! In-memory route table standing in for an origin server.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

use crate::{request_key, Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum Route {
    Serve {
        status: StatusCode,
        content_type: Option<&'static str>,
        body: Bytes,
    },
    Fail(String),
}

/// Fetcher answering from a table of absolute URLs.
///
/// Unknown URLs fail with [`NetError::Unreachable`], like an offline network.
#[derive(Debug)]
pub struct MemoryFetcher {
    origin: Url,
    routes: RwLock<HashMap<String, Route>>,
    /// Every request key seen, for assertions in tests. Never trimmed.
    requested: RwLock<Vec<String>>,
}

impl MemoryFetcher {
    /// Create an empty route table for `origin`.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            routes: RwLock::new(HashMap::new()),
            requested: RwLock::new(Vec::new()),
        }
    }

    /// Serve `body` with status 200 at `path` (resolved against the origin).
    pub async fn serve(&self, path: &str, body: impl Into<Bytes>) -> Result<(), NetError> {
        let route = Route::Serve {
            status: StatusCode::OK,
            content_type: mime_guess::from_path(path).first_raw(),
            body: body.into(),
        };
        self.insert(path, route).await
    }

    /// Answer `path` with the given status and an empty body.
    pub async fn status(&self, path: &str, status: StatusCode) -> Result<(), NetError> {
        let route = Route::Serve {
            status,
            content_type: None,
            body: Bytes::new(),
        };
        self.insert(path, route).await
    }

    /// Make requests for `path` fail at the transport level.
    pub async fn fail(&self, path: &str, reason: impl Into<String>) -> Result<(), NetError> {
        self.insert(path, Route::Fail(reason.into())).await
    }

    /// Drop the route for `path`.
    pub async fn remove(&self, path: &str) -> Result<(), NetError> {
        let key = self.key_for(path)?;
        self.routes.write().await.remove(&key);
        Ok(())
    }

    /// Keys of every request seen so far, in arrival order.
    pub async fn requested(&self) -> Vec<String> {
        self.requested.read().await.clone()
    }

    async fn insert(&self, path: &str, route: Route) -> Result<(), NetError> {
        let key = self.key_for(path)?;
        self.routes.write().await.insert(key, route);
        Ok(())
    }

    fn key_for(&self, path: &str) -> Result<String, NetError> {
        let url = self
            .origin
            .join(path)
            .map_err(|e| NetError::InvalidUrl(format!("{path}: {e}")))?;
        Ok(request_key(&url))
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.key();
        self.requested.write().await.push(key.clone());

        let route = self.routes.read().await.get(&key).cloned();
        trace!(url = %key, found = route.is_some(), "Memory fetch");

        match route {
            Some(Route::Serve {
                status,
                content_type,
                body,
            }) => {
                let mut headers = HeaderMap::new();
                if let Some(content_type) = content_type {
                    headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                Ok(Response {
                    request_id: request.id,
                    url: request.url.clone(),
                    status,
                    headers,
                    body,
                })
            }
            Some(Route::Fail(reason)) => Err(NetError::RequestFailed(reason)),
            None => Err(NetError::Unreachable(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://app.example/").unwrap()
    }

    #[tokio::test]
    async fn test_serves_registered_route() {
        let fetcher = MemoryFetcher::new(origin());
        fetcher.serve("/css/stylesheet.css", "body {}").await.unwrap();

        let request = Request::get_path(&origin(), "/css/stylesheet.css").unwrap();
        let response = fetcher.fetch(&request).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.body, Bytes::from_static(b"body {}"));
        assert_eq!(response.headers.get("content-type").unwrap(), "text/css");
    }

    #[tokio::test]
    async fn test_content_type_follows_extension() {
        let fetcher = MemoryFetcher::new(origin());
        fetcher.serve("/images/logo.png", vec![0x89, b'P']).await.unwrap();
        fetcher.serve("/", "<html></html>").await.unwrap();

        let png = Request::get_path(&origin(), "/images/logo.png").unwrap();
        let root = Request::get_path(&origin(), "/").unwrap();

        assert_eq!(
            fetcher.fetch(&png).await.unwrap().headers.get("content-type").unwrap(),
            "image/png"
        );
        assert!(fetcher.fetch(&root).await.unwrap().headers.get("content-type").is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_is_unreachable() {
        let fetcher = MemoryFetcher::new(origin());
        let request = Request::get_path(&origin(), "/nope").unwrap();

        let result = fetcher.fetch(&request).await;
        assert!(matches!(result, Err(NetError::Unreachable(_))));
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_fail_and_status_routes() {
        let fetcher = MemoryFetcher::new(origin());
        fetcher.fail("/a", "connection reset").await.unwrap();
        fetcher.status("/b", StatusCode::INTERNAL_SERVER_ERROR).await.unwrap();

        let a = Request::get_path(&origin(), "/a").unwrap();
        let b = Request::get_path(&origin(), "/b").unwrap();

        assert!(matches!(fetcher.fetch(&a).await, Err(NetError::RequestFailed(_))));
        assert!(!fetcher.fetch(&b).await.unwrap().ok());
        assert_eq!(fetcher.requested().await.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_route() {
        let fetcher = MemoryFetcher::new(origin());
        fetcher.serve("/", "<html></html>").await.unwrap();
        fetcher.remove("/").await.unwrap();

        let request = Request::get_path(&origin(), "/").unwrap();
        assert!(fetcher.fetch(&request).await.is_err());
    }
}

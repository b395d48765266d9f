//! Request and response values crossing the network boundary

use serde::{Deserialize, Serialize};

/// A GET for one URL. The full URL, query included, is the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileRequest {
    url: String,
}

impl TileRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cache_key(&self) -> &str {
        &self.url
    }

    /// Path component, for absolute URLs and for origin-relative ones like
    /// `/tiles/world/0_0.png?timestamp=1`.
    pub fn path(&self) -> String {
        match reqwest::Url::parse(&self.url) {
            Ok(url) => url.path().to_string(),
            Err(_) => {
                let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
                self.url[..end].to_string()
            }
        }
    }
}

/// Where a response handed to the caller came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    #[default]
    Network,
    Cache,
    /// Built locally because neither the cache nor the network could answer.
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    #[serde(skip)]
    pub source: ResponseSource,
}

impl TileResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: Vec::new(),
            body,
            source: ResponseSource::Network,
        }
    }

    pub fn with_status(status: u16, status_text: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: Vec::new(),
            body,
            source: ResponseSource::Network,
        }
    }

    /// Failure response for a cache miss whose network fetch failed. The body
    /// always carries a diagnostic.
    pub fn synthetic_failure(status: u16, status_text: impl Into<String>) -> Self {
        let status_text = status_text.into();
        let body = format!("Tile fetch failed: {status_text} ({status}).").into_bytes();
        Self {
            status,
            status_text,
            headers: Vec::new(),
            body,
            source: ResponseSource::Synthetic,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub(crate) fn served_from(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_of_absolute_and_relative_urls() {
        let absolute = TileRequest::new("https://map.example.net/tiles/world/0_0.png?timestamp=3");
        assert_eq!(absolute.path(), "/tiles/world/0_0.png");

        let relative = TileRequest::new("/tiles/world/0_0.png?timestamp=3");
        assert_eq!(relative.path(), "/tiles/world/0_0.png");
        assert_eq!(relative.cache_key(), "/tiles/world/0_0.png?timestamp=3");
    }

    #[test]
    fn test_success_range() {
        assert!(TileResponse::ok(vec![]).is_success());
        assert!(TileResponse::with_status(204, "No Content", vec![]).is_success());
        assert!(!TileResponse::with_status(304, "Not Modified", vec![]).is_success());
        assert!(!TileResponse::with_status(404, "Not Found", vec![]).is_success());
    }

    #[test]
    fn test_synthetic_failure_has_diagnostic() {
        let response = TileResponse::synthetic_failure(408, "Not in cache and network error.");
        assert!(!response.is_success());
        assert!(!response.body.is_empty());
        assert_eq!(response.source, ResponseSource::Synthetic);
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let mut response = TileResponse::ok(vec![1]);
        response.headers.push(("Content-Type".into(), "image/png".into()));
        assert_eq!(response.header("content-type"), Some("image/png"));
    }
}

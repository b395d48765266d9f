//! Network access for tile requests

use super::request::{TileRequest, TileResponse};
use crate::layers::tile::loader::TileFetcher;
use crate::prelude::{Arc, Duration};
use crate::{Error, Result};
use once_cell::sync::Lazy;

/// Shared async HTTP client for tile fetching
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("dyntile/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(16)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
});

/// Performs the actual GET for a request. Any response, whatever its status,
/// is `Ok`; `Err` means no response was obtained at all.
#[async_trait::async_trait]
pub trait NetworkFetch: Send + Sync {
    async fn fetch(&self, request: &TileRequest) -> Result<TileResponse>;
}

/// [`NetworkFetch`] over HTTP.
///
/// Origin-relative URLs (`/tiles/...`) are resolved against `origin`.
#[derive(Debug, Clone, Default)]
pub struct HttpNetwork {
    origin: Option<String>,
}

impl HttpNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_origin(origin: impl Into<String>) -> Self {
        let origin = origin.into().trim_end_matches('/').to_string();
        Self { origin: Some(origin) }
    }

    pub fn resolve(&self, url: &str) -> String {
        match &self.origin {
            Some(origin) if url.starts_with('/') => format!("{origin}{url}"),
            _ => url.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl NetworkFetch for HttpNetwork {
    async fn fetch(&self, request: &TileRequest) -> Result<TileResponse> {
        let url = self.resolve(request.url());
        let response = HTTP_CLIENT.get(&url).send().await?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(TileResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            source: Default::default(),
        })
    }
}

#[async_trait::async_trait]
impl TileFetcher for HttpNetwork {
    async fn fetch(&self, url: &str) -> Result<Arc<Vec<u8>>> {
        let response = NetworkFetch::fetch(self, &TileRequest::new(url)).await?;
        into_tile_bytes(url, response)
    }
}

/// Image bytes of a successful response, or a fetch error naming the status.
pub fn into_tile_bytes(url: &str, response: TileResponse) -> Result<Arc<Vec<u8>>> {
    if response.is_success() {
        return Ok(Arc::new(response.body));
    }
    Err(Error::TileFetch {
        url: url.to_string(),
        reason: format!("HTTP {} {}", response.status, response.status_text)
            .trim_end()
            .to_string(),
    })
}

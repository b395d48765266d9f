//! Stale-while-revalidate cache at the network boundary.
//!
//! A tile request is answered from storage when an entry exists, while a
//! network fetch for the same URL runs in the background and overwrites the
//! entry on success. Misses wait for that fetch instead. Failed or non-2xx
//! fetches are never stored, so a good entry is never replaced by an error.

use tokio::sync::oneshot;

use super::generation::{CacheGeneration, CacheLifecycle};
use super::network::{into_tile_bytes, NetworkFetch};
use super::request::{ResponseSource, TileRequest, TileResponse};
use super::storage::CacheStorage;
use crate::core::config::{ActivationPolicy, CacheConfig};
use crate::core::constants::MISS_NETWORK_ERROR_STATUS;
use crate::layers::tile::loader::TileFetcher;
use crate::prelude::{Arc, Mutex};
use crate::runtime::{self, AsyncHandle};
use crate::{Error, Result};

const MISS_NETWORK_ERROR_REASON: &str = "Not in cache and network error.";

/// What the foreground learns from the background fetch on a miss.
type SharedOutcome = std::result::Result<TileResponse, String>;

pub struct RevalidatingCache {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn NetworkFetch>,
    config: CacheConfig,
    lifecycle: Mutex<CacheLifecycle>,
    background: Mutex<Vec<Box<dyn AsyncHandle>>>,
}

impl RevalidatingCache {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn NetworkFetch>,
        config: CacheConfig,
    ) -> Self {
        Self {
            storage,
            network,
            config,
            lifecycle: Mutex::new(CacheLifecycle::Pending),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn generation(&self) -> CacheGeneration {
        self.config.generation
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn lifecycle(&self) -> CacheLifecycle {
        self.lifecycle
            .lock()
            .map(|state| *state)
            .unwrap_or(CacheLifecycle::Pending)
    }

    fn set_lifecycle(&self, next: CacheLifecycle) {
        if let Ok(mut state) = self.lifecycle.lock() {
            *state = next;
        }
    }

    /// Open this generation's storage. Under [`ActivationPolicy::Immediate`]
    /// activation follows at once, without waiting for older generations.
    pub async fn install(&self) -> Result<()> {
        self.storage.open(&self.generation().name()).await?;
        self.set_lifecycle(CacheLifecycle::Installed);
        log::info!("Installed {}", self.generation());

        if self.config.activation == ActivationPolicy::Immediate {
            self.activate().await?;
        }
        Ok(())
    }

    /// Delete every other cache generation and start handling tile traffic.
    /// Returns the names of the deleted generations.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let current = self.generation();
        let current_name = current.name();
        self.storage.open(&current_name).await?;

        let mut deleted = Vec::new();
        for name in self.storage.generations().await? {
            // Spellings like `tile-cache-v01` are other storages, not this one.
            if name == current_name || !CacheGeneration::is_generation_name(&name) {
                continue;
            }
            if self.storage.delete_generation(&name).await? {
                log::info!("Deleted old cache generation {}", name);
                deleted.push(name);
            }
        }

        self.set_lifecycle(CacheLifecycle::Active);
        log::info!("Activated {}", current);
        Ok(deleted)
    }

    /// Entry point for every fetch. Tile paths go through the cache once it
    /// is active; everything else goes straight to the network.
    pub async fn intercept(&self, request: &TileRequest) -> Result<TileResponse> {
        if self.lifecycle() != CacheLifecycle::Active {
            return self.network.fetch(request).await;
        }
        if !request.path().starts_with(&self.config.tile_path_prefix) {
            return self.network.fetch(request).await;
        }
        Ok(self.handle_tile_request(request).await)
    }

    /// Serve `request` stale-while-revalidate. Always yields a response; a
    /// miss whose fetch fails gets a synthetic failure, never an empty body.
    pub async fn handle_tile_request(&self, request: &TileRequest) -> TileResponse {
        let generation = self.generation().name();
        let key = request.cache_key();

        let cached = match self.storage.get(&generation, key).await {
            Ok(cached) => cached,
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        };

        let outcome = self.revalidate(request.clone(), generation);

        if let Some(cached) = cached {
            log::debug!("Cache hit for {}", key);
            return cached.served_from(ResponseSource::Cache);
        }

        log::debug!("Cache miss for {}", key);
        match outcome.await {
            Ok(Ok(response)) if response.is_success() => response.served_from(ResponseSource::Network),
            Ok(Ok(response)) => {
                let reason = if response.status_text.is_empty() {
                    format!("Not in cache and network returned HTTP {}.", response.status)
                } else {
                    response.status_text.clone()
                };
                log::error!(
                    "{}",
                    Error::CacheMissNetwork {
                        url: request.url().to_string(),
                        status: response.status,
                    }
                );
                TileResponse::synthetic_failure(response.status, reason)
            }
            Ok(Err(reason)) => {
                log::error!("Cache miss for {} and network error: {}", key, reason);
                TileResponse::synthetic_failure(MISS_NETWORK_ERROR_STATUS, MISS_NETWORK_ERROR_REASON)
            }
            Err(_) => {
                log::error!("Background fetch for {} ended without a result", key);
                TileResponse::synthetic_failure(MISS_NETWORK_ERROR_STATUS, MISS_NETWORK_ERROR_REASON)
            }
        }
    }

    /// Spawn the fetch-and-store task for `request`. The receiver yields the
    /// fetch result as soon as the network answers, before any store.
    fn revalidate(
        &self,
        request: TileRequest,
        generation: String,
    ) -> oneshot::Receiver<SharedOutcome> {
        let (tx, rx) = oneshot::channel();
        let network = self.network.clone();
        let storage = self.storage.clone();

        let handle = runtime::spawn(async move {
            let result = network.fetch(&request).await;
            let shared = match &result {
                Ok(response) => Ok(response.clone()),
                Err(e) => Err(e.to_string()),
            };
            // Nobody listens on a hit.
            let _ = tx.send(shared);

            let key = request.cache_key();
            match result {
                Ok(response) if response.is_success() => {
                    if let Err(e) = storage.put(&generation, key, &response).await {
                        log::error!(
                            "{}",
                            Error::CacheWrite {
                                key: key.to_string(),
                                reason: e.to_string(),
                            }
                        );
                    }
                }
                Ok(response) => {
                    log::info!(
                        "Not caching {} for {}: HTTP {}",
                        response.status_text,
                        key,
                        response.status
                    );
                }
                Err(e) => log::warn!("Revalidation of {} failed: {}", key, e),
            }
        });
        self.track(handle);
        rx
    }

    fn track(&self, handle: Box<dyn AsyncHandle>) {
        match self.background.lock() {
            Ok(mut background) => {
                background.retain(|task| !task.is_finished());
                background.push(handle);
            }
            Err(_) => log::warn!("Background task list poisoned, task not tracked"),
        }
    }

    /// Number of background refreshes not yet known to be finished
    pub fn pending_refreshes(&self) -> usize {
        self.background
            .lock()
            .map(|background| background.iter().filter(|task| !task.is_finished()).count())
            .unwrap_or(0)
    }

    /// Wait for every background refresh started so far to finish, stores included.
    pub async fn settle(&self) {
        loop {
            let handles: Vec<Box<dyn AsyncHandle>> = match self.background.lock() {
                Ok(mut background) => background.drain(..).collect(),
                Err(_) => return,
            };
            if handles.is_empty() {
                return;
            }
            futures::future::join_all(handles.into_iter().map(|handle| handle.join())).await;
        }
    }
}

impl std::fmt::Debug for RevalidatingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevalidatingCache")
            .field("config", &self.config)
            .field("lifecycle", &self.lifecycle())
            .field("pending_refreshes", &self.pending_refreshes())
            .finish()
    }
}

/// Lets a [`crate::layers::tile::TileLayer`] load its tiles through the cache.
#[async_trait::async_trait]
impl TileFetcher for RevalidatingCache {
    async fn fetch(&self, url: &str) -> Result<Arc<Vec<u8>>> {
        let response = self.intercept(&TileRequest::new(url)).await?;
        if response.source == ResponseSource::Synthetic {
            return Err(Error::CacheMissNetwork {
                url: url.to_string(),
                status: response.status,
            });
        }
        into_tile_bytes(url, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves queued responses in order, then errors.
    #[derive(Default)]
    struct ScriptedNetwork {
        responses: Mutex<Vec<Result<TileResponse>>>,
        calls: AtomicUsize,
    }

    impl ScriptedNetwork {
        fn with(responses: Vec<Result<TileResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl NetworkFetch for ScriptedNetwork {
        async fn fetch(&self, _request: &TileRequest) -> Result<TileResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::Storage("script exhausted".into())))
        }
    }

    async fn active_cache(network: Arc<ScriptedNetwork>) -> (Arc<MemoryStorage>, RevalidatingCache) {
        let storage = Arc::new(MemoryStorage::new());
        let cache = RevalidatingCache::new(storage.clone(), network, CacheConfig::default());
        cache.install().await.unwrap();
        (storage, cache)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let network = ScriptedNetwork::with(vec![
            Ok(TileResponse::ok(vec![1])),
            Ok(TileResponse::ok(vec![2])),
        ]);
        let (_storage, cache) = active_cache(network.clone()).await;
        let request = TileRequest::new("/tiles/world/0_0.png");

        let first = cache.handle_tile_request(&request).await;
        assert_eq!(first.body, vec![1]);
        assert_eq!(first.source, ResponseSource::Network);
        cache.settle().await;

        let second = cache.handle_tile_request(&request).await;
        assert_eq!(second.body, vec![1], "hit serves the stored copy");
        assert_eq!(second.source, ResponseSource::Cache);
        cache.settle().await;

        let third = cache.handle_tile_request(&request).await;
        assert_eq!(third.body, vec![2], "refresh replaced the entry");
        assert_eq!(network.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_error_response_does_not_replace_entry() {
        let network = ScriptedNetwork::with(vec![
            Ok(TileResponse::ok(vec![1])),
            Ok(TileResponse::with_status(500, "Internal Server Error", vec![])),
        ]);
        let (storage, cache) = active_cache(network).await;
        let request = TileRequest::new("/tiles/a.png");

        cache.handle_tile_request(&request).await;
        cache.settle().await;
        let hit = cache.handle_tile_request(&request).await;
        cache.settle().await;

        assert_eq!(hit.body, vec![1]);
        let stored = storage.get("tile-cache-v1", "/tiles/a.png").await.unwrap().unwrap();
        assert_eq!(stored.body, vec![1]);
    }

    #[tokio::test]
    async fn test_miss_with_bad_status_is_synthetic() {
        let network = ScriptedNetwork::with(vec![Ok(TileResponse::with_status(
            404,
            "Not Found",
            vec![],
        ))]);
        let (storage, cache) = active_cache(network).await;

        let response = cache.handle_tile_request(&TileRequest::new("/tiles/a.png")).await;
        cache.settle().await;

        assert_eq!(response.status, 404);
        assert_eq!(response.source, ResponseSource::Synthetic);
        assert!(!response.body.is_empty());
        assert_eq!(storage.entry_count("tile-cache-v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_passthrough_before_activation() {
        let network = ScriptedNetwork::with(vec![Ok(TileResponse::ok(vec![5]))]);
        let storage = Arc::new(MemoryStorage::new());
        let config = CacheConfig {
            activation: ActivationPolicy::WaitForRelease,
            ..CacheConfig::default()
        };
        let cache = RevalidatingCache::new(storage.clone(), network, config);
        cache.install().await.unwrap();
        assert_eq!(cache.lifecycle(), CacheLifecycle::Installed);

        let response = cache.intercept(&TileRequest::new("/tiles/a.png")).await.unwrap();
        assert_eq!(response.body, vec![5]);
        cache.settle().await;
        assert_eq!(storage.entry_count("tile-cache-v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_activation_compares_exact_names() {
        let storage = Arc::new(MemoryStorage::new());
        for name in ["tile-cache-v01", "tile-cache-v+1", "tile-cache-v2", "player-faces"] {
            storage.open(name).await.unwrap();
        }
        let cache = RevalidatingCache::new(
            storage.clone(),
            ScriptedNetwork::with(Vec::new()),
            CacheConfig::default(),
        );
        cache.install().await.unwrap();

        let mut remaining = storage.generations().await.unwrap();
        remaining.sort();
        assert_eq!(remaining, vec!["player-faces", "tile-cache-v1"]);
    }

    #[tokio::test]
    async fn test_tile_fetcher_maps_synthetic_to_error() {
        let network = ScriptedNetwork::with(vec![Err(Error::Storage("offline".into()))]);
        let (_storage, cache) = active_cache(network).await;

        let err = TileFetcher::fetch(&cache, "/tiles/a.png").await.unwrap_err();
        assert!(matches!(err, Error::CacheMissNetwork { status: 408, .. }));
    }
}

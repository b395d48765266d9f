//! # dyntile
//!
//! Tile scheduling and caching for Dynmap-style world maps.
//!
//! A [`TileLayer`] maps world coordinates to tile names and URLs, keeps every
//! requested tile resident, and loads them through a bounded-concurrency FIFO
//! queue. Fetches can go straight to the network or through a
//! [`RevalidatingCache`] that answers from persistent storage and refreshes
//! it in the background.

pub mod cache;
pub mod core;
pub mod layers;
pub mod prelude;
pub mod runtime;

pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{
        ActivationPolicy, CacheConfig, ConfigError, CoordinateVariant, EvictionPolicy, LayerConfig,
        SchedulerConfig,
    },
    geo::{TileCoord, TileDescriptor, TileName},
};

pub use cache::{
    CacheGeneration, CacheStorage, DiskStorage, HttpNetwork, MemoryStorage, NetworkFetch,
    RevalidatingCache, TileRequest, TileResponse,
};

pub use layers::tile::{
    LoadScheduler, PrefixTileSource, RenderTarget, RenderTargetFactory, TileFetcher, TileLayer,
    TileSource, TileState,
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Tile fetch failed for {url}: {reason}")]
    TileFetch { url: String, reason: String },

    #[error("Cache write failed for {key}: {reason}")]
    CacheWrite { key: String, reason: String },

    #[error("Not in cache and network failed for {url} (status {status})")]
    CacheMissNetwork { url: String, status: u16 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("fetch timed out after {0:?}")]
    Timeout(std::time::Duration),
}

//! Persistent stale-while-revalidate tile cache
//!
//! - Generation-scoped storage (`tile-cache-v{N}`) in memory or on disk
//! - Install/activate lifecycle that purges older generations
//! - Interception of tile-path requests at the network boundary

pub mod disk;
pub mod generation;
pub mod network;
pub mod request;
pub mod revalidate;
pub mod storage;

pub use disk::DiskStorage;
pub use generation::{CacheGeneration, CacheLifecycle};
pub use network::{HttpNetwork, NetworkFetch};
pub use request::{ResponseSource, TileRequest, TileResponse};
pub use revalidate::RevalidatingCache;
pub use storage::{CacheStorage, MemoryStorage};

//! Resident tile layer
//!
//! This module provides the tile layer used for Dynmap-style world maps:
//! - Coordinate-to-name mapping with per-layer URL memoization
//! - A registry that deduplicates tiles by name and keeps them resident
//! - A bounded-concurrency FIFO load scheduler driven by completion events

pub mod layer;
pub mod loader;
pub mod mapper;
pub mod registry;
pub mod source;
pub mod types;

pub use layer::TileLayer;
pub use loader::{FetchEvent, FetchOutcome, LoadScheduler, TileFetcher, TileLoader};
pub use mapper::{compute_tile_descriptor, compute_tile_name, compute_tile_url, UrlResolver};
pub use registry::TileRegistry;
pub use source::{PrefixTileSource, TileSource};
pub use types::{
    ImageBuffer, ImageBufferFactory, RenderTarget, RenderTargetFactory, TileHandle, TileHandleId,
    TileState,
};

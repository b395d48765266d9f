//! Prelude module for common dyntile types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use dyntile::prelude::*;`

pub use crate::core::{
    config::{
        ActivationPolicy, CacheConfig, CoordinateVariant, EvictionPolicy, LayerConfig,
        SchedulerConfig,
    },
    geo::{TileCoord, TileName},
};

pub use crate::layers::tile::{
    loader::{TileFetcher, TileLoader},
    source::{PrefixTileSource, TileSource},
    types::{RenderTarget, RenderTargetFactory, TileState},
    TileLayer,
};

pub use crate::cache::{
    CacheStorage, DiskStorage, HttpNetwork, MemoryStorage, NetworkFetch, RevalidatingCache,
    TileRequest, TileResponse,
};

pub use crate::runtime::{runtime, spawn, AsyncHandle, AsyncSpawner};

pub use crate::{Error as TileError, Result};

pub use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};

pub use futures::Future;

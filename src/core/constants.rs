//! Core constants derived from Dynmap defaults and the web client's conventions.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default number of tile fetches allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 6;

/// Base tile edge in pixels before `tile_scale` is applied (HD maps use `128 << scale`).
pub const BASE_TILE_SIZE: u32 = 128;

/// Right shift turning world coordinates into the 32-tile directory grid.
pub const DEFAULT_TILE_GRID_SHIFT: u32 = 5;

/// Shift used by map types that store 128px tiles per directory cell.
pub const HD_TILE_GRID_SHIFT: u32 = 7;

/// Largest grid shift accepted by configuration normalization.
pub const MAX_TILE_GRID_SHIFT: u32 = 30;

/// Character repeated once per zoom-out level in tile names.
pub const ZOOM_MARKER: char = 'z';

/// Separator written after a non-empty zoom prefix.
pub const ZOOM_SEPARATOR: char = '_';

/// Suffix appended to tile names when day/night rendering is enabled.
pub const DAY_SUFFIX: &str = "_day";

/// Request paths under this prefix are intercepted by the revalidating cache.
pub const DEFAULT_TILE_PATH_PREFIX: &str = "/tiles/";

/// Cache generations are named `{prefix}{version}`.
pub const CACHE_GENERATION_PREFIX: &str = "tile-cache-v";

/// Query parameter carrying a cache-busting revalidation token.
pub const REVALIDATION_QUERY_KEY: &str = "timestamp";

/// Status used for a cache miss whose network fetch never produced a response.
pub const MISS_NETWORK_ERROR_STATUS: u16 = 408;

/// Zoom-out levels beyond this are clamped so scaled `i64` coordinates fit in `i128`.
pub const MAX_ZOOM_OUT_LEVEL: u32 = 32;

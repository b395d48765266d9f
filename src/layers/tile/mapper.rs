//! Coordinate mapper: viewport tile coordinates to Dynmap tile names and URLs
//!
//! Dynmap counts zoom *outwards* from the most detailed level, so a viewer
//! zoom `z` becomes `zoom_out_level = max_zoom - z`. Every zoom-out level
//! doubles the world area one tile covers, and tiles are grouped into
//! directories by right-shifting world coordinates by the grid exponent.

use super::source::TileSource;
use crate::core::config::{CoordinateVariant, LayerConfig};
use crate::core::constants::{DAY_SUFFIX, MAX_ZOOM_OUT_LEVEL, ZOOM_MARKER, ZOOM_SEPARATOR};
use crate::core::geo::{TileCoord, TileDescriptor, TileName};
use crate::prelude::{Arc, HashMap};

/// Dynmap zoom-out level for a viewer coordinate, clamped to `[0, map_zoom_out]`.
pub fn zoom_out_level(coord: &TileCoord, config: &LayerConfig) -> u32 {
    let level = (i64::from(config.max_zoom) - i64::from(coord.z)).max(0) as u64;
    let level = level.min(u64::from(MAX_ZOOM_OUT_LEVEL)) as u32;
    match config.map_zoom_out {
        Some(depth) => level.min(depth),
        None => level,
    }
}

/// `level` zoom markers followed by a separator; empty at full detail.
pub fn zoom_prefix(level: u32) -> String {
    if level == 0 {
        return String::new();
    }
    let mut prefix: String = std::iter::repeat(ZOOM_MARKER).take(level as usize).collect();
    prefix.push(ZOOM_SEPARATOR);
    prefix
}

/// Exact for every `i64` coordinate: world coordinates are computed in `i128`.
pub fn compute_tile_descriptor(coord: &TileCoord, config: &LayerConfig) -> TileDescriptor {
    let zoom_out_level = zoom_out_level(coord, config);
    let scale = 1i64 << zoom_out_level;

    let y = match config.variant {
        CoordinateVariant::Flat => i128::from(coord.y),
        CoordinateVariant::Hd => -i128::from(coord.y),
    };
    let world_x = i128::from(scale) * i128::from(coord.x);
    let world_y = i128::from(scale) * y;

    TileDescriptor {
        prefix: config.prefix.clone(),
        zoom_prefix: zoom_prefix(zoom_out_level),
        zoom_out_level,
        scale,
        world_x,
        world_y,
        scaled_x: world_x >> config.tile_grid_shift,
        scaled_y: world_y >> config.tile_grid_shift,
        day_night_suffix: if config.day_night_flag {
            DAY_SUFFIX.to_string()
        } else {
            String::new()
        },
        format: config.image_format.clone(),
    }
}

pub fn compute_tile_name(coord: &TileCoord, config: &LayerConfig) -> TileName {
    let d = compute_tile_descriptor(coord, config);
    let name = match config.variant {
        CoordinateVariant::Flat => format!(
            "{}/{}{}_{}{}.{}",
            d.prefix, d.zoom_prefix, d.scaled_x, d.scaled_y, d.day_night_suffix, d.format
        ),
        CoordinateVariant::Hd => format!(
            "{}{}/{}_{}/{}{}_{}.{}",
            d.prefix,
            d.day_night_suffix,
            d.scaled_x,
            d.scaled_y,
            d.zoom_prefix,
            d.world_x,
            d.world_y,
            d.format
        ),
    };
    TileName::new(name)
}

/// Token-less URL for `name`, straight from the source.
pub fn compute_tile_url(name: &TileName, source: &dyn TileSource) -> String {
    source.url(name, None)
}

/// Memoizes resolved URLs per tile name for the lifetime of a layer.
///
/// Entries only change through [`UrlResolver::refresh`], which is how a
/// revalidation token reaches the URL.
pub struct UrlResolver {
    source: Arc<dyn TileSource>,
    cache: HashMap<TileName, String>,
}

impl UrlResolver {
    pub fn new(source: Arc<dyn TileSource>) -> Self {
        Self {
            source,
            cache: HashMap::default(),
        }
    }

    pub fn resolve(&mut self, name: &TileName) -> String {
        if let Some(url) = self.cache.get(name) {
            return url.clone();
        }
        let url = compute_tile_url(name, self.source.as_ref());
        self.cache.insert(name.clone(), url.clone());
        url
    }

    /// Re-resolve `name` with a revalidation token and remember the result.
    pub fn refresh(&mut self, name: &TileName, token: Option<&str>) -> String {
        let url = self.source.url(name, token);
        self.cache.insert(name.clone(), url.clone());
        url
    }

    pub fn cached(&self, name: &TileName) -> Option<&str> {
        self.cache.get(name).map(String::as_str)
    }

    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl std::fmt::Debug for UrlResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlResolver")
            .field("cached", &self.cache.len())
            .finish()
    }
}

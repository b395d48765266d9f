use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Grid position and zoom level of a tile as delivered by the viewport.
///
/// `z` follows the viewer's convention: higher values are more zoomed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i64,
    pub y: i64,
    pub z: i32,
}

impl TileCoord {
    pub fn new(x: i64, y: i64, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Canonical tile key. Two coordinates addressing the same world cell at the
/// same effective zoom always produce equal names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileName(String);

impl TileName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TileName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TileName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TileName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Everything needed to spell a tile name, derived from a [`TileCoord`] and
/// the layer configuration. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDescriptor {
    pub prefix: String,
    /// `zoom_out_level` markers plus the separator, or empty at full detail.
    pub zoom_prefix: String,
    pub zoom_out_level: u32,
    pub scale: i64,
    /// World coordinates after scaling (and Y negation for HD maps).
    /// Wide enough to hold any `i64` coordinate at the deepest zoom-out level.
    pub world_x: i128,
    pub world_y: i128,
    /// World coordinates right-shifted by the tile-grid exponent.
    pub scaled_x: i128,
    pub scaled_y: i128,
    pub day_night_suffix: String,
    pub format: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::HashMap;

    #[test]
    fn test_tile_name_borrows_as_str() {
        let mut names: HashMap<TileName, u32> = HashMap::default();
        names.insert(TileName::from("world/0_0.png"), 1);

        assert_eq!(names.get("world/0_0.png"), Some(&1));
        assert_eq!(TileName::from("a").to_string(), "a");
    }

    #[test]
    fn test_tile_coord_display() {
        assert_eq!(TileCoord::new(4, -7, 3).to_string(), "3/4/-7");
    }
}

use crate::core::constants::CACHE_GENERATION_PREFIX;
use std::fmt;

/// A versioned cache namespace, stored as `tile-cache-v{N}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheGeneration {
    version: u32,
}

impl CacheGeneration {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    pub fn version(self) -> u32 {
        self.version
    }

    pub fn name(self) -> String {
        format!("{CACHE_GENERATION_PREFIX}{}", self.version)
    }

    /// Recognise a generation-named storage; anything else is not ours.
    pub fn parse(name: &str) -> Option<Self> {
        name.strip_prefix(CACHE_GENERATION_PREFIX)?
            .parse()
            .ok()
            .map(Self::new)
    }
}

impl CacheGeneration {
    /// Whether `name` looks like any cache generation, including
    /// non-canonical spellings such as `tile-cache-v01`.
    pub fn is_generation_name(name: &str) -> bool {
        Self::parse(name).is_some()
    }
}

impl fmt::Display for CacheGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CACHE_GENERATION_PREFIX}{}", self.version)
    }
}

/// Where a cache instance is in its install/activate lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLifecycle {
    /// Created, storage not opened yet. Traffic passes through.
    Pending,
    /// Storage opened, waiting for activation. Traffic passes through.
    Installed,
    /// Old generations purged, all tile traffic handled.
    Active,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_names() {
        assert_eq!(CacheGeneration::new(2).name(), "tile-cache-v2");
        assert_eq!(CacheGeneration::parse("tile-cache-v12"), Some(CacheGeneration::new(12)));
        assert_eq!(CacheGeneration::parse("dynmap-tile-cache-v1"), None);
        assert_eq!(CacheGeneration::parse("tile-cache-vX"), None);
        assert!(CacheGeneration::is_generation_name("tile-cache-v01"));
        assert_ne!(CacheGeneration::new(1).name(), "tile-cache-v01");
    }
}

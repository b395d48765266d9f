//! Configuration for tile layers, the load scheduler and the revalidating cache
//!
//! Layer options historically arrived under several spellings (`image-format`,
//! `imageFormat`, ...). They are normalized exactly once, here, into the
//! canonical [`LayerConfig`]; nothing downstream looks at raw options again.

use super::constants::{
    DEFAULT_MAX_CONCURRENT_LOADS, DEFAULT_TILE_GRID_SHIFT,
    DEFAULT_TILE_PATH_PREFIX, BASE_TILE_SIZE, MAX_TILE_GRID_SHIFT,
};
use crate::cache::generation::CacheGeneration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Errors raised while building a configuration. Always reported at setup,
/// never while resolving individual tiles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required option `{0}`")]
    MissingField(&'static str),

    #[error("unknown option `{0}`")]
    UnknownKey(String),

    #[error("option `{canonical}` given twice (as `{first}` and `{second}`)")]
    AmbiguousKey {
        canonical: &'static str,
        first: String,
        second: String,
    },

    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("layer options must be a JSON object")]
    NotAnObject,
}

/// How viewport coordinates are turned into world coordinates and names.
///
/// The two conventions are not derived from a shared rule; each is kept as
/// its own strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateVariant {
    /// Base layer: `{prefix}/{zoom}{sx}_{sy}{daynight}.{fmt}`, Y as given.
    #[default]
    Flat,
    /// HD map type: Y negated, `{prefix}{daynight}/{sx}_{sy}/{zoom}{x}_{y}.{fmt}`.
    Hd,
}

/// What the registry does with tiles that leave the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Keep every fetched tile resident until the layer is torn down.
    #[default]
    None,
    /// Drop tiles outside the visible set, like a conventional tile layer.
    ViewportBased,
}

/// Canonical layer configuration consumed by the coordinate mapper and the
/// registry. Construct through [`LayerConfig::builder`] or
/// [`LayerConfig::from_options`]; both validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct LayerConfig {
    pub prefix: String,
    pub max_zoom: i32,
    pub map_zoom_in: i32,
    /// Deepest zoom-out level the server renders; `None` leaves it unclamped.
    pub map_zoom_out: Option<u32>,
    pub tile_scale: u32,
    pub image_format: String,
    pub day_night_flag: bool,
    pub max_concurrent_loads: usize,
    pub tile_grid_shift: u32,
    pub variant: CoordinateVariant,
    pub eviction_policy: EvictionPolicy,
    pub fetch_timeout_ms: Option<u64>,
}

impl LayerConfig {
    pub fn builder() -> LayerConfigBuilder {
        LayerConfigBuilder::default()
    }

    /// Normalize loosely spelled options into a validated configuration.
    pub fn from_options(options: &Value) -> Result<Self, ConfigError> {
        let object = options.as_object().ok_or(ConfigError::NotAnObject)?;
        let mut seen: Vec<(&'static str, &str)> = Vec::with_capacity(object.len());
        let mut builder = LayerConfigBuilder::default();

        for (key, value) in object {
            let canonical = canonical_key(key).ok_or_else(|| ConfigError::UnknownKey(key.clone()))?;

            if let Some((_, first)) = seen.iter().find(|(c, _)| *c == canonical) {
                return Err(ConfigError::AmbiguousKey {
                    canonical,
                    first: first.to_string(),
                    second: key.clone(),
                });
            }
            seen.push((canonical, key.as_str()));

            builder = builder.apply(canonical, value)?;
        }

        builder.build()
    }

    /// Edge length of one tile in pixels.
    pub fn tile_size(&self) -> u32 {
        BASE_TILE_SIZE << self.tile_scale
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_loads: self.max_concurrent_loads,
            fetch_timeout: self.fetch_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl TryFrom<Value> for LayerConfig {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_options(&value)
    }
}

/// Accepted spellings per canonical option name.
const OPTION_ALIASES: &[(&str, &[&str])] = &[
    ("prefix", &["prefix"]),
    ("max_zoom", &["max_zoom", "maxZoom", "maxzoom"]),
    ("map_zoom_in", &["map_zoom_in", "mapZoomIn", "mapzoomin"]),
    ("map_zoom_out", &["map_zoom_out", "mapZoomOut", "mapzoomout"]),
    ("tile_scale", &["tile_scale", "tileScale", "tilescale"]),
    ("image_format", &["image_format", "imageFormat", "image-format"]),
    ("day_night_flag", &["day_night_flag", "dayNightFlag", "nightandday"]),
    ("max_concurrent_loads", &["max_concurrent_loads", "maxConcurrentLoads"]),
    ("tile_grid_shift", &["tile_grid_shift", "tileGridShift"]),
    ("variant", &["variant"]),
    ("eviction_policy", &["eviction_policy", "evictionPolicy"]),
    ("fetch_timeout_ms", &["fetch_timeout_ms", "fetchTimeoutMs"]),
];

fn canonical_key(key: &str) -> Option<&'static str> {
    OPTION_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&key))
        .map(|(canonical, _)| *canonical)
}

fn parse_value<T: serde::de::DeserializeOwned>(key: &'static str, value: &Value) -> Result<T, ConfigError> {
    serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidValue {
        key,
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct LayerConfigBuilder {
    prefix: Option<String>,
    max_zoom: Option<i32>,
    map_zoom_in: Option<i32>,
    map_zoom_out: Option<u32>,
    tile_scale: Option<u32>,
    image_format: Option<String>,
    day_night_flag: bool,
    max_concurrent_loads: Option<usize>,
    tile_grid_shift: Option<u32>,
    variant: CoordinateVariant,
    eviction_policy: EvictionPolicy,
    fetch_timeout_ms: Option<u64>,
}

impl LayerConfigBuilder {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn max_zoom(mut self, max_zoom: i32) -> Self {
        self.max_zoom = Some(max_zoom);
        self
    }

    pub fn map_zoom_in(mut self, map_zoom_in: i32) -> Self {
        self.map_zoom_in = Some(map_zoom_in);
        self
    }

    pub fn map_zoom_out(mut self, map_zoom_out: u32) -> Self {
        self.map_zoom_out = Some(map_zoom_out);
        self
    }

    pub fn tile_scale(mut self, tile_scale: u32) -> Self {
        self.tile_scale = Some(tile_scale);
        self
    }

    pub fn image_format(mut self, format: impl Into<String>) -> Self {
        self.image_format = Some(format.into());
        self
    }

    pub fn day_night(mut self, enabled: bool) -> Self {
        self.day_night_flag = enabled;
        self
    }

    pub fn max_concurrent_loads(mut self, limit: usize) -> Self {
        self.max_concurrent_loads = Some(limit);
        self
    }

    pub fn tile_grid_shift(mut self, shift: u32) -> Self {
        self.tile_grid_shift = Some(shift);
        self
    }

    pub fn variant(mut self, variant: CoordinateVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Timeouts beyond `u64::MAX` milliseconds are capped there.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    fn apply(mut self, key: &'static str, value: &Value) -> Result<Self, ConfigError> {
        match key {
            "prefix" => self.prefix = Some(parse_value(key, value)?),
            "max_zoom" => self.max_zoom = Some(parse_value(key, value)?),
            "map_zoom_in" => self.map_zoom_in = Some(parse_value(key, value)?),
            "map_zoom_out" => self.map_zoom_out = parse_value(key, value)?,
            "tile_scale" => self.tile_scale = Some(parse_value(key, value)?),
            "image_format" => self.image_format = Some(parse_value(key, value)?),
            "day_night_flag" => self.day_night_flag = parse_value(key, value)?,
            "max_concurrent_loads" => self.max_concurrent_loads = Some(parse_value(key, value)?),
            "tile_grid_shift" => self.tile_grid_shift = Some(parse_value(key, value)?),
            "variant" => self.variant = parse_value(key, value)?,
            "eviction_policy" => self.eviction_policy = parse_value(key, value)?,
            "fetch_timeout_ms" => self.fetch_timeout_ms = parse_value(key, value)?,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(self)
    }

    pub fn build(self) -> Result<LayerConfig, ConfigError> {
        let prefix = self.prefix.ok_or(ConfigError::MissingField("prefix"))?;
        if prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "prefix",
                reason: "must not be empty".to_string(),
            });
        }

        let image_format = self
            .image_format
            .ok_or(ConfigError::MissingField("image_format"))?;
        if image_format.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "image_format",
                reason: "must not be empty".to_string(),
            });
        }

        let map_zoom_in = self.map_zoom_in.unwrap_or(0);
        let max_zoom = match (self.max_zoom, self.map_zoom_out) {
            (Some(max_zoom), _) => max_zoom,
            // HD map types expose mapzoomin + mapzoomout viewer levels.
            (None, Some(zoom_out)) => i32::try_from(zoom_out)
                .ok()
                .and_then(|zoom_out| map_zoom_in.checked_add(zoom_out))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "map_zoom_out",
                    reason: format!("{map_zoom_in} + {zoom_out} overflows the zoom range"),
                })?,
            (None, None) => return Err(ConfigError::MissingField("max_zoom")),
        };

        let max_concurrent_loads = self
            .max_concurrent_loads
            .unwrap_or(DEFAULT_MAX_CONCURRENT_LOADS);
        if max_concurrent_loads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_loads",
                reason: "must be at least 1".to_string(),
            });
        }

        let tile_grid_shift = self.tile_grid_shift.unwrap_or(DEFAULT_TILE_GRID_SHIFT);
        if tile_grid_shift > MAX_TILE_GRID_SHIFT {
            return Err(ConfigError::InvalidValue {
                key: "tile_grid_shift",
                reason: format!("must be at most {MAX_TILE_GRID_SHIFT}"),
            });
        }

        let tile_scale = self.tile_scale.unwrap_or(0);
        if tile_scale > 8 {
            return Err(ConfigError::InvalidValue {
                key: "tile_scale",
                reason: "must be at most 8".to_string(),
            });
        }

        Ok(LayerConfig {
            prefix,
            max_zoom,
            map_zoom_in,
            map_zoom_out: self.map_zoom_out,
            tile_scale,
            image_format,
            day_night_flag: self.day_night_flag,
            max_concurrent_loads,
            tile_grid_shift,
            variant: self.variant,
            eviction_policy: self.eviction_policy,
            fetch_timeout_ms: self.fetch_timeout_ms,
        })
    }
}

/// Configuration for the load scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of tile fetches in flight
    pub max_concurrent_loads: usize,
    /// Optional upper bound on a single fetch; `None` lets a fetch hang
    pub fetch_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT_LOADS,
            fetch_timeout: None,
        }
    }
}

/// Presets for SchedulerConfig
impl SchedulerConfig {
    pub fn low_resource() -> Self {
        Self {
            max_concurrent_loads: 2,
            fetch_timeout: Some(Duration::from_secs(30)),
        }
    }

    pub fn high_throughput() -> Self {
        Self {
            max_concurrent_loads: 16,
            fetch_timeout: Some(Duration::from_secs(10)),
        }
    }

    pub fn for_testing() -> Self {
        Self {
            max_concurrent_loads: 2,
            fetch_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// When a freshly installed cache generation starts serving traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationPolicy {
    /// Activate as soon as installation finishes and claim in-flight traffic.
    #[default]
    Immediate,
    /// Stay installed until [`crate::cache::RevalidatingCache::activate`] is called.
    WaitForRelease,
}

/// Configuration for the revalidating cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Only request paths starting with this prefix are cached.
    pub tile_path_prefix: String,
    pub generation: CacheGeneration,
    pub activation: ActivationPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tile_path_prefix: DEFAULT_TILE_PATH_PREFIX.to_string(),
            generation: CacheGeneration::new(1),
            activation: ActivationPolicy::Immediate,
        }
    }
}

impl CacheConfig {
    pub fn with_generation(mut self, version: u32) -> Self {
        self.generation = CacheGeneration::new(version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_options_accepts_legacy_spellings() {
        let config = LayerConfig::from_options(&json!({
            "prefix": "world/flat",
            "mapzoomin": 2,
            "mapzoomout": 4,
            "image-format": "jpg",
            "tilescale": 1,
            "nightandday": true,
        }))
        .unwrap();

        assert_eq!(config.image_format, "jpg");
        assert_eq!(config.max_zoom, 6);
        assert_eq!(config.map_zoom_out, Some(4));
        assert_eq!(config.tile_size(), 256);
        assert!(config.day_night_flag);
        assert_eq!(config.max_concurrent_loads, DEFAULT_MAX_CONCURRENT_LOADS);
    }

    #[test]
    fn test_from_options_rejects_two_spellings_of_one_option() {
        let err = LayerConfig::from_options(&json!({
            "prefix": "world",
            "maxZoom": 5,
            "image-format": "png",
            "imageFormat": "png",
        }))
        .unwrap_err();

        assert!(matches!(err, ConfigError::AmbiguousKey { canonical: "image_format", .. }));
    }

    #[test]
    fn test_from_options_rejects_unknown_keys() {
        let err = LayerConfig::from_options(&json!({
            "prefix": "world",
            "maxZoom": 5,
            "keepBuffer": 10,
        }))
        .unwrap_err();

        assert_eq!(err, ConfigError::UnknownKey("keepBuffer".to_string()));
    }

    #[test]
    fn test_missing_prefix_fails_at_setup() {
        let err = LayerConfig::builder().max_zoom(3).build().unwrap_err();
        assert_eq!(err, ConfigError::MissingField("prefix"));

        let err = LayerConfig::builder().prefix("").max_zoom(3).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "prefix", .. }));
    }

    #[test]
    fn test_missing_image_format_fails_at_setup() {
        let err = LayerConfig::builder().prefix("world").max_zoom(3).build().unwrap_err();
        assert_eq!(err, ConfigError::MissingField("image_format"));

        let err = LayerConfig::from_options(&json!({ "prefix": "world", "maxZoom": 3 })).unwrap_err();
        assert_eq!(err, ConfigError::MissingField("image_format"));

        let err = LayerConfig::builder()
            .prefix("world")
            .max_zoom(3)
            .image_format("")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "image_format", .. }));
    }

    #[test]
    fn test_derived_max_zoom_overflow_is_rejected() {
        let err = LayerConfig::from_options(&json!({
            "prefix": "world",
            "image-format": "png",
            "mapzoomin": 2,
            "mapzoomout": u32::MAX,
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "map_zoom_out", .. }));

        let err = LayerConfig::builder()
            .prefix("world")
            .image_format("png")
            .map_zoom_in(i32::MAX)
            .map_zoom_out(1)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "map_zoom_out", .. }));
    }

    #[test]
    fn test_huge_fetch_timeout_is_capped() {
        let config = LayerConfig::builder()
            .prefix("world")
            .max_zoom(3)
            .image_format("png")
            .fetch_timeout(Duration::MAX)
            .build()
            .unwrap();
        assert_eq!(config.fetch_timeout_ms, Some(u64::MAX));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = LayerConfig::builder()
            .prefix("world")
            .max_zoom(3)
            .image_format("png")
            .max_concurrent_loads(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "max_concurrent_loads", .. }));
    }

    #[test]
    fn test_serde_round_trip_goes_through_validation() {
        let config = LayerConfig::builder()
            .prefix("world")
            .max_zoom(5)
            .image_format("png")
            .variant(CoordinateVariant::Hd)
            .tile_grid_shift(7)
            .build()
            .unwrap();

        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: LayerConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, config);

        let bad: Result<LayerConfig, _> = serde_json::from_str(r#"{"prefix": "", "max_zoom": 1}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_scheduler_presets() {
        assert_eq!(SchedulerConfig::default().max_concurrent_loads, 6);
        assert!(SchedulerConfig::default().fetch_timeout.is_none());
        assert!(SchedulerConfig::low_resource().max_concurrent_loads >= 1);
    }
}

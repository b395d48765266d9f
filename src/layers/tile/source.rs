use crate::core::constants::REVALIDATION_QUERY_KEY;
use crate::core::geo::TileName;

/// Trait representing anything that can produce a fetch URL for a tile name.
///
/// This is the hosting map's `getTileUrl`: it knows where the tile server
/// lives, the layer only knows names.
pub trait TileSource: Send + Sync {
    /// Build a URL for `name`. A revalidation `token`, when given, must make
    /// the URL differ from the token-less one so caches treat it as new.
    fn url(&self, name: &TileName, token: Option<&str>) -> String;
}

/// Serves tiles from `{base}{name}`, e.g. `https://map.example.net/tiles/`.
#[derive(Debug, Clone)]
pub struct PrefixTileSource {
    base: String,
}

impl PrefixTileSource {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.is_empty() && !base.ends_with('/') {
            base.push('/');
        }
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

impl Default for PrefixTileSource {
    fn default() -> Self {
        Self::new("/tiles/")
    }
}

impl TileSource for PrefixTileSource {
    fn url(&self, name: &TileName, token: Option<&str>) -> String {
        let mut url = format!("{}{}", self.base, name.as_str().trim_start_matches('/'));
        if let Some(token) = token {
            let separator = if url.contains('?') { '&' } else { '?' };
            url.push(separator);
            url.push_str(REVALIDATION_QUERY_KEY);
            url.push('=');
            url.push_str(token);
        }
        url
    }
}

impl<F> TileSource for F
where
    F: Fn(&TileName, Option<&str>) -> String + Send + Sync,
{
    fn url(&self, name: &TileName, token: Option<&str>) -> String {
        self(name, token)
    }
}

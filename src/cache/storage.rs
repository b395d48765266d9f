//! Named, generation-scoped response storage

use super::request::TileResponse;
use crate::prelude::{HashMap, Mutex};
use crate::{Error, Result};

/// Persistent store of responses keyed by full request URL, grouped into
/// named generations (`tile-cache-v1`, `tile-cache-v2`, ...).
///
/// Writes to one key are last-writer-wins; a reader never sees a partial entry.
#[async_trait::async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of every generation present, ours or not.
    async fn generations(&self) -> Result<Vec<String>>;

    /// Create the generation if it does not exist yet.
    async fn open(&self, generation: &str) -> Result<()>;

    /// Returns `false` if there was nothing to delete.
    async fn delete_generation(&self, generation: &str) -> Result<bool>;

    async fn get(&self, generation: &str, key: &str) -> Result<Option<TileResponse>>;

    async fn put(&self, generation: &str, key: &str, response: &TileResponse) -> Result<()>;

    async fn entry_count(&self, generation: &str) -> Result<usize>;
}

/// In-process storage, for tests and for caches that need not outlive the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    generations: Mutex<HashMap<String, HashMap<String, TileResponse>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_generations<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, HashMap<String, TileResponse>>) -> T,
    ) -> Result<T> {
        let mut guard = self
            .generations
            .lock()
            .map_err(|_| Error::Storage("memory storage lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait::async_trait]
impl CacheStorage for MemoryStorage {
    async fn generations(&self) -> Result<Vec<String>> {
        self.with_generations(|all| all.keys().cloned().collect())
    }

    async fn open(&self, generation: &str) -> Result<()> {
        self.with_generations(|all| {
            all.entry(generation.to_string()).or_default();
        })
    }

    async fn delete_generation(&self, generation: &str) -> Result<bool> {
        self.with_generations(|all| all.remove(generation).is_some())
    }

    async fn get(&self, generation: &str, key: &str) -> Result<Option<TileResponse>> {
        self.with_generations(|all| all.get(generation).and_then(|entries| entries.get(key)).cloned())
    }

    async fn put(&self, generation: &str, key: &str, response: &TileResponse) -> Result<()> {
        self.with_generations(|all| {
            all.entry(generation.to_string())
                .or_default()
                .insert(key.to_string(), response.clone());
        })
    }

    async fn entry_count(&self, generation: &str) -> Result<usize> {
        self.with_generations(|all| all.get(generation).map_or(0, |entries| entries.len()))
    }
}

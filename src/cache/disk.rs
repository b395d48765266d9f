//! Directory-backed cache storage.
//!
//! Layout: `<root>/<generation>/<hash>.bin`, one bincode record per entry.
//! Entries are written to a temp file and renamed into place so concurrent
//! readers see either the old or the new entry, never a torn one.

use super::request::TileResponse;
use super::storage::CacheStorage;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const ENTRY_EXTENSION: &str = "bin";

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    response: TileResponse,
}

#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, generation: &str) -> PathBuf {
        self.root.join(generation)
    }

    fn entry_path(&self, generation: &str, key: &str) -> PathBuf {
        self.generation_dir(generation)
            .join(format!("{:016x}.{ENTRY_EXTENSION}", fxhash::hash64(key)))
    }

    fn temp_path(target: &Path) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        target.with_extension(format!("{}.{n}.tmp", std::process::id()))
    }
}

#[async_trait::async_trait]
impl CacheStorage for DiskStorage {
    async fn generations(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    async fn open(&self, generation: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.generation_dir(generation)).await?;
        Ok(())
    }

    async fn delete_generation(&self, generation: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.generation_dir(generation)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, generation: &str, key: &str) -> Result<Option<TileResponse>> {
        let path = self.entry_path(generation, key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: StoredEntry = bincode::deserialize(&bytes)?;
        // Hash collision: the file belongs to another URL.
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry.response))
    }

    async fn put(&self, generation: &str, key: &str, response: &TileResponse) -> Result<()> {
        let path = self.entry_path(generation, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = bincode::serialize(&StoredEntry {
            key: key.to_string(),
            response: response.clone(),
        })?;

        let temp = Self::temp_path(&path);
        tokio::fs::write(&temp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn entry_count(&self, generation: &str) -> Result<usize> {
        let mut dir = match tokio::fs::read_dir(self.generation_dir(generation)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, DiskStorage) {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path().join("cache"));
        (dir, storage)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (_dir, storage) = storage();
        let key = "/tiles/world/flat/0_0.png";
        let mut response = TileResponse::ok(vec![1, 2, 3]);
        response.headers.push(("Content-Type".into(), "image/png".into()));

        storage.put("tile-cache-v1", key, &response).await.unwrap();
        let stored = storage.get("tile-cache-v1", key).await.unwrap().unwrap();
        assert_eq!(stored, response);
        assert!(storage.get("tile-cache-v1", "/tiles/other.png").await.unwrap().is_none());
        assert_eq!(storage.entry_count("tile-cache-v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_root_has_no_generations() {
        let (_dir, storage) = storage();
        assert!(storage.generations().await.unwrap().is_empty());
        assert_eq!(storage.entry_count("tile-cache-v1").await.unwrap(), 0);
        assert!(!storage.delete_generation("tile-cache-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_generation() {
        let (_dir, storage) = storage();
        storage.open("tile-cache-v1").await.unwrap();
        storage.open("tile-cache-v2").await.unwrap();

        assert!(storage.delete_generation("tile-cache-v1").await.unwrap());
        assert_eq!(storage.generations().await.unwrap(), vec!["tile-cache-v2"]);
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let (_dir, storage) = storage();
        let key = "/tiles/a.png";
        storage.put("g", key, &TileResponse::ok(vec![1])).await.unwrap();
        storage.put("g", key, &TileResponse::ok(vec![2])).await.unwrap();

        assert_eq!(storage.get("g", key).await.unwrap().unwrap().body, vec![2]);

        let leftovers = std::fs::read_dir(storage.root().join("g"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}

//! Key -> JSON blob persistence.
//!
//! Every store in the service persists whole values under a flat string key,
//! the same way the browser client uses local storage. `DirBlobStore` keeps one
//! file per key; `MemoryBlobStore` is used for tests and `:memory:` deployments.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::error::{LaraError, Result};

pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self
            .inner
            .read()
            .map_err(|e| LaraError::storage(key, e))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|e| LaraError::storage(key, e))?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|e| LaraError::storage(key, e))?;
        map.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key under `dir`.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    dir: PathBuf,
}

impl DirBlobStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| LaraError::storage(dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl BlobStore for DirBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LaraError::storage(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(|e| LaraError::storage(key, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| LaraError::storage(key, e))?;
        debug!(target: "storage", %key, bytes = value.len(), "blob written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LaraError::storage(key, e)),
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(LaraError::invalid_input("key", "storage key is required"));
    }
    if key.contains('/') || key.contains('\\') || key.contains("..") {
        return Err(LaraError::invalid_input(
            "key",
            format!("invalid storage key '{key}'"),
        ));
    }
    Ok(())
}

/// Read and decode a blob. A blob that no longer parses is logged and treated as absent.
pub fn read_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str::<T>(&raw) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            error!(target: "storage", %key, error = %e, "Failed to parse stored blob; ignoring it");
            Ok(None)
        }
    }
}

pub fn write_json<T: Serialize + ?Sized>(store: &dyn BlobStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

//! Keyed access to storage objects.
//!
//! Keys are `/`-separated relative paths. [`FileProvider`] maps them under a
//! root directory; [`MemoryProvider`] keeps them in a shared map so a second
//! engine instance opened over the same provider sees what the first one
//! wrote, which is how restarts are simulated in tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::{sync_directory, write_atomic, FileBackend};
use crate::memory::InMemoryBackend;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Hands out storage backends by key.
pub trait BackendProvider: Send + Sync + std::fmt::Debug {
    /// Opens the object at `key`, creating it empty if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the object cannot be opened.
    fn open(&self, key: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Returns whether an object exists at `key`.
    fn exists(&self, key: &str) -> bool;

    /// Reads the whole object at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if nothing is stored at `key`.
    fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Replaces the object at `key` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the rename fails.
    fn write_atomic(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the object at `key`. Missing objects are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Removes every object whose key starts with `prefix/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    fn remove_prefix(&self, prefix: &str) -> StorageResult<()>;

    /// Lists the keys directly or transitively below `prefix/`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

fn validate_key(key: &str) -> StorageResult<()> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Provider rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileProvider {
    root: PathBuf,
}

impl FileProvider {
    /// Creates a provider rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> StorageResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, out)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.ends_with(".tmp") {
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

impl BackendProvider for FileProvider {
    fn open(&self, key: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let path = self.path_of(key)?;
        Ok(Box::new(FileBackend::open_with_create_dirs(&path)?))
    }

    fn exists(&self, key: &str) -> bool {
        self.path_of(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_of(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        write_atomic(&self.path_of(key)?, data)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_of(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    sync_directory(parent)?;
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_prefix(&self, prefix: &str) -> StorageResult<()> {
        let path = self.path_of(prefix)?;
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed storage directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let dir = self.path_of(prefix)?;
        let mut keys = Vec::new();
        self.collect(&dir, &mut keys)?;
        keys.sort();
        Ok(keys)
    }
}

/// Provider keeping every object in memory.
///
/// Clones share the same objects.
#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    objects: Arc<RwLock<BTreeMap<String, InMemoryBackend>>>,
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn under(prefix: &str, key: &str) -> bool {
        key.strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl BackendProvider for MemoryProvider {
    fn open(&self, key: &str) -> StorageResult<Box<dyn StorageBackend>> {
        validate_key(key)?;
        let backend = self
            .objects
            .write()
            .entry(key.to_string())
            .or_default()
            .clone();
        Ok(Box::new(backend))
    }

    fn exists(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .get(key)
            .map(InMemoryBackend::data)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn write_atomic(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.objects
            .write()
            .insert(key.to_string(), InMemoryBackend::with_data(data.to_vec()));
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> StorageResult<()> {
        self.objects
            .write()
            .retain(|key, _| !Self::under(prefix, key));
        Ok(())
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|key| Self::under(prefix, key))
            .cloned()
            .collect())
    }
}

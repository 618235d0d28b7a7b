//! Durable key-value storage for dispatcher state.
//!
//! Reads are best-effort and never fail: a missing or unreadable slot is
//! simply absent. Writes overwrite the slot.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::error::StoreError;

pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// Returns an error when the value cannot be made durable.
    fn write(&self, key: &str, value: String) -> std::result::Result<(), StoreError>;
}

/// Stores every key in a single JSON object file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_map(&self) -> BTreeMap<String, String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %self.path.display(), error = %err, "state file unreadable");
                }
                return BTreeMap::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(err) => {
                debug!(
                    path = %self.path.display(),
                    error = %err,
                    "state file is not a JSON object"
                );
                BTreeMap::new()
            }
        }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn replace_file(&self, contents: &str) -> std::result::Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|err| self.io_error(err))?;

        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "state".into(), |name| name.to_string_lossy().into_owned());
        let tmp = dir.join(format!(".{file_name}.tmp"));

        let written = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(contents.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                debug!(path = %tmp.display(), error = %cleanup, "could not remove temp state file");
            }
            return Err(self.io_error(err));
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_map().remove(key)
    }

    fn write(&self, key: &str, value: String) -> std::result::Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.load_map();
        map.insert(key.to_string(), value);
        let contents = serde_json::to_string_pretty(&map)?;
        self.replace_file(&contents)
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entry(key: &str, value: impl Into<String>) -> Self {
        let store = Self::new();
        store
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.into());
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Option<String> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn write(&self, key: &str, value: String) -> std::result::Result<(), StoreError> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}

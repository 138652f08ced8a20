//! Small key/value preference storage.
//!
//! The playback core persists exactly one value (the preferred output sink),
//! but storage sits behind [`PreferenceStore`] so tests can use
//! [`MemoryPreferences`] and the CLI can use [`FilePreferences`].

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result, ResultExt};

/// Key/value storage for user preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store, used by tests and as a fallback when no config dir exists.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// TOML-backed store. Every write rewrites the whole file atomically.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FilePreferences {
    /// Open (or lazily create) a preference file.
    ///
    /// A missing or unreadable file yields an empty store; a corrupt file is
    /// logged and ignored so a bad edit never blocks startup.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable preferences {:?}: {}", path, e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read preferences {:?}: {}", path, e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    /// Preferences file in the standard config directory.
    pub fn default_location() -> Option<Self> {
        crate::config::config_dir().map(|dir| Self::open(dir.join("preferences.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(format!("Failed to create {}", dir.display()))?;
        }
        let contents = toml::to_string(values)
            .map_err(|e| Error::config(format!("serialize preferences: {e}")))?;

        let temp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&temp_path, contents)
            .with_context(format!("Failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.path)
            .with_context(format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

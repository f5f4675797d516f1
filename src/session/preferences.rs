//! Durable key-value preferences.
//!
//! The session store keeps exactly one key here (the selected model), so a
//! restarted process can skip model selection.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

/// Key holding the selected model identifier.
pub const SELECTED_MODEL_KEY: &str = "selected-model";

/// Minimal synchronous key-value persistence.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn delete(&self, key: &str) -> io::Result<()>;
}

/// Preferences kept in memory only; lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.values().remove(key);
        Ok(())
    }
}

/// Preferences stored as a flat JSON object in a single file.
///
/// The file is rewritten on every change through a temporary file and a
/// rename, so a crash never leaves half-written JSON behind.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> io::Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(values)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Preferences written to {}", self.path.display());
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.json");

        let prefs = FilePreferences::new(&path);
        assert_eq!(prefs.get(SELECTED_MODEL_KEY).unwrap(), None);
        prefs.set(SELECTED_MODEL_KEY, "qwen2.5-1.5b-instruct").unwrap();
        prefs.set("theme", "dark").unwrap();

        let reopened = FilePreferences::new(&path);
        assert_eq!(
            reopened.get(SELECTED_MODEL_KEY).unwrap().as_deref(),
            Some("qwen2.5-1.5b-instruct")
        );

        reopened.delete(SELECTED_MODEL_KEY).unwrap();
        assert_eq!(prefs.get(SELECTED_MODEL_KEY).unwrap(), None);
        assert_eq!(prefs.get("theme").unwrap().as_deref(), Some("dark"));
    }

    #[test]
    fn test_file_corrupt_content_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, "{not json").unwrap();

        let prefs = FilePreferences::new(&path);
        let err = prefs.get(SELECTED_MODEL_KEY).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_memory_preferences() {
        let prefs = MemoryPreferences::new();
        prefs.set(SELECTED_MODEL_KEY, "a").unwrap();
        prefs.set(SELECTED_MODEL_KEY, "b").unwrap();
        assert_eq!(prefs.get(SELECTED_MODEL_KEY).unwrap().as_deref(), Some("b"));
        prefs.delete(SELECTED_MODEL_KEY).unwrap();
        prefs.delete(SELECTED_MODEL_KEY).unwrap();
        assert_eq!(prefs.get(SELECTED_MODEL_KEY).unwrap(), None);
    }
}

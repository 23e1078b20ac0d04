//! Flat key/value preference file.
//!
//! Preferences live in a single JSON object on disk. Every mutation is
//! written through before the call returns, so the file always reflects the
//! last successful write. A failed write leaves the stored values as they were.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const KEY_VIDEO_QUALITY: &str = "video_quality";
pub const KEY_SCALING_MODE: &str = "scaling_mode";
pub const KEY_IS_MUTED: &str = "is_muted";
pub const KEY_PLAYBACK_SPEED: &str = "playback_speed";
pub const KEY_SELECTED_DISPLAY: &str = "selected_display";
pub const KEY_SHOW_SYSTEM_STATS: &str = "show_system_stats";
pub const KEY_VIDEO_LIBRARY: &str = "video_library";
pub const KEY_RECENT_WALLPAPERS: &str = "recent_wallpapers";

pub struct PreferenceStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl PreferenceStore {
    /// Open the preference file, starting empty when it is missing or corrupt
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Map<String, Value>>(&contents) {
                Ok(values) => values,
                Err(e) => {
                    log::warn!(
                        "Ignoring unreadable preferences at {}: {}",
                        path.display(),
                        e
                    );
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                log::warn!("Failed to read preferences at {}: {}", path.display(), e);
                Map::new()
            }
        };

        log::debug!(
            "Opened preferences at {} ({} key(s))",
            path.display(),
            values.len()
        );

        Self {
            path,
            values: Mutex::new(values),
        }
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.values
            .lock()
            .map(|values| values.contains_key(key))
            .unwrap_or(false)
    }

    /// Raw JSON value of a key
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }

    /// Typed value of a key; `None` when absent or of the wrong shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("Preference '{}' has an unexpected type: {}", key, e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed to encode preference '{}'", key))?;
        self.set_many([(key, value)])
    }

    /// Store several keys with a single write; all or none of them change
    pub fn set_many<'a>(&self, entries: impl IntoIterator<Item = (&'a str, Value)>) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("Preference store lock poisoned"))?;

        let mut updated = values.clone();
        let mut count = 0;
        for (key, value) in entries {
            updated.insert(key.to_string(), value);
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }
        self.write(&updated)?;

        *values = updated;
        Ok(())
    }

    fn write(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let store = PreferenceStore::open(&path);
        store.set(KEY_IS_MUTED, &false).unwrap();
        store.set(KEY_PLAYBACK_SPEED, &1.5).unwrap();

        let reopened = PreferenceStore::open(&path);
        assert_eq!(reopened.get::<bool>(KEY_IS_MUTED), Some(false));
        assert_eq!(reopened.get::<f64>(KEY_PLAYBACK_SPEED), Some(1.5));
    }

    #[test]
    fn test_missing_and_mistyped_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::open(dir.path().join("preferences.json"));

        assert!(!store.contains(KEY_VIDEO_QUALITY));
        assert_eq!(store.get::<f64>(KEY_VIDEO_QUALITY), None);

        store.set(KEY_VIDEO_QUALITY, &"high").unwrap();
        assert!(store.contains(KEY_VIDEO_QUALITY));
        assert_eq!(store.get::<f64>(KEY_VIDEO_QUALITY), None);
    }

    #[test]
    fn test_set_many_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        let store = PreferenceStore::open(&path);

        store
            .set_many([
                (KEY_IS_MUTED, Value::from(false)),
                (KEY_PLAYBACK_SPEED, Value::from(1.5)),
            ])
            .unwrap();

        let reopened = PreferenceStore::open(&path);
        assert_eq!(reopened.get::<bool>(KEY_IS_MUTED), Some(false));
        assert_eq!(reopened.get::<f64>(KEY_PLAYBACK_SPEED), Some(1.5));
    }

    #[test]
    fn test_failed_write_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = PreferenceStore::open(blocker.join("preferences.json"));

        let result = store.set_many([
            (KEY_IS_MUTED, Value::from(false)),
            (KEY_RECENT_WALLPAPERS, Value::from(vec!["/a.mp4"])),
        ]);

        assert!(result.is_err());
        assert!(!store.contains(KEY_IS_MUTED));
        assert!(!store.contains(KEY_RECENT_WALLPAPERS));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = PreferenceStore::open(&path);
        assert!(!store.contains(KEY_IS_MUTED));

        store.set(KEY_IS_MUTED, &true).unwrap();
        assert_eq!(PreferenceStore::open(&path).get::<bool>(KEY_IS_MUTED), Some(true));
    }
}

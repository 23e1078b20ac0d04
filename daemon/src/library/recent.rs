//! Legacy "recent wallpapers" list.
//!
//! Older installs tracked up to five recently used files under the
//! `recent_wallpapers` key instead of a library. It is only read to seed an
//! empty library.

use std::path::PathBuf;

use crate::prefs::{self, PreferenceStore};

pub const MAX_RECENT: usize = 5;

#[derive(Debug, Default)]
pub struct RecentSet {
    entries: Vec<PathBuf>,
}

impl RecentSet {
    pub fn load(prefs: &PreferenceStore) -> Self {
        let stored: Vec<String> = prefs.get(prefs::KEY_RECENT_WALLPAPERS).unwrap_or_default();

        let mut entries: Vec<PathBuf> = Vec::new();
        for location in stored {
            let path = PathBuf::from(location.strip_prefix("file://").unwrap_or(&location));
            if !entries.contains(&path) {
                entries.push(path);
            }
        }
        entries.truncate(MAX_RECENT);

        Self { entries }
    }

    /// Most recent first
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! User settings backed by the preference file.
//!
//! The store owns the current [`Settings`] snapshot and publishes every
//! change on a `watch` channel. Writers persist before publishing, so an
//! observer never sees a value that is not on disk yet.

use anyhow::Result;
use common::{ScaleMode, Settings, SettingsPatch};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::prefs::{self, PreferenceStore};

pub struct SettingsStore {
    prefs: Arc<PreferenceStore>,
    tx: watch::Sender<Settings>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Load settings, falling back to defaults for absent keys
    pub fn load(prefs: Arc<PreferenceStore>) -> Self {
        let defaults = Settings::default();

        // A stored quality of 0 means "never set"
        let quality = prefs
            .get::<f64>(prefs::KEY_VIDEO_QUALITY)
            .filter(|q| *q != 0.0)
            .map(clamp_quality)
            .unwrap_or(defaults.quality);

        let scaling = prefs
            .get::<String>(prefs::KEY_SCALING_MODE)
            .and_then(|name| ScaleMode::from_name(&name))
            .unwrap_or(defaults.scaling);

        let settings = Settings {
            quality,
            scaling,
            muted: prefs
                .get(prefs::KEY_IS_MUTED)
                .unwrap_or(defaults.muted),
            playback_speed: prefs
                .get::<f64>(prefs::KEY_PLAYBACK_SPEED)
                .map(clamp_speed)
                .unwrap_or(defaults.playback_speed),
            selected_display: prefs
                .get(prefs::KEY_SELECTED_DISPLAY)
                .unwrap_or(defaults.selected_display),
            show_stats: prefs
                .get(prefs::KEY_SHOW_SYSTEM_STATS)
                .unwrap_or(defaults.show_stats),
        };

        log::info!(
            "Settings: quality {:.2}, scaling {}, muted {}, speed {}x, display {}, stats {}",
            settings.quality,
            settings.scaling.name(),
            settings.muted,
            settings.playback_speed,
            settings.selected_display,
            settings.show_stats
        );

        let (tx, _rx) = watch::channel(settings);
        Self {
            prefs,
            tx,
            write_lock: Mutex::new(()),
        }
    }

    /// Current settings snapshot
    pub fn snapshot(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Apply a partial update, persisting the changed keys before publishing.
    ///
    /// Nothing is stored or published when the write fails.
    pub fn apply(&self, patch: &SettingsPatch) -> Result<Settings> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Settings lock poisoned"))?;

        let old = self.snapshot();
        let mut new = old.clone();

        if let Some(quality) = patch.quality {
            new.quality = clamp_quality(quality);
        }
        if let Some(scaling) = patch.scaling {
            new.scaling = scaling;
        }
        if let Some(muted) = patch.muted {
            new.muted = muted;
        }
        if let Some(speed) = patch.playback_speed {
            new.playback_speed = clamp_speed(speed);
        }
        if let Some(display) = patch.selected_display {
            new.selected_display = display;
        }
        if let Some(show) = patch.show_stats {
            new.show_stats = show;
        }

        self.prefs.set_many(changed_keys(&old, &new))?;

        if new != old {
            log::debug!("Settings updated: {:?}", new);
            self.tx.send_replace(new.clone());
        }

        Ok(new)
    }
}

fn clamp_quality(quality: f64) -> f64 {
    if quality.is_nan() {
        return Settings::default().quality;
    }
    quality.clamp(Settings::MIN_QUALITY, Settings::MAX_QUALITY)
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return Settings::default().playback_speed;
    }
    speed.clamp(Settings::MIN_SPEED, Settings::MAX_SPEED)
}

fn changed_keys(old: &Settings, new: &Settings) -> Vec<(&'static str, Value)> {
    let mut changed = Vec::new();

    if old.quality != new.quality {
        changed.push((prefs::KEY_VIDEO_QUALITY, Value::from(new.quality)));
    }
    if old.scaling != new.scaling {
        changed.push((prefs::KEY_SCALING_MODE, Value::from(new.scaling.name())));
    }
    if old.muted != new.muted {
        changed.push((prefs::KEY_IS_MUTED, Value::from(new.muted)));
    }
    if old.playback_speed != new.playback_speed {
        changed.push((prefs::KEY_PLAYBACK_SPEED, Value::from(new.playback_speed)));
    }
    if old.selected_display != new.selected_display {
        changed.push((prefs::KEY_SELECTED_DISPLAY, Value::from(new.selected_display)));
    }
    if old.show_stats != new.show_stats {
        changed.push((prefs::KEY_SHOW_SYSTEM_STATS, Value::from(new.show_stats)));
    }

    changed
}

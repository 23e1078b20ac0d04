//! Still desktop images.
//!
//! A still is shown on a display's background surface whenever no video is
//! playing there. The setter remembers which file the user chose for each
//! display so it can be restored later. Temporary stills (a frame shown while
//! a video starts) are never remembered.

use anyhow::{Context, Result, bail};
use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::playback::{Desktop, select_display};

/// Which displays a still goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillTarget {
    AllDisplays,
    /// A display id; unknown ids fall back to the primary display
    Display(u32),
    Primary,
}

impl From<Option<u32>> for StillTarget {
    fn from(display: Option<u32>) -> Self {
        display.map_or(Self::AllDisplays, Self::Display)
    }
}

pub struct WallpaperSetter {
    desktop: Arc<dyn Desktop>,
    current: Mutex<HashMap<u32, PathBuf>>,
    /// Token of the newest temporary still; older ones are superseded
    temporary: Mutex<u64>,
}

impl WallpaperSetter {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self {
            desktop,
            current: Mutex::new(HashMap::new()),
            temporary: Mutex::new(0),
        }
    }

    /// Show `image` as the still of `target`. Blocking (decodes the image).
    pub fn set_wallpaper(&self, image: &Path, target: StillTarget) -> bool {
        match self.try_set(image, target) {
            Ok(displays) => {
                log::info!(
                    "Set still {} on {} display(s)",
                    image.display(),
                    displays
                );
                true
            }
            Err(e) => {
                log::error!("Failed to set still {}: {:#}", image.display(), e);
                false
            }
        }
    }

    fn try_set(&self, path: &Path, target: StillTarget) -> Result<usize> {
        let ids = self.target_ids(target)?;
        let image = load_image(path)?;

        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow::anyhow!("Still bookkeeping poisoned"))?;
        for id in &ids {
            self.desktop.set_still(Some(*id), Some(image.clone()))?;
            current.insert(*id, path.to_path_buf());
        }
        Ok(ids.len())
    }

    fn target_ids(&self, target: StillTarget) -> Result<Vec<u32>> {
        let displays = self.desktop.displays();
        let ids: Vec<u32> = match target {
            StillTarget::AllDisplays => displays.iter().map(|d| d.id).collect(),
            StillTarget::Display(id) => select_display(&displays, id).map(|d| d.id).into_iter().collect(),
            StillTarget::Primary => select_display(&displays, 0).map(|d| d.id).into_iter().collect(),
        };
        if ids.is_empty() {
            bail!("No display available");
        }
        Ok(ids)
    }

    /// Show `image` on `target` without remembering it.
    ///
    /// Returns a token for [`Self::end_temporary`], `None` when nothing was
    /// shown. A newer temporary still supersedes older tokens.
    pub fn show_temporary(&self, image: &Path, target: StillTarget) -> Option<u64> {
        match self.try_show_temporary(image, target) {
            Ok(token) => {
                log::debug!("Temporary still {} shown from {}", token, image.display());
                Some(token)
            }
            Err(e) => {
                log::warn!("Failed to show temporary still {}: {:#}", image.display(), e);
                None
            }
        }
    }

    fn try_show_temporary(&self, path: &Path, target: StillTarget) -> Result<u64> {
        let ids = self.target_ids(target)?;
        let image = load_image(path)?;

        let mut temporary = self
            .temporary
            .lock()
            .map_err(|_| anyhow::anyhow!("Still bookkeeping poisoned"))?;
        for id in &ids {
            self.desktop.set_still(Some(*id), Some(image.clone()))?;
        }
        *temporary += 1;
        Ok(*temporary)
    }

    /// Take a temporary still down again and put back what the user chose.
    ///
    /// Returns `false` without touching the desktop when a newer temporary
    /// still has replaced this one.
    pub fn end_temporary(&self, token: u64, target: StillTarget) -> bool {
        let Ok(temporary) = self.temporary.lock() else {
            return false;
        };
        if *temporary != token {
            log::debug!("Temporary still {} already superseded", token);
            return false;
        }

        let ids = match self.target_ids(target) {
            Ok(ids) => ids,
            Err(e) => {
                log::debug!("Temporary still {} has no display left: {:#}", token, e);
                return true;
            }
        };
        for id in ids {
            let previous = self.current_wallpaper(id);
            if !self.restore_wallpaper(previous.as_deref(), StillTarget::Display(id)) {
                crate::log_and_continue!(self.clear(StillTarget::Display(id)), "clear temporary still");
            }
        }
        true
    }

    /// The file shown as the still of `display`, if any
    pub fn current_wallpaper(&self, display: u32) -> Option<PathBuf> {
        let displays = self.desktop.displays();
        let id = select_display(&displays, display).map_or(display, |d| d.id);
        self.current.lock().ok()?.get(&id).cloned()
    }

    /// Put a previously shown still back; `false` when there is none
    pub fn restore_wallpaper(&self, previous: Option<&Path>, target: StillTarget) -> bool {
        match previous {
            Some(path) => self.set_wallpaper(path, target),
            None => {
                log::debug!("No previous still to restore");
                false
            }
        }
    }

    /// Remove the still of `target`
    pub fn clear(&self, target: StillTarget) -> Result<()> {
        let displays = self.desktop.displays();
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow::anyhow!("Still bookkeeping poisoned"))?;

        match target {
            StillTarget::AllDisplays => {
                self.desktop.set_still(None, None)?;
                current.clear();
            }
            StillTarget::Display(_) | StillTarget::Primary => {
                let id = match target {
                    StillTarget::Display(id) => id,
                    _ => 0,
                };
                if let Some(display) = select_display(&displays, id) {
                    self.desktop.set_still(Some(display.id), None)?;
                    current.remove(&display.id);
                }
            }
        }
        Ok(())
    }
}

fn load_image(path: &Path) -> Result<Arc<RgbaImage>> {
    Ok(Arc::new(
        image::open(path)
            .with_context(|| format!("Failed to load image: {}", path.display()))?
            .to_rgba8(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::testing::{DesktopCall, FakeDesktop, display};
    use image::Rgba;

    fn setup() -> (Arc<FakeDesktop>, WallpaperSetter, tempfile::TempDir, PathBuf) {
        let desktop = Arc::new(FakeDesktop::new(vec![
            display(1, "DP-1", true),
            display(2, "DP-2", false),
        ]));
        let setter = WallpaperSetter::new(desktop.clone());

        let dir = tempfile::tempdir().unwrap();
        let still = dir.path().join("still.png");
        RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]))
            .save(&still)
            .unwrap();
        (desktop, setter, dir, still)
    }

    #[test]
    fn test_set_on_all_displays() {
        let (desktop, setter, _dir, still) = setup();

        assert!(setter.set_wallpaper(&still, StillTarget::AllDisplays));
        assert_eq!(
            desktop.take_calls(),
            vec![
                DesktopCall::Still(Some(1), true),
                DesktopCall::Still(Some(2), true)
            ]
        );
        assert_eq!(setter.current_wallpaper(2), Some(still.clone()));
        assert_eq!(setter.current_wallpaper(0), Some(still));
    }

    #[test]
    fn test_unknown_display_falls_back_to_primary() {
        let (desktop, setter, _dir, still) = setup();

        assert!(setter.set_wallpaper(&still, StillTarget::Display(9)));
        assert_eq!(desktop.take_calls(), vec![DesktopCall::Still(Some(1), true)]);
        assert_eq!(setter.current_wallpaper(2), None);
    }

    #[test]
    fn test_missing_image_fails() {
        let (desktop, setter, dir, _still) = setup();

        assert!(!setter.set_wallpaper(&dir.path().join("absent.png"), StillTarget::Primary));
        assert!(desktop.take_calls().is_empty());
        assert_eq!(setter.current_wallpaper(1), None);
    }

    #[test]
    fn test_no_displays_fails() {
        let desktop = Arc::new(FakeDesktop::new(Vec::new()));
        let setter = WallpaperSetter::new(desktop);
        assert!(!setter.set_wallpaper(Path::new("/any.png"), StillTarget::AllDisplays));
    }

    #[test]
    fn test_restore() {
        let (desktop, setter, _dir, still) = setup();

        assert!(!setter.restore_wallpaper(None, StillTarget::AllDisplays));
        assert!(setter.restore_wallpaper(Some(&still), StillTarget::Display(2)));
        assert_eq!(desktop.take_calls(), vec![DesktopCall::Still(Some(2), true)]);
    }

    #[test]
    fn test_clear() {
        let (desktop, setter, _dir, still) = setup();
        setter.set_wallpaper(&still, StillTarget::AllDisplays);
        desktop.take_calls();

        setter.clear(StillTarget::Display(2)).unwrap();
        assert_eq!(desktop.take_calls(), vec![DesktopCall::Still(Some(2), false)]);
        assert_eq!(setter.current_wallpaper(2), None);
        assert!(setter.current_wallpaper(1).is_some());

        setter.clear(StillTarget::AllDisplays).unwrap();
        assert_eq!(desktop.take_calls(), vec![DesktopCall::Still(None, false)]);
        assert_eq!(setter.current_wallpaper(1), None);
    }

    fn frame(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_temporary_still_is_not_remembered() {
        let (desktop, setter, dir, still) = setup();
        setter.set_wallpaper(&still, StillTarget::Display(1));
        desktop.take_calls();

        let token = setter
            .show_temporary(&frame(dir.path(), "frame.png"), StillTarget::Display(1))
            .unwrap();
        assert_eq!(desktop.take_calls(), vec![DesktopCall::Still(Some(1), true)]);
        assert_eq!(setter.current_wallpaper(1), Some(still.clone()));

        assert!(setter.end_temporary(token, StillTarget::Display(1)));
        assert_eq!(desktop.take_calls(), vec![DesktopCall::Still(Some(1), true)]);
        assert_eq!(setter.current_wallpaper(1), Some(still));
    }

    #[test]
    fn test_overlapping_temporary_stills_keep_user_still() {
        let (desktop, setter, dir, still) = setup();
        setter.set_wallpaper(&still, StillTarget::Display(1));

        let first_frame = frame(dir.path(), "a.png");
        let first = setter
            .show_temporary(&first_frame, StillTarget::Display(1))
            .unwrap();
        let second = setter
            .show_temporary(&frame(dir.path(), "b.png"), StillTarget::Display(1))
            .unwrap();
        desktop.take_calls();

        // The first frame is cleaned up while the second is still showing
        std::fs::remove_file(&first_frame).unwrap();
        assert!(!setter.end_temporary(first, StillTarget::Display(1)));
        assert!(desktop.take_calls().is_empty());

        assert!(setter.end_temporary(second, StillTarget::Display(1)));
        assert_eq!(desktop.take_calls(), vec![DesktopCall::Still(Some(1), true)]);
        assert_eq!(setter.current_wallpaper(1), Some(still));
    }

    #[test]
    fn test_temporary_still_without_user_still_clears() {
        let (desktop, setter, dir, _still) = setup();

        let token = setter
            .show_temporary(&frame(dir.path(), "frame.png"), StillTarget::Display(2))
            .unwrap();
        desktop.take_calls();

        assert!(setter.end_temporary(token, StillTarget::Display(2)));
        assert_eq!(desktop.take_calls(), vec![DesktopCall::Still(Some(2), false)]);
        assert_eq!(setter.current_wallpaper(2), None);
    }

    #[test]
    fn test_temporary_still_missing_image() {
        let (desktop, setter, dir, _still) = setup();
        assert!(
            setter
                .show_temporary(&dir.path().join("absent.jpg"), StillTarget::Primary)
                .is_none()
        );
        assert!(desktop.take_calls().is_empty());
    }
}

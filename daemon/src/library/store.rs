use common::{LibraryPage, VideoEntry};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::bundled;
use super::jobs::{CancelToken, ExtractionJobs, ExtractionTicket};
use super::paths::LibraryPaths;
use super::recent::RecentSet;
use crate::config::LibrarySettings;
use crate::media::VideoMetadata;
use crate::prefs::{self, PreferenceStore};

/// Where a new entry is inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Picked by the user; goes to the head of the list
    User,
    /// Shipped with the install; goes to the tail
    Bundled,
}

#[derive(Debug, Clone)]
pub struct LibraryOptions {
    pub page_size: usize,
    pub max_videos: usize,
    pub bundled_markers: Vec<String>,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self::from(&LibrarySettings::default())
    }
}

impl From<&LibrarySettings> for LibraryOptions {
    fn from(settings: &LibrarySettings) -> Self {
        Self {
            page_size: settings.page_size.max(1),
            max_videos: settings.max_videos.max(1),
            bundled_markers: settings.bundled_markers.clone(),
        }
    }
}

/// A newly tracked entry whose extraction still has to run
#[derive(Debug, Clone)]
pub struct Added {
    pub entry: VideoEntry,
    pub ticket: ExtractionTicket,
}

/// Result of probing one entry
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub metadata: Option<VideoMetadata>,
    pub thumbnail: Option<PathBuf>,
}

/// Ordered collection of tracked videos
pub struct VideoLibrary {
    entries: Vec<VideoEntry>,
    selected: Option<Uuid>,
    current_page: usize,
    options: LibraryOptions,
    paths: LibraryPaths,
    prefs: Arc<PreferenceStore>,
    jobs: ExtractionJobs,
}

impl VideoLibrary {
    pub fn new(paths: LibraryPaths, prefs: Arc<PreferenceStore>, options: LibraryOptions) -> Self {
        Self {
            entries: Vec::new(),
            selected: None,
            current_page: 0,
            options,
            paths,
            prefs,
            jobs: ExtractionJobs::new(),
        }
    }

    /// Restore the persisted library.
    ///
    /// Without a stored library the legacy recent list seeds it. Bundled
    /// videos are imported afterwards either way. Returns the entries whose
    /// extraction has to be started.
    pub fn load(
        paths: LibraryPaths,
        prefs: Arc<PreferenceStore>,
        options: LibraryOptions,
        bundled_dir: Option<&Path>,
        extensions: &[String],
    ) -> (Self, Vec<Added>) {
        let mut library = Self::new(paths, prefs, options);
        let mut pending = Vec::new();

        match library.prefs.get_value(prefs::KEY_VIDEO_LIBRARY) {
            Some(value) => match serde_json::from_value::<Vec<VideoEntry>>(value) {
                Ok(entries) => {
                    log::info!("Loaded {} video(s) from library", entries.len());
                    library.entries = entries;
                    pending.extend(library.requeue_incomplete());
                }
                Err(e) => {
                    log::error!("Failed to decode video library, starting empty: {}", e);
                }
            },
            None => {
                let recent = RecentSet::load(&library.prefs);
                if !recent.is_empty() {
                    log::info!(
                        "Migrating {} recent wallpaper(s) into the library",
                        recent.entries().len()
                    );
                }
                // Copies only, so removing an entry never deletes the user's file
                for path in recent.entries() {
                    match library.paths.import_file(path) {
                        Ok(imported) => pending.extend(library.add(&imported)),
                        Err(e) => log::warn!("Skipping recent wallpaper {}: {:#}", path.display(), e),
                    }
                }
            }
        }

        if let Some(dir) = bundled_dir {
            pending.extend(library.import_bundled(dir, extensions));
        }

        library.selected = library.entries.first().map(|e| e.id);
        pending.retain(|added| library.jobs.is_live(added.ticket));

        (library, pending)
    }

    /// Track a video, placing it by its file name.
    ///
    /// Names carrying a bundled marker go to the tail, everything else to
    /// the head. Returns `None` when the location is already tracked.
    pub fn add(&mut self, path: &Path) -> Option<Added> {
        let origin = if self.is_bundled_name(path) {
            Origin::Bundled
        } else {
            Origin::User
        };
        self.add_with_origin(path, origin)
    }

    pub fn add_with_origin(&mut self, path: &Path, origin: Origin) -> Option<Added> {
        let location = path.to_string_lossy();
        if self.entries.iter().any(|e| e.url == location) {
            log::debug!("Video already in library: {}", path.display());
            return None;
        }

        let entry = VideoEntry::new(path);
        let ticket = self.jobs.issue(entry.id);
        log::info!("Adding video to library: {} ({:?})", entry.file_name, origin);

        match origin {
            Origin::User => self.entries.insert(0, entry.clone()),
            Origin::Bundled => self.entries.push(entry.clone()),
        }

        self.evict_overflow();
        self.persist();

        if self.jobs.is_live(ticket) {
            Some(Added { entry, ticket })
        } else {
            None
        }
    }

    /// Import every bundled video not yet tracked by file name
    pub fn import_bundled(&mut self, dir: &Path, extensions: &[String]) -> Vec<Added> {
        let videos = match bundled::discover(dir, extensions) {
            Ok(videos) => videos,
            Err(e) => {
                log::error!("Failed to scan bundled videos in {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        log::info!("Found {} bundled video(s) in {}", videos.len(), dir.display());

        let existing: HashSet<String> = self.entries.iter().map(|e| e.file_name.clone()).collect();
        let mut added = Vec::new();

        for video in videos {
            let Some(name) = video.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if existing.contains(&name) {
                continue;
            }

            let destination = self.paths.wallpapers_dir().join(&name);
            if !destination.exists()
                && let Err(e) = std::fs::create_dir_all(self.paths.wallpapers_dir())
                    .and_then(|_| std::fs::copy(&video, &destination))
            {
                log::error!("Failed to copy bundled video {}: {}", name, e);
                continue;
            }

            added.extend(self.add_with_origin(&destination, Origin::Bundled));
        }

        added
    }

    /// Stop tracking an entry and delete its file and thumbnail
    pub fn remove(&mut self, id: Uuid) -> Option<VideoEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        let entry = self.entries.remove(index);

        self.jobs.cancel(id);
        delete_entry_files(&entry);

        if self.selected == Some(id) {
            self.selected = self.entries.first().map(|e| e.id);
        }
        self.clamp_page();
        self.persist();

        log::info!("Removed video from library: {}", entry.file_name);
        Some(entry)
    }

    pub fn select(&mut self, id: Uuid) -> Option<&VideoEntry> {
        let entry = self.entries.iter().find(|e| e.id == id)?;
        self.selected = Some(id);
        Some(entry)
    }

    /// Flip the favorite flag; returns the new value
    pub fn toggle_favorite(&mut self, id: Uuid) -> Option<bool> {
        let entry = self.entries.iter_mut().find(|e| e.id == id)?;
        entry.is_favorite = !entry.is_favorite;
        let favorite = entry.is_favorite;
        self.persist();
        Some(favorite)
    }

    /// Apply extraction results if `ticket` is still the live job for its entry
    pub fn apply_extraction(&mut self, ticket: ExtractionTicket, outcome: ExtractionOutcome) -> bool {
        if !self.jobs.finish(ticket) {
            log::debug!("Discarding stale extraction result for {}", ticket.id);
            if let Some(thumbnail) = outcome.thumbnail {
                self.discard_orphan_thumbnail(&thumbnail);
            }
            return false;
        }

        let Some(entry) = self.entries.iter_mut().find(|e| e.id == ticket.id) else {
            return false;
        };

        if let Some(metadata) = outcome.metadata {
            entry.duration = metadata.duration;
            entry.file_size = metadata.file_size;
        }
        if let Some(thumbnail) = outcome.thumbnail {
            entry.thumbnail_url = Some(thumbnail.to_string_lossy().to_string());
        }

        log::debug!(
            "Extraction finished for {} ({}, {})",
            entry.file_name,
            entry.formatted_duration(),
            entry.formatted_file_size()
        );

        self.persist();
        true
    }

    pub fn attach_job(&mut self, ticket: ExtractionTicket, abort: tokio::task::AbortHandle) {
        self.jobs.attach(ticket, abort);
    }

    pub fn cancel_token(&self, ticket: ExtractionTicket) -> Option<CancelToken> {
        self.jobs.token(ticket)
    }

    pub fn cancel_jobs(&mut self) {
        self.jobs.cancel_all();
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn entries(&self) -> &[VideoEntry] {
        &self.entries
    }

    pub fn get(&self, id: Uuid) -> Option<&VideoEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn selected_entry(&self) -> Option<&VideoEntry> {
        self.selected.and_then(|id| self.get(id))
    }

    pub fn paths(&self) -> &LibraryPaths {
        &self.paths
    }

    pub fn page_size(&self) -> usize {
        self.options.page_size
    }

    pub fn total_pages(&self) -> usize {
        self.entries.len().div_ceil(self.options.page_size)
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page + 1 < self.total_pages()
    }

    pub fn has_previous_page(&self) -> bool {
        self.current_page > 0
    }

    pub fn next_page(&mut self) -> bool {
        if self.has_next_page() {
            self.current_page += 1;
            true
        } else {
            false
        }
    }

    pub fn previous_page(&mut self) -> bool {
        if self.has_previous_page() {
            self.current_page -= 1;
            true
        } else {
            false
        }
    }

    /// Jump to a page, clamped to the last one
    pub fn set_page(&mut self, page: usize) {
        self.current_page = page;
        self.clamp_page();
    }

    /// Entries `[k*P, min((k+1)*P, N))`; empty past the end
    pub fn page_entries(&self, page: usize) -> &[VideoEntry] {
        let start = page.saturating_mul(self.options.page_size);
        if start >= self.entries.len() {
            return &[];
        }
        let end = (start + self.options.page_size).min(self.entries.len());
        &self.entries[start..end]
    }

    pub fn current_page_entries(&self) -> &[VideoEntry] {
        self.page_entries(self.current_page)
    }

    /// Snapshot of the current page for display
    pub fn page(&self) -> LibraryPage {
        LibraryPage {
            page: self.current_page,
            total_pages: self.total_pages(),
            has_next: self.has_next_page(),
            has_previous: self.has_previous_page(),
            entries: self.current_page_entries().to_vec(),
            selected: self.selected,
        }
    }

    fn clamp_page(&mut self) {
        let total = self.total_pages();
        if total == 0 {
            self.current_page = 0;
        } else if self.current_page >= total {
            self.current_page = total - 1;
        }
    }

    fn is_bundled_name(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.options
            .bundled_markers
            .iter()
            .any(|marker| name.contains(marker.as_str()))
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.options.max_videos {
            let Some(evicted) = self.entries.pop() else {
                break;
            };
            log::info!("Library full, evicting {}", evicted.file_name);
            self.jobs.cancel(evicted.id);
            delete_entry_files(&evicted);
            if self.selected == Some(evicted.id) {
                self.selected = self.entries.first().map(|e| e.id);
            }
        }
        self.clamp_page();
    }

    /// Queue extraction again for entries that never got their metadata
    fn requeue_incomplete(&mut self) -> Vec<Added> {
        let incomplete: Vec<VideoEntry> = self
            .entries
            .iter()
            .filter(|e| e.duration == 0.0 || e.thumbnail_url.is_none())
            .filter(|e| e.path().exists())
            .cloned()
            .collect();

        incomplete
            .into_iter()
            .map(|entry| Added {
                ticket: self.jobs.issue(entry.id),
                entry,
            })
            .collect()
    }

    fn discard_orphan_thumbnail(&self, thumbnail: &Path) {
        let location = thumbnail.to_string_lossy();
        let in_use = self
            .entries
            .iter()
            .any(|e| e.thumbnail_url.as_deref() == Some(location.as_ref()));
        if !in_use && thumbnail.exists() {
            if let Err(e) = std::fs::remove_file(thumbnail) {
                log::warn!("Failed to delete thumbnail {}: {}", thumbnail.display(), e);
            }
        }
    }

    fn persist(&self) {
        if let Err(e) = self.prefs.set(prefs::KEY_VIDEO_LIBRARY, &self.entries) {
            log::error!("Failed to save video library: {}", e);
        }
    }
}

fn delete_entry_files(entry: &VideoEntry) {
    let path = entry.path();
    if path.exists()
        && let Err(e) = std::fs::remove_file(path)
    {
        log::warn!("Failed to delete video file {}: {}", path.display(), e);
    }

    if let Some(thumbnail) = entry.thumbnail_path()
        && thumbnail.exists()
        && let Err(e) = std::fs::remove_file(thumbnail)
    {
        log::warn!("Failed to delete thumbnail {}: {}", thumbnail.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
        prefs: Arc<PreferenceStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let prefs = Arc::new(PreferenceStore::open(dir.path().join("preferences.json")));
            Self { dir, prefs }
        }

        fn paths(&self) -> LibraryPaths {
            LibraryPaths::new(self.dir.path().join("data"))
        }

        fn library(&self, page_size: usize, max_videos: usize) -> VideoLibrary {
            let options = LibraryOptions {
                page_size,
                max_videos,
                ..Default::default()
            };
            VideoLibrary::new(self.paths(), self.prefs.clone(), options)
        }

        fn video(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, b"video").unwrap();
            path
        }
    }

    #[test]
    fn test_duplicate_add_keeps_one_entry() {
        let fx = Fixture::new();
        let mut library = fx.library(8, 100);
        let path = fx.video("waves.mp4");

        assert!(library.add(&path).is_some());
        assert!(library.add(&path).is_none());
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn test_user_entries_go_first_bundled_last() {
        let fx = Fixture::new();
        let mut library = fx.library(8, 100);

        library.add(&fx.video("first.mp4"));
        library.add(&fx.video("uhd_city.mp4"));
        library.add(&fx.video("second.mp4"));
        library.add(&fx.video("clip_hd_forest.mov"));

        let names: Vec<&str> = library.entries().iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["second.mp4", "first.mp4", "uhd_city.mp4", "clip_hd_forest.mov"]
        );
    }

    #[test]
    fn test_remove_deletes_file_and_thumbnail() {
        let fx = Fixture::new();
        let mut library = fx.library(2, 100);
        let path = fx.video("gone.mp4");
        let thumbnail = fx.dir.path().join("gone_mp4_thumb.png");
        std::fs::write(&thumbnail, b"png").unwrap();

        let added = library.add(&path).unwrap();
        library.add(&fx.video("stays.mp4"));
        library.apply_extraction(
            added.ticket,
            ExtractionOutcome {
                metadata: None,
                thumbnail: Some(thumbnail.clone()),
            },
        );

        assert!(library.remove(added.entry.id).is_some());
        assert!(!path.exists());
        assert!(!thumbnail.exists());
        for page in 0..library.total_pages() {
            assert!(library.page_entries(page).iter().all(|e| e.id != added.entry.id));
        }
        assert!(library.remove(added.entry.id).is_none());
    }

    #[test]
    fn test_remove_selected_reselects_first() {
        let fx = Fixture::new();
        let mut library = fx.library(8, 100);
        let a = library.add(&fx.video("a.mp4")).unwrap().entry;
        let b = library.add(&fx.video("b.mp4")).unwrap().entry;

        library.select(a.id).unwrap();
        library.remove(a.id);
        assert_eq!(library.selected(), Some(b.id));

        library.remove(b.id);
        assert_eq!(library.selected(), None);
    }

    #[test]
    fn test_eviction_from_tail() {
        let fx = Fixture::new();
        let mut library = fx.library(8, 3);

        let oldest = fx.video("oldest.mp4");
        library.add(&oldest);
        for name in ["b.mp4", "c.mp4", "d.mp4"] {
            library.add(&fx.video(name));
        }

        assert_eq!(library.len(), 3);
        assert!(library.entries().iter().all(|e| e.file_name != "oldest.mp4"));
        assert!(!oldest.exists());
        assert_eq!(library.pending_jobs(), 3);
    }

    #[test]
    fn test_bundled_add_into_full_library_is_evicted() {
        let fx = Fixture::new();
        let mut library = fx.library(8, 1);

        library.add(&fx.video("mine.mp4"));
        let bundled = fx.video("hd_lake.mp4");
        assert!(library.add(&bundled).is_none());
        assert_eq!(library.len(), 1);
        assert!(!bundled.exists());
    }

    #[test]
    fn test_pagination() {
        let fx = Fixture::new();
        let mut library = fx.library(8, 100);
        assert_eq!(library.total_pages(), 0);
        assert!(!library.has_next_page());
        assert!(library.current_page_entries().is_empty());

        for i in 0..17 {
            library.add(&fx.video(&format!("v{}.mp4", i)));
        }

        assert_eq!(library.total_pages(), 3);
        assert_eq!(library.page_entries(0).len(), 8);
        assert_eq!(library.page_entries(2).len(), 1);
        assert!(library.page_entries(3).is_empty());
        assert_eq!(library.page_entries(1)[0].id, library.entries()[8].id);

        assert!(!library.has_previous_page());
        assert!(library.next_page());
        assert!(library.next_page());
        assert!(!library.next_page());
        assert_eq!(library.current_page(), 2);
        assert!(library.previous_page());
        assert_eq!(library.current_page(), 1);
    }

    #[test]
    fn test_remove_clamps_page() {
        let fx = Fixture::new();
        let mut library = fx.library(2, 100);
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(library.add(&fx.video(&format!("v{}.mp4", i))).unwrap().entry.id);
        }

        library.set_page(1);
        assert_eq!(library.current_page(), 1);
        library.remove(ids[0]);
        assert_eq!(library.total_pages(), 1);
        assert_eq!(library.current_page(), 0);

        library.set_page(9);
        assert_eq!(library.current_page(), 0);
    }

    #[test]
    fn test_toggle_favorite_persists() {
        let fx = Fixture::new();
        let mut library = fx.library(8, 100);
        let added = library.add(&fx.video("fav.mp4")).unwrap();

        assert_eq!(library.toggle_favorite(added.entry.id), Some(true));

        let (reloaded, _) = VideoLibrary::load(
            fx.paths(),
            fx.prefs.clone(),
            LibraryOptions::default(),
            None,
            &[],
        );
        assert!(reloaded.get(added.entry.id).unwrap().is_favorite);
        assert_eq!(library.toggle_favorite(Uuid::new_v4()), None);
    }

    #[test]
    fn test_stale_extraction_is_discarded() {
        let fx = Fixture::new();
        let mut library = fx.library(8, 100);
        let added = library.add(&fx.video("short.mp4")).unwrap();
        let id = added.entry.id;

        library.remove(id);
        let thumbnail = fx.dir.path().join("late_thumb.png");
        std::fs::write(&thumbnail, b"png").unwrap();

        let applied = library.apply_extraction(
            added.ticket,
            ExtractionOutcome {
                metadata: Some(VideoMetadata {
                    duration: 12.0,
                    file_size: 5,
                    width: 640,
                    height: 360,
                }),
                thumbnail: Some(thumbnail.clone()),
            },
        );

        assert!(!applied);
        assert!(library.get(id).is_none());
        assert!(!thumbnail.exists());
    }

    #[test]
    fn test_extraction_patches_entry() {
        let fx = Fixture::new();
        let mut library = fx.library(8, 100);
        let added = library.add(&fx.video("long.mp4")).unwrap();

        let applied = library.apply_extraction(
            added.ticket,
            ExtractionOutcome {
                metadata: Some(VideoMetadata {
                    duration: 95.0,
                    file_size: 12_000_000,
                    width: 1920,
                    height: 1080,
                }),
                thumbnail: None,
            },
        );

        assert!(applied);
        let entry = library.get(added.entry.id).unwrap();
        assert_eq!(entry.formatted_duration(), "1:35");
        assert_eq!(entry.file_size, 12_000_000);
        assert!(!library.apply_extraction(added.ticket, ExtractionOutcome::default()));
    }

    #[test]
    fn test_load_migrates_recent_and_imports_bundled() {
        let fx = Fixture::new();
        let recent = fx.video("old_pick.mp4");
        fx.prefs
            .set(prefs::KEY_RECENT_WALLPAPERS, &vec![recent.to_string_lossy()])
            .unwrap();

        let bundled_dir = fx.dir.path().join("bundle");
        std::fs::create_dir(&bundled_dir).unwrap();
        std::fs::write(bundled_dir.join("hd_dunes.mp4"), b"video").unwrap();

        let extensions = vec!["mp4".to_string()];
        let (library, pending) = VideoLibrary::load(
            fx.paths(),
            fx.prefs.clone(),
            LibraryOptions::default(),
            Some(&bundled_dir),
            &extensions,
        );

        let names: Vec<&str> = library.entries().iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["old_pick.mp4", "hd_dunes.mp4"]);
        assert_eq!(pending.len(), 2);
        assert_eq!(library.selected(), Some(library.entries()[0].id));
        assert!(fx.paths().wallpapers_dir().join("hd_dunes.mp4").exists());

        // A second start finds the bundled video by name and skips it
        let (library, _) = VideoLibrary::load(
            fx.paths(),
            fx.prefs.clone(),
            LibraryOptions::default(),
            Some(&bundled_dir),
            &extensions,
        );
        assert_eq!(library.len(), 2);
    }

    #[test]
    fn test_migrated_entry_is_a_copy() {
        let fx = Fixture::new();
        let movies = fx.dir.path().join("Movies");
        std::fs::create_dir(&movies).unwrap();
        let original = movies.join("holiday.mp4");
        std::fs::write(&original, b"video").unwrap();
        fx.prefs
            .set(
                prefs::KEY_RECENT_WALLPAPERS,
                &vec![original.to_string_lossy(), "/missing/gone.mp4".into()],
            )
            .unwrap();

        let (mut library, _) =
            VideoLibrary::load(fx.paths(), fx.prefs.clone(), LibraryOptions::default(), None, &[]);

        assert_eq!(library.len(), 1);
        let entry = library.entries()[0].clone();
        assert_eq!(entry.path(), fx.paths().wallpapers_dir().join("holiday.mp4"));

        library.remove(entry.id);
        assert!(original.exists());
        assert!(!fx.paths().wallpapers_dir().join("holiday.mp4").exists());
    }

    #[test]
    fn test_load_corrupt_library_starts_empty() {
        let fx = Fixture::new();
        fx.prefs.set(prefs::KEY_VIDEO_LIBRARY, &"not a list").unwrap();
        fx.prefs
            .set(prefs::KEY_RECENT_WALLPAPERS, &vec!["/videos/a.mp4"])
            .unwrap();

        let (library, pending) =
            VideoLibrary::load(fx.paths(), fx.prefs.clone(), LibraryOptions::default(), None, &[]);
        assert!(library.is_empty());
        assert!(pending.is_empty());
        assert_eq!(library.selected(), None);
    }
}

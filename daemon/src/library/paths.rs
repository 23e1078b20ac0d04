use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// On-disk layout of the library
#[derive(Debug, Clone)]
pub struct LibraryPaths {
    root: PathBuf,
}

impl LibraryPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the wallpaper and thumbnail directories
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.wallpapers_dir(), self.thumbnails_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn wallpapers_dir(&self) -> PathBuf {
        self.root.join("Wallpapers")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join("Thumbnails")
    }

    pub fn preferences_file(&self) -> PathBuf {
        self.root.join("preferences.json")
    }

    /// Where a snapshot still for `display` (all displays when `None`) is kept;
    /// each snapshot replaces the previous one for the same target
    pub fn snapshot_file(&self, display: Option<u32>) -> PathBuf {
        let name = match display {
            Some(id) => format!("snapshot_{}.jpg", id),
            None => "snapshot_all.jpg".to_string(),
        };
        self.root.join("Stills").join(name)
    }

    /// Thumbnail location for a video file name, `clip.mp4` -> `clip_mp4_thumb.png`
    pub fn thumbnail_path(&self, file_name: &str) -> PathBuf {
        self.thumbnails_dir()
            .join(format!("{}_thumb.png", file_name.replace('.', "_")))
    }

    /// Copy a picked file into the wallpapers directory.
    ///
    /// Files already inside the directory are used in place; a same-named
    /// file is overwritten.
    pub fn import_file(&self, source: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .with_context(|| format!("Not a file path: {}", source.display()))?;

        let wallpapers = self.wallpapers_dir();
        if source.parent() == Some(wallpapers.as_path()) {
            return Ok(source.to_path_buf());
        }

        std::fs::create_dir_all(&wallpapers)
            .with_context(|| format!("Failed to create {}", wallpapers.display()))?;

        let destination = wallpapers.join(file_name);
        std::fs::copy(source, &destination).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                source.display(),
                destination.display()
            )
        })?;

        log::info!(
            "Imported {} into {}",
            source.display(),
            wallpapers.display()
        );
        Ok(destination)
    }
}

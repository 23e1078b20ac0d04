use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Find video files directly inside `dir`, sorted by name
pub fn discover(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let dir_str = dir
        .to_str()
        .with_context(|| format!("Bundled directory is not valid UTF-8: {}", dir.display()))?;
    let pattern = format!("{}/*", glob::Pattern::escape(dir_str));

    let mut videos: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("Invalid bundled directory pattern: {}", pattern))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Skipping unreadable bundled entry: {}", e);
                None
            }
        })
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();

    videos.sort();
    Ok(videos)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
}

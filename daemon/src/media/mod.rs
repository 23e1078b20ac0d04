//! Metadata, thumbnail and still-frame extraction for video files.
//!
//! Decoding sits behind the [`MediaProbe`] trait: with the `video` feature it
//! is a GStreamer pipeline, without it every probe fails with
//! [`MediaError::Unsupported`] and entries keep their defaults.

#[cfg(feature = "video")]
pub(crate) mod gst;

use anyhow::{Context, Result};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::library::{ExtractionOutcome, LibraryPaths};
use crate::scaling;
use common::VideoEntry;

/// Thumbnails are taken one second in
pub const THUMBNAIL_OFFSET: Duration = Duration::from_secs(1);
pub const THUMBNAIL_MAX: (u32, u32) = (320, 240);
pub const FRAME_MAX: (u32, u32) = (1920, 1080);

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Video support not compiled in")]
    Unsupported,

    #[error("No video stream in {0}")]
    NoVideoStream(PathBuf),

    #[error("No frame available at {at:?} in {path}")]
    NoFrame { path: PathBuf, at: Duration },
}

/// What a decoder can tell about a video stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub duration: Option<Duration>,
    pub width: u32,
    pub height: u32,
}

/// Metadata recorded on a library entry
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoMetadata {
    /// Seconds
    pub duration: f64,
    /// Bytes
    pub file_size: i64,
    pub width: u32,
    pub height: u32,
}

pub trait MediaProbe: Send + Sync {
    fn stream_info(&self, path: &Path) -> Result<StreamInfo>;

    /// Decode the frame at `at` (clamped into the stream) as RGBA
    fn frame_at(&self, path: &Path, at: Duration) -> Result<RgbaImage>;
}

/// Probe backed by the compiled-in decoder
pub fn default_probe() -> Arc<dyn MediaProbe> {
    #[cfg(feature = "video")]
    {
        match gst::GstProbe::new() {
            Ok(probe) => return Arc::new(probe),
            Err(e) => log::error!("Media probing disabled: {:#}", e),
        }
    }

    Arc::new(UnsupportedProbe)
}

pub struct UnsupportedProbe;

impl MediaProbe for UnsupportedProbe {
    fn stream_info(&self, _path: &Path) -> Result<StreamInfo> {
        Err(MediaError::Unsupported.into())
    }

    fn frame_at(&self, _path: &Path, _at: Duration) -> Result<RgbaImage> {
        Err(MediaError::Unsupported.into())
    }
}

/// Duration and dimensions from the decoder, size from the file system
pub fn read_metadata(probe: &dyn MediaProbe, path: &Path) -> Result<VideoMetadata> {
    let file_size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    let info = probe.stream_info(path)?;

    Ok(VideoMetadata {
        duration: info.duration.map(|d| d.as_secs_f64()).unwrap_or(0.0),
        file_size: i64::try_from(file_size).unwrap_or(i64::MAX),
        width: info.width,
        height: info.height,
    })
}

/// Frame at `at`, scaled down to at most 1920x1080
pub fn extract_frame(probe: &dyn MediaProbe, path: &Path, at: Duration) -> Result<RgbaImage> {
    let frame = probe.frame_at(path, at)?;
    shrink(frame, FRAME_MAX)
}

/// Extract a frame and write it as a JPEG into the temp directory
pub fn extract_and_save_frame(probe: &dyn MediaProbe, path: &Path, at: Duration) -> Result<PathBuf> {
    let destination =
        std::env::temp_dir().join(format!("loopwall_frame_{}.jpg", uuid::Uuid::new_v4()));
    extract_frame_to(probe, path, at, &destination)?;
    Ok(destination)
}

/// Extract a frame and write it as a JPEG to `destination`, replacing any file there
pub fn extract_frame_to(
    probe: &dyn MediaProbe,
    path: &Path,
    at: Duration,
    destination: &Path,
) -> Result<()> {
    let frame = extract_frame(probe, path, at)?;
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    image::DynamicImage::ImageRgba8(frame)
        .to_rgb8()
        .save_with_format(destination, image::ImageFormat::Jpeg)
        .with_context(|| format!("Failed to write frame to {}", destination.display()))?;

    log::debug!(
        "Saved frame of {} at {:?} to {}",
        path.display(),
        at,
        destination.display()
    );
    Ok(())
}

/// Thumbnail-sized frame one second into the video
pub fn generate_thumbnail(probe: &dyn MediaProbe, path: &Path) -> Result<RgbaImage> {
    let frame = probe.frame_at(path, THUMBNAIL_OFFSET)?;
    shrink(frame, THUMBNAIL_MAX)
}

pub fn save_thumbnail(thumbnail: &RgbaImage, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    thumbnail
        .save_with_format(destination, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write thumbnail {}", destination.display()))
}

/// Metadata and thumbnail for a library entry.
///
/// Blocking. Failures leave the corresponding part of the outcome empty.
/// Nothing is written once `cancelled` is set.
pub fn run_extraction(
    probe: &dyn MediaProbe,
    paths: &LibraryPaths,
    entry: &VideoEntry,
    cancelled: &AtomicBool,
) -> ExtractionOutcome {
    let video = entry.path();
    let mut outcome = ExtractionOutcome::default();

    match read_metadata(probe, video) {
        Ok(metadata) => outcome.metadata = Some(metadata),
        Err(e) => log::warn!("No metadata for {}: {:#}", entry.file_name, e),
    }

    if cancelled.load(Ordering::Acquire) {
        return outcome;
    }

    let thumbnail = match generate_thumbnail(probe, video) {
        Ok(thumbnail) => thumbnail,
        Err(e) => {
            log::warn!("No thumbnail for {}: {:#}", entry.file_name, e);
            return outcome;
        }
    };

    if cancelled.load(Ordering::Acquire) {
        return outcome;
    }

    let destination = paths.thumbnail_path(&entry.file_name);
    match save_thumbnail(&thumbnail, &destination) {
        Ok(()) => outcome.thumbnail = Some(destination),
        Err(e) => log::warn!("{:#}", e),
    }

    outcome
}

fn shrink(image: RgbaImage, (max_width, max_height): (u32, u32)) -> Result<RgbaImage> {
    let (width, height) = image.dimensions();
    let (target_width, target_height) = scaling::fit_within(width, height, max_width, max_height);
    if (target_width, target_height) == (width, height) {
        return Ok(image);
    }
    scaling::resize(&image, target_width, target_height, scaling::STILL_FILTER)
}


#[cfg(test)]
mod tests {
    use super::testing::FakeProbe;
    use super::*;

    fn video_file(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    #[test]
    fn test_read_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_file(dir.path(), "clip.mp4", 2048);
        let probe = FakeProbe::new(Duration::from_millis(95_500), (1920, 1080));

        let metadata = read_metadata(&probe, &video).unwrap();
        assert_eq!(metadata.file_size, 2048);
        assert_eq!(metadata.duration, 95.5);
        assert_eq!((metadata.width, metadata.height), (1920, 1080));
    }

    #[test]
    fn test_missing_file_has_no_metadata() {
        let probe = FakeProbe::new(Duration::from_secs(5), (64, 64));
        assert!(read_metadata(&probe, Path::new("/nonexistent/clip.mp4")).is_err());
    }

    #[test]
    fn test_thumbnail_is_bounded() {
        let probe = FakeProbe::new(Duration::from_secs(10), (1920, 1080));
        let thumbnail = generate_thumbnail(&probe, Path::new("clip.mp4")).unwrap();
        assert_eq!(thumbnail.dimensions(), (320, 180));
    }

    #[test]
    fn test_frame_is_bounded() {
        let probe = FakeProbe::new(Duration::from_secs(10), (3840, 2160));
        let frame = extract_frame(&probe, Path::new("clip.mp4"), Duration::from_secs(2)).unwrap();
        assert_eq!(frame.dimensions(), (1920, 1080));
    }

    #[test]
    fn test_extract_and_save_frame_writes_jpeg() {
        let probe = FakeProbe::new(Duration::from_secs(10), (64, 48));
        let saved =
            extract_and_save_frame(&probe, Path::new("clip.mp4"), Duration::from_secs(1)).unwrap();

        let name = saved.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("loopwall_frame_"));
        assert!(name.ends_with(".jpg"));
        let decoded = image::open(&saved).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        std::fs::remove_file(saved).unwrap();
    }

    #[test]
    fn test_extract_frame_to_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("stills").join("snapshot.jpg");

        let small = FakeProbe::new(Duration::from_secs(10), (32, 16));
        extract_frame_to(&small, Path::new("clip.mp4"), Duration::ZERO, &destination).unwrap();
        let large = FakeProbe::new(Duration::from_secs(10), (64, 48));
        extract_frame_to(&large, Path::new("clip.mp4"), Duration::ZERO, &destination).unwrap();

        let decoded = image::open(&destination).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert_eq!(std::fs::read_dir(destination.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_run_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let paths = LibraryPaths::new(dir.path());
        let video = video_file(dir.path(), "sea.mp4", 512);
        let entry = VideoEntry::new(&video);
        let probe = FakeProbe::new(Duration::from_secs(30), (640, 360));

        let outcome = run_extraction(&probe, &paths, &entry, &AtomicBool::new(false));

        assert_eq!(outcome.metadata.unwrap().duration, 30.0);
        let thumbnail = outcome.thumbnail.unwrap();
        assert_eq!(thumbnail, paths.thumbnail_path("sea.mp4"));
        assert!(thumbnail.exists());
    }

    #[test]
    fn test_short_video_keeps_metadata_without_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let paths = LibraryPaths::new(dir.path());
        let video = video_file(dir.path(), "blip.mp4", 16);
        let entry = VideoEntry::new(&video);
        let probe = FakeProbe::new(Duration::from_millis(500), (64, 64));

        let outcome = run_extraction(&probe, &paths, &entry, &AtomicBool::new(false));
        assert!(outcome.metadata.is_some());
        assert!(outcome.thumbnail.is_none());
    }

    #[test]
    fn test_cancelled_extraction_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = LibraryPaths::new(dir.path());
        let video = video_file(dir.path(), "gone.mp4", 16);
        let entry = VideoEntry::new(&video);
        let probe = FakeProbe::new(Duration::from_secs(5), (64, 64));

        let outcome = run_extraction(&probe, &paths, &entry, &AtomicBool::new(true));
        assert!(outcome.thumbnail.is_none());
        assert!(!paths.thumbnail_path("gone.mp4").exists());
    }

    #[test]
    fn test_unsupported_backend() {
        let err = UnsupportedProbe
            .frame_at(Path::new("clip.mp4"), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MediaError>(),
            Some(MediaError::Unsupported)
        ));
    }
}

//! Common types and utilities for loopwall.
//!
//! This crate defines the shared data structures and IPC protocol used for
//! communication between the daemon (`loopwall`) and the client (`loopctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using JSON-serialized
//! messages, one per line. The client sends [`Command`] variants and receives
//! [`Response`] variants.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, SettingsPatch};
//!
//! // Lower the quality and unmute the live wallpaper
//! let cmd = Command::UpdateSettings {
//!     patch: SettingsPatch {
//!         quality: Some(0.3),
//!         muted: Some(false),
//!         ..Default::default()
//!     },
//! };
//!
//! // Serialize for sending over IPC
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Common error types shared between client and daemon.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum WallpaperError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Wayland error: {0}")]
    Wayland(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Video error: {0}")]
    Video(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for WallpaperError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for WallpaperError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// Commands sent from client to daemon via IPC.
///
/// # Examples
///
/// ```
/// use common::Command;
///
/// // Add a video to the library
/// let cmd = Command::AddVideo {
///     path: "/home/me/Videos/waves.mp4".to_string(),
/// };
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Ping the daemon
    Ping,
    /// Query daemon status
    Query,
    /// Kill the daemon
    Kill,
    /// List attached displays
    ListDisplays,

    /// Copy a video into the library and track it.
    AddVideo {
        /// Path to the picked video file
        path: String,
    },
    /// Remove an entry, deleting its file and thumbnail
    RemoveVideo { id: Uuid },
    /// Mark an entry as the chosen one (no playback)
    SelectVideo { id: Uuid },
    /// Flip the favorite flag of an entry
    ToggleFavorite { id: Uuid },
    /// List one page of the library; `None` means the current page
    ListVideos { page: Option<usize> },
    /// Move the current page forward
    NextPage,
    /// Move the current page back
    PreviousPage,

    /// Select an entry and play it as the live wallpaper
    PlayVideo { id: Uuid },
    /// Set the active content directly
    SetContent { source: ContentSource },
    /// Stop rendering, leaving the wallpaper window blank
    Stop,

    /// Read the current settings
    GetSettings,
    /// Change one or more settings
    UpdateSettings { patch: SettingsPatch },

    /// Set a still image as wallpaper.
    ///
    /// `display` of `None` applies to every display.
    SetStillWallpaper {
        path: String,
        display: Option<u32>,
    },
    /// Extract a frame from a video and show it as a still wallpaper
    SnapshotFrame {
        path: String,
        /// Timestamp in seconds
        at: f64,
        display: Option<u32>,
    },
}

/// Response from daemon to client
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(WallpaperError),
    Status(DaemonStatus),
    Displays(Vec<DisplayInfo>),
    Pong,
    Added(Option<VideoEntry>),
    Page(LibraryPage),
    Settings(Settings),
}

/// Daemon status information
#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub playback: PlaybackStatus,
    pub library_size: usize,
    pub selected: Option<Uuid>,
}

/// What the wallpaper window is currently rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaybackStatus {
    Idle,
    Playing {
        source: ContentSource,
        display: Option<u32>,
    },
}

/// Content that can be rendered as a live wallpaper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentSource {
    /// A local video file played by the native player
    Video { path: PathBuf },
    /// A web page URL, or a local file embedded into an inline page
    Web { location: String },
    /// A YouTube watch or short URL, played through its embed page
    YouTube { url: String },
}

impl ContentSource {
    pub fn video(path: impl AsRef<Path>) -> Self {
        Self::Video {
            path: path.as_ref().to_path_buf(),
        }
    }
}

/// Output (monitor) information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// Numeric id of the display, derived from its connector name so it
    /// survives replugs and restarts
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
    pub scale: i32,
    /// The display used when no explicit one is selected
    pub primary: bool,
}

/// One tracked video file and its derived metadata.
///
/// This is also the persisted record format of the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub id: Uuid,
    /// Source location of the video file
    pub url: String,
    /// Location of the cached thumbnail, once generated
    pub thumbnail_url: Option<String>,
    /// Duration in seconds (0 while unknown)
    pub duration: f64,
    /// Size in bytes (0 while unknown)
    pub file_size: i64,
    pub date_added: DateTime<Utc>,
    pub is_favorite: bool,
    pub file_name: String,
}

impl VideoEntry {
    /// Create a fresh entry for a source location with unknown metadata
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            id: Uuid::new_v4(),
            url: path.to_string_lossy().to_string(),
            thumbnail_url: None,
            duration: 0.0,
            file_size: 0,
            date_added: Utc::now(),
            is_favorite: false,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.url)
    }

    pub fn thumbnail_path(&self) -> Option<&Path> {
        self.thumbnail_url.as_deref().map(Path::new)
    }

    /// Duration as `m:ss`
    pub fn formatted_duration(&self) -> String {
        let total = self.duration.max(0.0) as u64;
        format!("{}:{:02}", total / 60, total % 60)
    }

    /// File size in MB, or GB from 1000 MB up
    pub fn formatted_file_size(&self) -> String {
        let mb = self.file_size.max(0) as f64 / 1_000_000.0;
        if mb >= 1000.0 {
            format!("{:.2} GB", mb / 1000.0)
        } else {
            format!("{:.1} MB", mb)
        }
    }
}

/// One page of the video library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryPage {
    pub page: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
    pub entries: Vec<VideoEntry>,
    pub selected: Option<Uuid>,
}

/// How rendered video maps to the display bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    /// Scale to cover the whole display (may crop)
    #[default]
    Fill,
    /// Scale to fit within the display (may letterbox)
    Fit,
    /// Stretch to the display bounds (may distort)
    Stretch,
}

impl ScaleMode {
    /// Parse a scaling mode name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "fill" => Some(Self::Fill),
            "fit" => Some(Self::Fit),
            "stretch" => Some(Self::Stretch),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fill => "fill",
            Self::Fit => "fit",
            Self::Stretch => "stretch",
        }
    }
}

/// Persisted user preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Video quality fraction in [0.1, 1.0]
    pub quality: f64,
    pub scaling: ScaleMode,
    pub muted: bool,
    /// Playback rate multiplier
    pub playback_speed: f64,
    /// Id of the display to render on, 0 for the primary display
    pub selected_display: u32,
    /// Log playback statistics while rendering
    pub show_stats: bool,
}

impl Settings {
    pub const MIN_QUALITY: f64 = 0.1;
    pub const MAX_QUALITY: f64 = 1.0;
    pub const MIN_SPEED: f64 = 0.25;
    pub const MAX_SPEED: f64 = 4.0;
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quality: 0.5,
            scaling: ScaleMode::Fill,
            muted: true,
            playback_speed: 1.0,
            selected_display: 0,
            show_stats: false,
        }
    }
}

/// Partial settings update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub quality: Option<f64>,
    pub scaling: Option<ScaleMode>,
    pub muted: Option<bool>,
    pub playback_speed: Option<f64>,
    pub selected_display: Option<u32>,
    pub show_stats: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.quality.is_none()
            && self.scaling.is_none()
            && self.muted.is_none()
            && self.playback_speed.is_none()
            && self.selected_display.is_none()
            && self.show_stats.is_none()
    }
}

/// IPC socket path helper
pub fn get_socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("loopwall.sock")
}

use crate::validate_enum;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub library: LibrarySettings,

    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default)]
    pub web: WebSettings,

    #[serde(default)]
    pub setter: SetterSettings,
}

/// General daemon settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Video library settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibrarySettings {
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_max_videos")]
    pub max_videos: usize,

    /// Directory scanned for bundled videos at startup
    #[serde(default)]
    pub bundled_dir: Option<String>,

    /// File name fragments that mark a video as bundled
    #[serde(default = "default_bundled_markers")]
    pub bundled_markers: Vec<String>,

    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_videos: default_max_videos(),
            bundled_dir: None,
            bundled_markers: default_bundled_markers(),
            extensions: default_extensions(),
        }
    }
}

fn default_page_size() -> usize {
    8
}
fn default_max_videos() -> usize {
    100
}
fn default_bundled_markers() -> Vec<String> {
    vec!["hd_".to_string(), "uhd_".to_string()]
}
fn default_extensions() -> Vec<String> {
    ["mp4", "mov", "avi", "mkv", "webm", "m4v"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

/// Filesystem locations
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PathSettings {
    /// Overrides `<data_dir>/loopwall`; `~` is expanded
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// Live playback settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackSettings {
    /// Interval between frame statistics log lines when stats are enabled
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            stats_interval_secs: default_stats_interval(),
        }
    }
}

fn default_stats_interval() -> u64 {
    5
}

/// Web and YouTube content settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSettings {
    /// Browser argv; `{url}` and `{output}` are substituted at launch
    #[serde(default = "default_browser_command")]
    pub browser_command: Vec<String>,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            browser_command: default_browser_command(),
        }
    }
}

fn default_browser_command() -> Vec<String> {
    vec!["cog".to_string(), "{url}".to_string()]
}

/// Still wallpaper settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SetterSettings {
    /// Show a still frame of a video while its live playback spins up
    #[serde(default = "default_true")]
    pub still_fallback: bool,

    /// Delay before a temporary extracted frame is deleted
    #[serde(default = "default_frame_cleanup")]
    pub frame_cleanup_secs: u64,
}

impl Default for SetterSettings {
    fn default() -> Self {
        Self {
            still_fallback: true,
            frame_cleanup_secs: default_frame_cleanup(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_frame_cleanup() -> u64 {
    10
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("loopwall");

        Ok(config_dir.join("config.toml"))
    }

    /// Root directory for the library, thumbnails and preferences
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.paths.data_dir {
            return Ok(PathBuf::from(shellexpand::tilde(dir).as_ref()));
        }

        Ok(dirs::data_dir()
            .context("Failed to get data directory")?
            .join("loopwall"))
    }

    /// Bundled video directory, with `~` expanded
    pub fn bundled_dir(&self) -> Option<PathBuf> {
        self.library
            .bundled_dir
            .as_ref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).as_ref()))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;

        if self.library.page_size == 0 {
            anyhow::bail!("library.page_size must be at least 1");
        }
        if self.library.max_videos == 0 {
            anyhow::bail!("library.max_videos must be at least 1");
        }
        if self.library.extensions.is_empty() {
            anyhow::bail!("library.extensions must not be empty");
        }

        if self.playback.stats_interval_secs == 0 {
            anyhow::bail!("playback.stats_interval_secs must be at least 1");
        }

        if self.web.browser_command.is_empty() {
            anyhow::bail!("web.browser_command must name a program");
        }
        if !self.web.browser_command.iter().any(|arg| arg.contains("{url}")) {
            anyhow::bail!("web.browser_command must contain a {{url}} placeholder");
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }
}

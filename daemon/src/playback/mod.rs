//! Live wallpaper playback.
//!
//! The [`controller::PlaybackController`] owns the active [`Renderer`] and
//! drives it from the content and settings channels. Native video frames are
//! handed to the window through a [`frames::FrameSlot`]; pages are shown by
//! an external browser.

pub mod controller;
pub mod frames;
pub mod stats;
pub mod video;
pub mod web;

use anyhow::{Result, bail};
use common::{ContentSource, DisplayInfo, ScaleMode};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::Arc;

use frames::FrameSlot;
use web::{BrowserPlayer, InlinePage, WebLocation};

/// The desktop as seen by playback and the wallpaper setter
pub trait Desktop: Send + Sync {
    fn displays(&self) -> Vec<DisplayInfo>;

    /// Show frames from `frames` on `display`, replacing any other video
    fn attach_video(&self, display: u32, frames: FrameSlot) -> Result<()>;

    fn detach_video(&self) -> Result<()>;

    fn set_scaling(&self, scaling: ScaleMode) -> Result<()>;

    /// Replace the still image of one display, or of all when `display` is `None`.
    /// `None` as image clears it.
    fn set_still(&self, display: Option<u32>, image: Option<Arc<RgbaImage>>) -> Result<()>;
}

/// An active media player
pub trait Renderer: Send {
    fn play(&mut self) -> Result<()>;

    fn set_muted(&mut self, muted: bool) -> Result<()>;

    fn set_rate(&mut self, rate: f64) -> Result<()>;

    /// Peak bitrate in bit/s, `None` for unrestricted
    fn set_bitrate_cap(&mut self, cap: Option<u64>) -> Result<()>;

    /// Frames to show in the window, for renderers that decode in-process
    fn frames(&self) -> Option<FrameSlot>;

    /// Halt playback and release the media
    fn stop(&mut self);
}

/// Content ready to hand to a renderer
pub enum ResolvedContent {
    Native(PathBuf),
    Page {
        url: String,
        /// Generated page backing a `file://` url
        inline: Option<InlinePage>,
    },
}

impl std::fmt::Debug for ResolvedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(path) => f.debug_tuple("Native").field(path).finish(),
            Self::Page { url, inline } => f
                .debug_struct("Page")
                .field("url", url)
                .field("inline", &inline.is_some())
                .finish(),
        }
    }
}

/// Turn a content selection into something a renderer can load
pub fn resolve_content(source: &ContentSource, scaling: ScaleMode) -> Result<ResolvedContent> {
    match source {
        ContentSource::Video { path } => Ok(ResolvedContent::Native(path.clone())),
        ContentSource::YouTube { url } => match web::youtube_video_id(url) {
            Some(id) => Ok(ResolvedContent::Page {
                url: web::youtube_embed_url(&id),
                inline: None,
            }),
            None => bail!("No YouTube video id in '{}'", url),
        },
        ContentSource::Web { location } => match WebLocation::parse(location)? {
            WebLocation::Remote(url) => Ok(ResolvedContent::Page { url, inline: None }),
            WebLocation::Local(path) => {
                let page = InlinePage::create(&path, scaling)?;
                Ok(ResolvedContent::Page {
                    url: page.url()?,
                    inline: Some(page),
                })
            }
        },
    }
}

/// Display with id `selected`, else the primary one.
///
/// Id 0 always means the primary display. With no display flagged primary
/// the first one is used.
pub fn select_display(displays: &[DisplayInfo], selected: u32) -> Option<DisplayInfo> {
    if selected != 0
        && let Some(display) = displays.iter().find(|d| d.id == selected)
    {
        return Some(display.clone());
    }

    displays
        .iter()
        .find(|d| d.primary)
        .or_else(|| displays.first())
        .cloned()
}

/// Peak bitrate allowed for a quality setting, `None` for unrestricted
pub fn bitrate_cap_for_quality(quality: f64) -> Option<u64> {
    if quality > 0.8 {
        None
    } else if quality > 0.5 {
        Some(2_000_000)
    } else {
        Some(1_000_000)
    }
}

pub trait RendererFactory: Send + Sync {
    fn create(&self, content: ResolvedContent, display: &DisplayInfo) -> Result<Box<dyn Renderer>>;
}

/// GStreamer for files, the configured browser for pages
pub struct DefaultRendererFactory {
    browser_command: Vec<String>,
}

impl DefaultRendererFactory {
    pub fn new(browser_command: Vec<String>) -> Self {
        Self { browser_command }
    }
}

impl RendererFactory for DefaultRendererFactory {
    fn create(&self, content: ResolvedContent, display: &DisplayInfo) -> Result<Box<dyn Renderer>> {
        match content {
            ResolvedContent::Native(path) => Ok(Box::new(video::VideoRenderer::load(&path)?)),
            ResolvedContent::Page { url, inline } => Ok(Box::new(BrowserPlayer::new(
                &self.browser_command,
                &url,
                display,
                inline,
            )?)),
        }
    }
}

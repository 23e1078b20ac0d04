//! Web and YouTube content.
//!
//! Pages are shown by an external browser process launched from the
//! configured command line. Local media files are inlined into a generated
//! HTML page as a base64 `data:` source.

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use common::{DisplayInfo, ScaleMode};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use url::Url;

use super::{Renderer, frames::FrameSlot};

const YOUTUBE_EMBED_BASE: &str = "https://www.youtube.com/embed";

/// Video id of a YouTube URL: the `v` query parameter, or the last path
/// segment of a `youtu.be` short link
pub fn youtube_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;

    if let Some((_, id)) = parsed.query_pairs().find(|(key, _)| key == "v") {
        return (!id.is_empty()).then(|| id.into_owned());
    }

    if parsed.host_str() == Some("youtu.be") {
        return parsed
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .next_back()
            .map(String::from);
    }

    None
}

/// Autoplaying, looping, chrome-less embed URL for a video id
pub fn youtube_embed_url(id: &str) -> String {
    format!(
        "{}/{}?autoplay=1&loop=1&playlist={}&controls=0&showinfo=0&autohide=1&modestbranding=1",
        YOUTUBE_EMBED_BASE, id, id
    )
}

/// Where a web location points to
#[derive(Debug, Clone, PartialEq)]
pub enum WebLocation {
    Remote(String),
    Local(PathBuf),
}

impl WebLocation {
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            bail!("Empty web location");
        }

        if !location.contains("://") {
            return Ok(Self::Local(PathBuf::from(location)));
        }

        let url = Url::parse(location).with_context(|| format!("Invalid URL: {}", location))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::Remote(location.to_string())),
            "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|_| anyhow!("Invalid file URL: {}", location)),
            scheme => bail!("Unsupported URL scheme '{}'", scheme),
        }
    }
}

/// MIME type of a media file that can be inlined into a page
pub fn media_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    let mime = match ext.as_str() {
        "mp4" => "video/mp4",
        "m4v" => "video/x-m4v",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ogv" => "video/ogg",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => return None,
    };
    Some(mime)
}

fn object_fit(scaling: ScaleMode) -> &'static str {
    match scaling {
        ScaleMode::Fill => "cover",
        ScaleMode::Fit => "contain",
        ScaleMode::Stretch => "fill",
    }
}

/// Static page showing one inlined media file
pub fn inline_page_html(mime: &str, encoded: &str, scaling: ScaleMode) -> String {
    let source = format!("data:{};base64,{}", mime, encoded);
    let element = if mime.starts_with("video/") {
        format!(
            r#"<video src="{}" autoplay loop muted playsinline></video>"#,
            source
        )
    } else {
        format!(r#"<img src="{}">"#, source)
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
html, body {{ margin: 0; padding: 0; width: 100%; height: 100%; overflow: hidden; background: #000; }}
video, img {{ width: 100%; height: 100%; object-fit: {}; }}
</style>
</head>
<body>{}</body>
</html>
"#,
        object_fit(scaling),
        element
    )
}

/// Generated page on disk; removed when dropped
pub struct InlinePage {
    file: tempfile::NamedTempFile,
}

impl InlinePage {
    /// Inline the media file at `path` into a temporary page
    pub fn create(path: &Path, scaling: ScaleMode) -> Result<Self> {
        let mime = media_mime(path)
            .with_context(|| format!("Unsupported media type: {}", path.display()))?;
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let mut file = tempfile::Builder::new()
            .prefix("loopwall_page_")
            .suffix(".html")
            .tempfile()
            .context("Failed to create page file")?;
        file.write_all(inline_page_html(mime, &encoded, scaling).as_bytes())
            .context("Failed to write page file")?;
        file.flush()?;

        log::debug!(
            "Inlined {} ({} bytes) into {}",
            path.display(),
            bytes.len(),
            file.path().display()
        );
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn url(&self) -> Result<String> {
        Url::from_file_path(self.path())
            .map(String::from)
            .map_err(|_| anyhow!("Page path is not absolute"))
    }
}

/// Substitute `{url}` and `{output}` into the configured command line
pub fn browser_argv(command: &[String], url: &str, output: &str) -> Result<Vec<String>> {
    if command.is_empty() {
        bail!("Browser command is empty");
    }
    Ok(command
        .iter()
        .map(|arg| arg.replace("{url}", url).replace("{output}", output))
        .collect())
}

/// Page renderer backed by an external browser process
pub struct BrowserPlayer {
    argv: Vec<String>,
    child: Option<Child>,
    _page: Option<InlinePage>,
}

impl BrowserPlayer {
    pub fn new(
        command: &[String],
        url: &str,
        display: &DisplayInfo,
        page: Option<InlinePage>,
    ) -> Result<Self> {
        Ok(Self {
            argv: browser_argv(command, url, &display.name)?,
            child: None,
            _page: page,
        })
    }
}

impl Renderer for BrowserPlayer {
    fn play(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to launch browser '{}'", self.argv[0]))?;

        log::info!("Launched browser (pid {}): {}", child.id(), self.argv.join(" "));
        self.child = Some(child);
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) -> Result<()> {
        log::debug!("Browser pages keep their own audio state (muted={})", muted);
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        log::debug!("Playback rate {} not applicable to pages", rate);
        Ok(())
    }

    fn set_bitrate_cap(&mut self, cap: Option<u64>) -> Result<()> {
        log::debug!("Bitrate cap {:?} not applicable to pages", cap);
        Ok(())
    }

    fn frames(&self) -> Option<FrameSlot> {
        None
    }

    fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.kill() {
            log::warn!("Failed to stop browser: {}", e);
        }
        match child.wait() {
            Ok(status) => log::info!("Browser exited ({})", status),
            Err(e) => log::warn!("Failed to reap browser: {}", e),
        }
    }
}

impl Drop for BrowserPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

//! GStreamer-backed [`MediaProbe`](super::MediaProbe).
//!
//! Each probe builds a throwaway `playbin` with fake sinks, prerolls it in
//! PAUSED and reads what it needs: the duration query, the negotiated caps of
//! the video pad, or a converted snapshot through `convert-sample`.

use anyhow::{Context, Result, anyhow};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use image::RgbaImage;
use std::path::Path;
use std::time::Duration;

use super::{MediaError, MediaProbe, StreamInfo};

const PREROLL_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(10);

/// Initialize GStreamer (idempotent)
pub fn initialize_gstreamer() -> Result<()> {
    static GSTREAMER_INITIALIZED: std::sync::OnceLock<Result<(), String>> =
        std::sync::OnceLock::new();

    GSTREAMER_INITIALIZED
        .get_or_init(|| {
            gst::init().map_err(|e| e.to_string())?;
            log::info!("GStreamer initialized");
            Ok(())
        })
        .clone()
        .map_err(|e| anyhow!("Failed to initialize GStreamer: {}", e))
}

/// Absolute `file://` URI for a local path
pub fn file_uri(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    url::Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| anyhow!("Not a local file path: {}", absolute.display()))
}

pub struct GstProbe;

impl GstProbe {
    pub fn new() -> Result<Self> {
        initialize_gstreamer()?;
        Ok(Self)
    }
}

impl MediaProbe for GstProbe {
    fn stream_info(&self, path: &Path) -> Result<StreamInfo> {
        let pipeline = PrerolledPipeline::open(path)?;

        let duration = pipeline
            .playbin
            .query_duration::<gst::ClockTime>()
            .map(|d| Duration::from_nanos(d.nseconds()));

        let pad = pipeline
            .playbin
            .emit_by_name::<Option<gst::Pad>>("get-video-pad", &[&0i32])
            .ok_or_else(|| MediaError::NoVideoStream(path.to_path_buf()))?;
        let caps = pad
            .current_caps()
            .ok_or_else(|| MediaError::NoVideoStream(path.to_path_buf()))?;
        let info = gst_video::VideoInfo::from_caps(&caps)
            .context("Failed to read video caps")?;

        log::debug!(
            "Probed {}: {}x{}, {:?}",
            path.display(),
            info.width(),
            info.height(),
            duration
        );

        Ok(StreamInfo {
            duration,
            width: info.width(),
            height: info.height(),
        })
    }

    fn frame_at(&self, path: &Path, at: Duration) -> Result<RgbaImage> {
        let pipeline = PrerolledPipeline::open(path)?;

        let mut position = gst::ClockTime::from_nseconds(at.as_nanos() as u64);
        if let Some(duration) = pipeline.playbin.query_duration::<gst::ClockTime>()
            && position >= duration
        {
            position = gst::ClockTime::from_nseconds(duration.nseconds() / 2);
        }
        pipeline.seek(position)?;

        let caps = gst_video::VideoCapsBuilder::new()
            .format(gst_video::VideoFormat::Rgba)
            .pixel_aspect_ratio(gst::Fraction::new(1, 1))
            .build();
        let sample = pipeline
            .playbin
            .emit_by_name::<Option<gst::Sample>>("convert-sample", &[&caps])
            .ok_or_else(|| MediaError::NoFrame {
                path: path.to_path_buf(),
                at,
            })?;

        sample_to_image(&sample)
    }
}

/// Copy a converted RGBA sample into a tightly packed image
fn sample_to_image(sample: &gst::Sample) -> Result<RgbaImage> {
    let caps = sample.caps().context("Sample has no caps")?;
    let info = gst_video::VideoInfo::from_caps(caps).context("Failed to read sample caps")?;
    let buffer = sample.buffer().context("Sample has no buffer")?;
    let map = buffer
        .map_readable()
        .map_err(|_| anyhow!("Failed to map sample buffer"))?;

    let width = info.width() as usize;
    let height = info.height() as usize;
    let stride = info.stride()[0] as usize;
    let row = width * 4;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row * height);
    for y in 0..height {
        let start = y * stride;
        let line = data
            .get(start..start + row)
            .context("Sample buffer shorter than its caps")?;
        pixels.extend_from_slice(line);
    }

    RgbaImage::from_raw(info.width(), info.height(), pixels).context("Invalid sample dimensions")
}

/// A `playbin` held in PAUSED; set back to NULL on drop
struct PrerolledPipeline {
    playbin: gst::Element,
}

impl PrerolledPipeline {
    fn open(path: &Path) -> Result<Self> {
        let uri = file_uri(path)?;
        let playbin = gst::ElementFactory::make("playbin")
            .property("uri", &uri)
            .build()
            .context("Failed to create playbin")?;

        let video_sink = gst::ElementFactory::make("fakesink")
            .build()
            .context("Failed to create fakesink")?;
        let audio_sink = gst::ElementFactory::make("fakesink")
            .build()
            .context("Failed to create fakesink")?;
        playbin.set_property("video-sink", &video_sink);
        playbin.set_property("audio-sink", &audio_sink);

        let pipeline = Self { playbin };
        pipeline
            .playbin
            .set_state(gst::State::Paused)
            .map_err(|_| pipeline.failure(path))?;
        pipeline.wait(path)?;
        Ok(pipeline)
    }

    fn seek(&self, position: gst::ClockTime) -> Result<()> {
        self.playbin
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE, position)
            .context("Seek failed")?;
        let (result, _, _) = self.playbin.state(PREROLL_TIMEOUT);
        result.map_err(|_| anyhow!("Pipeline did not preroll after seeking"))?;
        Ok(())
    }

    fn wait(&self, path: &Path) -> Result<()> {
        let (result, _, _) = self.playbin.state(PREROLL_TIMEOUT);
        result.map_err(|_| self.failure(path))?;
        Ok(())
    }

    /// Best error available for a failed state change
    fn failure(&self, path: &Path) -> anyhow::Error {
        let message = self.playbin.bus().and_then(|bus| {
            bus.timed_pop_filtered(gst::ClockTime::ZERO, &[gst::MessageType::Error])
        });

        match message.as_ref().map(|m| m.view()) {
            Some(gst::MessageView::Error(err)) => {
                anyhow!("Failed to open {}: {}", path.display(), err.error())
            }
            _ => anyhow!("Failed to open {}", path.display()),
        }
    }
}

impl Drop for PrerolledPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.playbin.set_state(gst::State::Null) {
            log::warn!("Failed to stop probe pipeline: {}", e);
        }
    }
}

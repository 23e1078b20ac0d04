//! Native video playback.
//!
//! A `playbin` decodes the file with its default audio sink and an appsink
//! for video. Frames are converted to BGRA and pushed into a [`FrameSlot`]
//! for the window. A bus thread loops the video on end-of-stream.

#[cfg(feature = "video")]
pub use pipeline::VideoRenderer;

#[cfg(not(feature = "video"))]
pub use stub::VideoRenderer;

#[cfg(feature = "video")]
mod pipeline {
    use anyhow::{Context, Result, anyhow};
    use gstreamer as gst;
    use gstreamer::prelude::*;
    use gstreamer_app as gst_app;
    use gstreamer_video as gst_video;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;

    use crate::media::gst::{file_uri, initialize_gstreamer};
    use crate::playback::Renderer;
    use crate::playback::frames::{FrameSlot, VideoFrame};

    const STATE_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(5);
    const BUS_POLL: gst::ClockTime = gst::ClockTime::from_mseconds(100);

    pub struct VideoRenderer {
        playbin: gst::Element,
        frames: FrameSlot,
        /// Playback rate as f64 bits, shared with the bus thread
        rate: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        bus_thread: Option<JoinHandle<()>>,
        playing: bool,
    }

    impl VideoRenderer {
        pub fn load(path: &Path) -> Result<Self> {
            initialize_gstreamer()?;
            log::info!("Loading video: {}", path.display());

            let uri = file_uri(path)?;
            let playbin = gst::ElementFactory::make("playbin")
                .property("uri", &uri)
                .build()
                .context("Failed to create playbin")?;

            let caps = gst_video::VideoCapsBuilder::new()
                .format(gst_video::VideoFormat::Bgra)
                .build();
            let app_sink = gst_app::AppSink::builder().caps(&caps).build();
            configure_app_sink(&app_sink);

            let frames = FrameSlot::new();
            setup_frame_callback(&app_sink, frames.clone());
            playbin.set_property("video-sink", &app_sink);

            Ok(Self {
                playbin,
                frames,
                rate: Arc::new(AtomicU64::new(1.0f64.to_bits())),
                running: Arc::new(AtomicBool::new(false)),
                bus_thread: None,
                playing: false,
            })
        }

        fn rate(&self) -> f64 {
            f64::from_bits(self.rate.load(Ordering::Acquire))
        }

        fn spawn_bus_thread(&mut self) -> Result<()> {
            let bus = self.playbin.bus().context("Pipeline has no bus")?;
            let playbin = self.playbin.downgrade();
            let rate = self.rate.clone();
            let running = self.running.clone();

            let handle = std::thread::Builder::new()
                .name("loopwall-video-bus".to_string())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        let Some(message) = bus.timed_pop(BUS_POLL) else {
                            continue;
                        };

                        match message.view() {
                            gst::MessageView::Eos(..) => {
                                let Some(playbin) = playbin.upgrade() else {
                                    break;
                                };
                                let rate = f64::from_bits(rate.load(Ordering::Acquire));
                                log::debug!("End of stream, looping");
                                if let Err(e) = seek(&playbin, rate, gst::ClockTime::ZERO) {
                                    log::error!("Failed to loop video: {}", e);
                                }
                            }
                            gst::MessageView::Error(err) => {
                                log::error!(
                                    "Video playback error from {:?}: {} ({:?})",
                                    err.src().map(|s| s.path_string()),
                                    err.error(),
                                    err.debug()
                                );
                            }
                            gst::MessageView::Warning(warning) => {
                                log::warn!("Video playback warning: {}", warning.error());
                            }
                            _ => {}
                        }
                    }
                })
                .context("Failed to spawn bus thread")?;

            self.bus_thread = Some(handle);
            Ok(())
        }
    }

    impl Renderer for VideoRenderer {
        fn play(&mut self) -> Result<()> {
            if self.playing {
                return Ok(());
            }

            log::info!("Starting video playback");
            self.running.store(true, Ordering::Release);
            self.spawn_bus_thread()?;

            self.playbin
                .set_state(gst::State::Playing)
                .context("Failed to set pipeline to Playing state")?;
            let (result, _, _) = self.playbin.state(STATE_TIMEOUT);
            result.map_err(|_| anyhow!("Pipeline failed to start playing"))?;
            self.playing = true;

            let rate = self.rate();
            if rate != 1.0 {
                self.set_rate(rate)?;
            }
            Ok(())
        }

        fn set_muted(&mut self, muted: bool) -> Result<()> {
            self.playbin.set_property("mute", muted);
            Ok(())
        }

        fn set_rate(&mut self, rate: f64) -> Result<()> {
            self.rate.store(rate.to_bits(), Ordering::Release);
            if !self.playing {
                return Ok(());
            }

            let position = self
                .playbin
                .query_position::<gst::ClockTime>()
                .unwrap_or(gst::ClockTime::ZERO);
            seek(&self.playbin, rate, position)?;
            log::debug!("Playback rate set to {}", rate);
            Ok(())
        }

        fn set_bitrate_cap(&mut self, cap: Option<u64>) -> Result<()> {
            let kbps = cap.map(|bits| bits / 1000).unwrap_or(0);
            self.playbin.set_property("connection-speed", kbps);
            Ok(())
        }

        fn frames(&self) -> Option<FrameSlot> {
            Some(self.frames.clone())
        }

        fn stop(&mut self) {
            self.running.store(false, Ordering::Release);
            if let Err(e) = self.playbin.set_state(gst::State::Null) {
                log::warn!("Failed to stop pipeline: {}", e);
            }
            if let Some(handle) = self.bus_thread.take()
                && handle.join().is_err()
            {
                log::warn!("Video bus thread panicked");
            }
            if self.playing {
                log::info!("Stopped video playback");
            }
            self.playing = false;
        }
    }

    impl Drop for VideoRenderer {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn seek(playbin: &gst::Element, rate: f64, position: gst::ClockTime) -> Result<()> {
        playbin
            .seek(
                rate,
                gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                gst::SeekType::Set,
                position,
                gst::SeekType::None,
                gst::ClockTime::NONE,
            )
            .context("Seek failed")
    }

    /// Settings for wallpaper playback:
    /// - `sync=true`: frames are paced by their timestamps
    /// - `max-buffers=1` + `drop=true`: only the newest frame is kept
    fn configure_app_sink(app_sink: &gst_app::AppSink) {
        app_sink.set_property("emit-signals", true);
        app_sink.set_property("sync", true);
        app_sink.set_property("max-buffers", 1u32);
        app_sink.set_property("drop", true);
    }

    fn setup_frame_callback(app_sink: &gst_app::AppSink, frames: FrameSlot) {
        app_sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let caps = sample.caps().ok_or(gst::FlowError::Error)?;
                    let info = gst_video::VideoInfo::from_caps(caps)
                        .map_err(|_| gst::FlowError::NotNegotiated)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                    let data =
                        pack_rows(map.as_slice(), info.width(), info.height(), info.stride()[0])
                            .ok_or(gst::FlowError::Error)?;

                    frames.push(VideoFrame {
                        width: info.width(),
                        height: info.height(),
                        data,
                    });
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
    }

    /// Copy padded rows into a tightly packed 4-byte-per-pixel buffer
    fn pack_rows(data: &[u8], width: u32, height: u32, stride: i32) -> Option<Vec<u8>> {
        let row = width as usize * 4;
        let stride = usize::try_from(stride).ok()?;
        if stride == row {
            return data.get(..row * height as usize).map(<[u8]>::to_vec);
        }

        let mut packed = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            packed.extend_from_slice(data.get(y * stride..y * stride + row)?);
        }
        Some(packed)
    }

}

#[cfg(not(feature = "video"))]
mod stub {
    use anyhow::Result;
    use std::path::Path;

    use crate::playback::Renderer;
    use crate::playback::frames::FrameSlot;

    /// Stub VideoRenderer when the video feature is disabled
    pub struct VideoRenderer;

    impl VideoRenderer {
        pub fn load(_path: &Path) -> Result<Self> {
            anyhow::bail!("Video support not compiled in")
        }
    }

    impl Renderer for VideoRenderer {
        fn play(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_muted(&mut self, _muted: bool) -> Result<()> {
            Ok(())
        }

        fn set_rate(&mut self, _rate: f64) -> Result<()> {
            Ok(())
        }

        fn set_bitrate_cap(&mut self, _cap: Option<u64>) -> Result<()> {
            Ok(())
        }

        fn frames(&self) -> Option<FrameSlot> {
            None
        }

        fn stop(&mut self) {}
    }
}

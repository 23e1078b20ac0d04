//! Periodic frame statistics for the live video

use std::time::Instant;

use super::frames::FrameSlot;

/// Tracks playback statistics of one frame slot between log lines
pub struct VideoStats {
    frames: FrameSlot,
    last_rendered: u64,
    last_dropped: u64,
    last_stats_log: Instant,
}

/// Counters for one interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSample {
    pub rendered: u64,
    pub dropped: u64,
    pub fps: f64,
}

impl StatsSample {
    /// Dropped share of all frames as a percentage
    pub fn drop_rate(&self) -> f64 {
        drop_rate(self.rendered, self.dropped)
    }
}

pub fn drop_rate(rendered: u64, dropped: u64) -> f64 {
    let total = rendered + dropped;
    if total == 0 {
        0.0
    } else {
        (dropped as f64 / total as f64) * 100.0
    }
}

impl VideoStats {
    pub fn new(frames: FrameSlot) -> Self {
        Self {
            last_rendered: frames.frames_rendered(),
            last_dropped: frames.frames_dropped(),
            frames,
            last_stats_log: Instant::now(),
        }
    }

    /// Counters since the previous sample
    pub fn sample(&mut self) -> StatsSample {
        let rendered_total = self.frames.frames_rendered();
        let dropped_total = self.frames.frames_dropped();
        let elapsed = self.last_stats_log.elapsed().as_secs_f64();

        let rendered = rendered_total.saturating_sub(self.last_rendered);
        let dropped = dropped_total.saturating_sub(self.last_dropped);

        self.last_rendered = rendered_total;
        self.last_dropped = dropped_total;
        self.last_stats_log = Instant::now();

        StatsSample {
            rendered,
            dropped,
            fps: if elapsed > 0.0 {
                rendered as f64 / elapsed
            } else {
                0.0
            },
        }
    }

    pub fn log(&mut self) {
        let sample = self.sample();
        log::info!(
            "Video stats ({:.2} fps): {} rendered, {} dropped of {} total ({:.1}% drop rate)",
            sample.fps,
            sample.rendered,
            sample.dropped,
            sample.rendered + sample.dropped,
            sample.drop_rate()
        );
    }
}

//! Hand-off of decoded video frames from the decoder to the window.
//!
//! The decoder overwrites a single slot; the window picks up the newest
//! frame whenever it gets to it. A frame replaced before it was consumed
//! counts as dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One decoded frame, BGRA (ARGB8888 in little-endian memory order), tightly packed
#[derive(Debug)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct Slot {
    current: Mutex<Option<Arc<VideoFrame>>>,
    new_frame_available: AtomicBool,
    frames_rendered: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Shared single-frame slot; clones refer to the same slot
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Slot>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a decoded frame (decoder side)
    pub fn push(&self, frame: VideoFrame) {
        if let Ok(mut current) = self.inner.current.lock() {
            if self.inner.new_frame_available.load(Ordering::Relaxed) {
                self.inner.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("Video frame dropped (previous frame not consumed in time)");
            }
            *current = Some(Arc::new(frame));
            self.inner.new_frame_available.store(true, Ordering::Release);
        }
    }

    /// The newest frame if it has not been taken yet (window side)
    pub fn take_new(&self) -> Option<Arc<VideoFrame>> {
        if !self.inner.new_frame_available.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.latest()
    }

    /// The newest frame, consumed or not
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.inner.current.lock().ok()?.clone()
    }

    pub fn has_new_frame(&self) -> bool {
        self.inner.new_frame_available.load(Ordering::Acquire)
    }

    pub fn mark_rendered(&self) {
        self.inner.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_rendered(&self) -> u64 {
        self.inner.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.inner.frames_dropped.load(Ordering::Relaxed)
    }

    /// Whether both handles point at the same slot
    pub fn same_slot(&self, other: &FrameSlot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> VideoFrame {
        VideoFrame {
            width: 1,
            height: 1,
            data: vec![value; 4],
        }
    }

    #[test]
    fn test_take_new_consumes_once() {
        let slot = FrameSlot::new();
        assert!(slot.take_new().is_none());

        slot.push(frame(7));
        assert!(slot.has_new_frame());
        assert_eq!(slot.take_new().unwrap().data[0], 7);
        assert!(slot.take_new().is_none());
        assert_eq!(slot.latest().unwrap().data[0], 7);
    }

    #[test]
    fn test_overwritten_frame_counts_as_dropped() {
        let slot = FrameSlot::new();
        let window_side = slot.clone();

        slot.push(frame(1));
        slot.push(frame(2));
        assert_eq!(slot.frames_dropped(), 1);

        assert_eq!(window_side.take_new().unwrap().data[0], 2);
        slot.push(frame(3));
        assert_eq!(slot.frames_dropped(), 1);
        assert!(slot.same_slot(&window_side));
        assert!(!slot.same_slot(&FrameSlot::new()));
    }
}

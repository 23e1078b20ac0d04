//! Wayland background window
//!
//! One wlr-layer-shell surface per output, on the `background` layer. Each
//! surface shows, in order of preference:
//! - the newest video frame, when playback is attached to that display
//! - the display's still image
//! - nothing (fully transparent)
//!
//! Submodules:
//! - window: connection setup and the event loop
//! - surface: per-output surface and buffer management
//! - handlers: Wayland protocol event handlers

mod handlers;
mod surface;
mod window;

use anyhow::{Result, anyhow};
use common::{DisplayInfo, ScaleMode};
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::playback::Desktop;
use crate::playback::frames::FrameSlot;

pub use window::run;

/// Requests from the rest of the daemon to the window thread
pub enum WindowCommand {
    AttachVideo { display: u32, frames: FrameSlot },
    DetachVideo,
    SetScaling(ScaleMode),
    /// `display: None` targets every output, `image: None` clears
    SetStill {
        display: Option<u32>,
        image: Option<Arc<RgbaImage>>,
    },
}

impl std::fmt::Debug for WindowCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AttachVideo { display, .. } => write!(f, "AttachVideo({})", display),
            Self::DetachVideo => write!(f, "DetachVideo"),
            Self::SetScaling(mode) => write!(f, "SetScaling({:?})", mode),
            Self::SetStill { display, image } => {
                write!(f, "SetStill({:?}, set={})", display, image.is_some())
            }
        }
    }
}

/// Cloneable handle that playback and the setter use to reach the window
#[derive(Clone)]
pub struct WindowHandle {
    tx: mpsc::UnboundedSender<WindowCommand>,
    displays: watch::Receiver<Vec<DisplayInfo>>,
}

impl WindowHandle {
    pub fn new(
        tx: mpsc::UnboundedSender<WindowCommand>,
        displays: watch::Receiver<Vec<DisplayInfo>>,
    ) -> Self {
        Self { tx, displays }
    }

    fn send(&self, command: WindowCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|e| anyhow!("Wallpaper window is gone: {:?}", e.0))
    }
}

impl Desktop for WindowHandle {
    fn displays(&self) -> Vec<DisplayInfo> {
        self.displays.borrow().clone()
    }

    fn attach_video(&self, display: u32, frames: FrameSlot) -> Result<()> {
        self.send(WindowCommand::AttachVideo { display, frames })
    }

    fn detach_video(&self) -> Result<()> {
        self.send(WindowCommand::DetachVideo)
    }

    fn set_scaling(&self, scaling: ScaleMode) -> Result<()> {
        self.send(WindowCommand::SetScaling(scaling))
    }

    fn set_still(&self, display: Option<u32>, image: Option<Arc<RgbaImage>>) -> Result<()> {
        self.send(WindowCommand::SetStill { display, image })
    }
}

/// Surfaces that need to be drawn again after a command
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Redraw {
    None,
    Displays(Vec<u32>),
    All,
}

/// What the window shows, independent of any Wayland object
#[derive(Default)]
pub(crate) struct Scene {
    pub scaling: ScaleMode,
    pub stills: HashMap<u32, Arc<RgbaImage>>,
    pub video: Option<(u32, FrameSlot)>,
}

impl Scene {
    /// Frames attached to `display`, if video plays there
    pub fn video_on(&self, display: u32) -> Option<&FrameSlot> {
        match &self.video {
            Some((id, frames)) if *id == display => Some(frames),
            _ => None,
        }
    }

    /// Apply a command; `outputs` are the ids of the live surfaces
    pub fn apply(&mut self, command: WindowCommand, outputs: &[u32]) -> Redraw {
        match command {
            WindowCommand::AttachVideo { display, frames } => {
                let previous = self.video.replace((display, frames)).map(|(id, _)| id);
                let mut ids = vec![display];
                if let Some(id) = previous
                    && id != display
                {
                    ids.push(id);
                }
                Redraw::Displays(ids)
            }
            WindowCommand::DetachVideo => match self.video.take() {
                Some((id, _)) => Redraw::Displays(vec![id]),
                None => Redraw::None,
            },
            WindowCommand::SetScaling(scaling) => {
                if self.scaling == scaling {
                    return Redraw::None;
                }
                self.scaling = scaling;
                Redraw::All
            }
            WindowCommand::SetStill {
                display: Some(id),
                image,
            } => {
                match image {
                    Some(image) => self.stills.insert(id, image),
                    None => self.stills.remove(&id),
                };
                Redraw::Displays(vec![id])
            }
            WindowCommand::SetStill {
                display: None,
                image: Some(image),
            } => {
                for id in outputs {
                    self.stills.insert(*id, image.clone());
                }
                Redraw::All
            }
            WindowCommand::SetStill {
                display: None,
                image: None,
            } => {
                self.stills.clear();
                Redraw::All
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::testing::display;
    use image::Rgba;

    fn image() -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255])))
    }

    #[test]
    fn test_attach_and_detach_video() {
        let mut scene = Scene::default();
        let frames = FrameSlot::new();

        let redraw = scene.apply(
            WindowCommand::AttachVideo {
                display: 1,
                frames: frames.clone(),
            },
            &[1, 2],
        );
        assert_eq!(redraw, Redraw::Displays(vec![1]));
        assert!(scene.video_on(1).is_some());
        assert!(scene.video_on(2).is_none());

        // moving playback redraws both displays
        let redraw = scene.apply(WindowCommand::AttachVideo { display: 2, frames }, &[1, 2]);
        assert_eq!(redraw, Redraw::Displays(vec![2, 1]));
        assert!(scene.video_on(1).is_none());

        assert_eq!(
            scene.apply(WindowCommand::DetachVideo, &[1, 2]),
            Redraw::Displays(vec![2])
        );
        assert_eq!(scene.apply(WindowCommand::DetachVideo, &[1, 2]), Redraw::None);
    }

    #[test]
    fn test_stills() {
        let mut scene = Scene::default();

        scene.apply(
            WindowCommand::SetStill {
                display: None,
                image: Some(image()),
            },
            &[1, 2],
        );
        assert_eq!(scene.stills.len(), 2);

        let redraw = scene.apply(
            WindowCommand::SetStill {
                display: Some(2),
                image: None,
            },
            &[1, 2],
        );
        assert_eq!(redraw, Redraw::Displays(vec![2]));
        assert!(scene.stills.contains_key(&1));
        assert!(!scene.stills.contains_key(&2));

        scene.apply(
            WindowCommand::SetStill {
                display: None,
                image: None,
            },
            &[1, 2],
        );
        assert!(scene.stills.is_empty());
    }

    #[test]
    fn test_scaling_redraws_only_on_change() {
        let mut scene = Scene::default();
        assert_eq!(
            scene.apply(WindowCommand::SetScaling(ScaleMode::Fill), &[1]),
            Redraw::None
        );
        assert_eq!(
            scene.apply(WindowCommand::SetScaling(ScaleMode::Fit), &[1]),
            Redraw::All
        );
        assert_eq!(scene.scaling, ScaleMode::Fit);
    }

    #[test]
    fn test_handle_forwards_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (displays_tx, displays_rx) = watch::channel(Vec::new());
        let handle = WindowHandle::new(tx, displays_rx);

        assert!(handle.displays().is_empty());
        displays_tx.send_replace(vec![display(7, "DP-1", true)]);
        assert_eq!(handle.displays()[0].id, 7);

        handle.attach_video(7, FrameSlot::new()).unwrap();
        handle.set_scaling(ScaleMode::Stretch).unwrap();
        handle.set_still(None, None).unwrap();
        handle.detach_video().unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            WindowCommand::AttachVideo { display: 7, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            WindowCommand::SetScaling(ScaleMode::Stretch)
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            WindowCommand::SetStill {
                display: None,
                image: None
            }
        ));
        assert!(matches!(rx.try_recv().unwrap(), WindowCommand::DetachVideo));

        drop(rx);
        assert!(handle.detach_video().is_err());
    }
}

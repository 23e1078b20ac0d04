use anyhow::Result;
use common::{DisplayInfo, ScaleMode};
use image::RgbaImage;
use smithay_client_toolkit::{
    compositor::{CompositorState, Region},
    output::OutputInfo,
    shell::{
        WaylandSurface,
        wlr_layer::{Anchor, KeyboardInteractivity, Layer, LayerShell, LayerSurface},
    },
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use wayland_client::{QueueHandle, protocol::wl_output, protocol::wl_shm};

use super::Scene;
use super::window::WallpaperWindow;
use crate::buffer::ShmBuffer;
use crate::commit_buffer;
use crate::playback::frames::VideoFrame;
use crate::scaling::{STILL_FILTER, rgba_to_argb8888, scale_image, scale_frame};

/// Buffers per surface; more than one so a frame can be drawn while the
/// compositor still reads the previous one
const MAX_BUFFERS: usize = 3;

/// A still already scaled to the surface, in ARGB8888
struct ScaledStill {
    source: Arc<RgbaImage>,
    scaling: ScaleMode,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ScaledStill {
    fn matches(&self, source: &Arc<RgbaImage>, scaling: ScaleMode, width: u32, height: u32) -> bool {
        Arc::ptr_eq(&self.source, source)
            && self.scaling == scaling
            && (self.width, self.height) == (width, height)
    }
}

/// Background surface of one output
pub(super) struct OutputSurface {
    pub output: wl_output::WlOutput,
    /// Display id, see [`display_id`]
    pub id: u32,
    pub layer: LayerSurface,
    pub width: u32,
    pub height: u32,
    pub configured: bool,
    buffers: Vec<ShmBuffer>,
    still: Option<ScaledStill>,
}

impl OutputSurface {
    /// Create the background layer surface for `output`
    pub fn create(
        compositor: &CompositorState,
        layer_shell: &LayerShell,
        output: wl_output::WlOutput,
        id: u32,
        qh: &QueueHandle<WallpaperWindow>,
    ) -> Result<Self> {
        let surface = compositor.create_surface(qh);

        let layer = layer_shell.create_layer_surface(
            qh,
            surface,
            Layer::Background,
            Some("wallpaper"),
            Some(&output),
        );

        layer.set_anchor(Anchor::all());
        layer.set_exclusive_zone(-1);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);

        // Pointer input goes through to whatever is below
        let region = Region::new(compositor)?;
        layer.wl_surface().set_input_region(Some(region.wl_region()));

        layer.commit();

        Ok(Self {
            output,
            id,
            layer,
            width: 0,
            height: 0,
            configured: false,
            buffers: Vec::new(),
            still: None,
        })
    }

    /// Draw whatever the scene holds for this output
    pub fn render(
        &mut self,
        scene: &Scene,
        shm: &wl_shm::WlShm,
        qh: &QueueHandle<WallpaperWindow>,
    ) -> Result<()> {
        if !self.configured || self.width == 0 || self.height == 0 {
            return Ok(());
        }

        if let Some(frames) = scene.video_on(self.id)
            && let Some(frame) = frames.latest()
        {
            self.present_frame(&frame, scene.scaling, shm, qh)?;
            return Ok(());
        }

        match scene.stills.get(&self.id) {
            Some(image) => self.present_still(image, scene.scaling, shm, qh),
            None => {
                self.still = None;
                self.draw(None, shm, qh).map(|_| ())
            }
        }
    }

    /// Scale and show one video frame; `false` when no buffer was free
    pub fn present_frame(
        &mut self,
        frame: &VideoFrame,
        scaling: ScaleMode,
        shm: &wl_shm::WlShm,
        qh: &QueueHandle<WallpaperWindow>,
    ) -> Result<bool> {
        if !self.configured || self.width == 0 || self.height == 0 {
            return Ok(false);
        }

        let data = scale_frame(
            &frame.data,
            frame.width,
            frame.height,
            self.width,
            self.height,
            scaling,
        )?;
        self.draw(Some(&data), shm, qh)
    }

    fn present_still(
        &mut self,
        image: &Arc<RgbaImage>,
        scaling: ScaleMode,
        shm: &wl_shm::WlShm,
        qh: &QueueHandle<WallpaperWindow>,
    ) -> Result<()> {
        let still = match self.still.take() {
            Some(still) if still.matches(image, scaling, self.width, self.height) => still,
            _ => {
                let scaled = scale_image(image, self.width, self.height, scaling, STILL_FILTER)?;
                log::debug!(
                    "Scaled still {}x{} -> {}x{} for output {}",
                    image.width(),
                    image.height(),
                    self.width,
                    self.height,
                    self.id
                );
                ScaledStill {
                    source: image.clone(),
                    scaling,
                    width: self.width,
                    height: self.height,
                    data: rgba_to_argb8888(&scaled),
                }
            }
        };

        let result = self.draw(Some(&still.data), shm, qh);
        self.still = Some(still);
        result.map(|_| ())
    }

    /// Copy `data` (or transparent pixels) into a free buffer and commit it
    fn draw(
        &mut self,
        data: Option<&[u8]>,
        shm: &wl_shm::WlShm,
        qh: &QueueHandle<WallpaperWindow>,
    ) -> Result<bool> {
        let Some(index) = self.acquire_buffer(shm, qh)? else {
            log::trace!("No free buffer for output {}, skipping", self.id);
            return Ok(false);
        };

        let buffer = &mut self.buffers[index];
        match data {
            Some(data) => buffer.write_image_data(data)?,
            None => buffer.fill_color(0, 0, 0, 0),
        }
        buffer.mark_busy();
        commit_buffer!(self.layer, buffer, self.width, self.height);
        Ok(true)
    }

    /// Index of a released buffer of the current size, creating one if allowed
    fn acquire_buffer(
        &mut self,
        shm: &wl_shm::WlShm,
        qh: &QueueHandle<WallpaperWindow>,
    ) -> Result<Option<usize>> {
        let (width, height) = (self.width, self.height);
        self.buffers
            .retain(|b| (b.width(), b.height()) == (width, height) || !b.is_released());

        if let Some(index) = self.buffers.iter().position(|b| {
            b.is_released() && (b.width(), b.height()) == (width, height)
        }) {
            return Ok(Some(index));
        }

        if self.buffers.len() >= MAX_BUFFERS {
            return Ok(None);
        }

        self.buffers.push(ShmBuffer::new(shm, width, height, qh)?);
        Ok(Some(self.buffers.len() - 1))
    }

    pub fn is_layer(&self, layer: &LayerSurface) -> bool {
        &self.layer == layer
    }
}

/// Display id derived from the connector name.
///
/// Global names change on replug and compositor restart; connector names do
/// not, so a saved display choice keeps pointing at the same monitor. 0 is
/// reserved for "primary".
pub(super) fn display_id(connector: &str) -> u32 {
    let digest = Sha256::digest(connector.as_bytes());
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    id.max(1)
}

/// Describe an output for IPC clients
pub(super) fn display_info(id: u32, info: Option<&OutputInfo>, primary: bool) -> DisplayInfo {
    let (width, height) = info
        .and_then(|i| {
            i.logical_size.or_else(|| {
                i.modes
                    .iter()
                    .find(|m| m.current)
                    .map(|m| m.dimensions)
            })
        })
        .unwrap_or((0, 0));
    let (x, y) = info.and_then(|i| i.logical_position).unwrap_or((0, 0));

    DisplayInfo {
        id,
        name: info
            .and_then(|i| i.name.clone())
            .unwrap_or_else(|| format!("output-{}", id)),
        width: width.max(0) as u32,
        height: height.max(0) as u32,
        x,
        y,
        scale: info.map_or(1, |i| i.scale_factor),
        primary,
    }
}

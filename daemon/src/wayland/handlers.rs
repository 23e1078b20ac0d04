use smithay_client_toolkit::{
    compositor::CompositorHandler,
    delegate_compositor, delegate_layer, delegate_output, delegate_registry, delegate_shm,
    output::{OutputHandler, OutputState},
    registry::ProvidesRegistryState,
    registry_handlers,
    shell::wlr_layer::{LayerShellHandler, LayerSurface, LayerSurfaceConfigure},
    shm::{Shm, ShmHandler},
};
use std::sync::atomic::Ordering;
use wayland_client::{
    Connection, Dispatch, Proxy, QueueHandle,
    protocol::{wl_buffer, wl_output, wl_shm_pool, wl_surface},
};

use super::surface::{OutputSurface, display_id};
use super::window::WallpaperWindow;
use crate::buffer::BusyFlag;

impl CompositorHandler for WallpaperWindow {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_factor: i32,
    ) {
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }
}

impl OutputHandler for WallpaperWindow {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        let info = self.output_state.info(&output);
        let id = info
            .as_ref()
            .and_then(|i| i.name.as_deref())
            .map_or_else(|| output.id().protocol_id(), display_id);
        log::info!(
            "New output {} ({})",
            id,
            info.and_then(|i| i.name).unwrap_or_default()
        );

        match OutputSurface::create(&self.compositor_state, &self.layer_shell, output, id, qh) {
            Ok(surface) => {
                self.surfaces.push(surface);
                self.publish_displays();
            }
            Err(e) => log::error!("Failed to create layer surface: {}", e),
        }
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        if let Some(info) = self.output_state.info(&output) {
            log::info!(
                "Output updated: {:?} - {}x{} @ {}",
                info.name,
                info.logical_size.map(|(w, _)| w).unwrap_or(0),
                info.logical_size.map(|(_, h)| h).unwrap_or(0),
                info.scale_factor,
            );
        }
        self.publish_displays();
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        log::info!("Output destroyed");
        self.surfaces.retain(|s| s.output != output);
        self.publish_displays();
    }
}

impl LayerShellHandler for WallpaperWindow {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, layer: &LayerSurface) {
        log::info!("Layer surface closed by compositor");
        self.surfaces.retain(|s| !s.is_layer(layer));
        self.publish_displays();
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        let Some(index) = self.surfaces.iter().position(|s| s.is_layer(layer)) else {
            return;
        };

        let (width, height) = configure.new_size;
        let surface = &mut self.surfaces[index];
        log::info!(
            "Layer surface of output {} configured: {}x{}",
            surface.id,
            width,
            height
        );
        surface.width = width;
        surface.height = height;
        surface.configured = true;

        self.render_surface(index, qh);
    }
}

impl ProvidesRegistryState for WallpaperWindow {
    fn registry(&mut self) -> &mut smithay_client_toolkit::registry::RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState];
}

impl ShmHandler for WallpaperWindow {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm
    }
}

// Buffers are reused once the compositor lets go of them
impl Dispatch<wl_buffer::WlBuffer, BusyFlag> for WallpaperWindow {
    fn event(
        _state: &mut Self,
        _proxy: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        busy: &BusyFlag,
        _conn: &Connection,
        _qhandle: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            busy.store(false, Ordering::Release);
        }
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, ()> for WallpaperWindow {
    fn event(
        _state: &mut Self,
        _proxy: &wl_shm_pool::WlShmPool,
        _event: wl_shm_pool::Event,
        _data: &(),
        _conn: &Connection,
        _qhandle: &QueueHandle<Self>,
    ) {
    }
}

delegate_compositor!(WallpaperWindow);
delegate_output!(WallpaperWindow);
delegate_layer!(WallpaperWindow);
delegate_shm!(WallpaperWindow);
delegate_registry!(WallpaperWindow);

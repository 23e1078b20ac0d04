use anyhow::Result;
use common::DisplayInfo;
use smithay_client_toolkit::{
    compositor::CompositorState, output::OutputState, registry::RegistryState,
    shell::wlr_layer::LayerShell, shm::Shm,
};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Mutex, mpsc, watch};
use wayland_client::{
    Connection, EventQueue, QueueHandle, backend::WaylandError, globals::registry_queue_init,
};

use super::surface::{OutputSurface, display_info};
use super::{Redraw, Scene, WindowCommand};
use crate::DaemonState;
use crate::log_and_continue;

/// Poll interval while a video is attached
const VIDEO_POLL: Duration = Duration::from_millis(4);

/// Poll interval otherwise
const IDLE_POLL: Duration = Duration::from_millis(16);

/// State of the wallpaper window thread
pub(crate) struct WallpaperWindow {
    pub(super) registry_state: RegistryState,
    pub(super) compositor_state: CompositorState,
    pub(super) layer_shell: LayerShell,
    pub(super) output_state: OutputState,
    pub(super) shm: Shm,
    pub(super) surfaces: Vec<OutputSurface>,
    pub(super) scene: Scene,
    displays_tx: watch::Sender<Vec<DisplayInfo>>,
    state: Arc<Mutex<DaemonState>>,
}

/// Main entry point of the wallpaper window
pub async fn run(
    state: Arc<Mutex<DaemonState>>,
    window_rx: mpsc::UnboundedReceiver<WindowCommand>,
    displays_tx: watch::Sender<Vec<DisplayInfo>>,
) -> Result<()> {
    log::info!("Connecting to Wayland compositor...");

    // Run Wayland in a blocking task since it's synchronous
    tokio::task::spawn_blocking(move || run_blocking(state, window_rx, displays_tx)).await?
}

fn run_blocking(
    state: Arc<Mutex<DaemonState>>,
    mut window_rx: mpsc::UnboundedReceiver<WindowCommand>,
    displays_tx: watch::Sender<Vec<DisplayInfo>>,
) -> Result<()> {
    let conn = Connection::connect_to_env()?;
    let (globals, mut event_queue) = registry_queue_init(&conn)?;
    let qh = event_queue.handle();

    let mut window = WallpaperWindow {
        registry_state: RegistryState::new(&globals),
        compositor_state: CompositorState::bind(&globals, &qh)?,
        layer_shell: LayerShell::bind(&globals, &qh)?,
        output_state: OutputState::new(&globals, &qh),
        shm: Shm::bind(&globals, &qh)?,
        surfaces: Vec::new(),
        scene: Scene::default(),
        displays_tx,
        state,
    };

    log::info!("Connected to Wayland compositor");

    // new_output creates the surfaces during this roundtrip
    event_queue.roundtrip(&mut window)?;
    log::info!("Found {} output(s)", window.surfaces.len());

    // Second roundtrip delivers the initial configures
    event_queue.roundtrip(&mut window)?;
    log::info!(
        "{} output(s) configured",
        window.surfaces.iter().filter(|s| s.configured).count()
    );
    window.publish_displays();

    let result = event_loop(&mut window, &mut event_queue, &mut window_rx, &qh);
    window.displays_tx.send_replace(Vec::new());
    result
}

fn event_loop(
    window: &mut WallpaperWindow,
    event_queue: &mut EventQueue<WallpaperWindow>,
    window_rx: &mut mpsc::UnboundedReceiver<WindowCommand>,
    qh: &QueueHandle<WallpaperWindow>,
) -> Result<()> {
    loop {
        read_events(event_queue)?;
        event_queue.dispatch_pending(window)?;

        loop {
            match window_rx.try_recv() {
                Ok(command) => {
                    log::debug!("Window command: {:?}", command);
                    window.apply_command(command, qh);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::info!("Window command channel closed");
                    return Ok(());
                }
            }
        }

        log_and_continue!(window.present_video(qh), "present video frame");

        event_queue.flush()?;

        if let Ok(guard) = window.state.try_lock()
            && guard.should_exit
        {
            log::info!("Exiting Wayland event loop");
            return Ok(());
        }

        std::thread::sleep(if window.scene.video.is_some() {
            VIDEO_POLL
        } else {
            IDLE_POLL
        });
    }
}

/// Read whatever the compositor has sent without blocking
fn read_events(event_queue: &EventQueue<WallpaperWindow>) -> Result<()> {
    // None: events are already queued for dispatch
    let Some(guard) = event_queue.prepare_read() else {
        return Ok(());
    };

    let mut fds = [libc::pollfd {
        fd: guard.connection_fd().as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    }];
    let ready = unsafe { libc::poll(fds.as_mut_ptr(), 1, 0) };
    if ready < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(());
        }
        return Err(err.into());
    }
    if ready == 0 {
        return Ok(());
    }

    match guard.read() {
        Ok(_) => Ok(()),
        Err(WaylandError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl WallpaperWindow {
    /// Push the current output list to IPC clients
    pub(super) fn publish_displays(&self) {
        let displays: Vec<DisplayInfo> = self
            .surfaces
            .iter()
            .enumerate()
            .map(|(index, surface)| {
                let info = self.output_state.info(&surface.output);
                display_info(surface.id, info.as_ref(), index == 0)
            })
            .collect();

        log::debug!("Publishing {} display(s)", displays.len());
        self.displays_tx.send_replace(displays);
    }

    pub(super) fn render_surface(&mut self, index: usize, qh: &QueueHandle<Self>) {
        let Self {
            surfaces,
            scene,
            shm,
            ..
        } = self;
        if let Some(surface) = surfaces.get_mut(index) {
            log_and_continue!(
                surface.render(scene, shm.wl_shm(), qh),
                format!("render output {}", surface.id)
            );
        }
    }

    fn apply_command(&mut self, command: WindowCommand, qh: &QueueHandle<Self>) {
        let outputs: Vec<u32> = self.surfaces.iter().map(|s| s.id).collect();

        match self.scene.apply(command, &outputs) {
            Redraw::None => {}
            Redraw::All => {
                for index in 0..self.surfaces.len() {
                    self.render_surface(index, qh);
                }
            }
            Redraw::Displays(ids) => {
                for id in ids {
                    if let Some(index) = self.surfaces.iter().position(|s| s.id == id) {
                        self.render_surface(index, qh);
                    }
                }
            }
        }
    }

    /// Show the newest decoded frame, if one arrived since the last call
    fn present_video(&mut self, qh: &QueueHandle<Self>) -> Result<()> {
        let Some((display, frames)) = &self.scene.video else {
            return Ok(());
        };
        let Some(frame) = frames.take_new() else {
            return Ok(());
        };
        let Some(surface) = self.surfaces.iter_mut().find(|s| s.id == *display) else {
            return Ok(());
        };

        if surface.present_frame(&frame, self.scene.scaling, self.shm.wl_shm(), qh)? {
            frames.mark_rendered();
        }
        Ok(())
    }
}

mod buffer;
mod config;
mod content;
mod ipc_server;
mod library;
mod macros;
mod media;
mod playback;
mod prefs;
mod resource_monitor;
mod scaling;
mod setter;
mod settings;
mod wayland;

use anyhow::Result;
use common::PlaybackStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};

use content::ContentBridge;
use library::{LibraryOptions, LibraryPaths, VideoLibrary};
use media::MediaProbe;
use playback::controller::PlaybackController;
use playback::{DefaultRendererFactory, Desktop};
use prefs::PreferenceStore;
use setter::WallpaperSetter;
use settings::SettingsStore;
use wayland::WindowHandle;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config::Config::default_config_path()?;
    let loaded = config::Config::load_from_path(&config_path);
    let log_level = loaded
        .as_ref()
        .map(|cfg| cfg.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("Starting loopwall v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Looking for config at: {}", config_path.display());

    let config = match loaded {
        Ok(cfg) => {
            log::info!("✓ Configuration loaded");
            log::info!("  General settings:");
            log::info!("    - Log level: {}", cfg.general.log_level);
            log::info!("  Library settings:");
            log::info!("    - Page size: {}", cfg.library.page_size);
            log::info!("    - Max videos: {}", cfg.library.max_videos);
            match cfg.bundled_dir() {
                Some(dir) => log::info!("    - Bundled videos: {}", dir.display()),
                None => log::info!("    - Bundled videos: not configured"),
            }
            log::info!("  Web content:");
            log::info!("    - Browser: {}", cfg.web.browser_command.join(" "));
            log::info!(
                "  Still fallback: {}",
                if cfg.setter.still_fallback { "yes" } else { "no" }
            );
            cfg
        }
        Err(e) => {
            log::warn!("Failed to load config: {:#}. Using defaults.", e);
            log::info!("To create a config file:");
            if let Some(dir) = config_path.parent() {
                log::info!("  mkdir -p {}", dir.display());
            }
            log::info!("  cp config.toml.example {}", config_path.display());
            config::Config::default()
        }
    };

    // Storage
    let paths = LibraryPaths::new(config.data_dir()?);
    log_and_continue!(paths.ensure(), "create data directories");
    log::info!("Data directory: {}", paths.root().display());

    let prefs = Arc::new(PreferenceStore::open(paths.preferences_file()));
    let settings = Arc::new(SettingsStore::load(prefs.clone()));

    let bundled_dir = config.bundled_dir();
    let (library, pending) = VideoLibrary::load(
        paths,
        prefs,
        LibraryOptions::from(&config.library),
        bundled_dir.as_deref(),
        &config.library.extensions,
    );
    log::info!(
        "Library ready: {} video(s), {} extraction(s) queued",
        library.len(),
        pending.len()
    );

    let state = Arc::new(Mutex::new(DaemonState::new(library)));
    let probe = media::default_probe();
    {
        let mut guard = state.lock().await;
        library::spawn_all(&state, &probe, &mut guard.library, pending);
    }

    // Wallpaper window
    let (window_tx, window_rx) = mpsc::unbounded_channel();
    let (displays_tx, displays_rx) = watch::channel(Vec::new());
    let desktop: Arc<dyn Desktop> = Arc::new(WindowHandle::new(window_tx, displays_rx.clone()));

    // Playback
    let content = Arc::new(ContentBridge::new());
    let controller = PlaybackController::new(
        desktop.clone(),
        Arc::new(DefaultRendererFactory::new(
            config.web.browser_command.clone(),
        )),
        settings.snapshot(),
    );
    let playback = controller.subscribe();
    let stats_interval = Duration::from_secs(config.playback.stats_interval_secs.max(1));
    tokio::spawn(controller.run(
        content.subscribe(),
        settings.subscribe(),
        displays_rx,
        stats_interval,
    ));

    let services = Arc::new(Services {
        config,
        state: state.clone(),
        settings,
        content,
        setter: Arc::new(WallpaperSetter::new(desktop.clone())),
        desktop,
        probe,
        playback,
    });

    // Start IPC server
    let ipc_services = services.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(ipc_services).await {
            log::error!("IPC server error: {}", e);
        }
    });

    // Start Wayland event loop
    let wayland_state = state.clone();
    let wayland_handle = tokio::spawn(async move {
        if let Err(e) = wayland::run(wayland_state, window_rx, displays_tx).await {
            log::error!("Wallpaper window error: {:#}", e);
        }
    });

    // Set up signal handlers
    let signal_state = state.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    log::error!("Failed to set up signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = ipc_handle => {
            log::info!("IPC server stopped");
        }
        _ = wayland_handle => {
            log::info!("Wallpaper window stopped");
        }
    }

    {
        let mut state = state.lock().await;
        state.should_exit = true;
        state.library.cancel_jobs();
    }
    services.content.clear();

    log::info!("Daemon shutting down");
    Ok(())
}

/// Long-lived services shared by the IPC handlers
pub struct Services {
    pub config: config::Config,
    pub state: Arc<Mutex<DaemonState>>,
    pub settings: Arc<SettingsStore>,
    pub content: Arc<ContentBridge>,
    pub setter: Arc<WallpaperSetter>,
    pub desktop: Arc<dyn Desktop>,
    pub probe: Arc<dyn MediaProbe>,
    pub playback: watch::Receiver<PlaybackStatus>,
}

/// Shared daemon state
pub struct DaemonState {
    pub should_exit: bool,
    pub start_time: std::time::Instant,
    pub library: VideoLibrary,
}

impl DaemonState {
    pub fn new(library: VideoLibrary) -> Self {
        Self {
            should_exit: false,
            start_time: std::time::Instant::now(),
            library,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

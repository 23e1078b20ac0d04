use anyhow::Result;
use common::{
    Command, ContentSource, DaemonStatus, Response, SettingsPatch, VideoEntry, WallpaperError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use crate::Services;
use crate::library::spawn_extraction;
use crate::media;
use crate::playback::web::{WebLocation, youtube_video_id};
use crate::setter::StillTarget;

/// Where the still shown while a video spins up is taken from
const STILL_FALLBACK_AT: Duration = Duration::from_secs(1);

pub async fn start(services: Arc<Services>) -> Result<()> {
    let socket_path = common::get_socket_path();

    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        // Check if we should exit
        if services.state.lock().await.should_exit {
            break;
        }

        // Accept connections with timeout
        let accept_result =
            tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let services = services.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, services).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => {
                // Timeout, continue loop to check exit condition
                continue;
            }
        }
    }

    // Clean up socket
    let _ = std::fs::remove_file(&socket_path);
    log::info!("IPC server stopped");
    Ok(())
}

async fn handle_client(stream: UnixStream, services: Arc<Services>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => handle_command(command, &services).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(WallpaperError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        // Send response
        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn handle_command(command: Command, services: &Arc<Services>) -> Response {
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Query => {
            let state = services.state.lock().await;
            Response::Status(DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: state.uptime_secs(),
                playback: services.playback.borrow().clone(),
                library_size: state.library.len(),
                selected: state.library.selected(),
            })
        }

        Command::Kill => {
            log::info!("Received kill command");
            services.content.clear();
            services.state.lock().await.should_exit = true;
            Response::Ok
        }

        Command::ListDisplays => Response::Displays(services.desktop.displays()),

        Command::AddVideo { path } => add_video(services, PathBuf::from(path)).await,

        Command::RemoveVideo { id } => {
            let removed = services.state.lock().await.library.remove(id);
            match removed {
                Some(entry) => {
                    // Nothing may keep playing a file that is gone
                    if services.content.current() == Some(ContentSource::video(entry.path())) {
                        services.content.clear();
                    }
                    Response::Ok
                }
                None => not_found(id),
            }
        }

        Command::SelectVideo { id } => {
            let mut state = services.state.lock().await;
            match state.library.select(id) {
                Some(_) => Response::Ok,
                None => not_found(id),
            }
        }

        Command::ToggleFavorite { id } => {
            let mut state = services.state.lock().await;
            match state.library.toggle_favorite(id) {
                Some(favorite) => {
                    log::info!("Video {} favorite: {}", id, favorite);
                    Response::Ok
                }
                None => not_found(id),
            }
        }

        Command::ListVideos { page } => {
            let mut state = services.state.lock().await;
            if let Some(page) = page {
                state.library.set_page(page);
            }
            Response::Page(state.library.page())
        }

        Command::NextPage => {
            let mut state = services.state.lock().await;
            state.library.next_page();
            Response::Page(state.library.page())
        }

        Command::PreviousPage => {
            let mut state = services.state.lock().await;
            state.library.previous_page();
            Response::Page(state.library.page())
        }

        Command::PlayVideo { id } => {
            let entry = services.state.lock().await.library.select(id).cloned();
            match entry {
                Some(entry) => play_video(services, entry),
                None => not_found(id),
            }
        }

        Command::SetContent { source } => match validate_source(&source) {
            Ok(()) => {
                services.content.set(source);
                Response::Ok
            }
            Err(e) => Response::Error(e),
        },

        Command::Stop => {
            services.content.clear();
            Response::Ok
        }

        Command::GetSettings => Response::Settings(services.settings.snapshot()),

        Command::UpdateSettings { patch } => update_settings(services, &patch),

        Command::SetStillWallpaper { path, display } => {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Response::Error(WallpaperError::NotFound(format!(
                    "Image file not found: {}",
                    path.display()
                )));
            }

            let setter = services.setter.clone();
            let target = StillTarget::from(display);
            let shown = tokio::task::spawn_blocking(move || setter.set_wallpaper(&path, target)).await;
            match shown {
                Ok(true) => Response::Ok,
                Ok(false) => Response::Error(WallpaperError::Image(
                    "Failed to set still wallpaper".to_string(),
                )),
                Err(e) => Response::Error(WallpaperError::Image(e.to_string())),
            }
        }

        Command::SnapshotFrame { path, at, display } => {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Response::Error(WallpaperError::NotFound(format!(
                    "Video file not found: {}",
                    path.display()
                )));
            }
            if !at.is_finite() || at < 0.0 {
                return Response::Error(WallpaperError::InvalidArgument(format!(
                    "Invalid timestamp: {}",
                    at
                )));
            }

            let snapshot = services
                .state
                .lock()
                .await
                .library
                .paths()
                .snapshot_file(display);
            let services = services.clone();
            let target = StillTarget::from(display);
            let result = tokio::task::spawn_blocking(move || -> Result<bool> {
                media::extract_frame_to(
                    services.probe.as_ref(),
                    &path,
                    Duration::from_secs_f64(at),
                    &snapshot,
                )?;
                Ok(services.setter.set_wallpaper(&snapshot, target))
            })
            .await;

            match result {
                Ok(Ok(true)) => Response::Ok,
                Ok(Ok(false)) => Response::Error(WallpaperError::Image(
                    "Failed to set extracted frame".to_string(),
                )),
                Ok(Err(e)) => Response::Error(WallpaperError::Video(format!("{:#}", e))),
                Err(e) => Response::Error(WallpaperError::Video(e.to_string())),
            }
        }
    }
}

fn not_found(id: Uuid) -> Response {
    Response::Error(WallpaperError::NotFound(format!("No video with id {}", id)))
}

/// Copy a picked file into the library and start its extraction
async fn add_video(services: &Arc<Services>, source: PathBuf) -> Response {
    if !source.is_file() {
        return Response::Error(WallpaperError::NotFound(format!(
            "Video file not found: {}",
            source.display()
        )));
    }

    let paths = services.state.lock().await.library.paths().clone();
    let imported = tokio::task::spawn_blocking(move || paths.import_file(&source)).await;
    let path = match imported {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => return Response::Error(WallpaperError::Io(format!("{:#}", e))),
        Err(e) => return Response::Error(WallpaperError::Io(e.to_string())),
    };

    let mut state = services.state.lock().await;
    match state.library.add(&path) {
        Some(added) => {
            let entry = added.entry.clone();
            spawn_extraction(&services.state, &services.probe, &mut state.library, added);
            Response::Added(Some(entry))
        }
        None => {
            log::info!("{} is already in the library", path.display());
            Response::Added(None)
        }
    }
}

/// Make `entry` the active content, with a still of it shown meanwhile
fn play_video(services: &Arc<Services>, entry: VideoEntry) -> Response {
    let path = entry.path().to_path_buf();
    if !path.exists() {
        return Response::Error(WallpaperError::NotFound(format!(
            "Video file not found: {}",
            path.display()
        )));
    }

    if services.config.setter.still_fallback {
        let services = services.clone();
        let video = path.clone();
        tokio::spawn(async move { show_still_fallback(services, video).await });
    }

    log::info!("Playing {}", entry.file_name);
    services.content.set(ContentSource::video(&path));
    Response::Ok
}

/// Show a frame of `video` on the playback display until the temporary
/// frame is removed, then bring back the user's still
async fn show_still_fallback(services: Arc<Services>, video: PathBuf) {
    let target = StillTarget::Display(services.settings.snapshot().selected_display);

    let blocking = services.clone();
    let shown = tokio::task::spawn_blocking(move || -> Result<Option<(PathBuf, u64)>> {
        let frame = media::extract_and_save_frame(blocking.probe.as_ref(), &video, STILL_FALLBACK_AT)?;
        match blocking.setter.show_temporary(&frame, target) {
            Some(token) => Ok(Some((frame, token))),
            None => {
                remove_frame(&frame);
                Ok(None)
            }
        }
    })
    .await;

    let (frame, token) = match shown {
        Ok(Ok(Some(shown))) => shown,
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            log::warn!("No still fallback: {:#}", e);
            return;
        }
        Err(e) => {
            log::warn!("Still fallback task failed: {}", e);
            return;
        }
    };

    tokio::time::sleep(Duration::from_secs(services.config.setter.frame_cleanup_secs)).await;

    let setter = services.setter.clone();
    let ended = tokio::task::spawn_blocking(move || {
        remove_frame(&frame);
        setter.end_temporary(token, target);
    })
    .await;
    if let Err(e) = ended {
        log::warn!("Still restore task failed: {}", e);
    }
}

fn remove_frame(frame: &Path) {
    if let Err(e) = std::fs::remove_file(frame) {
        log::warn!("Failed to remove temporary frame {}: {}", frame.display(), e);
    }
}

fn validate_source(source: &ContentSource) -> std::result::Result<(), WallpaperError> {
    match source {
        ContentSource::Video { path } => {
            if path.exists() {
                Ok(())
            } else {
                Err(WallpaperError::NotFound(format!(
                    "Video file not found: {}",
                    path.display()
                )))
            }
        }
        ContentSource::YouTube { url } => youtube_video_id(url).map(|_| ()).ok_or_else(|| {
            WallpaperError::InvalidArgument(format!("No YouTube video id in '{}'", url))
        }),
        ContentSource::Web { location } => WebLocation::parse(location)
            .map(|_| ())
            .map_err(|e| WallpaperError::InvalidArgument(format!("{:#}", e))),
    }
}

fn update_settings(services: &Arc<Services>, patch: &SettingsPatch) -> Response {
    if let Some(quality) = patch.quality
        && !quality.is_finite()
    {
        return Response::Error(WallpaperError::InvalidArgument(format!(
            "Invalid quality: {}",
            quality
        )));
    }
    if let Some(speed) = patch.playback_speed
        && (!speed.is_finite() || speed <= 0.0)
    {
        return Response::Error(WallpaperError::InvalidArgument(format!(
            "Invalid playback speed: {}",
            speed
        )));
    }

    match services.settings.apply(patch) {
        Ok(settings) => Response::Settings(settings),
        Err(e) => Response::Error(WallpaperError::Io(format!("{:#}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DaemonState;
    use crate::config::Config;
    use crate::content::ContentBridge;
    use crate::library::{LibraryOptions, LibraryPaths, VideoLibrary};
    use crate::media::testing::FakeProbe;
    use crate::playback::testing::{DesktopCall, FakeDesktop, display};
    use crate::prefs::PreferenceStore;
    use crate::setter::WallpaperSetter;
    use crate::settings::SettingsStore;
    use common::PlaybackStatus;
    use tokio::sync::{Mutex, watch};

    struct Fixture {
        dir: tempfile::TempDir,
        desktop: Arc<FakeDesktop>,
        services: Arc<Services>,
    }

    impl Fixture {
        fn new(still_fallback: bool) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let paths = LibraryPaths::new(dir.path().join("data"));
            paths.ensure().unwrap();
            let prefs = Arc::new(PreferenceStore::open(paths.preferences_file()));
            let library = VideoLibrary::new(paths, prefs.clone(), LibraryOptions::default());

            let mut config = Config::default();
            config.setter.still_fallback = still_fallback;
            config.setter.frame_cleanup_secs = 1;

            let desktop = Arc::new(FakeDesktop::new(vec![display(10, "DP-1", true)]));
            let services = Arc::new(Services {
                config,
                state: Arc::new(Mutex::new(DaemonState::new(library))),
                settings: Arc::new(SettingsStore::load(prefs)),
                content: Arc::new(ContentBridge::new()),
                setter: Arc::new(WallpaperSetter::new(desktop.clone())),
                desktop: desktop.clone(),
                probe: Arc::new(FakeProbe::new(Duration::from_secs(30), (64, 36))),
                playback: watch::channel(PlaybackStatus::Idle).1,
            });

            Self {
                dir,
                desktop,
                services,
            }
        }

        /// A video picked from outside the library
        fn picked(&self, name: &str) -> PathBuf {
            let movies = self.dir.path().join("Movies");
            std::fs::create_dir_all(&movies).unwrap();
            let path = movies.join(name);
            std::fs::write(&path, vec![0u8; 2048]).unwrap();
            path
        }

        async fn add(&self, path: &Path) -> VideoEntry {
            let command = Command::AddVideo {
                path: path.display().to_string(),
            };
            match handle_command(command, &self.services).await {
                Response::Added(Some(entry)) => entry,
                other => panic!("unexpected {:?}", other),
            }
        }

        async fn wait_for_extraction(&self) {
            for _ in 0..200 {
                if self.services.state.lock().await.library.pending_jobs() == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("extraction did not finish");
        }

        fn stills(&self) -> Vec<DesktopCall> {
            self.desktop
                .calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| matches!(call, DesktopCall::Still(..)))
                .cloned()
                .collect()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_add_video_imports_a_copy() {
        let fx = Fixture::new(false);
        let picked = fx.picked("waves.mp4");

        let entry = fx.add(&picked).await;
        let wallpapers = fx.services.state.lock().await.library.paths().wallpapers_dir();
        assert_eq!(entry.path(), wallpapers.join("waves.mp4"));
        assert!(entry.path().exists());

        fx.wait_for_extraction().await;
        {
            let state = fx.services.state.lock().await;
            let stored = state.library.get(entry.id).unwrap();
            assert_eq!(stored.duration, 30.0);
            assert_eq!(stored.file_size, 2048);
            assert!(stored.thumbnail_path().unwrap().exists());
        }

        let again = Command::AddVideo {
            path: picked.display().to_string(),
        };
        assert!(matches!(
            handle_command(again, &fx.services).await,
            Response::Added(None)
        ));
        assert_eq!(fx.services.state.lock().await.library.len(), 1);

        // Removing the entry deletes the copy only
        handle_command(Command::RemoveVideo { id: entry.id }, &fx.services).await;
        assert!(!entry.path().exists());
        assert!(picked.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_add_missing_video() {
        let fx = Fixture::new(false);
        let command = Command::AddVideo {
            path: fx.dir.path().join("gone.mp4").display().to_string(),
        };

        assert!(matches!(
            handle_command(command, &fx.services).await,
            Response::Error(WallpaperError::NotFound(_))
        ));
        assert!(fx.services.state.lock().await.library.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_play_video_selects_and_sets_content() {
        let fx = Fixture::new(false);
        let first = fx.add(&fx.picked("first.mp4")).await;
        let second = fx.add(&fx.picked("second.mp4")).await;

        let response = handle_command(Command::PlayVideo { id: first.id }, &fx.services).await;
        assert!(matches!(response, Response::Ok));
        assert_eq!(
            fx.services.content.current(),
            Some(ContentSource::video(first.path()))
        );
        assert_eq!(fx.services.state.lock().await.library.selected(), Some(first.id));

        let unknown = handle_command(Command::PlayVideo { id: Uuid::new_v4() }, &fx.services).await;
        assert!(matches!(unknown, Response::Error(WallpaperError::NotFound(_))));
        assert_eq!(
            fx.services.content.current(),
            Some(ContentSource::video(first.path()))
        );

        // Removing an entry that is not playing leaves the content alone
        handle_command(Command::RemoveVideo { id: second.id }, &fx.services).await;
        assert_eq!(
            fx.services.content.current(),
            Some(ContentSource::video(first.path()))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_removing_playing_video_clears_content() {
        let fx = Fixture::new(false);
        let entry = fx.add(&fx.picked("waves.mp4")).await;
        handle_command(Command::PlayVideo { id: entry.id }, &fx.services).await;
        assert!(fx.services.content.current().is_some());

        let response = handle_command(Command::RemoveVideo { id: entry.id }, &fx.services).await;
        assert!(matches!(response, Response::Ok));
        assert_eq!(fx.services.content.current(), None);

        let again = handle_command(Command::RemoveVideo { id: entry.id }, &fx.services).await;
        assert!(matches!(again, Response::Error(WallpaperError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_update_settings_rejects_non_finite_values() {
        let fx = Fixture::new(false);
        let before = fx.services.settings.snapshot();

        for patch in [
            SettingsPatch {
                quality: Some(f64::NAN),
                ..Default::default()
            },
            SettingsPatch {
                playback_speed: Some(f64::INFINITY),
                muted: Some(false),
                ..Default::default()
            },
            SettingsPatch {
                playback_speed: Some(0.0),
                ..Default::default()
            },
        ] {
            let response = handle_command(Command::UpdateSettings { patch }, &fx.services).await;
            assert!(matches!(
                response,
                Response::Error(WallpaperError::InvalidArgument(_))
            ));
        }
        assert_eq!(fx.services.settings.snapshot(), before);

        let patch = SettingsPatch {
            playback_speed: Some(1.5),
            ..Default::default()
        };
        match handle_command(Command::UpdateSettings { patch }, &fx.services).await {
            Response::Settings(settings) => assert_eq!(settings.playback_speed, 1.5),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_still_fallbacks_keep_user_still() {
        let fx = Fixture::new(true);
        let still = fx.dir.path().join("mine.png");
        image::RgbaImage::new(8, 8).save(&still).unwrap();

        let command = Command::SetStillWallpaper {
            path: still.display().to_string(),
            display: None,
        };
        assert!(matches!(handle_command(command, &fx.services).await, Response::Ok));

        let first = fx.add(&fx.picked("first.mp4")).await;
        let second = fx.add(&fx.picked("second.mp4")).await;
        handle_command(Command::PlayVideo { id: first.id }, &fx.services).await;
        handle_command(Command::PlayVideo { id: second.id }, &fx.services).await;

        // The user still, two temporary frames and one restore
        for _ in 0..100 {
            if fx.stills().len() >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fx.stills().len(), 4);
        assert_eq!(fx.stills().last(), Some(&DesktopCall::Still(Some(10), true)));
        assert_eq!(fx.services.setter.current_wallpaper(10), Some(still));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_snapshot_replaces_previous_frame() {
        let fx = Fixture::new(false);
        let video = fx.picked("waves.mp4");
        let snapshots = fx
            .services
            .state
            .lock()
            .await
            .library
            .paths()
            .snapshot_file(None);

        for at in [1.0, 2.0] {
            let command = Command::SnapshotFrame {
                path: video.display().to_string(),
                at,
                display: None,
            };
            assert!(matches!(handle_command(command, &fx.services).await, Response::Ok));
        }

        let stored: Vec<_> = std::fs::read_dir(snapshots.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(stored.len(), 1);
        assert!(snapshots.exists());
        assert_eq!(fx.services.setter.current_wallpaper(10), Some(snapshots));

        let past_end = Command::SnapshotFrame {
            path: video.display().to_string(),
            at: 90.0,
            display: None,
        };
        assert!(matches!(
            handle_command(past_end, &fx.services).await,
            Response::Error(WallpaperError::Video(_))
        ));
    }

    #[test]
    fn test_validate_source() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"mp4").unwrap();

        assert!(validate_source(&ContentSource::video(&video)).is_ok());
        assert!(matches!(
            validate_source(&ContentSource::video(dir.path().join("gone.mp4"))),
            Err(WallpaperError::NotFound(_))
        ));
        assert!(
            validate_source(&ContentSource::YouTube {
                url: "https://www.youtube.com/watch?v=abc123".to_string()
            })
            .is_ok()
        );
        assert!(matches!(
            validate_source(&ContentSource::YouTube {
                url: "https://www.youtube.com/".to_string()
            }),
            Err(WallpaperError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_source(&ContentSource::Web {
                location: "   ".to_string()
            }),
            Err(WallpaperError::InvalidArgument(_))
        ));
    }
}

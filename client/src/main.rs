use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{Command, ContentSource, LibraryPage, Response, ScaleMode, Settings, SettingsPatch};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "loopctl")]
#[command(about = "Live video wallpaper control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the daemon to check if it's running
    Ping,

    /// Query daemon status
    Query,

    /// Kill the running daemon
    Kill,

    /// List attached displays
    Displays,

    /// Copy a video into the library
    Add {
        /// Path to the video file
        path: String,
    },

    /// Remove a video from the library, deleting its copy and thumbnail
    Remove { id: Uuid },

    /// Mark a video as selected without playing it
    Select { id: Uuid },

    /// Toggle the favorite flag of a video
    Favorite { id: Uuid },

    /// Show a page of the library
    List {
        /// Page index (starting at 0); defaults to the current page
        #[arg(short, long)]
        page: Option<usize>,
    },

    /// Show the next library page
    Next,

    /// Show the previous library page
    Prev,

    /// Play a library video as the live wallpaper
    Play { id: Uuid },

    /// Play any local video file without adding it to the library
    Video {
        /// Path to the video file
        path: String,
    },

    /// Show a web page, or a local image/video embedded in a page
    Web {
        /// http(s) URL, file:// URL or local path
        location: String,
    },

    /// Play a YouTube video through its embed page
    Youtube {
        /// Watch or youtu.be URL
        url: String,
    },

    /// Stop the live wallpaper
    Stop,

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },

    /// Set a still image as wallpaper
    Still {
        /// Path to the image file
        path: String,

        /// Target display id; all displays when omitted
        #[arg(short, long)]
        display: Option<u32>,
    },

    /// Use a frame of a video as still wallpaper
    Snapshot {
        /// Path to the video file
        path: String,

        /// Timestamp in seconds
        #[arg(short, long, default_value = "1.0")]
        at: f64,

        /// Target display id; all displays when omitted
        #[arg(short, long)]
        display: Option<u32>,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print the current settings
    Get,

    /// Change one or more settings
    Set {
        /// Video quality (0.1 - 1.0)
        #[arg(short, long)]
        quality: Option<f64>,

        /// Scaling mode (fill, fit, stretch)
        #[arg(short, long)]
        scaling: Option<String>,

        /// Mute or unmute audio
        #[arg(short, long)]
        muted: Option<bool>,

        /// Playback speed (0.25 - 4.0)
        #[arg(long)]
        speed: Option<f64>,

        /// Display id to play on, 0 for the primary display
        #[arg(short, long)]
        display: Option<u32>,

        /// Log playback statistics
        #[arg(long)]
        stats: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Ping => Command::Ping,
        Commands::Query => Command::Query,
        Commands::Kill => Command::Kill,
        Commands::Displays => Command::ListDisplays,
        Commands::Add { path } => Command::AddVideo {
            path: absolute(&path)?,
        },
        Commands::Remove { id } => Command::RemoveVideo { id },
        Commands::Select { id } => Command::SelectVideo { id },
        Commands::Favorite { id } => Command::ToggleFavorite { id },
        Commands::List { page } => Command::ListVideos { page },
        Commands::Next => Command::NextPage,
        Commands::Prev => Command::PreviousPage,
        Commands::Play { id } => Command::PlayVideo { id },
        Commands::Video { path } => Command::SetContent {
            source: ContentSource::video(absolute(&path)?),
        },
        Commands::Web { location } => Command::SetContent {
            source: ContentSource::Web {
                location: web_location(&location)?,
            },
        },
        Commands::Youtube { url } => Command::SetContent {
            source: ContentSource::YouTube { url },
        },
        Commands::Stop => Command::Stop,
        Commands::Settings { action } => match action {
            SettingsCommands::Get => Command::GetSettings,
            SettingsCommands::Set {
                quality,
                scaling,
                muted,
                speed,
                display,
                stats,
            } => {
                let patch = SettingsPatch {
                    quality,
                    scaling: scaling.as_deref().map(parse_scale_mode),
                    muted,
                    playback_speed: speed,
                    selected_display: display,
                    show_stats: stats,
                };
                if patch.is_empty() {
                    Command::GetSettings
                } else {
                    Command::UpdateSettings { patch }
                }
            }
        },
        Commands::Still { path, display } => Command::SetStillWallpaper {
            path: absolute(&path)?,
            display,
        },
        Commands::Snapshot { path, at, display } => Command::SnapshotFrame {
            path: absolute(&path)?,
            at,
            display,
        },
    };

    match send_command(command).await {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("\nIs the daemon running? Try starting it with: loopwall");
            std::process::exit(1);
        }
    }
}

async fn send_command(command: Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Send command
    let command_json = serde_json::to_string(&command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    // Read response
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Status(status) => {
            println!("Daemon Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            match status.playback {
                common::PlaybackStatus::Idle => println!("  Playback: idle"),
                common::PlaybackStatus::Playing { source, display } => {
                    println!("  Playback: {}", describe_source(&source));
                    if let Some(display) = display {
                        println!("  Display: {}", display);
                    }
                }
            }
            println!("  Library: {} video(s)", status.library_size);
            if let Some(id) = status.selected {
                println!("  Selected: {}", id);
            }
        }
        Response::Displays(displays) => {
            println!("Displays:");
            for display in displays {
                println!(
                    "  [{}] {} - {}x{} at {},{} (scale: {}){}",
                    display.id,
                    display.name,
                    display.width,
                    display.height,
                    display.x,
                    display.y,
                    display.scale,
                    if display.primary { " primary" } else { "" }
                );
            }
        }
        Response::Pong => {
            println!("✓ Daemon is running");
        }
        Response::Added(Some(entry)) => {
            println!("✓ Added {} ({})", entry.file_name, entry.id);
        }
        Response::Added(None) => {
            println!("Already in the library");
        }
        Response::Page(page) => print_page(&page),
        Response::Settings(settings) => print_settings(&settings),
    }
}

fn print_page(page: &LibraryPage) {
    println!(
        "Library page {}/{}:",
        if page.total_pages == 0 { 0 } else { page.page + 1 },
        page.total_pages
    );
    if page.entries.is_empty() {
        println!("  (empty)");
    }
    for entry in &page.entries {
        let marker = if page.selected == Some(entry.id) { '>' } else { ' ' };
        println!(
            " {} {} {}{}  {}  {}",
            marker,
            entry.id,
            entry.file_name,
            if entry.is_favorite { " ★" } else { "" },
            entry.formatted_duration(),
            entry.formatted_file_size()
        );
    }
    if page.has_previous {
        println!("  (loopctl prev for the previous page)");
    }
    if page.has_next {
        println!("  (loopctl next for the next page)");
    }
}

fn print_settings(settings: &Settings) {
    println!("Settings:");
    println!("  Quality: {:.2}", settings.quality);
    println!("  Scaling: {}", settings.scaling.name());
    println!("  Muted: {}", settings.muted);
    println!("  Playback speed: {}x", settings.playback_speed);
    match settings.selected_display {
        0 => println!("  Display: primary"),
        id => println!("  Display: {}", id),
    }
    println!("  Show stats: {}", settings.show_stats);
}

fn describe_source(source: &ContentSource) -> String {
    match source {
        ContentSource::Video { path } => format!("video {}", path.display()),
        ContentSource::Web { location } => format!("web {}", location),
        ContentSource::YouTube { url } => format!("youtube {}", url),
    }
}

/// The daemon runs elsewhere, so paths are sent absolute
fn absolute(path: &str) -> Result<String> {
    let path = std::path::absolute(path).with_context(|| format!("Invalid path: {}", path))?;
    Ok(path.to_string_lossy().to_string())
}

/// URLs pass through; anything else is taken as a local path
fn web_location(location: &str) -> Result<String> {
    if location.contains("://") {
        Ok(location.to_string())
    } else {
        absolute(location)
    }
}

fn parse_scale_mode(name: &str) -> ScaleMode {
    ScaleMode::from_name(name).unwrap_or_else(|| {
        eprintln!("Warning: Unknown scaling mode '{}', using 'fill'", name);
        ScaleMode::Fill
    })
}

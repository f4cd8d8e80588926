// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use filter_camera::backends::camera::CameraPosition;
use filter_camera::config::Config;
use filter_camera::filters::FilterKind;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "filter-camera")]
#[command(about = "Live camera with GPU filters and recording")]
#[command(version = filter_camera::constants::app_info::version())]
#[command(subcommand_required = false)]
struct Cli {
    /// Configuration file (default: ~/.config/filter-camera/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Initial filter (none, invert, complementary, sepia, grey)
    #[arg(short, long, global = true)]
    filter: Option<FilterKind>,

    /// Initial camera (front or back)
    #[arg(short, long, global = true)]
    camera: Option<CameraPosition>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in terminal mode (renders camera to terminal); the default
    Terminal,

    /// List available cameras
    List,

    /// Record a filtered video
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
}

/// Log file for terminal mode, next to the recordings
fn log_file() -> Option<std::fs::File> {
    let dir = dirs::state_dir()
        .or_else(dirs::data_local_dir)?
        .join(filter_camera::constants::recording::DIRECTORY_NAME);
    std::fs::create_dir_all(&dir).ok()?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("filter-camera.log"))
        .ok()
}

fn init_logging(to_file: bool) {
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=filter_camera=debug, RUST_LOG=info
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true);

    // The terminal shell owns the screen, so its logs go to a file
    match log_file().filter(|_| to_file) {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init(),
        None if to_file => builder.with_writer(std::io::sink).init(),
        None => builder.init(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let terminal_mode = matches!(cli.command, None | Some(Commands::Terminal));
    init_logging(terminal_mode);

    let mut config = Config::load(cli.config.as_deref());
    if let Some(filter) = cli.filter {
        config.filter = filter;
    }
    if let Some(camera) = cli.camera {
        config.camera = camera;
    }

    match cli.command {
        Some(Commands::List) => cli::list_cameras(),
        Some(Commands::Record { duration }) => cli::record_video(config, duration),
        Some(Commands::Terminal) | None => Ok(filter_camera::terminal::run(config)?),
    }
}

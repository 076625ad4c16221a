//! Vizcast CLI: drive the live synthesis pipeline from the command line.
//!
//! Usage:
//!   vizcast run [OPTIONS]      Feed a synthetic camera through the pipeline
//!   vizcast check              Check backends and encoders
//!   vizcast config <ACTION>    Show or initialize the configuration file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vizcast_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "vizcast",
    about = "Real-time frame synthesis with recording and streaming",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic camera through dispatcher, backends and sinks
    Run {
        /// How long to run (seconds)
        #[arg(short, long, default_value = "5")]
        seconds: f64,

        /// Camera frame rate
        #[arg(long, default_value = "30")]
        camera_fps: u32,

        /// Camera frame width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Camera frame height
        #[arg(long, default_value = "480")]
        height: u32,

        /// Backend selection, overriding the config (e.g. "On-device", "Remote API", "Hybrid")
        #[arg(short, long)]
        backend: Option<String>,

        /// Show the camera directly instead of synthesizing
        #[arg(long)]
        no_reference: bool,

        /// Record the synthesized stream
        #[arg(short, long)]
        record: bool,

        /// Encoder preference, overriding the config: auto|software|gstreamer
        #[arg(long)]
        encoder: Option<String>,

        /// Save the last synthesized frame as a JPEG snapshot
        #[arg(long)]
        snapshot: bool,
    },

    /// Check backends and encoders
    Check,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(vizcast_common::config::config_file_path);
    let config = AppConfig::load_from(&config_path);

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    vizcast_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Run {
            seconds,
            camera_fps,
            width,
            height,
            backend,
            no_reference,
            record,
            encoder,
            snapshot,
        } => {
            commands::run::run(
                config,
                commands::run::RunOptions {
                    seconds,
                    camera_fps,
                    width,
                    height,
                    backend,
                    reference: !no_reference,
                    record,
                    encoder,
                    snapshot,
                },
            )
            .await
        }
        Commands::Check => commands::check::run(&config, &config_path).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&config),
            ConfigAction::Init { force } => commands::config::init(&config_path, force),
            ConfigAction::Path => {
                println!("{}", config_path.display());
                Ok(())
            }
        },
    }
}

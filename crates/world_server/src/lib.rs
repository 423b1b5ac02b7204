//! # World Server - Main Entry Point
//!
//! Runs one side of the two-process world backend. The same binary serves
//! as the Game process (players, persistence, listens for the AI link) or
//! the AI process (monster spawning and behaviour, connects to the Game
//! process), selected by `server.role` or `--role`.
//!
//! ## Quick Start
//!
//! ```bash
//! # Game process with default configuration
//! world_server --role game
//!
//! # AI process pointed at a remote Game process
//! world_server --role ai --peer 10.0.0.5:9870 --data /srv/world
//!
//! # JSON logging for production
//! world_server --config game.toml --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Exit Codes
//!
//! * **0**: clean shutdown
//! * **1**: startup, configuration or runtime failure
//! * **2**: the Game process refused this AI process's address

use tracing::{error, Instrument};

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;
use sync_link::LinkError;

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_UNAUTHORIZED: i32 = 2;

/// Parses arguments, sets up logging and runs the application to
/// completion. Returns the process exit code.
pub async fn init() -> i32 {
    let args = CliArgs::parse();

    // Logging settings come from the config file, so read it once up front.
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        return EXIT_FAILURE;
    }

    let side = args.role.unwrap_or(config.server.role);
    run(args).instrument(logging::process_span(side)).await
}

async fn run(args: CliArgs) -> i32 {
    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            return EXIT_FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => 0,
        Err(e) => {
            error!("❌ Application error: {:?}", e);
            exit_code_for(&e)
        }
    }
}

/// Maps a run failure to the process exit code.
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    if error
        .downcast_ref::<LinkError>()
        .is_some_and(|e| e.is_fatal())
    {
        EXIT_UNAUTHORIZED
    } else {
        EXIT_FAILURE
    }
}

pub use config::{IntervalSettings, LoggingSettings, ServerSettings};

//! Configuration management for the world server.
//!
//! One TOML file configures either process. The `[world]` and `[link]`
//! tables deserialize straight into the library configurations; the rest is
//! process wiring.

use crate::cli::CliArgs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_link::LinkConfig;
use tracing::info;
use world_core::{ProcessSide, WorldConfig};

fn default_generator_tick_ms() -> u64 {
    1000
}

fn default_role_tick_ms() -> u64 {
    500
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Process wiring
    pub server: ServerSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
    /// Scheduler cadence
    #[serde(default)]
    pub intervals: IntervalSettings,
    /// World model settings
    #[serde(default)]
    pub world: WorldConfig,
    /// Game/AI link settings
    #[serde(default)]
    pub link: LinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Which process this instance runs as
    pub role: ProcessSide,
    /// Directory holding the static world data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Whether the Game process saves online players on shutdown
    #[serde(default = "default_true")]
    pub save_on_shutdown: bool,
}

fn default_true() -> bool {
    true
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Separate level for the link crate, whose per-message lines are noisy
    #[serde(default)]
    pub link_level: Option<String>,
}

/// Periods of the scheduled jobs that are not owned by the link.
/// Keepalive and spawn flush periods live in `[link]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalSettings {
    #[serde(default = "default_generator_tick_ms")]
    pub generator_tick_ms: u64,
    #[serde(default = "default_role_tick_ms")]
    pub role_tick_ms: u64,
}

impl IntervalSettings {
    pub fn generator_tick(&self) -> Duration {
        Duration::from_millis(self.generator_tick_ms)
    }

    pub fn role_tick(&self) -> Duration {
        Duration::from_millis(self.role_tick_ms)
    }
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            generator_tick_ms: default_generator_tick_ms(),
            role_tick_ms: default_role_tick_ms(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            role: ProcessSide::Game,
            data_dir: default_data_dir(),
            save_on_shutdown: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            link_level: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            logging: LoggingSettings::default(),
            intervals: IntervalSettings::default(),
            world: WorldConfig::default(),
            link: LinkConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing a default file first if
    /// none exists.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_overrides(&mut self, args: &CliArgs) -> Result<(), String> {
        if let Some(role) = args.role {
            self.server.role = role;
        }
        if let Some(bind) = &args.bind_address {
            self.link.listen_address = bind
                .parse()
                .map_err(|_| format!("Invalid bind address: {bind}"))?;
        }
        if let Some(peer) = &args.peer_address {
            self.link.peer_address = peer
                .parse()
                .map_err(|_| format!("Invalid peer address: {peer}"))?;
        }
        if let Some(dir) = &args.data_dir {
            self.server.data_dir = dir.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        Ok(())
    }

    /// World settings as this process should run them. The Game process
    /// never runs generators; spawning is owned by the AI process.
    pub fn world_config(&self) -> WorldConfig {
        let mut world = self.world.clone();
        if self.server.role == ProcessSide::Game {
            world.generators_enabled = false;
        }
        world
    }

    /// Validates the configuration settings.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.intervals.generator_tick_ms == 0 || self.intervals.role_tick_ms == 0 {
            return Err("intervals must be greater than 0".to_string());
        }

        if self.server.data_dir.as_os_str().is_empty() {
            return Err("server.data_dir cannot be empty".to_string());
        }

        self.world.validate()?;
        self.link.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.server.role, ProcessSide::Game);
        assert_eq!(config.server.data_dir, PathBuf::from("data"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.intervals.generator_tick(), Duration::from_secs(1));
        assert_eq!(config.intervals.role_tick(), Duration::from_millis(500));
        assert_eq!(config.world.block_size, 18);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.server.role, ProcessSide::Game);

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.link, config.link);
        assert_eq!(reloaded.world.block_size, config.world.block_size);
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ai.toml");
        std::fs::write(
            &path,
            r#"
[server]
role = "ai"
data_dir = "/srv/world"

[logging]
level = "debug"
json_format = true

[link]
peer_address = "10.0.0.5:9870"
password = "s3cret"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.role, ProcessSide::Ai);
        assert!(config.server.save_on_shutdown);
        assert_eq!(config.link.peer_address.to_string(), "10.0.0.5:9870");
        assert_eq!(config.link.password, "s3cret");
        assert_eq!(config.link.ping_interval_secs, 5);
        assert_eq!(config.intervals.role_tick_ms, 500);
        assert_eq!(config.world.generator_batch_cap, 15);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nrole = ").unwrap();
        assert!(AppConfig::load_from_file(&path).await.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            role: Some(ProcessSide::Ai),
            bind_address: Some("0.0.0.0:9900".to_string()),
            peer_address: Some("192.168.1.4:9900".to_string()),
            data_dir: Some(PathBuf::from("world-data")),
            log_level: Some("trace".to_string()),
            json_logs: true,
            ..CliArgs::default()
        };
        config.apply_overrides(&args).unwrap();

        assert_eq!(config.server.role, ProcessSide::Ai);
        assert_eq!(config.link.listen_address.port(), 9900);
        assert_eq!(config.link.peer_address.to_string(), "192.168.1.4:9900");
        assert_eq!(config.server.data_dir, PathBuf::from("world-data"));
        assert_eq!(config.logging.level, "trace");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_bad_address_override_is_rejected() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            bind_address: Some("not-an-address".to_string()),
            ..CliArgs::default()
        };
        assert!(config.apply_overrides(&args).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.intervals.role_tick_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.link.ping_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.world.identity.ai.monster = config.world.identity.game.monster;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_game_process_never_runs_generators() {
        let mut config = AppConfig::default();
        assert!(!config.world_config().generators_enabled);

        config.server.role = ProcessSide::Ai;
        assert!(config.world_config().generators_enabled);
    }
}

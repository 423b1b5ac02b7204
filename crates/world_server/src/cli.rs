//! Command-line interface handling for the world server.
//!
//! Every option here overrides the matching setting of the TOML
//! configuration file.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use world_core::ProcessSide;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Which process to run as
    pub role: Option<ProcessSide>,
    /// Override for the Game process listen address
    pub bind_address: Option<String>,
    /// Override for the address the AI process connects to
    pub peer_address: Option<String>,
    /// Override for the data directory
    pub data_dir: Option<PathBuf>,
    /// Override for the log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

/// Builds the clap command.
pub fn command() -> Command {
    Command::new("World Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("World core of the two-process MMO backend (Game or AI side)")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("role")
                .short('r')
                .long("role")
                .value_name("ROLE")
                .help("Process role")
                .value_parser(["game", "ai"]),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Address the Game process listens on for the AI link (e.g., 127.0.0.1:9870)"),
        )
        .arg(
            Arg::new("peer")
                .short('p')
                .long("peer")
                .value_name("ADDRESS")
                .help("Address of the Game process the AI process connects to"),
        )
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .value_name("DIR")
                .help("Directory holding maps.json, generators.json and monsters.json"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on bad input.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            role: matches
                .get_one::<String>("role")
                .and_then(|role| role.parse().ok()),
            bind_address: matches.get_one::<String>("bind").cloned(),
            peer_address: matches.get_one::<String>("peer").cloned(),
            data_dir: matches.get_one::<String>("data").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let matches = command()
            .try_get_matches_from(args)
            .expect("arguments should parse");
        CliArgs::from_matches(&matches)
    }

    #[test]
    fn defaults_leave_everything_to_the_config_file() {
        let args = parse(&["world_server"]);
        assert_eq!(args.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.role, None);
        assert!(args.bind_address.is_none());
        assert!(args.data_dir.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn overrides_are_captured() {
        let args = parse(&[
            "world_server",
            "--config",
            "ai.toml",
            "--role",
            "ai",
            "--peer",
            "10.0.0.5:9870",
            "--data",
            "/srv/world",
            "-l",
            "debug",
            "--json-logs",
        ]);
        assert_eq!(args.config_path, PathBuf::from("ai.toml"));
        assert_eq!(args.role, Some(ProcessSide::Ai));
        assert_eq!(args.peer_address.as_deref(), Some("10.0.0.5:9870"));
        assert_eq!(args.data_dir, Some(PathBuf::from("/srv/world")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(command()
            .try_get_matches_from(["world_server", "--role", "chat"])
            .is_err());
    }
}

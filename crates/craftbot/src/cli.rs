//! Command-line interface handling for the craftbot agent.
//!
//! Flags given here are applied on top of the configuration file.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Command line arguments parsed from user input.
///
/// Every option is an override: values given here win over the ones read
/// from the configuration file (see `AppConfig::apply_cli`).
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the YAML configuration file
    pub config_path: PathBuf,
    /// Optional override for the log level
    pub log_level: Option<String>,
    /// Whether to force JSON console output
    pub json_logs: bool,
    /// Print the available completion models and exit
    pub list_models: bool,
}

impl CliArgs {
    /// Builds the clap command definition.
    ///
    /// Kept separate from [`CliArgs::parse`] so tests can feed argument
    /// lists through `try_get_matches_from`.
    ///
    /// # Returns
    ///
    /// The `craftbot` command with `--config`, `--log-level`,
    /// `--json-logs` and `--list-models`.
    pub fn command() -> Command {
        Command::new("craftbot")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Chat agent that stays connected to a Minecraft-style game server")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value(DEFAULT_CONFIG_PATH),
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
                    .help("Output console logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("list-models")
                    .long("list-models")
                    .help("List available completion models and exit")
                    .action(clap::ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments using clap.
    ///
    /// # Returns
    ///
    /// A `CliArgs` with every flag resolved; `config_path` falls back to
    /// [`DEFAULT_CONFIG_PATH`].
    ///
    /// # Exits
    ///
    /// On unknown flags or `--help`/`--version`, clap prints its output and
    /// terminates the process.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            list_models: matches.get_flag("list-models"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> CliArgs {
        let matches = CliArgs::command()
            .try_get_matches_from(args)
            .expect("arguments should parse");
        CliArgs::from_matches(&matches)
    }

    #[test]
    fn test_defaults() {
        let args = parse_from(&["craftbot"]);
        assert_eq!(args.config_path, PathBuf::from("config.yaml"));
        assert_eq!(args.log_level, None);
        assert!(!args.json_logs);
        assert!(!args.list_models);
    }

    #[test]
    fn test_all_flags() {
        let args = parse_from(&[
            "craftbot",
            "--config",
            "/etc/craftbot.yaml",
            "-l",
            "debug",
            "--json-logs",
            "--list-models",
        ]);
        assert_eq!(args.config_path, PathBuf::from("/etc/craftbot.yaml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert!(args.list_models);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(CliArgs::command()
            .try_get_matches_from(["craftbot", "--bind", "0.0.0.0:1"])
            .is_err());
    }
}

//! Command-line interface for the orchestrator binary.
//!
//! Every option here overrides the matching setting from the configuration
//! file for this run only.

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

/// Path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "badger.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the pending-order interval, in seconds
    pub interval_secs: Option<u64>,
    /// Run a single pending-order cycle and exit
    pub once: bool,
    /// Place a trial order for this email before processing starts
    pub trial_email: Option<String>,
    /// Plan used for `trial_email`
    pub plan_id: i64,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("badger")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Matches game-server subscriptions to hosts and dispatches agent commands")
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
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("interval")
                    .short('i')
                    .long("interval")
                    .value_name("SECONDS")
                    .help("Seconds between pending-order cycles")
                    .value_parser(value_parser!(u64)),
            )
            .arg(
                Arg::new("once")
                    .long("once")
                    .help("Run one pending-order cycle and exit")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("trial-email")
                    .long("trial-email")
                    .value_name("EMAIL")
                    .help("Order a trial server for this registered user on startup"),
            )
            .arg(
                Arg::new("plan")
                    .long("plan")
                    .value_name("ID")
                    .help("Plan for --trial-email")
                    .value_parser(value_parser!(i64))
                    .default_value("1"),
            )
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            interval_secs: matches.get_one::<u64>("interval").copied(),
            once: matches.get_flag("once"),
            trial_email: matches.get_one::<String>("trial-email").cloned(),
            plan_id: matches.get_one::<i64>("plan").copied().unwrap_or(1),
        }
    }

    #[cfg(test)]
    fn parse_from<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::from_matches(Self::command().get_matches_from(args))
    }
}

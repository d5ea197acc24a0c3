//! CLI argument definitions for tickfed.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `get` | Federated, reconciled lookup for one entity |
//! | `warm` | Refresh entities, or the configured hot keys |
//! | `daemon` | Keep the service running with warmer and sweeper; reports breaker and cache state |
//!
//! Breaker state and cache counters live in the running process, so only
//! `daemon` reports them (periodically, and once more on shutdown).
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `tickfed.toml` | Configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | from config | Log filter directive |
//! | `--log-format` | from config | `pretty`, `json` or `compact` |
//!
//! # Examples
//!
//! ```bash
//! tickfed get AAPL --class price --fields price,volume
//! tickfed warm AAPL MSFT
//! tickfed --config prod.toml daemon --stats-interval-secs 30
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Resilient multi-provider data federation with tiered caching.
#[derive(Debug, Parser)]
#[command(name = "tickfed", author, version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, env = "TICKFED_CONFIG", default_value = "tickfed.toml")]
    pub config: PathBuf,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log filter directive, e.g. `debug` or `tickfed_core=trace`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format: pretty, json or compact.
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch reconciled fields for one entity.
    ///
    /// # Examples
    ///
    ///   tickfed get AAPL --class price
    ///   tickfed get eurusd --class fx --fields bid,ask
    Get(GetArgs),

    /// Warm the cache for the given entities across every data class.
    ///
    /// Without entities, runs one scheduled pass over the configured hot keys.
    Warm(WarmArgs),

    /// Run until interrupted, with the warmer and cache sweeper active.
    Daemon(DaemonArgs),
}

impl Command {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Get(_) => "get",
            Self::Warm(_) => "warm",
            Self::Daemon(_) => "daemon",
        }
    }
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Entity key (ticker, index or pair).
    pub entity: String,

    /// Data class to query.
    #[arg(long = "class")]
    pub data_class: String,

    /// Comma-separated field names. Defaults to the class's default fields.
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,
}

#[derive(Debug, Args)]
pub struct WarmArgs {
    /// Entities to warm. Empty means the configured hot keys.
    pub entities: Vec<String>,
}

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// Interval between status log lines (cache counters and source health).
    #[arg(long, default_value_t = 60)]
    pub stats_interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_parses_comma_separated_fields() {
        let cli = Cli::try_parse_from([
            "tickfed", "get", "AAPL", "--class", "price", "--fields", "price,volume",
        ])
        .expect("valid args");

        match cli.command {
            Command::Get(args) => {
                assert_eq!(args.entity, "AAPL");
                assert_eq!(args.data_class, "price");
                assert_eq!(args.fields, vec!["price", "volume"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["tickfed", "warm", "--pretty", "--config", "x.toml"])
            .expect("valid args");

        assert!(cli.pretty);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert_eq!(cli.command.name(), "warm");
    }

    #[test]
    fn process_state_commands_exist_only_inside_daemon() {
        for command in ["health", "cache-stats", "reset"] {
            assert!(Cli::try_parse_from(["tickfed", command]).is_err(), "{command}");
        }

        let cli = Cli::try_parse_from(["tickfed", "daemon", "--stats-interval-secs", "5"])
            .expect("valid args");
        match cli.command {
            Command::Daemon(args) => assert_eq!(args.stats_interval_secs, 5),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn get_requires_class() {
        assert!(Cli::try_parse_from(["tickfed", "get", "AAPL"]).is_err());
    }
}

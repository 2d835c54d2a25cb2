//! CLI argument parsing for weft

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use weft_scheduler::SchedulerKind;

/// Scheduler implementation selectable on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SchedulerArg {
    /// One transaction at a time
    Serial,
    /// Conflict-aware parallel scheduling
    Parallel,
}

impl From<SchedulerArg> for SchedulerKind {
    fn from(arg: SchedulerArg) -> Self {
        match arg {
            SchedulerArg::Serial => SchedulerKind::Serial,
            SchedulerArg::Parallel => SchedulerKind::Parallel,
        }
    }
}

/// Run a batch workload through a transaction scheduler
#[derive(Parser, Debug, Clone)]
#[command(name = "weft")]
#[command(about = "Run a batch workload through a transaction scheduler")]
#[command(version)]
pub struct Cli {
    /// Node configuration file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Workload file (JSON)
    #[arg(long, conflicts_with = "synthetic")]
    pub workload: Option<PathBuf>,

    /// Generate a random workload with this many transactions
    #[arg(long)]
    pub synthetic: Option<usize>,

    /// Seed for the synthetic workload
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Number of executor threads (overrides the config file)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Scheduler implementation (overrides the config file)
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerArg>,

    /// Commit the final state even when no batch asks for it
    #[arg(long)]
    pub always_persist: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["weft"]);
        assert!(cli.config.is_none());
        assert!(cli.workload.is_none());
        assert!(cli.synthetic.is_none());
        assert_eq!(cli.seed, 42);
        assert!(cli.workers.is_none());
        assert!(cli.scheduler.is_none());
        assert!(!cli.always_persist);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_custom_values() {
        let cli = Cli::parse_from([
            "weft",
            "--workload",
            "/tmp/batches.json",
            "--workers",
            "8",
            "--scheduler",
            "serial",
            "--always-persist",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.workload, Some(PathBuf::from("/tmp/batches.json")));
        assert_eq!(cli.workers, Some(8));
        assert_eq!(cli.scheduler, Some(SchedulerArg::Serial));
        assert!(cli.always_persist);
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_cli_synthetic() {
        let cli = Cli::parse_from(["weft", "--synthetic", "500", "--seed", "7"]);
        assert_eq!(cli.synthetic, Some(500));
        assert_eq!(cli.seed, 7);
    }

    #[test]
    fn test_cli_workload_conflicts_with_synthetic() {
        let result = Cli::try_parse_from(["weft", "--workload", "w.json", "--synthetic", "10"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_scheduler() {
        assert!(Cli::try_parse_from(["weft", "--scheduler", "eager"]).is_err());
    }

    #[test]
    fn test_scheduler_arg_mapping() {
        assert_eq!(SchedulerKind::from(SchedulerArg::Serial), SchedulerKind::Serial);
        assert_eq!(SchedulerKind::from(SchedulerArg::Parallel), SchedulerKind::Parallel);
    }
}

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "warden",
    version,
    about = "Coordinate data-quality validation jobs across coordinator instances.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WARDEN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run an in-process cluster over the in-memory store, submit tasks and
    /// wait for them to finish.
    Run(RunArgs),

    /// Load and validate a config file, then print the effective config.
    CheckConfig {
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Coordinator config (TOML). Defaults apply when omitted.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// JSON array of task submissions.
    #[arg(long, value_name = "FILE")]
    pub tasks: PathBuf,

    /// Number of coordinator instances to start.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub instances: u32,

    /// Index of an instance to crash, exercising failover.
    #[arg(long, value_name = "INDEX", requires = "crash_after_ms")]
    pub crash_instance: Option<usize>,

    /// Delay before the crash.
    #[arg(long, value_name = "MS", requires = "crash_instance")]
    pub crash_after_ms: Option<u64>,

    /// Give up waiting for tasks after this long.
    #[arg(long, value_name = "MS", default_value_t = 60_000)]
    pub timeout_ms: u64,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn run_with_crash_options() {
        let args = CliArgs::try_parse_from([
            "warden",
            "run",
            "--tasks",
            "tasks.json",
            "--instances",
            "3",
            "--crash-instance",
            "1",
            "--crash-after-ms",
            "500",
        ])
        .unwrap();

        match args.command {
            Command::Run(run) => {
                assert_eq!(run.instances, 3);
                assert_eq!(run.crash_instance, Some(1));
                assert_eq!(run.crash_after_ms, Some(500));
                assert_eq!(run.timeout_ms, 60_000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn crash_instance_needs_delay() {
        let err = CliArgs::try_parse_from([
            "warden",
            "run",
            "--tasks",
            "tasks.json",
            "--crash-instance",
            "0",
        ]);
        assert!(err.is_err());
    }
}

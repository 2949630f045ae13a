mod cli;
mod counters;
mod engine;
mod metrics;
mod mock;
mod report;
mod ui;
mod units;
mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::counters::{open_counters, CounterSource};
use crate::watch::run_watch;

fn print_counters(proc_path: Option<PathBuf>, include_loopback: bool, json: bool) -> Result<()> {
    let mut source = open_counters(proc_path.as_deref(), include_loopback);
    let snapshot = source.read().with_context(|| match &proc_path {
        Some(path) => format!("Reading network counters from {}", path.display()),
        None => "Reading network counters from the OS".to_string(),
    })?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("received\t{}", snapshot.bytes_received);
        println!("sent\t{}", snapshot.bytes_sent);
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Some(Commands::Counters { proc_path, include_loopback, json }) => {
            print_counters(proc_path, include_loopback, json)
        }
        Some(Commands::Watch(watch)) => run_watch(watch),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(err) = result {
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: bad configuration, 3: counters unavailable, 1: other
    for cause in err.chain() {
        if cause.is::<crate::engine::ConfigError>() || cause.is::<crate::cli::BadSeconds>() {
            return 2;
        }
        if cause.is::<crate::counters::ReadError>() {
            return 3;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_config_error() {
        let err = anyhow::Error::from(crate::engine::ConfigError::ZeroWindow).context("starting");
        assert_eq!(exit_code_for_error(&err), 2);
    }

    #[test]
    fn exit_code_bad_seconds() {
        let err = anyhow::Error::from(crate::cli::BadSeconds { flag: "window", value: -1.0 });
        assert_eq!(exit_code_for_error(&err), 2);
    }

    #[test]
    fn exit_code_read_error() {
        let read = crate::counters::ReadError::Io {
            path: "/proc/net/dev".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let err = anyhow::Error::from(read).context("Reading network counters");
        assert_eq!(exit_code_for_error(&err), 3);
    }

    #[test]
    fn exit_code_other() {
        let err = anyhow::anyhow!("other");
        assert_eq!(exit_code_for_error(&err), 1);
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::engine::EngineConfig;
use crate::units::{DisplayUnit, UnitPreference};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the current aggregate byte counters once
    Counters {
        /// Read a /proc/net/dev-format table at this path instead of asking the OS
        #[arg(long)]
        proc_path: Option<PathBuf>,
        /// Count the loopback interface too
        #[arg(long)]
        include_loopback: bool,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Continuously report smoothed download/upload rates
    Watch(Watch),
}

#[derive(Parser, Clone, Debug)]
pub struct Watch {
    /// How updates are presented
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Use a synthetic traffic source instead of the system counters
    #[arg(long)]
    pub mock: bool,

    /// Read a /proc/net/dev-format table at this path instead of asking the OS
    #[arg(long)]
    pub proc_path: Option<PathBuf>,

    /// Count the loopback interface too
    #[arg(long)]
    pub include_loopback: bool,

    /// Display unit
    #[arg(long, value_enum, default_value_t = UnitOpt::Auto)]
    pub unit: UnitOpt,

    /// Shortest poll interval, seconds
    #[arg(long, default_value_t = 0.5)]
    pub min_interval: f64,

    /// Longest poll interval, seconds
    #[arg(long, default_value_t = 2.0)]
    pub max_interval: f64,

    /// Poll interval to start from, seconds
    #[arg(long, default_value_t = 1.0)]
    pub initial_interval: f64,

    /// Samples kept per direction for smoothing
    #[arg(long, default_value_t = 5)]
    pub buffer: usize,

    /// Smoothing window, seconds
    #[arg(long, default_value_t = 10.0)]
    pub window: f64,

    /// Minimum gap between delivered updates, seconds
    #[arg(long, default_value_t = 0.5)]
    pub min_delivery: f64,

    /// Retry delay after a failed counter read, seconds
    #[arg(long, default_value_t = 1.0)]
    pub fallback_interval: f64,

    /// Consecutive read failures before reporting a degraded state
    #[arg(long, default_value_t = 3)]
    pub degraded_after: u32,

    /// Give up on a single counter read after this long, seconds
    #[arg(long, default_value_t = 2.0)]
    pub read_timeout: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Tui,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitOpt {
    Auto,
    Bytes,
    Kbytes,
    Mbytes,
    Kbits,
    Mbits,
}

impl From<UnitOpt> for UnitPreference {
    fn from(v: UnitOpt) -> Self {
        match v {
            UnitOpt::Auto => UnitPreference::Auto,
            UnitOpt::Bytes => UnitPreference::Fixed(DisplayUnit::BytesPerSec),
            UnitOpt::Kbytes => UnitPreference::Fixed(DisplayUnit::KilobytesPerSec),
            UnitOpt::Mbytes => UnitPreference::Fixed(DisplayUnit::MegabytesPerSec),
            UnitOpt::Kbits => UnitPreference::Fixed(DisplayUnit::KilobitsPerSec),
            UnitOpt::Mbits => UnitPreference::Fixed(DisplayUnit::MegabitsPerSec),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("--{flag} must be a finite, non-negative number of seconds (got {value})")]
pub struct BadSeconds {
    pub flag: &'static str,
    pub value: f64,
}

fn seconds(flag: &'static str, value: f64) -> Result<Duration, BadSeconds> {
    Duration::try_from_secs_f64(value).map_err(|_| BadSeconds { flag, value })
}

impl Watch {
    /// Convert the flags into an engine config. Range checks are left to `EngineConfig::validate`.
    pub fn engine_config(&self) -> Result<EngineConfig, BadSeconds> {
        Ok(EngineConfig {
            min_interval: seconds("min-interval", self.min_interval)?,
            max_interval: seconds("max-interval", self.max_interval)?,
            initial_interval: seconds("initial-interval", self.initial_interval)?,
            buffer_capacity: self.buffer,
            window: seconds("window", self.window)?,
            min_delivery_spacing: seconds("min-delivery", self.min_delivery)?,
            fallback_interval: seconds("fallback-interval", self.fallback_interval)?,
            degraded_after: self.degraded_after,
            read_timeout: seconds("read-timeout", self.read_timeout)?,
            unit: self.unit.into(),
            ..EngineConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch(args: &[&str]) -> Watch {
        let mut argv = vec!["netspeed", "watch"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Some(Commands::Watch(w)) => w,
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let cfg = watch(&[]).engine_config().unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn flags_map_into_config() {
        let w = watch(&["--min-interval", "0.25", "--max-interval", "4", "--buffer", "8", "--unit", "mbits"]);
        let cfg = w.engine_config().unwrap();
        assert_eq!(cfg.min_interval, Duration::from_millis(250));
        assert_eq!(cfg.max_interval, Duration::from_secs(4));
        assert_eq!(cfg.buffer_capacity, 8);
        assert_eq!(cfg.unit, UnitPreference::Fixed(DisplayUnit::MegabitsPerSec));
    }

    #[test]
    fn negative_seconds_rejected() {
        let w = watch(&["--window=-1"]);
        assert_eq!(w.engine_config().unwrap_err(), BadSeconds { flag: "window", value: -1.0 });
    }

    #[test]
    fn proc_path_is_an_opt_in_override() {
        assert_eq!(watch(&[]).proc_path, None);
        let w = watch(&["--proc-path", "/tmp/net_dev", "--read-timeout", "0.25"]);
        assert_eq!(w.proc_path, Some(PathBuf::from("/tmp/net_dev")));
        assert_eq!(w.engine_config().unwrap().read_timeout, Duration::from_millis(250));
    }

    #[test]
    fn output_format_parses() {
        assert_eq!(watch(&["--format", "json"]).format, OutputFormat::Json);
        assert_eq!(watch(&["--format", "tui", "--mock"]).format, OutputFormat::Tui);
    }
}

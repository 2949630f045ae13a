use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::Networks;
use thiserror::Error;

/// One read of the cumulative transfer counters, summed over interfaces.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Monotonic time of the read, relative to the source's own origin.
    #[serde(serialize_with = "as_secs_f64")]
    pub timestamp: Duration,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

fn as_secs_f64<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("reading {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed counter line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("counter read timed out after {0:?}")]
    Timeout(Duration),
    #[error("counter reader is gone")]
    Unavailable,
}

/// Anything that can hand out fresh cumulative byte counters.
pub trait CounterSource: Send {
    fn read(&mut self) -> Result<CounterSnapshot, ReadError>;
}

impl<T: CounterSource + ?Sized> CounterSource for Box<T> {
    fn read(&mut self) -> Result<CounterSnapshot, ReadError> {
        (**self).read()
    }
}

pub(crate) fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.starts_with("Loopback")
}

/// Sum cumulative `(name, received, sent)` counters, skipping loopback unless asked.
/// Counters wrap rather than saturate; the engine treats a wrap as a reset.
pub(crate) fn sum_interfaces<'a>(
    interfaces: impl IntoIterator<Item = (&'a str, u64, u64)>,
    include_loopback: bool,
) -> (u64, u64) {
    interfaces
        .into_iter()
        .filter(|(name, _, _)| include_loopback || !is_loopback(name))
        .fold((0u64, 0u64), |(rx, tx), (_, r, t)| (rx.wrapping_add(r), tx.wrapping_add(t)))
}

/// Aggregate counters of every interface the OS reports, via `sysinfo`.
pub struct SysinfoSource {
    networks: Networks,
    include_loopback: bool,
    origin: Instant,
}

impl SysinfoSource {
    pub fn new(include_loopback: bool) -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            include_loopback,
            origin: Instant::now(),
        }
    }
}

impl CounterSource for SysinfoSource {
    fn read(&mut self) -> Result<CounterSnapshot, ReadError> {
        // Interfaces that went away stop contributing; the drop in totals reads as a reset.
        self.networks.refresh(true);
        let (bytes_received, bytes_sent) = sum_interfaces(
            self.networks
                .iter()
                .map(|(name, data)| (name.as_str(), data.total_received(), data.total_transmitted())),
            self.include_loopback,
        );
        Ok(CounterSnapshot {
            timestamp: self.origin.elapsed(),
            bytes_received,
            bytes_sent,
        })
    }
}

/// Aggregate counters from a Linux `/proc/net/dev`-format table at an explicit path.
pub struct ProcNetDev {
    path: PathBuf,
    include_loopback: bool,
    origin: Instant,
}

impl ProcNetDev {
    pub fn with_path(path: impl AsRef<Path>, include_loopback: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            include_loopback,
            origin: Instant::now(),
        }
    }
}

impl CounterSource for ProcNetDev {
    fn read(&mut self) -> Result<CounterSnapshot, ReadError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| ReadError::Io {
            path: self.path.clone(),
            source,
        })?;
        let (bytes_received, bytes_sent) = parse_net_dev(&text, self.include_loopback)?;
        Ok(CounterSnapshot {
            timestamp: self.origin.elapsed(),
            bytes_received,
            bytes_sent,
        })
    }
}

/// OS counters by default; a `/proc/net/dev`-format table when a path is given.
pub fn open_counters(proc_path: Option<&Path>, include_loopback: bool) -> Box<dyn CounterSource> {
    match proc_path {
        Some(path) => Box::new(ProcNetDev::with_path(path, include_loopback)),
        None => Box::new(SysinfoSource::new(include_loopback)),
    }
}

// Pure parser so the table format can be tested without a live kernel.
// Layout: two header lines, then `iface: rx_bytes rx_packets ... (8 rx cols) tx_bytes ...`.
pub(crate) fn parse_net_dev(text: &str, include_loopback: bool) -> Result<(u64, u64), ReadError> {
    let mut rows = Vec::new();
    for (idx, raw) in text.lines().enumerate().skip(2) {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, rest)) = line.split_once(':') else {
            return Err(ReadError::Parse { line: idx + 1, reason: "missing interface separator".into() });
        };
        let cols: Vec<&str> = rest.split_whitespace().collect();
        if cols.len() < 9 {
            return Err(ReadError::Parse {
                line: idx + 1,
                reason: format!("expected at least 9 columns, found {}", cols.len()),
            });
        }
        let column = |i: usize| {
            cols[i].parse::<u64>().map_err(|e| ReadError::Parse {
                line: idx + 1,
                reason: format!("column {i}: {e}"),
            })
        };
        rows.push((name.trim(), column(0)?, column(8)?));
    }
    Ok(sum_interfaces(rows, include_loopback))
}

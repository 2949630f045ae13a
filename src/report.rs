use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{self as channel, Receiver};
use tracing::{info, warn};

use crate::engine::{HealthEvent, RateUpdate};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineFormat {
    Text,
    Json,
}

pub fn format_update(update: &RateUpdate) -> String {
    format!("↓ {}  ↑ {}", update.download(), update.upload())
}

pub fn format_health(event: &HealthEvent) -> String {
    match event {
        HealthEvent::Degraded { consecutive_failures, last_error } => {
            format!("! degraded: {consecutive_failures} consecutive counter read failures ({last_error})")
        }
        HealthEvent::Recovered { after_failures } => {
            format!("! recovered after {after_failures} failed reads")
        }
    }
}

/// Drain updates and health events to `out`, one line each, until `stop` is set
/// or the engine side goes away.
pub fn print_updates<W: Write>(
    updates: Receiver<RateUpdate>,
    health: Receiver<HealthEvent>,
    format: LineFormat,
    stop: Arc<AtomicBool>,
    out: &mut W,
) -> Result<()> {
    let closed = channel::never();
    let mut health_open = true;
    while !stop.load(Ordering::Relaxed) {
        channel::select! {
            recv(updates) -> msg => match msg {
                Ok(update) => write_update(out, format, &update)?,
                Err(_) => break,
            },
            recv(if health_open { &health } else { &closed }) -> msg => match msg {
                Ok(event) => {
                    match &event {
                        HealthEvent::Degraded { .. } => warn!(?event, "Sampling degraded"),
                        HealthEvent::Recovered { .. } => info!(?event, "Sampling recovered"),
                    }
                    write_health(out, format, &event)?;
                }
                Err(_) => health_open = false,
            },
            default(Duration::from_millis(200)) => {}
        }
    }
    Ok(())
}

fn write_update<W: Write>(out: &mut W, format: LineFormat, update: &RateUpdate) -> Result<()> {
    match format {
        LineFormat::Text => writeln!(out, "{}", format_update(update)),
        LineFormat::Json => {
            serde_json::to_writer(&mut *out, update).context("Encoding rate update")?;
            writeln!(out)
        }
    }
    .context("Writing rate update")?;
    out.flush().context("Flushing output")
}

fn write_health<W: Write>(out: &mut W, format: LineFormat, event: &HealthEvent) -> Result<()> {
    match format {
        LineFormat::Text => writeln!(out, "{}", format_health(event)),
        LineFormat::Json => {
            serde_json::to_writer(&mut *out, event).context("Encoding health event")?;
            writeln!(out)
        }
    }
    .context("Writing health event")?;
    out.flush().context("Flushing output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::DisplayUnit;

    fn sample() -> RateUpdate {
        RateUpdate {
            download_rate: 1.0,
            download_unit: DisplayUnit::MegabytesPerSec,
            upload_rate: 12.5,
            upload_unit: DisplayUnit::KilobytesPerSec,
            elapsed_secs: 1.0,
            download_bps: 1_048_576.0,
            upload_bps: 12_800.0,
        }
    }

    #[test]
    fn text_line() {
        assert_eq!(format_update(&sample()), "↓ 1.00 MB/s  ↑ 12.50 KB/s");
    }

    #[test]
    fn prints_until_engine_disconnects() {
        let (utx, urx) = channel::unbounded();
        let (htx, hrx) = channel::unbounded();
        utx.send(sample()).unwrap();
        htx.send(HealthEvent::Recovered { after_failures: 4 }).unwrap();
        drop(utx);
        drop(htx);
        let mut out = Vec::new();
        print_updates(urx, hrx, LineFormat::Text, Arc::new(AtomicBool::new(false)), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("↓ 1.00 MB/s"));
    }

    #[test]
    fn json_lines_carry_units_and_event_tags() {
        let mut out = Vec::new();
        write_update(&mut out, LineFormat::Json, &sample()).unwrap();
        write_health(
            &mut out,
            LineFormat::Json,
            &HealthEvent::Degraded { consecutive_failures: 3, last_error: "boom".into() },
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        let update: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(update["download_unit"], "MegabytesPerSec");
        assert_eq!(update["upload_rate"], 12.5);
        let event: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(event["event"], "degraded");
        assert_eq!(event["consecutive_failures"], 3);
    }

    #[test]
    fn stop_flag_ends_the_loop() {
        let (_utx, urx) = channel::unbounded::<RateUpdate>();
        let (_htx, hrx) = channel::unbounded::<HealthEvent>();
        let mut out = Vec::new();
        print_updates(urx, hrx, LineFormat::Json, Arc::new(AtomicBool::new(true)), &mut out).unwrap();
        assert!(out.is_empty());
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{OutputFormat, Watch};
use crate::counters::{open_counters, CounterSource};
use crate::engine::SamplingEngine;
use crate::mock::SyntheticSource;
use crate::report::{print_updates, LineFormat};
use crate::ui::overview::run_tui;

pub fn run_watch(watch: Watch) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }

    run_watch_with_shutdown(watch, stop_flag)
}

pub(crate) fn open_source(watch: &Watch) -> Result<Box<dyn CounterSource>> {
    if watch.mock {
        info!("Using synthetic traffic source");
        return Ok(Box::new(SyntheticSource::new()));
    }
    let mut source = open_counters(watch.proc_path.as_deref(), watch.include_loopback);
    // Fail fast on a missing or unreadable table rather than retrying forever.
    source.read().with_context(|| match &watch.proc_path {
        Some(path) => format!("Reading network counters from {}", path.display()),
        None => "Reading network counters from the OS".to_string(),
    })?;
    Ok(source)
}

pub(crate) fn run_watch_with_shutdown(watch: Watch, stop_flag: Arc<AtomicBool>) -> Result<()> {
    let config = watch.engine_config()?;
    let source = open_source(&watch)?;
    let engine = SamplingEngine::new(config, source).context("Invalid sampling configuration")?;
    let updates = engine.subscribe();
    let health = engine.health();
    engine.start().context("Starting sampling engine")?;
    info!(format = ?watch.format, unit = ?engine.config().unit, "Watching throughput");

    let result = match watch.format {
        OutputFormat::Text | OutputFormat::Json => {
            let format = if watch.format == OutputFormat::Json { LineFormat::Json } else { LineFormat::Text };
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            print_updates(updates, health, format, stop_flag, &mut out)
        }
        OutputFormat::Tui => run_tui(updates, health, stop_flag),
    };

    info!("Shutting down");
    engine.stop();
    result
}

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::Receiver;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    cursor::Show,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    widgets::{Block, Borders, List, ListItem, Paragraph, Sparkline},
    Terminal,
};

use crate::engine::{HealthEvent, RateUpdate};
use crate::report::{format_health, format_update};

const HISTORY: usize = 120;
const MAX_EVENTS: usize = 100;

/// Everything the dashboard draws, kept apart from the terminal so it can be tested.
pub struct OverviewState {
    pub latest: Option<RateUpdate>,
    pub download_history: VecDeque<u64>,
    pub upload_history: VecDeque<u64>,
    pub events: VecDeque<String>,
    pub degraded: bool,
}

impl OverviewState {
    pub fn new() -> Self {
        Self {
            latest: None,
            download_history: VecDeque::with_capacity(HISTORY),
            upload_history: VecDeque::with_capacity(HISTORY),
            events: VecDeque::new(),
            degraded: false,
        }
    }

    pub fn apply_update(&mut self, update: RateUpdate) {
        push_bounded(&mut self.download_history, update.download_bps as u64, HISTORY);
        push_bounded(&mut self.upload_history, update.upload_bps as u64, HISTORY);
        self.latest = Some(update);
    }

    pub fn apply_health(&mut self, event: HealthEvent) {
        self.degraded = matches!(event, HealthEvent::Degraded { .. });
        push_bounded(&mut self.events, format_health(&event), MAX_EVENTS);
    }

    pub fn status_line(&self) -> String {
        match (&self.latest, self.degraded) {
            (_, true) => "Counters unavailable, retrying".to_string(),
            (None, false) => "Waiting for first sample".to_string(),
            (Some(u), false) => format!("{}  (cycle {:.2}s)", format_update(u), u.elapsed_secs),
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    queue.push_back(item);
    while queue.len() > cap {
        queue.pop_front();
    }
}

/// Runs its closure on drop, so cleanup also happens on early `?` returns.
struct OnDrop<F: FnMut()>(F);

impl<F: FnMut()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        (self.0)();
    }
}

fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(std::io::stdout(), LeaveAlternateScreen, Show);
}

pub fn run_tui(
    updates: Receiver<RateUpdate>,
    health: Receiver<HealthEvent>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    enable_raw_mode()?;
    let _restore = OnDrop(restore_terminal);
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = OverviewState::new();

    while !stop.load(Ordering::Relaxed) {
        while let Ok(update) = updates.try_recv() {
            state.apply_update(update);
        }
        while let Ok(event) = health.try_recv() {
            state.apply_health(event);
        }

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3),
                    Constraint::Length(6),
                    Constraint::Length(6),
                    Constraint::Min(0),
                ])
                .split(f.size());

            let status = Paragraph::new(state.status_line())
                .block(Block::default().title("netspeed (q to quit)").borders(Borders::ALL));
            f.render_widget(status, chunks[0]);

            let down_title = match &state.latest {
                Some(u) => format!("Download {}", u.download()),
                None => "Download".to_string(),
            };
            let down_data: Vec<u64> = state.download_history.iter().copied().collect();
            let down = Sparkline::default()
                .block(Block::default().title(down_title).borders(Borders::ALL))
                .data(&down_data);
            f.render_widget(down, chunks[1]);

            let up_title = match &state.latest {
                Some(u) => format!("Upload {}", u.upload()),
                None => "Upload".to_string(),
            };
            let up_data: Vec<u64> = state.upload_history.iter().copied().collect();
            let up = Sparkline::default()
                .block(Block::default().title(up_title).borders(Borders::ALL))
                .data(&up_data);
            f.render_widget(up, chunks[2]);

            let items: Vec<ListItem> = state.events.iter().rev().map(|l| ListItem::new(l.clone())).collect();
            let list = List::new(items).block(Block::default().title("Events").borders(Borders::ALL));
            f.render_widget(list, chunks[3]);
        })?;

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q')
                    || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
                {
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    Ok(())
}

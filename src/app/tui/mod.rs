mod render;

use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use crate::db::KvStore;

use super::page::{TraceStep, read_trace};
use super::replay::ReplaySession;
use super::tracker::TrackerConfig;

use self::render::draw_tui;

const LOG_CAPACITY: usize = 200;
const IDLE_WAIT: Duration = Duration::from_secs(3600);

pub(super) struct EventLog {
    lines: VecDeque<String>,
    last_sink_text: Option<String>,
}

impl EventLog {
    fn new() -> Self {
        Self {
            lines: VecDeque::with_capacity(LOG_CAPACITY),
            last_sink_text: None,
        }
    }

    fn push(&mut self, now_ms: u64, message: impl AsRef<str>) {
        if self.lines.len() == LOG_CAPACITY {
            self.lines.pop_front();
        }
        self.lines
            .push_back(format!("[{now_ms:>7}ms] {}", message.as_ref()));
    }

    fn note_sink<S: KvStore>(&mut self, session: &ReplaySession<S>) {
        let current = session.page().stats_text().map(str::to_string);
        if current.is_some() && current != self.last_sink_text {
            if let Some(text) = &current {
                self.push(session.now_ms(), format!("sink <- {text}"));
            }
            self.last_sink_text = current;
        }
    }

    pub(super) fn lines(&self) -> impl DoubleEndedIterator<Item = &String> {
        self.lines.iter()
    }
}

/// The ratatui terminal in raw mode on the alternate screen. Dropping it puts
/// the user's terminal back, including on early returns.
struct Dashboard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Dashboard {
    fn open() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        if let Err(err) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(err).context("failed to enter alternate screen");
        }
        let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
            .context("failed to initialize terminal backend")?;
        terminal.clear()?;
        Ok(Self { terminal })
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Where the replay stands relative to the trace.
struct Cursor {
    next_step: usize,
    wait_until: Option<u64>,
}

pub(crate) fn run_tui<S: KvStore>(store: S, config: TrackerConfig, trace_path: &Path) -> Result<()> {
    let trace = read_trace(trace_path)?;
    let mut dashboard = Dashboard::open()?;

    let mut session = ReplaySession::new(store, config);
    let mut log = EventLog::new();
    if trace.skipped_lines > 0 {
        log.push(0, format!("ignored {} malformed trace line(s)", trace.skipped_lines));
    }
    session.start();
    log.note_sink(&session);

    let origin = Instant::now();
    let mut cursor = Cursor {
        next_step: 0,
        wait_until: None,
    };

    loop {
        let wall_ms = origin.elapsed().as_millis() as u64;
        drive(&mut session, &trace.steps, &mut cursor, &mut log, wall_ms);

        let finished =
            cursor.next_step >= trace.steps.len() && cursor.wait_until.is_none();
        dashboard
            .terminal
            .draw(|frame| draw_tui(frame, &session, &log, wall_ms, finished))?;

        let next_moment = [cursor.wait_until, session.reconciler().next_deadline()]
            .into_iter()
            .flatten()
            .min();
        let timeout = match next_moment {
            Some(moment) => Duration::from_millis(moment.saturating_sub(wall_ms)),
            None => IDLE_WAIT,
        };

        if !event::poll(timeout)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
            break;
        }
    }

    session.stop();
    drop(dashboard);
    Ok(())
}

/// Catches the replay up to wall-clock time `wall_ms`: applies every trace
/// step that is due and fires tracker deadlines along the way.
fn drive<S: KvStore>(
    session: &mut ReplaySession<S>,
    steps: &[TraceStep],
    cursor: &mut Cursor,
    log: &mut EventLog,
    wall_ms: u64,
) {
    loop {
        if let Some(target) = cursor.wait_until {
            if wall_ms < target {
                break;
            }
            session.advance_to(target);
            log.note_sink(session);
            cursor.wait_until = None;
        }

        let Some(step) = steps.get(cursor.next_step) else {
            break;
        };
        cursor.next_step += 1;
        match step {
            TraceStep::Wait { ms } => cursor.wait_until = Some(session.now_ms() + ms),
            _ => {
                match session.apply(step) {
                    Ok(()) => log.push(session.now_ms(), step.label()),
                    Err(err) => log.push(
                        session.now_ms(),
                        format!("skipped '{}': {err:#}", step.label()),
                    ),
                }
                log.note_sink(session);
            }
        }
    }

    let horizon = cursor.wait_until.map_or(wall_ms, |target| target.min(wall_ms));
    session.advance_to(horizon);
    log.note_sink(session);
}

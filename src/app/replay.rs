use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::db::KvStore;

use super::page::{Document, Signal, TraceStep, read_trace};
use super::tracker::{Reconciler, TrackerConfig, WatchStore};

/// A page model plus the tracker reconciling against it, on a virtual
/// millisecond clock. The tracker's delayed continuations run only when the
/// clock is advanced past their deadline.
pub(crate) struct ReplaySession<S> {
    page: Document,
    reconciler: Reconciler<S>,
    now_ms: u64,
    failed_steps: usize,
}

impl<S: KvStore> ReplaySession<S> {
    pub(crate) fn new(store: S, config: TrackerConfig) -> Self {
        Self {
            page: Document::new("about:blank"),
            reconciler: Reconciler::new(WatchStore::new(store), config),
            now_ms: 0,
            failed_steps: 0,
        }
    }

    pub(crate) fn start(&mut self) {
        self.reconciler.start(&mut self.page, self.now_ms);
    }

    pub(crate) fn stop(&mut self) {
        self.reconciler.stop(&mut self.page);
    }

    pub(crate) fn page(&self) -> &Document {
        &self.page
    }

    pub(crate) fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub(crate) fn failed_steps(&self) -> usize {
        self.failed_steps
    }

    /// Applies a page-changing step at the current time. `wait` steps are
    /// the caller's business; see [`ReplaySession::advance_to`].
    pub(crate) fn apply(&mut self, step: &TraceStep) -> Result<()> {
        let signals = match step.apply(&mut self.page) {
            Ok(signals) => signals,
            Err(err) => {
                self.failed_steps += 1;
                return Err(err);
            }
        };
        for signal in signals {
            self.dispatch(signal);
        }
        Ok(())
    }

    pub(crate) fn dispatch(&mut self, signal: Signal) {
        self.reconciler.handle(&mut self.page, signal, self.now_ms);
    }

    /// The next moment something happens, capped at `target`.
    pub(crate) fn next_stop(&self, target: u64) -> u64 {
        self.reconciler
            .next_deadline()
            .map(|deadline| deadline.max(self.now_ms).min(target))
            .unwrap_or(target)
    }

    /// Fires every deadline up to and including `target`, in order.
    pub(crate) fn advance_to(&mut self, target: u64) {
        while let Some(deadline) = self.reconciler.next_deadline()
            && deadline <= target
        {
            self.now_ms = self.now_ms.max(deadline);
            self.reconciler.on_timer(&mut self.page, self.now_ms);
        }
        self.now_ms = self.now_ms.max(target);
    }

    /// Runs the clock until nothing is scheduled.
    #[cfg(test)]
    pub(crate) fn settle(&mut self) {
        while let Some(deadline) = self.reconciler.next_deadline() {
            self.advance_to(deadline);
        }
    }

    /// Applies a whole trace on the virtual clock and settles.
    #[cfg(test)]
    pub(crate) fn run_steps(&mut self, steps: &[TraceStep]) {
        for step in steps {
            match step {
                TraceStep::Wait { ms } => self.advance_to(self.now_ms + ms),
                _ => {
                    if let Err(err) = self.apply(step) {
                        warn!(step = %step.label(), error = %format!("{err:#}"), "trace step skipped");
                    }
                }
            }
        }
        self.settle();
    }
}

pub(crate) fn run_replay<S: KvStore>(
    store: S,
    config: TrackerConfig,
    trace_path: &Path,
    realtime: bool,
) -> Result<()> {
    let trace = read_trace(trace_path)?;
    if trace.steps.is_empty() {
        println!("Trace {} has no steps.", trace_path.display());
        return Ok(());
    }

    let mut session = ReplaySession::new(store, config);
    let mut printer = SinkPrinter::default();
    session.start();
    printer.observe(&session);

    for step in &trace.steps {
        match step {
            TraceStep::Wait { ms } => {
                let target = session.now_ms() + ms;
                loop {
                    let stop = session.next_stop(target);
                    if realtime {
                        thread::sleep(Duration::from_millis(stop - session.now_ms()));
                    }
                    session.advance_to(stop);
                    printer.observe(&session);
                    if stop >= target {
                        break;
                    }
                }
            }
            _ => {
                if let Err(err) = session.apply(step) {
                    println!(
                        "[{:>7}ms] skipped '{}': {err:#}",
                        session.now_ms(),
                        step.label()
                    );
                }
                printer.observe(&session);
            }
        }
    }

    while let Some(deadline) = session.reconciler().next_deadline() {
        if realtime {
            thread::sleep(Duration::from_millis(
                deadline.saturating_sub(session.now_ms()),
            ));
        }
        session.advance_to(deadline);
        printer.observe(&session);
    }

    let stats = session.reconciler().sampler().stats();
    println!();
    println!(
        "Final: {}",
        session.page().stats_text().unwrap_or("(no stats container)")
    );
    println!("  State: {}", session.reconciler().state().label());
    println!(
        "  Samples: {} started, {} evaluations, {} coalesced bursts, {} timeouts",
        stats.samples_started, stats.evaluations, stats.bursts_coalesced, stats.timeouts
    );
    println!(
        "  Observers: {} attached, {} still live",
        session.page().observers_created(),
        session.page().live_observers()
    );
    if trace.skipped_lines > 0 || session.failed_steps() > 0 {
        println!(
            "  Skipped: {} malformed line(s), {} failed step(s)",
            trace.skipped_lines,
            session.failed_steps()
        );
    }
    session.stop();
    Ok(())
}

#[derive(Default)]
struct SinkPrinter {
    last: Option<String>,
}

impl SinkPrinter {
    fn observe<S: KvStore>(&mut self, session: &ReplaySession<S>) {
        let current = session.page().stats_text().map(str::to_string);
        if current.is_some() && current != self.last {
            if let Some(text) = &current {
                println!("[{:>7}ms] {text}", session.now_ms());
            }
            self.last = current;
        }
    }
}

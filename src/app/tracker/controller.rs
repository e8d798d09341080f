use tracing::{debug, info, warn};

use super::super::page::{
    BELOW_ID, ITEM_CONTAINER_ID, Layout, ObserverId, PLAYER_ID, PRIMARY_INNER_ID, PageSource,
    Placement, ProgressSink, SECONDARY_ID, SECONDARY_INNER_ID, Signal,
};
use super::{
    DisplayState, Fault, PlaylistId, PlaylistSnapshot, SampleStart, TrackerConfig,
    VisibilitySampler, WatchStore, WatchedSource, count_items, item_id_from_location,
    resolve_identity,
};
use crate::db::KvStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrackerState {
    Idle,
    Tracking(PlaylistId),
    /// Old watch data is being evicted. Only observable from inside a tick.
    Transitioning {
        from: Option<PlaylistId>,
        to: PlaylistId,
    },
}

impl TrackerState {
    pub(crate) fn label(&self) -> String {
        match self {
            Self::Idle => "idle".to_string(),
            Self::Tracking(id) => format!("tracking {id}"),
            Self::Transitioning { to, .. } => format!("switching to {to}"),
        }
    }
}

/// Ties page signals to the watch store and the sampler and keeps the stats
/// container in the page up to date.
///
/// Every entry point is safe to call any number of times: observers fire
/// constantly and most ticks change nothing.
pub(crate) struct Reconciler<S> {
    config: TrackerConfig,
    store: WatchStore<S>,
    sampler: VisibilitySampler,
    state: TrackerState,
    observer: Option<ObserverId>,
    snapshot: Option<PlaylistSnapshot>,
    provisional_total: usize,
    /// Set by a playlist switch; the watched count reads as zero until the
    /// new playlist produces a sample or a recorded item.
    switch_reset: bool,
    shown: Option<DisplayState>,
}

impl<S: KvStore> Reconciler<S> {
    pub(crate) fn new(store: WatchStore<S>, config: TrackerConfig) -> Self {
        Self {
            sampler: VisibilitySampler::new(config.debounce_ms, config.sample_timeout_ms),
            config,
            store,
            state: TrackerState::Idle,
            observer: None,
            snapshot: None,
            provisional_total: 0,
            switch_reset: false,
            shown: None,
        }
    }

    pub(crate) fn state(&self) -> &TrackerState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &WatchStore<S> {
        &self.store
    }

    pub(crate) fn sampler(&self) -> &VisibilitySampler {
        &self.sampler
    }

    /// Last state pushed to the sink.
    pub(crate) fn shown(&self) -> Option<DisplayState> {
        self.shown
    }

    pub(crate) fn is_running(&self) -> bool {
        self.observer.is_some()
    }

    /// Attaches the page-wide observer and runs a first tick.
    pub(crate) fn start<P: PageSource + ProgressSink>(&mut self, page: &mut P, now: u64) {
        if let Some(previous) = self.observer.take() {
            page.disconnect(previous);
        }
        let root = page.root();
        self.observer = Some(page.observe(root));
        info!(location = page.location(), "tracker started");
        self.tick(page, now);
    }

    pub(crate) fn stop<P: PageSource>(&mut self, page: &mut P) {
        self.sampler.cancel(page);
        if let Some(observer) = self.observer.take() {
            page.disconnect(observer);
        }
        self.state = TrackerState::Idle;
        info!("tracker stopped");
    }

    pub(crate) fn handle<P: PageSource + ProgressSink>(
        &mut self,
        page: &mut P,
        signal: Signal,
        now: u64,
    ) {
        if !self.is_running() {
            return;
        }
        match signal {
            Signal::ContentLoaded | Signal::NavigateFinished => {
                self.tick(page, now);
                self.record_watch(page);
            }
            Signal::Mutation(observer) if Some(observer) == self.observer => {
                self.tick(page, now);
            }
            Signal::Mutation(observer) => self.sampler.on_mutation(observer, now),
            Signal::Resize | Signal::LayoutChanged => {
                if matches!(self.state, TrackerState::Tracking(_)) {
                    self.ensure_container(page);
                }
            }
        }
    }

    /// Earliest moment [`Reconciler::on_timer`] has work to do.
    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.sampler.next_deadline()
    }

    pub(crate) fn on_timer<P: PageSource + ProgressSink>(&mut self, page: &mut P, now: u64) {
        let Some((playlist, snapshot)) = self.sampler.poll(page, now) else {
            return;
        };
        let TrackerState::Tracking(current) = &self.state else {
            return;
        };
        if *current != playlist {
            debug!(stale = %playlist, current = %current, "discarding snapshot for another playlist");
            return;
        }
        self.snapshot = Some(snapshot);
        self.switch_reset = false;
        self.push(page);
    }

    /// One reconciliation pass: resolve identity, evict on change, keep the
    /// container placed, keep a sample running.
    fn tick<P: PageSource + ProgressSink>(&mut self, page: &mut P, now: u64) {
        let Some(current) = resolve_identity(page.location()) else {
            if self.state != TrackerState::Idle {
                debug!("no playlist in location; going idle");
                self.sampler.cancel(page);
                self.state = TrackerState::Idle;
            }
            return;
        };

        let last_known = self.store.last_known_identity();
        if last_known.as_ref() != Some(&current) {
            self.transition(page, last_known, current.clone());
        } else if self.state != TrackerState::Tracking(current.clone()) {
            if self.sampler.sampling_for() != Some(&current) {
                self.sampler.cancel(page);
            }
            self.state = TrackerState::Tracking(current.clone());
            info!(playlist = %current, "tracking playlist");
            self.refresh_provisional_total(page, &current);
        }

        self.ensure_container(page);

        if self.sampler.is_sampling() && !self.sampler.watches_current_container(page) {
            debug!(playlist = %current, "item list replaced; restarting sample");
            self.sampler.cancel(page);
        }

        if !self.sampler.is_sampling() {
            match self.sampler.sample(page, Some(&current), now) {
                SampleStart::Pending | SampleStart::Deferred => {}
                SampleStart::Ready(snapshot) => {
                    self.snapshot = Some(snapshot);
                    self.switch_reset = false;
                    self.push(page);
                }
            }
        }
    }

    fn transition<P: PageSource + ProgressSink>(
        &mut self,
        page: &mut P,
        from: Option<PlaylistId>,
        to: PlaylistId,
    ) {
        self.state = TrackerState::Transitioning {
            from: from.clone(),
            to: to.clone(),
        };
        self.sampler.cancel(page);
        if let Some(old) = &from {
            self.store.evict(old);
        }
        self.store.record_identity(&to);
        info!(
            from = from.as_ref().map(PlaylistId::as_str).unwrap_or("-"),
            to = %to,
            "playlist changed; watch data reset"
        );

        self.snapshot = None;
        self.switch_reset = true;
        self.refresh_provisional_total(page, &to);
        self.state = TrackerState::Tracking(to);
        self.push(page);
    }

    fn record_watch<P: PageSource + ProgressSink>(&mut self, page: &mut P) {
        let TrackerState::Tracking(playlist) = &self.state else {
            return;
        };
        let Some(item) = item_id_from_location(page.location()) else {
            debug!(fault = %Fault::MissingContext("item id in location"), "no watch recorded");
            return;
        };
        let playlist = playlist.clone();
        self.switch_reset = false;
        if self.store.add(&playlist, &item) {
            info!(playlist = %playlist, item = %item, "item watched");
        }
        self.push(page);
    }

    /// Synchronous count of the links rendered right now, shown until the
    /// first settled sample arrives.
    fn refresh_provisional_total<P: PageSource>(&mut self, page: &P, playlist: &PlaylistId) {
        self.provisional_total = page
            .element_by_id(ITEM_CONTAINER_ID)
            .map(|container| count_items(page, container, playlist).total)
            .unwrap_or(0);
    }

    fn compute(&self) -> Option<DisplayState> {
        let TrackerState::Tracking(playlist) = &self.state else {
            return None;
        };
        let total = self
            .snapshot
            .map(|snapshot| snapshot.total)
            .unwrap_or(self.provisional_total);
        let watched = match self.config.watched_source {
            _ if self.switch_reset => 0,
            WatchedSource::Store => self.store.get(playlist).len(),
            WatchedSource::Host => self
                .snapshot
                .map(|snapshot| snapshot.watched_by_host)
                .unwrap_or(0),
        };
        Some(DisplayState::new(watched, total))
    }

    fn push<P: ProgressSink>(&mut self, page: &mut P) {
        let Some(next) = self.compute() else {
            return;
        };
        if !page.has_stats_container() || self.shown == Some(next) {
            return;
        }
        page.render(&next);
        self.shown = Some(next);
        debug!(text = %next.text(), "progress pushed");
    }

    /// Inserts the stats container if it is missing and a placement exists.
    /// Repeated calls never produce a second container.
    pub(crate) fn ensure_container<P: PageSource + ProgressSink>(&mut self, page: &mut P) {
        if page.has_stats_container() {
            return;
        }
        let Some(placement) = resolve_placement(page) else {
            debug!(fault = %Fault::MissingContext("insertion anchor"), "placement deferred");
            return;
        };
        if let Err(err) = page.insert_stats_container(placement) {
            warn!(error = %format!("{err:#}"), "stats container not inserted");
            return;
        }
        info!(layout = placement.layout.label(), "stats container inserted");

        // A fresh container is blank.
        self.shown = None;
        self.push(page);
    }
}

/// Where the stats container goes: ahead of the sidebar when it is showing,
/// otherwise between the player and the content below it.
pub(crate) fn resolve_placement<P: PageSource>(page: &P) -> Option<Placement> {
    if let (Some(secondary), Some(secondary_inner)) = (
        page.element_by_id(SECONDARY_ID),
        page.element_by_id(SECONDARY_INNER_ID),
    ) && page.is_visible(secondary)
    {
        return Some(Placement {
            parent: secondary,
            before: secondary_inner,
            layout: Layout::Sidebar,
        });
    }

    page.element_by_id(PLAYER_ID)?;
    let below = page.element_by_id(BELOW_ID)?;
    let primary_inner = page.element_by_id(PRIMARY_INNER_ID)?;
    if !page.contains(primary_inner, below) {
        return None;
    }
    // `#below` may sit inside wrappers; insert next to it.
    let parent = page.parent(below)?;
    Some(Placement {
        parent,
        before: below,
        layout: Layout::Stacked,
    })
}

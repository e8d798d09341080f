use tracing::{debug, warn};

use super::super::page::{ITEM_CONTAINER_ID, NodeId, ObserverId, PageSource};
use super::{Fault, PlaylistId, PlaylistSnapshot, link_playlist};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleStart {
    /// An observer is attached; the result arrives through [`VisibilitySampler::poll`].
    Pending,
    Ready(PlaylistSnapshot),
    /// The item list is not in the page yet.
    Deferred,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SamplerStats {
    pub(crate) samples_started: u64,
    pub(crate) evaluations: u64,
    pub(crate) bursts_coalesced: u64,
    pub(crate) timeouts: u64,
    pub(crate) observers_released: u64,
}

#[derive(Debug, Clone)]
struct InFlight {
    playlist: PlaylistId,
    container: NodeId,
    observer: ObserverId,
    started_at: u64,
    due_at: Option<u64>,
    timeout_at: u64,
    last_counts: Option<PlaylistSnapshot>,
    bursts: u32,
}

/// One-shot, debounced counter of the rendered item list.
///
/// Each `sample` call attaches a single observer to the item container. Every
/// mutation burst pushes the evaluation deadline out by the debounce window;
/// once the list has been quiet that long the items are counted, and a
/// nonempty count resolves the sample. A hard timeout bounds the whole wait.
/// The observer is released exactly once, whichever way the sample ends.
#[derive(Debug)]
pub(crate) struct VisibilitySampler {
    debounce_ms: u64,
    timeout_ms: u64,
    in_flight: Option<InFlight>,
    stats: SamplerStats,
}

impl VisibilitySampler {
    pub(crate) fn new(debounce_ms: u64, timeout_ms: u64) -> Self {
        Self {
            debounce_ms,
            timeout_ms: timeout_ms.max(debounce_ms),
            in_flight: None,
            stats: SamplerStats::default(),
        }
    }

    pub(crate) fn stats(&self) -> SamplerStats {
        self.stats
    }

    pub(crate) fn is_sampling(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn sampling_for(&self) -> Option<&PlaylistId> {
        self.in_flight.as_ref().map(|flight| &flight.playlist)
    }

    /// False when the in-flight sample observes an item list that is no
    /// longer the one in the page.
    pub(crate) fn watches_current_container<P: PageSource>(&self, page: &P) -> bool {
        self.in_flight.as_ref().is_none_or(|flight| {
            page.element_by_id(ITEM_CONTAINER_ID) == Some(flight.container)
        })
    }

    pub(crate) fn sample<P: PageSource>(
        &mut self,
        page: &mut P,
        playlist: Option<&PlaylistId>,
        now: u64,
    ) -> SampleStart {
        let Some(playlist) = playlist else {
            return SampleStart::Ready(PlaylistSnapshot::EMPTY);
        };
        self.cancel(page);

        let Some(container) = page.element_by_id(ITEM_CONTAINER_ID) else {
            debug!(fault = %Fault::MissingContext("item list container"), "sample deferred");
            return SampleStart::Deferred;
        };

        let observer = page.observe(container);
        self.stats.samples_started += 1;
        self.in_flight = Some(InFlight {
            playlist: playlist.clone(),
            container,
            observer,
            started_at: now,
            due_at: Some(now + self.debounce_ms),
            timeout_at: now + self.timeout_ms,
            last_counts: None,
            bursts: 0,
        });
        debug!(playlist = %playlist, now, "sample started");
        SampleStart::Pending
    }

    /// Restarts the quiet window. Ignores callbacks for observers this
    /// sampler does not own.
    pub(crate) fn on_mutation(&mut self, observer: ObserverId, now: u64) {
        let debounce_ms = self.debounce_ms;
        let Some(flight) = self.in_flight.as_mut() else {
            return;
        };
        if flight.observer != observer {
            return;
        }
        if flight.due_at.is_some() {
            self.stats.bursts_coalesced += 1;
        }
        flight.bursts += 1;
        flight.due_at = Some(now + debounce_ms);
    }

    pub(crate) fn next_deadline(&self) -> Option<u64> {
        let flight = self.in_flight.as_ref()?;
        Some(match flight.due_at {
            Some(due) => due.min(flight.timeout_at),
            None => flight.timeout_at,
        })
    }

    /// Runs whatever is due at `now`. Returns the snapshot when the sample
    /// resolves, tagged with the playlist it was taken for.
    pub(crate) fn poll<P: PageSource>(
        &mut self,
        page: &mut P,
        now: u64,
    ) -> Option<(PlaylistId, PlaylistSnapshot)> {
        let flight = self.in_flight.as_mut()?;

        if flight.due_at.is_some_and(|due| due <= now) {
            flight.due_at = None;
            self.stats.evaluations += 1;
            let counts = count_items(page, flight.container, &flight.playlist);
            flight.last_counts = Some(counts);
            if !counts.is_empty() {
                debug!(
                    playlist = %flight.playlist,
                    total = counts.total,
                    watched_by_host = counts.watched_by_host,
                    bursts = flight.bursts,
                    "item list settled"
                );
                return self.finish(page, counts);
            }
        }

        let flight = self.in_flight.as_ref()?;
        if now >= flight.timeout_at {
            self.stats.timeouts += 1;
            let fault = Fault::SamplerTimeout {
                waited_ms: now.saturating_sub(flight.started_at),
                bursts: flight.bursts,
            };
            warn!(%fault, playlist = %flight.playlist, "resolving with last observed counts");
            let counts = flight
                .last_counts
                .unwrap_or_else(|| count_items(page, flight.container, &flight.playlist));
            return self.finish(page, counts);
        }
        None
    }

    /// Drops any in-flight sample, releasing its observer.
    pub(crate) fn cancel<P: PageSource>(&mut self, page: &mut P) {
        if let Some(flight) = self.in_flight.take() {
            debug!(playlist = %flight.playlist, "sample cancelled");
            self.release(page, flight.observer);
        }
    }

    fn finish<P: PageSource>(
        &mut self,
        page: &mut P,
        counts: PlaylistSnapshot,
    ) -> Option<(PlaylistId, PlaylistSnapshot)> {
        let flight = self.in_flight.take()?;
        self.release(page, flight.observer);
        Some((flight.playlist, counts))
    }

    fn release<P: PageSource>(&mut self, page: &mut P, observer: ObserverId) {
        if page.disconnect(observer) {
            self.stats.observers_released += 1;
        }
    }
}

/// Counts links under `container` that belong to `playlist`, and how many of
/// those carry a nonzero progress overlay.
pub(crate) fn count_items<P: PageSource>(
    page: &P,
    container: NodeId,
    playlist: &PlaylistId,
) -> PlaylistSnapshot {
    let location = page.location();
    page.item_links(container)
        .iter()
        .filter(|link| link_playlist(&link.href, location).as_ref() == Some(playlist))
        .fold(PlaylistSnapshot::EMPTY, |mut acc, link| {
            acc.total += 1;
            if link.shows_progress() {
                acc.watched_by_host += 1;
            }
            acc
        })
}

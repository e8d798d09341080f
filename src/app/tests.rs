use anyhow::{Result, anyhow};

use crate::db::{KvEntry, KvStore, MemoryStore};

use super::format::{build_progress_gauge, truncate};
use super::page::*;
use super::replay::ReplaySession;
use super::tracker::*;

const WATCH_A: &str = "https://www.youtube.com/watch?v=a-0&list=PLA&index=1";

const SIDEBAR_LAYOUT: &str = r#"
# two-column watch page
{"type":"append","parent":"body","id":"columns"}
{"type":"append","parent":"columns","id":"primary"}
{"type":"append","parent":"primary","id":"primary-inner"}
{"type":"append","parent":"primary-inner","id":"player"}
{"type":"append","parent":"primary-inner","id":"below"}
{"type":"append","parent":"columns","id":"secondary"}
{"type":"append","parent":"secondary","id":"secondary-inner"}
{"type":"append","parent":"secondary-inner","id":"items"}
"#;

fn steps(raw: &str) -> Vec<TraceStep> {
    let parsed = parse_trace(raw);
    assert_eq!(parsed.skipped_lines, 0, "test trace should parse cleanly");
    parsed.steps
}

fn item_steps(list: &str, count: usize, with_progress: usize) -> Vec<TraceStep> {
    (0..count)
        .map(|i| TraceStep::AppendItem {
            parent: ITEM_CONTAINER_ID.to_string(),
            href: format!("/watch?v={}-{i}&list={list}&index={}", list.to_lowercase(), i + 1),
            progress: (i < with_progress).then_some(37.5),
        })
        .collect()
}

fn navigate(url: &str) -> TraceStep {
    TraceStep::Navigate {
        url: url.to_string(),
    }
}

fn wait(ms: u64) -> TraceStep {
    TraceStep::Wait { ms }
}

fn config(watched_source: WatchedSource) -> TrackerConfig {
    TrackerConfig {
        watched_source,
        ..TrackerConfig::default()
    }
}

fn started_session(store: &MemoryStore, source: WatchedSource) -> ReplaySession<&MemoryStore> {
    let mut session = ReplaySession::new(store, config(source));
    session.start();
    session.run_steps(&steps(SIDEBAR_LAYOUT));
    session
}

/// Builds the layout directly on a document, ignoring the signals.
fn laid_out_document(location: &str) -> Document {
    let mut doc = Document::new(location);
    for step in steps(SIDEBAR_LAYOUT) {
        step.apply(&mut doc).expect("layout step should apply");
    }
    doc
}

fn items_node(doc: &Document) -> NodeId {
    doc.element_by_id(ITEM_CONTAINER_ID)
        .expect("layout should contain the item list")
}

fn only_observer_on(doc: &Document, node: NodeId) -> ObserverId {
    let observers = doc.observers_for(node);
    assert_eq!(observers.len(), 1, "expected a single observer");
    observers[0]
}

struct RejectingStore {
    inner: MemoryStore,
}

impl KvStore for RejectingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(anyhow!("quota exceeded"))
    }

    fn remove(&self, _key: &str) -> Result<bool> {
        Err(anyhow!("storage unavailable"))
    }

    fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<KvEntry>> {
        self.inner.entries_with_prefix(prefix)
    }
}

#[test]
fn resolve_identity_reads_list_parameter() {
    let id = resolve_identity("https://www.youtube.com/watch?v=abc&list=PL1&index=2")
        .expect("list parameter should resolve");
    assert_eq!(id.as_str(), "PL1");
}

#[test]
fn resolve_identity_is_none_without_a_usable_list_parameter() {
    assert!(resolve_identity("https://www.youtube.com/watch?v=abc").is_none());
    assert!(resolve_identity("https://www.youtube.com/watch?v=abc&list=").is_none());
    assert!(resolve_identity("not a url").is_none());
}

#[test]
fn playlist_identities_compare_verbatim() {
    let upper = resolve_identity("https://www.youtube.com/playlist?list=PLabc").unwrap();
    let lower = resolve_identity("https://www.youtube.com/playlist?list=plabc").unwrap();
    assert_ne!(upper, lower);
}

#[test]
fn item_id_comes_from_v_parameter() {
    let item = item_id_from_location("https://www.youtube.com/watch?list=PL1&v=vid-9&t=42s")
        .expect("v parameter should resolve");
    assert_eq!(item.as_str(), "vid-9");
    assert!(item_id_from_location("https://www.youtube.com/playlist?list=PL1").is_none());
}

#[test]
fn link_playlist_resolves_relative_hrefs_and_matches_exactly() {
    let base = "https://www.youtube.com/watch?v=x&list=PL1";
    assert_eq!(
        link_playlist("/watch?v=a&list=PL1&index=3", base),
        Some(PlaylistId::new("PL1"))
    );
    assert_eq!(
        link_playlist("/watch?v=a&list=PL12", base),
        Some(PlaylistId::new("PL12"))
    );
    assert_eq!(link_playlist("/watch?v=a", base), None);
}

#[test]
fn percent_handles_empty_and_rounds() {
    assert_eq!(watched_percent(0, 0), 0);
    assert_eq!(watched_percent(5, 0), 0);
    assert_eq!(watched_percent(3, 10), 30);
    assert_eq!(watched_percent(1, 3), 33);
    assert_eq!(watched_percent(2, 3), 67);
}

#[test]
fn display_text_matches_sink_format() {
    let state = DisplayState::new(2, 5);
    assert_eq!(state.text(), "Videos Watched: 2/5 (40%)");
    assert_eq!(DisplayState::new(0, 0).text(), "Videos Watched: 0/0 (0%)");
}

#[test]
fn progress_gauge_caps_ratio_when_more_recorded_than_rendered() {
    let (ratio, label) = build_progress_gauge(&DisplayState::new(6, 4));
    assert_eq!(ratio, 1.0);
    assert_eq!(label, "6/4 (150%)");
}

#[test]
fn truncate_marks_cut_text() {
    assert_eq!(truncate("PLshort", 10), "PLshort");
    assert_eq!(truncate("PLabcdefghijkl", 8), "PLabc...");
}

#[test]
fn adding_same_item_twice_keeps_one_entry() {
    let kv = MemoryStore::default();
    let store = WatchStore::new(&kv);
    let playlist = PlaylistId::new("PL1");
    let item = ItemId::new("vid-1");

    assert!(store.add(&playlist, &item));
    assert!(!store.add(&playlist, &item));
    assert_eq!(store.get(&playlist).len(), 1);
}

#[test]
fn watched_sets_are_isolated_per_playlist() {
    let kv = MemoryStore::default();
    let store = WatchStore::new(&kv);
    let a = PlaylistId::new("PLA");
    let b = PlaylistId::new("PLB");

    store.add(&a, &ItemId::new("shared-looking-id"));
    store.add(&b, &ItemId::new("b-only"));

    assert!(!store.get(&b).contains(&ItemId::new("shared-looking-id")));
    assert_eq!(store.get(&b).len(), 1);

    assert!(store.evict(&a));
    assert!(store.get(&a).is_empty());
    assert_eq!(store.get(&b).len(), 1);
}

#[test]
fn corrupt_watched_value_reads_empty_and_is_overwritten() {
    let kv = MemoryStore::default();
    kv.set("watched-videos:PL1", "{not json").unwrap();
    let store = WatchStore::new(&kv);
    let playlist = PlaylistId::new("PL1");

    assert!(store.get(&playlist).is_empty());
    assert!(store.add(&playlist, &ItemId::new("vid-1")));

    let raw = kv.get("watched-videos:PL1").unwrap().expect("value should be rewritten");
    let parsed = parse_watched(&raw).expect("rewritten value should parse");
    assert_eq!(parsed.len(), 1);
}

#[test]
fn failing_writes_are_swallowed() {
    let kv = RejectingStore {
        inner: MemoryStore::default(),
    };
    let store = WatchStore::new(&kv);
    let playlist = PlaylistId::new("PL1");

    assert!(!store.add(&playlist, &ItemId::new("vid-1")));
    assert!(!store.evict(&playlist));
    store.record_identity(&playlist);
    assert!(store.get(&playlist).is_empty());
    assert!(store.last_known_identity().is_none());
}

#[test]
fn last_known_identity_survives_a_new_store_instance() {
    let kv = MemoryStore::default();
    WatchStore::new(&kv).record_identity(&PlaylistId::new("PL1"));
    let reloaded = WatchStore::new(&kv);
    assert_eq!(reloaded.last_known_identity(), Some(PlaylistId::new("PL1")));
}

#[test]
fn tracked_playlists_report_counts() {
    let kv = MemoryStore::default();
    let store = WatchStore::new(&kv);
    store.add(&PlaylistId::new("PL1"), &ItemId::new("a"));
    store.add(&PlaylistId::new("PL1"), &ItemId::new("b"));
    store.record_identity(&PlaylistId::new("PL1"));

    let tracked = store.tracked_playlists().unwrap();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].id.as_str(), "PL1");
    assert_eq!(tracked[0].watched, 2);
}

#[test]
fn sampler_without_identity_resolves_empty_and_observes_nothing() {
    let mut doc = laid_out_document("https://www.youtube.com/watch?v=abc");
    let mut sampler = VisibilitySampler::new(250, 5_000);

    let start = sampler.sample(&mut doc, None, 0);
    assert_eq!(start, SampleStart::Ready(PlaylistSnapshot::EMPTY));
    assert_eq!(doc.observers_created(), 0);
    assert!(!sampler.is_sampling());
}

#[test]
fn sampler_defers_when_item_list_is_missing() {
    let mut doc = Document::new(WATCH_A);
    let mut sampler = VisibilitySampler::new(250, 5_000);

    let start = sampler.sample(&mut doc, Some(&PlaylistId::new("PLA")), 0);
    assert_eq!(start, SampleStart::Deferred);
    assert_eq!(doc.observers_created(), 0);
}

#[test]
fn sampler_coalesces_bursts_into_one_evaluation() {
    let mut doc = laid_out_document(WATCH_A);
    let items = items_node(&doc);
    for step in item_steps("PLA", 4, 1) {
        step.apply(&mut doc).unwrap();
    }
    let mut sampler = VisibilitySampler::new(250, 5_000);
    let playlist = PlaylistId::new("PLA");

    assert_eq!(
        sampler.sample(&mut doc, Some(&playlist), 0),
        SampleStart::Pending
    );
    let observer = only_observer_on(&doc, items);

    for now in [100, 200, 300] {
        assert!(sampler.poll(&mut doc, now).is_none());
        sampler.on_mutation(observer, now);
    }
    assert_eq!(sampler.next_deadline(), Some(550));
    assert!(sampler.poll(&mut doc, 549).is_none());

    let (for_playlist, snapshot) = sampler.poll(&mut doc, 550).expect("sample should settle");
    assert_eq!(for_playlist, playlist);
    assert_eq!(
        snapshot,
        PlaylistSnapshot {
            total: 4,
            watched_by_host: 1
        }
    );

    let stats = sampler.stats();
    assert_eq!(stats.evaluations, 1);
    assert_eq!(stats.bursts_coalesced, 3);
    assert_eq!(stats.observers_released, 1);
    assert_eq!(doc.live_observers(), 0);
}

#[test]
fn sampler_keeps_waiting_while_list_is_empty() {
    let mut doc = laid_out_document(WATCH_A);
    let items = items_node(&doc);
    let mut sampler = VisibilitySampler::new(250, 5_000);
    let playlist = PlaylistId::new("PLA");

    sampler.sample(&mut doc, Some(&playlist), 0);
    let observer = only_observer_on(&doc, items);
    assert!(sampler.poll(&mut doc, 250).is_none());
    assert!(sampler.is_sampling());
    assert_eq!(sampler.next_deadline(), Some(5_000));

    for step in item_steps("PLA", 2, 0) {
        step.apply(&mut doc).unwrap();
    }
    sampler.on_mutation(observer, 400);
    let (_, snapshot) = sampler.poll(&mut doc, 650).expect("nonempty list should settle");
    assert_eq!(snapshot.total, 2);
    assert_eq!(sampler.stats().evaluations, 2);
}

#[test]
fn sampler_counts_only_links_for_the_sampled_playlist() {
    let mut doc = laid_out_document(WATCH_A);
    for step in item_steps("PLA", 3, 3)
        .into_iter()
        .chain(item_steps("PLA2", 2, 2))
    {
        step.apply(&mut doc).unwrap();
    }
    let mut sampler = VisibilitySampler::new(250, 5_000);
    sampler.sample(&mut doc, Some(&PlaylistId::new("PLA")), 0);
    let (_, snapshot) = sampler.poll(&mut doc, 250).unwrap();
    assert_eq!(
        snapshot,
        PlaylistSnapshot {
            total: 3,
            watched_by_host: 3
        }
    );
}

#[test]
fn sampler_times_out_under_continuous_mutation() {
    let mut doc = laid_out_document(WATCH_A);
    let items = items_node(&doc);
    for step in item_steps("PLA", 3, 0) {
        step.apply(&mut doc).unwrap();
    }
    let mut sampler = VisibilitySampler::new(250, 1_000);
    sampler.sample(&mut doc, Some(&PlaylistId::new("PLA")), 0);
    let observer = only_observer_on(&doc, items);

    for now in [100, 300, 500, 700, 900] {
        assert!(sampler.poll(&mut doc, now).is_none());
        sampler.on_mutation(observer, now);
    }

    let (_, snapshot) = sampler.poll(&mut doc, 1_000).expect("timeout should resolve");
    assert_eq!(snapshot.total, 3);
    let stats = sampler.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.evaluations, 0);
    assert_eq!(stats.observers_released, 1);
    assert_eq!(doc.live_observers(), 0);
}

#[test]
fn sampler_timeout_reports_last_observed_counts() {
    let mut doc = laid_out_document(WATCH_A);
    let mut sampler = VisibilitySampler::new(250, 1_000);
    sampler.sample(&mut doc, Some(&PlaylistId::new("PLA")), 0);
    assert!(sampler.poll(&mut doc, 250).is_none());

    // Items appear but no callback is delivered for them.
    for step in item_steps("PLA", 2, 0) {
        step.apply(&mut doc).unwrap();
    }
    let (_, snapshot) = sampler.poll(&mut doc, 1_000).expect("timeout should resolve");
    assert_eq!(snapshot, PlaylistSnapshot::EMPTY);
}

#[test]
fn sampler_cancel_releases_observer_once() {
    let mut doc = laid_out_document(WATCH_A);
    let mut sampler = VisibilitySampler::new(250, 5_000);
    sampler.sample(&mut doc, Some(&PlaylistId::new("PLA")), 0);
    assert_eq!(doc.live_observers(), 1);

    sampler.cancel(&mut doc);
    sampler.cancel(&mut doc);
    assert_eq!(sampler.stats().observers_released, 1);
    assert_eq!(doc.live_observers(), 0);
    assert!(sampler.next_deadline().is_none());
}

#[test]
fn five_items_two_marked_by_host_shows_forty_percent() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Host);

    let mut trace = vec![navigate("https://www.youtube.com/watch?v=pl1-0&list=PL1")];
    trace.extend(item_steps("PL1", 5, 2));
    trace.push(wait(300));
    session.run_steps(&trace);

    assert_eq!(session.page().stats_text(), Some("Videos Watched: 2/5 (40%)"));
    assert_eq!(session.page().stats_bar_percent(), Some(40));
    assert_eq!(session.page().stats_parent_id(), Some("secondary"));
}

#[test]
fn store_sourced_count_follows_navigation_within_playlist() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Store);

    let mut trace = vec![navigate("https://www.youtube.com/watch?v=pl1-0&list=PL1")];
    trace.extend(item_steps("PL1", 5, 0));
    trace.push(wait(300));
    trace.push(navigate("https://www.youtube.com/watch?v=pl1-1&list=PL1&index=2"));
    trace.push(navigate("https://www.youtube.com/watch?v=pl1-1&list=PL1&index=2"));
    session.run_steps(&trace);

    assert_eq!(session.page().stats_text(), Some("Videos Watched: 2/5 (40%)"));
    assert_eq!(
        session
            .reconciler()
            .store()
            .get(&PlaylistId::new("PL1"))
            .len(),
        2
    );
}

#[test]
fn no_list_parameter_means_no_container_and_no_sampling() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Store);

    let mut trace = vec![navigate("https://www.youtube.com/watch?v=abc")];
    trace.extend(item_steps("PL1", 3, 1));
    trace.push(TraceStep::Resize);
    trace.push(wait(1_000));
    session.run_steps(&trace);

    assert_eq!(session.page().stats_container_count(), 0);
    assert_eq!(session.reconciler().sampler().stats().samples_started, 0);
    assert_eq!(session.page().observers_created(), 1);
    assert_eq!(session.reconciler().state(), &TrackerState::Idle);
    assert!(kv.get("current-playlist-id").unwrap().is_none());
}

#[test]
fn repeated_injection_yields_one_container() {
    let kv = MemoryStore::default();
    let mut doc = laid_out_document(WATCH_A);
    let mut reconciler = Reconciler::new(WatchStore::new(&kv), TrackerConfig::default());

    reconciler.start(&mut doc, 0);
    reconciler.ensure_container(&mut doc);
    reconciler.ensure_container(&mut doc);
    reconciler.handle(&mut doc, Signal::Resize, 10);
    reconciler.handle(&mut doc, Signal::Resize, 20);

    assert_eq!(doc.stats_container_count(), 1);
    assert_eq!(doc.stats_inserts(), 1);
}

#[test]
fn restart_replaces_the_page_observer_and_stop_releases_everything() {
    let kv = MemoryStore::default();
    let mut doc = laid_out_document(WATCH_A);
    let mut reconciler = Reconciler::new(WatchStore::new(&kv), TrackerConfig::default());

    reconciler.start(&mut doc, 0);
    assert_eq!(doc.live_observers(), 2, "page observer plus sampler observer");
    reconciler.start(&mut doc, 5);
    assert_eq!(doc.live_observers(), 2);

    reconciler.stop(&mut doc);
    assert_eq!(doc.live_observers(), 0);
    assert!(!reconciler.is_running());

    reconciler.handle(&mut doc, Signal::NavigateFinished, 10);
    assert!(reconciler.store().get(&PlaylistId::new("PLA")).is_empty());
}

#[test]
fn switching_playlists_evicts_and_resets_before_sampling_finishes() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Store);

    let mut trace = vec![navigate(WATCH_A)];
    trace.extend(item_steps("PLA", 4, 0));
    trace.push(wait(300));
    trace.push(navigate(
        "https://www.youtube.com/watch?v=a-1&list=PLA&index=2",
    ));
    session.run_steps(&trace);
    assert_eq!(session.page().stats_text(), Some("Videos Watched: 2/4 (50%)"));

    // The host re-renders the list for the next playlist before navigating.
    let mut rerender = vec![TraceStep::Clear {
        id: ITEM_CONTAINER_ID.to_string(),
    }];
    rerender.extend(item_steps("PLB", 3, 0));
    rerender.push(navigate("https://www.youtube.com/playlist?list=PLB"));
    for step in &rerender {
        session.apply(step).expect("step should apply");
    }

    assert_eq!(session.page().stats_text(), Some("Videos Watched: 0/3 (0%)"));
    assert!(kv.get("watched-videos:PLA").unwrap().is_none());
    assert_eq!(
        session.reconciler().store().last_known_identity(),
        Some(PlaylistId::new("PLB"))
    );
    assert_eq!(
        session.reconciler().state(),
        &TrackerState::Tracking(PlaylistId::new("PLB"))
    );
    assert_eq!(
        session.reconciler().sampler().sampling_for(),
        Some(&PlaylistId::new("PLB"))
    );

    session.run_steps(&[wait(300)]);
    assert_eq!(session.page().stats_text(), Some("Videos Watched: 0/3 (0%)"));
    assert_eq!(session.page().live_observers(), 1);
}

#[test]
fn items_watched_under_one_playlist_never_count_for_another() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Store);

    let mut trace = vec![navigate(WATCH_A)];
    trace.extend(item_steps("PLA", 2, 0));
    trace.push(wait(300));
    trace.push(TraceStep::Clear {
        id: ITEM_CONTAINER_ID.to_string(),
    });
    trace.extend(item_steps("PLB", 2, 0));
    trace.push(navigate("https://www.youtube.com/watch?v=plb-0&list=PLB"));
    trace.push(wait(300));
    session.run_steps(&trace);

    let store = session.reconciler().store();
    let b_items = store.get(&PlaylistId::new("PLB"));
    assert_eq!(b_items.len(), 1);
    assert!(!b_items.contains(&ItemId::new("a-0")));
    assert!(store.get(&PlaylistId::new("PLA")).is_empty());
    assert_eq!(session.page().stats_text(), Some("Videos Watched: 1/2 (50%)"));
}

#[test]
fn leaving_and_returning_to_a_playlist_keeps_its_history() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Store);

    let mut trace = vec![navigate(WATCH_A)];
    trace.extend(item_steps("PLA", 3, 0));
    trace.push(wait(300));
    trace.push(navigate("https://www.youtube.com/feed/subscriptions"));
    trace.push(wait(300));
    session.run_steps(&trace);
    assert_eq!(session.reconciler().state(), &TrackerState::Idle);

    session.run_steps(&[
        navigate("https://www.youtube.com/watch?v=a-2&list=PLA&index=3"),
        wait(300),
    ]);
    assert_eq!(session.page().stats_text(), Some("Videos Watched: 2/3 (67%)"));
}

#[test]
fn identity_change_is_detected_after_tracker_reload() {
    let kv = MemoryStore::default();
    {
        let mut first = started_session(&kv, WatchedSource::Store);
        let mut trace = vec![navigate(WATCH_A)];
        trace.extend(item_steps("PLA", 3, 0));
        trace.push(wait(300));
        first.run_steps(&trace);
        first.stop();
    }

    let mut reloaded = started_session(&kv, WatchedSource::Store);
    let mut trace = vec![navigate(
        "https://www.youtube.com/watch?v=a-1&list=PLA&index=2",
    )];
    trace.extend(item_steps("PLA", 3, 0));
    trace.push(wait(300));
    reloaded.run_steps(&trace);
    assert_eq!(reloaded.page().stats_text(), Some("Videos Watched: 2/3 (67%)"));

    let mut third = started_session(&kv, WatchedSource::Store);
    third.run_steps(&[navigate("https://www.youtube.com/watch?v=c-0&list=PLC")]);
    assert!(kv.get("watched-videos:PLA").unwrap().is_none());
    assert_eq!(kv.get("current-playlist-id").unwrap().as_deref(), Some("PLC"));
}

#[test]
fn bursts_inside_the_quiet_window_produce_one_evaluation() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Store);

    let mut trace = vec![navigate(WATCH_A)];
    for (i, step) in item_steps("PLA", 4, 0).into_iter().enumerate() {
        if i > 0 {
            trace.push(wait(100));
        }
        trace.push(step);
    }
    trace.push(wait(400));
    session.run_steps(&trace);

    let stats = session.reconciler().sampler().stats();
    assert_eq!(stats.samples_started, 1);
    assert_eq!(stats.evaluations, 1);
    assert_eq!(session.page().stats_text(), Some("Videos Watched: 1/4 (25%)"));
}

#[test]
fn stacked_layout_is_used_when_sidebar_is_hidden() {
    let kv = MemoryStore::default();
    let mut session = ReplaySession::new(&kv, TrackerConfig::default());
    session.start();
    let mut trace = steps(SIDEBAR_LAYOUT);
    trace.push(TraceStep::SetStyle {
        id: SECONDARY_ID.to_string(),
        display: Some("none".to_string()),
        visibility: None,
        opacity: None,
    });
    trace.push(navigate(WATCH_A));
    session.run_steps(&trace);

    assert_eq!(session.page().stats_parent_id(), Some("primary-inner"));
}

#[test]
fn placement_is_deferred_until_layout_becomes_visible() {
    let kv = MemoryStore::default();
    let mut session = ReplaySession::new(&kv, TrackerConfig::default());
    session.start();
    session.run_steps(&steps(
        r#"
{"type":"append","parent":"body","id":"secondary","opacity":0}
{"type":"append","parent":"secondary","id":"secondary-inner"}
{"type":"append","parent":"secondary-inner","id":"items"}
{"type":"navigate","url":"https://www.youtube.com/watch?v=a-0&list=PLA"}
{"type":"resize"}
"#,
    ));
    assert_eq!(session.page().stats_container_count(), 0);

    session.run_steps(&steps(r#"{"type":"set_style","id":"secondary","opacity":1}"#));
    assert_eq!(session.page().stats_container_count(), 1);
    assert_eq!(session.page().stats_parent_id(), Some("secondary"));
    assert_eq!(session.page().stats_text(), Some("Videos Watched: 1/0 (0%)"));
}

#[test]
fn trace_parser_skips_comments_and_malformed_lines() {
    let parsed = parse_trace(
        r#"
# comment
{"type":"navigate","url":"https://www.youtube.com/watch?v=a&list=PL1"}
{"type":"append_item","href":"/watch?v=a&list=PL1"}
{"type":"set_progress","index":0,"progress":12.5}
{"type":"teleport"}
not json at all
{"type":"wait","ms":250}
"#,
    );
    assert_eq!(parsed.skipped_lines, 2);
    assert_eq!(parsed.steps.len(), 4);
    assert_eq!(
        parsed.steps[1],
        TraceStep::AppendItem {
            parent: "items".to_string(),
            href: "/watch?v=a&list=PL1".to_string(),
            progress: None,
        }
    );
    assert_eq!(parsed.steps[3], TraceStep::Wait { ms: 250 });
}

#[test]
fn trace_steps_on_missing_nodes_fail_without_touching_the_page() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Store);
    let err = session
        .apply(&TraceStep::Remove {
            id: "does-not-exist".to_string(),
        })
        .expect_err("unknown node should fail");
    assert!(err.to_string().contains("does-not-exist"));
    assert_eq!(session.failed_steps(), 1);
}

#[test]
fn host_progress_updates_are_picked_up_by_the_next_sample() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Host);

    let mut trace = vec![navigate("https://www.youtube.com/watch?v=pl1-0&list=PL1")];
    trace.extend(item_steps("PL1", 4, 0));
    trace.push(wait(300));
    session.run_steps(&trace);
    assert_eq!(session.page().stats_text(), Some("Videos Watched: 0/4 (0%)"));

    session.run_steps(&[
        TraceStep::SetProgress {
            parent: ITEM_CONTAINER_ID.to_string(),
            index: 0,
            progress: 80.0,
        },
        wait(300),
    ]);
    assert_eq!(session.page().stats_text(), Some("Videos Watched: 1/4 (25%)"));
}

#[test]
fn replaced_item_list_mid_sample_is_sampled_again() {
    let kv = MemoryStore::default();
    let mut session = started_session(&kv, WatchedSource::Host);

    let mut trace = vec![navigate("https://www.youtube.com/watch?v=pl1-0&list=PL1")];
    trace.extend(item_steps("PL1", 2, 0));
    trace.push(wait(100));
    trace.push(TraceStep::Remove {
        id: ITEM_CONTAINER_ID.to_string(),
    });
    trace.push(TraceStep::Append {
        parent: SECONDARY_INNER_ID.to_string(),
        id: Some(ITEM_CONTAINER_ID.to_string()),
        display: None,
        visibility: None,
        opacity: None,
    });
    trace.extend(item_steps("PL1", 5, 2));
    trace.push(wait(300));
    session.run_steps(&trace);

    assert_eq!(session.page().stats_text(), Some("Videos Watched: 2/5 (40%)"));
    assert_eq!(session.reconciler().sampler().stats().observers_released, 2);
    assert_eq!(session.page().live_observers(), 1);
}

#[test]
fn stacked_layout_inserts_next_to_nested_below() {
    let kv = MemoryStore::default();
    let mut session = ReplaySession::new(&kv, TrackerConfig::default());
    session.start();
    session.run_steps(&steps(
        r#"
{"type":"append","parent":"body","id":"primary-inner"}
{"type":"append","parent":"primary-inner","id":"player"}
{"type":"append","parent":"primary-inner","id":"wrap"}
{"type":"append","parent":"wrap","id":"below"}
{"type":"navigate","url":"https://www.youtube.com/watch?v=a-0&list=PLA"}
{"type":"resize"}
"#,
    ));

    assert_eq!(session.page().stats_container_count(), 1);
    assert_eq!(session.page().stats_inserts(), 1);
    assert_eq!(session.page().stats_parent_id(), Some("wrap"));
}

struct NonEvictingStore {
    inner: MemoryStore,
}

impl KvStore for NonEvictingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value)
    }

    fn remove(&self, _key: &str) -> Result<bool> {
        Err(anyhow!("database is locked"))
    }

    fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<KvEntry>> {
        self.inner.entries_with_prefix(prefix)
    }
}

#[test]
fn switching_playlists_shows_zero_watched_despite_leftover_data() {
    let kv = NonEvictingStore {
        inner: MemoryStore::default(),
    };
    kv.set("current-playlist-id", "PLA").unwrap();
    kv.set("watched-videos:PLB", r#"["leftover"]"#).unwrap();

    let mut session = ReplaySession::new(&kv, TrackerConfig::default());
    session.start();
    let mut trace = steps(SIDEBAR_LAYOUT);
    trace.extend(item_steps("PLB", 3, 0));
    trace.push(navigate("https://www.youtube.com/playlist?list=PLB"));
    for step in &trace {
        session.apply(step).expect("step should apply");
    }

    assert_eq!(session.page().stats_text(), Some("Videos Watched: 0/3 (0%)"));
    assert_eq!(
        session.reconciler().state(),
        &TrackerState::Tracking(PlaylistId::new("PLB"))
    );
}

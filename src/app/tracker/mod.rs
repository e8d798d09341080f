mod controller;
mod display;
mod identity;
mod sampler;
mod store;

use std::fmt;

pub(crate) use controller::*;
pub(crate) use display::*;
pub(crate) use identity::*;
pub(crate) use sampler::*;
pub(crate) use store::*;

/// Value of the location's `list` parameter. Compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct PlaylistId(String);

impl PlaylistId {
    pub(crate) fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value of the location's `v` parameter for a single playlist item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ItemId(String);

impl ItemId {
    pub(crate) fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time counts taken from the rendered item list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PlaylistSnapshot {
    pub(crate) total: usize,
    pub(crate) watched_by_host: usize,
}

impl PlaylistSnapshot {
    pub(crate) const EMPTY: Self = Self {
        total: 0,
        watched_by_host: 0,
    };

    pub(crate) fn is_empty(&self) -> bool {
        self.total == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum WatchedSource {
    #[default]
    Store,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrackerConfig {
    pub(crate) debounce_ms: u64,
    pub(crate) sample_timeout_ms: u64,
    pub(crate) watched_source: WatchedSource,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            sample_timeout_ms: 5_000,
            watched_source: WatchedSource::Store,
        }
    }
}

/// Non-fatal degradations. None of these ever reach the page; they are logged
/// and the tracker falls back to showing nothing or stale numbers.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Fault {
    #[error("page context missing: {0}")]
    MissingContext(&'static str),
    #[error("stored value for '{key}' is unreadable: {reason}")]
    CorruptPersistedState { key: String, reason: String },
    #[error("failed to persist '{key}': {reason}")]
    StorageWrite { key: String, reason: String },
    #[error("item list never settled within {waited_ms}ms ({bursts} mutation bursts)")]
    SamplerTimeout { waited_ms: u64, bursts: u32 },
}

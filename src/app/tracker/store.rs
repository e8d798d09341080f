use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::db::KvStore;

use super::{Fault, ItemId, PlaylistId};

const WATCHED_PREFIX: &str = "watched-videos:";
const CURRENT_PLAYLIST_KEY: &str = "current-playlist-id";

fn watched_key(id: &PlaylistId) -> String {
    format!("{WATCHED_PREFIX}{id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TrackedPlaylist {
    pub(crate) id: PlaylistId,
    pub(crate) watched: usize,
    pub(crate) updated_at: String,
}

/// Watched sets keyed by playlist identity, on top of a durable key-value
/// store. Storage faults never escape: unreadable values read as empty and
/// failed writes are logged.
pub(crate) struct WatchStore<S> {
    kv: S,
}

impl<S: KvStore> WatchStore<S> {
    pub(crate) fn new(kv: S) -> Self {
        Self { kv }
    }

    pub(crate) fn get(&self, id: &PlaylistId) -> BTreeSet<ItemId> {
        let key = watched_key(id);
        let raw = match self.kv.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return BTreeSet::new(),
            Err(err) => {
                let fault = Fault::CorruptPersistedState {
                    key,
                    reason: format!("{err:#}"),
                };
                warn!(%fault, "treating watched set as empty");
                return BTreeSet::new();
            }
        };
        parse_watched(&raw).unwrap_or_else(|reason| {
            let fault = Fault::CorruptPersistedState { key, reason };
            warn!(%fault, "treating watched set as empty");
            BTreeSet::new()
        })
    }

    /// Returns whether the item was newly recorded and persisted.
    pub(crate) fn add(&self, id: &PlaylistId, item: &ItemId) -> bool {
        let mut watched = self.get(id);
        if !watched.insert(item.clone()) {
            return false;
        }
        let encoded: Vec<&str> = watched.iter().map(ItemId::as_str).collect();
        let key = watched_key(id);
        let value = match serde_json::to_string(&encoded) {
            Ok(value) => value,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to encode watched set");
                return false;
            }
        };
        if !self.write(&key, &value) {
            return false;
        }
        debug!(playlist = %id, item = %item, watched = watched.len(), "recorded watched item");
        true
    }

    /// Returns whether anything was stored for `id`.
    pub(crate) fn evict(&self, id: &PlaylistId) -> bool {
        let key = watched_key(id);
        match self.kv.remove(&key) {
            Ok(removed) => {
                debug!(playlist = %id, removed, "evicted watched set");
                removed
            }
            Err(err) => {
                let fault = Fault::StorageWrite {
                    key,
                    reason: format!("{err:#}"),
                };
                warn!(%fault, "eviction failed");
                false
            }
        }
    }

    pub(crate) fn last_known_identity(&self) -> Option<PlaylistId> {
        match self.kv.get(CURRENT_PLAYLIST_KEY) {
            Ok(value) => value.filter(|v| !v.is_empty()).map(PlaylistId::new),
            Err(err) => {
                let fault = Fault::CorruptPersistedState {
                    key: CURRENT_PLAYLIST_KEY.to_string(),
                    reason: format!("{err:#}"),
                };
                warn!(%fault, "no last known playlist");
                None
            }
        }
    }

    pub(crate) fn record_identity(&self, id: &PlaylistId) {
        self.write(CURRENT_PLAYLIST_KEY, id.as_str());
    }

    pub(crate) fn clear_identity(&self) {
        if let Err(err) = self.kv.remove(CURRENT_PLAYLIST_KEY) {
            warn!(error = %format!("{err:#}"), "failed to clear current playlist");
        }
    }

    pub(crate) fn tracked_playlists(&self) -> anyhow::Result<Vec<TrackedPlaylist>> {
        let entries = self.kv.entries_with_prefix(WATCHED_PREFIX)?;
        Ok(entries
            .into_iter()
            .map(|entry| TrackedPlaylist {
                id: PlaylistId::new(&entry.key[WATCHED_PREFIX.len()..]),
                watched: parse_watched(&entry.value).map(|set| set.len()).unwrap_or(0),
                updated_at: entry.updated_at,
            })
            .collect())
    }

    fn write(&self, key: &str, value: &str) -> bool {
        match self.kv.set(key, value) {
            Ok(()) => true,
            Err(err) => {
                let fault = Fault::StorageWrite {
                    key: key.to_string(),
                    reason: format!("{err:#}"),
                };
                warn!(%fault, "watch data not persisted");
                false
            }
        }
    }
}

pub(crate) fn parse_watched(raw: &str) -> Result<BTreeSet<ItemId>, String> {
    let items: Vec<String> = serde_json::from_str(raw).map_err(|err| err.to_string())?;
    Ok(items
        .into_iter()
        .filter(|item| !item.is_empty())
        .map(ItemId::new)
        .collect())
}

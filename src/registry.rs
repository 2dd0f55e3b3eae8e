//! Subscription registry
//!
//! Maps caller-chosen [`ChannelKey`]s to server-assigned channel ids and tracks
//! subscribe requests that are still waiting for confirmation. Every operation
//! takes the lock for the duration of a single map/set access only, so it is
//! safe to call from the dispatch task and from callers concurrently.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::types::{ChannelId, ChannelKey};

/// Where a key currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unbound,
    Pending,
    Bound(ChannelId),
}

#[derive(Debug, Default)]
struct RegistryState {
    bound: HashMap<ChannelKey, ChannelId>,
    pending: HashSet<ChannelKey>,
}

impl RegistryState {
    fn is_known(&self, key: &ChannelKey) -> bool {
        self.pending.contains(key) || self.bound.contains_key(key)
    }

    /// The spelling of `key` the caller used, if only the alternate is known
    fn requested_form(&self, key: ChannelKey) -> ChannelKey {
        if self.is_known(&key) {
            return key;
        }
        match key.alternate() {
            Some(alternate) if self.is_known(&alternate) => alternate,
            _ => key,
        }
    }
}

/// Thread-safe channel registry
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as requested.
    ///
    /// Returns false when the key is already bound or in flight; only a `true`
    /// result entitles the caller to send a subscribe frame.
    pub fn try_begin_subscribe(&self, key: &ChannelKey) -> bool {
        let mut state = self.state.write();
        if state.bound.contains_key(key) || state.pending.contains(key) {
            return false;
        }
        state.pending.insert(key.clone());
        true
    }

    /// Bind a confirmed channel id to its key, returning the key actually bound.
    ///
    /// The exchange may echo a pair in its own spelling; when only the
    /// alternate spelling is known locally, that key is the one bound.
    /// Accepts keys that were never requested. The exchange reuses ids after an
    /// unsubscribe, so a key still holding `id` is evicted first.
    pub fn confirm_subscribe(&self, id: ChannelId, key: ChannelKey) -> ChannelKey {
        let mut state = self.state.write();
        let key = state.requested_form(key);
        state.pending.remove(&key);

        let stale: Vec<ChannelKey> = state
            .bound
            .iter()
            .filter(|(k, bound_id)| **bound_id == id && **k != key)
            .map(|(k, _)| k.clone())
            .collect();
        for k in stale {
            warn!(chan_id = id, stale = %k, key = %key, "Channel id rebound before unsubscribe confirmation");
            state.bound.remove(&k);
        }

        if let Some(previous) = state.bound.insert(key.clone(), id) {
            if previous != id {
                debug!(key = %key, previous, chan_id = id, "Channel key rebound to new id");
            }
        }
        key
    }

    /// Confirmed id for a key
    pub fn lookup_id(&self, key: &ChannelKey) -> Option<ChannelId> {
        self.state.read().bound.get(key).copied()
    }

    /// Key bound to a channel id
    pub fn lookup_key(&self, id: ChannelId) -> Option<ChannelKey> {
        self.state
            .read()
            .bound
            .iter()
            .find(|(_, bound_id)| **bound_id == id)
            .map(|(k, _)| k.clone())
    }

    /// Drop the binding for `id`. Unknown ids are ignored.
    pub fn confirm_unsubscribe(&self, id: ChannelId) -> Option<ChannelKey> {
        let mut state = self.state.write();
        let key = state
            .bound
            .iter()
            .find(|(_, bound_id)| **bound_id == id)
            .map(|(k, _)| k.clone())?;
        state.bound.remove(&key);
        state.pending.remove(&key);
        Some(key)
    }

    /// Forget an in-flight request the exchange rejected, under either
    /// spelling of its pair. Returns the key that was released.
    pub fn abandon_pending(&self, key: &ChannelKey) -> Option<ChannelKey> {
        let mut state = self.state.write();
        if state.pending.remove(key) {
            return Some(key.clone());
        }
        let alternate = key.alternate()?;
        state.pending.remove(&alternate).then_some(alternate)
    }

    /// Remove every binding and in-flight request, returning the affected keys
    pub fn drain(&self) -> Vec<ChannelKey> {
        let mut state = self.state.write();
        let mut keys: Vec<ChannelKey> = state.bound.drain().map(|(k, _)| k).collect();
        keys.extend(state.pending.drain());
        keys
    }

    pub fn state(&self, key: &ChannelKey) -> SubscriptionState {
        let state = self.state.read();
        if let Some(id) = state.bound.get(key) {
            SubscriptionState::Bound(*id)
        } else if state.pending.contains(key) {
            SubscriptionState::Pending
        } else {
            SubscriptionState::Unbound
        }
    }

    /// Number of bound channels
    pub fn len(&self) -> usize {
        self.state.read().bound.len()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.bound.is_empty() && state.pending.is_empty()
    }
}

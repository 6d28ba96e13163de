//! Client-side mirror of one application's properties.
//!
//! ```text
//!   snapshot ──► reset_from_snapshot ──┐
//!                                      ├──► MirrorState (one lock)
//!   feed ──► SyncEngine ──► apply ─────┘        │
//!                                               ├──► listeners (sync, isolated)
//!                                               └──► watchers  (mpsc)
//! ```
//!
//! Every item is applied replace-if-newer on `(host, property)`. A tombstone
//! keeps its version after the key leaves the live view, so an older update
//! replayed later is still recognized as stale.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::model::{FeedEnd, FeedMessage, PropertiesChanges, PropertyItem, Version};

/// `(host, property)`.
pub type PropertyKey = (String, String);

/// Error a listener may return; it is logged and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener = Box<dyn FnMut(&PropertyChange) -> Result<(), ListenerError> + Send>;

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An accepted change to the live view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub host: String,
    pub property: String,
    pub version: Version,
    pub old_value: Option<String>,
    /// `None` when the property was deleted
    pub new_value: Option<String>,
}

/// Mirror counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub accepted: u64,
    pub stale_updates_skipped: u64,
    pub listener_failures: u64,
    /// Highest version seen
    pub last_version: Version,
}

#[derive(Debug, Clone)]
struct MirrorEntry {
    version: Version,
    value: Option<String>,
}

#[derive(Default)]
struct MirrorState {
    entries: BTreeMap<PropertyKey, MirrorEntry>,
    listeners: Vec<(ListenerId, Listener)>,
    watchers: Vec<mpsc::UnboundedSender<PropertyChange>>,
    next_listener: u64,
    stats: MirrorStats,
}

impl MirrorState {
    /// Apply one item; returns the live-view change it caused, if any.
    fn apply(&mut self, item: &PropertyItem) -> Option<PropertyChange> {
        let key = (item.host.clone(), item.property.clone());

        if let Some(entry) = self.entries.get(&key) {
            if entry.version >= item.version {
                self.stats.stale_updates_skipped += 1;
                log::trace!(
                    "Skipping stale {}/{} v{} (have v{})",
                    item.host,
                    item.property,
                    item.version,
                    entry.version
                );
                return None;
            }
        }

        let old_value = self
            .entries
            .insert(
                key,
                MirrorEntry {
                    version: item.version,
                    value: item.value.clone(),
                },
            )
            .and_then(|old| old.value);
        self.stats.accepted += 1;
        self.stats.last_version = self.stats.last_version.max(item.version);
        log::trace!("Accepted {}/{} v{}", item.host, item.property, item.version);

        if old_value == item.value {
            return None;
        }
        Some(PropertyChange {
            host: item.host.clone(),
            property: item.property.clone(),
            version: item.version,
            old_value,
            new_value: item.value.clone(),
        })
    }

    fn notify(&mut self, changes: &[PropertyChange]) {
        if changes.is_empty() {
            return;
        }

        for change in changes {
            for (id, listener) in self.listeners.iter_mut() {
                let outcome = catch_unwind(AssertUnwindSafe(|| listener(change)));
                let failure = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "listener panicked".to_string(),
                };
                self.stats.listener_failures += 1;
                log::warn!(
                    "Listener {:?} failed on {}/{}: {failure}",
                    id,
                    change.host,
                    change.property
                );
            }
        }

        self.watchers
            .retain(|tx| changes.iter().all(|c| tx.send(c.clone()).is_ok()));
    }

    fn live(&self) -> BTreeMap<PropertyKey, String> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.value.clone().map(|v| (k.clone(), v)))
            .collect()
    }
}

/// Local replica of one application's live properties.
///
/// Reads, applies and listener registration share one lock. Listeners run
/// under it and must not call back into the mirror.
pub struct Mirror {
    application: String,
    inner: Mutex<MirrorState>,
}

impl Mirror {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            inner: Mutex::new(MirrorState::default()),
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Apply a delta batch; returns the number of accepted items.
    pub fn apply_changes(&self, changes: &PropertiesChanges) -> usize {
        if changes.application != self.application {
            log::warn!(
                "Mirror of {} ignoring batch for {}",
                self.application,
                changes.application
            );
            return 0;
        }

        let mut state = self.inner.lock();
        let before = state.stats.accepted;
        let applied: Vec<PropertyChange> =
            changes.items.iter().filter_map(|i| state.apply(i)).collect();
        state.notify(&applied);
        (state.stats.accepted - before) as usize
    }

    /// Reconcile with a fresh snapshot after (re)subscribing.
    ///
    /// Snapshot items apply replace-if-newer; live keys missing from the
    /// snapshot become tombstones at their current version.
    pub fn reset_from_snapshot(&self, snapshot: &[PropertyItem]) -> usize {
        let mut state = self.inner.lock();
        let before = state.stats.accepted;

        let mut applied: Vec<PropertyChange> =
            snapshot.iter().filter_map(|i| state.apply(i)).collect();

        let present: BTreeSet<(&str, &str)> = snapshot
            .iter()
            .map(|i| (i.host.as_str(), i.property.as_str()))
            .collect();
        for ((host, property), entry) in state.entries.iter_mut() {
            if entry.value.is_none() || present.contains(&(host.as_str(), property.as_str())) {
                continue;
            }
            applied.push(PropertyChange {
                host: host.clone(),
                property: property.clone(),
                version: entry.version,
                old_value: entry.value.take(),
                new_value: None,
            });
        }

        state.notify(&applied);
        (state.stats.accepted - before) as usize
    }

    /// All live properties.
    pub fn current(&self) -> BTreeMap<PropertyKey, String> {
        self.inner.lock().live()
    }

    /// Raw value of a live property.
    pub fn get(&self, host: &str, property: &str) -> Option<String> {
        self.inner
            .lock()
            .entries
            .get(&(host.to_owned(), property.to_owned()))
            .and_then(|e| e.value.clone())
    }

    /// Known version of a key, tombstones included.
    pub fn version_of(&self, host: &str, property: &str) -> Option<Version> {
        self.inner
            .lock()
            .entries
            .get(&(host.to_owned(), property.to_owned()))
            .map(|e| e.version)
    }

    /// Register a change callback; returns its id and the current live view.
    pub fn register_listener<F>(&self, listener: F) -> (ListenerId, BTreeMap<PropertyKey, String>)
    where
        F: FnMut(&PropertyChange) -> Result<(), ListenerError> + Send + 'static,
    {
        let mut state = self.inner.lock();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.push((id, Box::new(listener)));
        (id, state.live())
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.inner.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(lid, _)| *lid != id);
        state.listeners.len() != before
    }

    /// Current live view plus a channel of every later change.
    pub fn watch(
        &self,
    ) -> (
        BTreeMap<PropertyKey, String>,
        mpsc::UnboundedReceiver<PropertyChange>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.lock();
        state.watchers.push(tx);
        (state.live(), rx)
    }

    pub fn stats(&self) -> MirrorStats {
        self.inner.lock().stats.clone()
    }
}

/// Applies one feed to one mirror until the feed ends.
pub struct SyncEngine {
    mirror: Arc<Mirror>,
    feed: mpsc::UnboundedReceiver<FeedMessage>,
}

impl SyncEngine {
    pub fn new(
        mirror: Arc<Mirror>,
        feed: mpsc::UnboundedReceiver<FeedMessage>,
    ) -> Self {
        Self { mirror, feed }
    }

    /// Drain the feed into the mirror; returns why the feed ended.
    ///
    /// Reconnecting is the caller's decision.
    pub async fn run(mut self) -> FeedEnd {
        let end = loop {
            match self.feed.recv().await {
                Some(FeedMessage::Changes(changes)) => {
                    self.mirror.apply_changes(&changes);
                }
                Some(FeedMessage::Ended(end)) => break end,
                None => {
                    break FeedEnd::Failed {
                        reason: "feed channel dropped".into(),
                    }
                }
            }
        };

        match &end {
            FeedEnd::Closed => log::debug!("Feed for {} closed", self.mirror.application()),
            FeedEnd::Failed { reason } => {
                log::warn!("Feed for {} failed: {reason}", self.mirror.application())
            }
        }
        end
    }
}

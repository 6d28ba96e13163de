//! Per-application change fan-out with snapshot-on-subscribe.
//!
//! ```text
//!   commit ──► publish(changes) ──► broadcast::Sender (one per application)
//!                                        │  bounded, never waits
//!                     ┌──────────────────┼──────────────────┐
//!                     ▼                  ▼                  ▼
//!                   Feed A             Feed B             Feed C
//!               (host filter)      (all hosts)        (lagged → ends)
//! ```
//!
//! `subscribe` creates the broadcast receiver before it reads the snapshot,
//! so a commit racing with the subscription shows up again as a delta
//! instead of falling into the gap. Receivers apply items replace-if-newer,
//! which makes the duplicate harmless.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::model::{
    FeedEnd, FeedMessage, PropertiesChanges, PropertyItem, SubscriberId, Version,
};
use crate::store::{Rejection, StoreError, VersionStore};

/// Reasons a feed cannot be opened or had to stop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("Subscriber {subscriber_id} lagged behind by {skipped} batches")]
    Lagged {
        subscriber_id: SubscriberId,
        skipped: u64,
    },

    #[error("Unknown subscriber: {subscriber_id}")]
    UnknownSubscriber { subscriber_id: SubscriberId },

    #[error("Feed already open for subscriber {subscriber_id}")]
    AlreadyOpen { subscriber_id: SubscriberId },
}

/// Result of a subscription: the id and the initial state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub subscriber_id: SubscriberId,
    pub application: String,
    /// Live records at subscription time (host-filtered)
    pub snapshot: Vec<PropertyItem>,
    /// Highest version in the snapshot (0 when empty)
    pub last_delivered_version: Version,
}

/// Notifier statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierStats {
    pub batches_published: u64,
    pub items_published: u64,
    pub active_subscribers: usize,
    pub applications: usize,
}

struct AtomicNotifierStats {
    batches_published: AtomicU64,
    items_published: AtomicU64,
}

struct SubscriberEntry {
    application: String,
    host_filter: Option<String>,
    last_delivered_version: Version,
    /// Receiver waiting for `open_feed`; `None` once the feed is open
    pending: Option<broadcast::Receiver<Arc<PropertiesChanges>>>,
    /// Bumped on every re-subscription so a stale feed can't unregister
    /// its replacement
    generation: u64,
}

type Registry = Arc<Mutex<HashMap<SubscriberId, SubscriberEntry>>>;

/// Registry of subscribers and one broadcast channel per application.
pub struct ChangeNotifier {
    store: Arc<dyn VersionStore>,
    channels: RwLock<HashMap<String, broadcast::Sender<Arc<PropertiesChanges>>>>,
    subscribers: Registry,
    capacity: usize,
    next_generation: AtomicU64,
    stats: Arc<AtomicNotifierStats>,
}

impl ChangeNotifier {
    /// `capacity` bounds the batches buffered per application before a slow
    /// subscriber lags.
    pub fn new(store: Arc<dyn VersionStore>, capacity: usize) -> Self {
        Self {
            store,
            channels: RwLock::new(HashMap::new()),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
            next_generation: AtomicU64::new(0),
            stats: Arc::new(AtomicNotifierStats {
                batches_published: AtomicU64::new(0),
                items_published: AtomicU64::new(0),
            }),
        }
    }

    /// Register `subscriber_id` on `application` and return its snapshot.
    ///
    /// Re-subscribing with a known id replaces the old registration; a feed
    /// still open under the old registration ends.
    pub fn subscribe(
        &self,
        application: &str,
        host_filter: Option<String>,
        subscriber_id: SubscriberId,
    ) -> Result<Subscription, StoreError> {
        if self.store.application(application)?.is_none() {
            return Err(Rejection::ApplicationNotFound {
                application: application.into(),
            }
            .into());
        }

        // Receiver first, snapshot second.
        let receiver = self.sender(application).subscribe();

        let snapshot: Vec<PropertyItem> = self
            .store
            .list_properties(application)?
            .iter()
            .filter(|r| host_matches(host_filter.as_deref(), &r.id().host))
            .map(|r| r.to_item())
            .collect();
        let last_delivered_version = snapshot.iter().map(|i| i.version).max().unwrap_or(0);

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let replaced = self
            .subscribers
            .lock()
            .insert(
                subscriber_id,
                SubscriberEntry {
                    application: application.into(),
                    host_filter: host_filter.clone(),
                    last_delivered_version,
                    pending: Some(receiver),
                    generation,
                },
            )
            .is_some();

        log::info!(
            "Subscriber {subscriber_id} {} to {application} (host filter {:?}, {} items)",
            if replaced { "resubscribed" } else { "subscribed" },
            host_filter,
            snapshot.len()
        );

        Ok(Subscription {
            subscriber_id,
            application: application.into(),
            snapshot,
            last_delivered_version,
        })
    }

    /// Start the delta stream of a subscribed id.
    pub fn open_feed(&self, subscriber_id: SubscriberId) -> Result<Feed, FeedError> {
        let mut subscribers = self.subscribers.lock();
        let entry = subscribers
            .get_mut(&subscriber_id)
            .ok_or(FeedError::UnknownSubscriber { subscriber_id })?;
        let receiver = entry
            .pending
            .take()
            .ok_or(FeedError::AlreadyOpen { subscriber_id })?;

        log::debug!("Opened feed for {subscriber_id} on {}", entry.application);
        Ok(Feed {
            subscriber_id,
            application: entry.application.clone(),
            host_filter: entry.host_filter.clone(),
            receiver,
            generation: entry.generation,
            registry: self.subscribers.clone(),
            buffer: self.capacity,
            finished: false,
        })
    }

    /// Drop a registration. An open feed under it ends at its next batch.
    pub fn unsubscribe(&self, subscriber_id: &SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(subscriber_id).is_some();
        if removed {
            log::info!("Subscriber {subscriber_id} unsubscribed");
        }
        removed
    }

    /// Registration generation of a subscriber, if registered.
    pub fn generation_of(&self, subscriber_id: &SubscriberId) -> Option<u64> {
        self.subscribers
            .lock()
            .get(subscriber_id)
            .map(|e| e.generation)
    }

    /// Drop a registration only if it is still the given generation.
    ///
    /// Lets an owner clean up what it registered without removing a newer
    /// subscription that reused the id.
    pub fn release(&self, subscriber_id: &SubscriberId, generation: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        if subscribers
            .get(subscriber_id)
            .is_some_and(|e| e.generation == generation)
        {
            subscribers.remove(subscriber_id);
            log::debug!("Released subscriber {subscriber_id}");
            true
        } else {
            false
        }
    }

    /// Fan a committed batch out to the application's subscribers.
    ///
    /// Never waits; returns the number of feeds the batch was queued for.
    pub fn publish(&self, changes: PropertiesChanges) -> usize {
        let sender = match self.channels.read().get(&changes.application) {
            Some(sender) => sender.clone(),
            None => return 0,
        };

        let items = changes.items.len() as u64;
        let count = sender.send(Arc::new(changes)).unwrap_or(0);

        self.stats.batches_published.fetch_add(1, Ordering::Relaxed);
        self.stats.items_published.fetch_add(items, Ordering::Relaxed);
        count
    }

    /// Close every channel; open feeds end with `None`.
    pub fn shutdown(&self) {
        let closed = {
            let mut channels = self.channels.write();
            let n = channels.len();
            channels.clear();
            n
        };
        self.subscribers.lock().clear();
        log::info!("Change notifier shut down ({closed} applications)");
    }

    pub fn is_subscribed(&self, subscriber_id: &SubscriberId) -> bool {
        self.subscribers.lock().contains_key(subscriber_id)
    }

    /// Last version delivered to (or snapshotted for) a subscriber.
    pub fn last_delivered_version(&self, subscriber_id: &SubscriberId) -> Option<Version> {
        self.subscribers
            .lock()
            .get(subscriber_id)
            .map(|e| e.last_delivered_version)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> NotifierStats {
        NotifierStats {
            batches_published: self.stats.batches_published.load(Ordering::Relaxed),
            items_published: self.stats.items_published.load(Ordering::Relaxed),
            active_subscribers: self.subscriber_count(),
            applications: self.channels.read().len(),
        }
    }

    /// Get or create the application's channel.
    fn sender(&self, application: &str) -> broadcast::Sender<Arc<PropertiesChanges>> {
        if let Some(sender) = self.channels.read().get(application) {
            return sender.clone();
        }

        let mut channels = self.channels.write();
        channels
            .entry(application.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

fn host_matches(filter: Option<&str>, host: &str) -> bool {
    filter.map_or(true, |f| f == host)
}

/// One subscriber's delta stream.
///
/// Dropping the feed unregisters the subscriber (unless it has since been
/// replaced by a newer subscription with the same id).
pub struct Feed {
    subscriber_id: SubscriberId,
    application: String,
    host_filter: Option<String>,
    receiver: broadcast::Receiver<Arc<PropertiesChanges>>,
    generation: u64,
    registry: Registry,
    /// Bound of the channel `forward` creates
    buffer: usize,
    finished: bool,
}

impl Feed {
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Next batch for this subscriber.
    ///
    /// `None` is an expected end (channel closed, unsubscribed or replaced);
    /// `Some(Err(_))` is a failure after which the feed is finished.
    pub async fn recv(&mut self) -> Option<Result<Arc<PropertiesChanges>, FeedError>> {
        if self.finished {
            return None;
        }

        loop {
            match self.receiver.recv().await {
                Ok(changes) => {
                    let Some(changes) = self.filter(changes) else {
                        continue;
                    };
                    if !self.mark_delivered(&changes) {
                        self.finished = true;
                        return None;
                    }
                    return Some(Ok(changes));
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Subscriber {} on {} lagged by {skipped} batches",
                        self.subscriber_id,
                        self.application
                    );
                    self.finished = true;
                    return Some(Err(FeedError::Lagged {
                        subscriber_id: self.subscriber_id,
                        skipped,
                    }));
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Next batch, or the end marker, as a [`FeedMessage`].
    pub async fn next_message(&mut self) -> FeedMessage {
        match self.recv().await {
            Some(Ok(changes)) => FeedMessage::Changes(changes),
            Some(Err(e)) => FeedMessage::Ended(FeedEnd::Failed {
                reason: e.to_string(),
            }),
            None => FeedMessage::Ended(FeedEnd::Closed),
        }
    }

    /// Pump this feed into a bounded channel on a background task.
    ///
    /// See [`forward_with`](Self::forward_with) for how a full channel is
    /// handled.
    pub fn forward(self) -> mpsc::Receiver<FeedMessage> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.forward_with(tx, |_, msg| msg);
        rx
    }

    /// Pump this feed into `tx`, wrapping each message with `wrap`.
    ///
    /// Batches are queued without waiting. If `tx` is full the consumer has
    /// stopped keeping up: the subscription is dropped and `Ended(Failed)`
    /// is queued once room frees up. The task also stops after `Ended`, or
    /// when the receiver is gone.
    pub fn forward_with<T, F>(mut self, tx: mpsc::Sender<T>, wrap: F) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: Fn(SubscriberId, FeedMessage) -> T + Send + 'static,
    {
        tokio::spawn(async move {
            let subscriber_id = self.subscriber_id;
            loop {
                let msg = self.next_message().await;
                if matches!(msg, FeedMessage::Ended(_)) {
                    drop(self);
                    let _ = tx.send(wrap(subscriber_id, msg)).await;
                    return;
                }

                match tx.try_send(wrap(subscriber_id, msg)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::warn!(
                            "Subscriber {subscriber_id} on {} stopped draining its feed",
                            self.application
                        );
                        let reason = FeedError::Lagged {
                            subscriber_id,
                            skipped: 1,
                        }
                        .to_string();
                        drop(self);
                        let end = FeedMessage::Ended(FeedEnd::Failed { reason });
                        let _ = tx.send(wrap(subscriber_id, end)).await;
                        return;
                    }
                    Err(TrySendError::Closed(_)) => return,
                }
            }
        })
    }

    fn filter(&self, changes: Arc<PropertiesChanges>) -> Option<Arc<PropertiesChanges>> {
        let Some(host) = self.host_filter.as_deref() else {
            return Some(changes);
        };
        if changes.items.iter().all(|i| i.host == host) {
            return Some(changes);
        }

        let items: Vec<PropertyItem> = changes
            .items
            .iter()
            .filter(|i| i.host == host)
            .cloned()
            .collect();
        if items.is_empty() {
            return None;
        }
        Some(Arc::new(PropertiesChanges {
            application: changes.application.clone(),
            last_version: changes.last_version,
            items,
        }))
    }

    /// Advance the registry cursor; `false` if this feed's registration is gone.
    fn mark_delivered(&self, changes: &PropertiesChanges) -> bool {
        let mut registry = self.registry.lock();
        match registry.get_mut(&self.subscriber_id) {
            Some(entry) if entry.generation == self.generation => {
                if let Some(v) = changes.max_version() {
                    entry.last_delivered_version = entry.last_delivered_version.max(v);
                }
                true
            }
            _ => false,
        }
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        if registry
            .get(&self.subscriber_id)
            .is_some_and(|e| e.generation == self.generation)
        {
            registry.remove(&self.subscriber_id);
            log::debug!("Feed for {} dropped", self.subscriber_id);
        }
    }
}

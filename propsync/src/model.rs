//! Core data model shared by the store, the notifier and the client mirror.
//!
//! ```text
//! Application ──┐
//!               ├── PropertyId (application, host, property) ── PropertyRecord
//! Host ─────────┘                                                  │
//!                                           Updated { version, value }
//!                                           Deleted { version }   (tombstone)
//! ```
//!
//! Versions are drawn from one counter per application, so two properties of
//! the same application never share a version.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// Version stamped on every committed mutation.
pub type Version = u64;

/// Caller-generated identifier that makes a mutation safely retryable.
pub type RequestId = Uuid;

/// Identifier of a change-feed subscriber.
pub type SubscriberId = Uuid;

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A named configuration namespace with its own version counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    /// Last version allocated to any property of this application (0 = none yet)
    pub last_version: Version,
    pub created_at: u64,
    pub modified_at: u64,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_secs();
        Self {
            name: name.into(),
            last_version: 0,
            created_at: now,
            modified_at: now,
        }
    }

    /// Allocate the next version and stamp the modification time.
    pub(crate) fn allocate_version(&mut self) -> Version {
        self.last_version += 1;
        self.modified_at = now_secs();
        self.last_version
    }
}

/// A deployment target that scopes property values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub created_at: u64,
    pub modified_at: u64,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_secs();
        Self {
            name: name.into(),
            created_at: now,
            modified_at: now,
        }
    }
}

/// Identity of a property: `(application, host, property)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyId {
    pub application: String,
    pub host: String,
    pub property: String,
}

impl PropertyId {
    pub fn new(
        application: impl Into<String>,
        host: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            host: host.into(),
            property: property.into(),
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.application, self.host, self.property)
    }
}

/// Current-state record for one property identity.
///
/// A mutation replaces the record; intermediate history is not kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyRecord {
    Updated {
        id: PropertyId,
        version: Version,
        value: String,
    },
    Deleted {
        id: PropertyId,
        version: Version,
    },
}

impl PropertyRecord {
    pub fn id(&self) -> &PropertyId {
        match self {
            PropertyRecord::Updated { id, .. } | PropertyRecord::Deleted { id, .. } => id,
        }
    }

    pub fn version(&self) -> Version {
        match self {
            PropertyRecord::Updated { version, .. } | PropertyRecord::Deleted { version, .. } => {
                *version
            }
        }
    }

    /// The value, or `None` for a tombstone.
    pub fn value(&self) -> Option<&str> {
        match self {
            PropertyRecord::Updated { value, .. } => Some(value),
            PropertyRecord::Deleted { .. } => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, PropertyRecord::Updated { .. })
    }

    /// Version of the record if it is live.
    pub fn live_version(&self) -> Option<Version> {
        match self {
            PropertyRecord::Updated { version, .. } => Some(*version),
            PropertyRecord::Deleted { .. } => None,
        }
    }

    /// Convert to a wire item (the application is carried by the batch).
    pub fn to_item(&self) -> PropertyItem {
        let id = self.id();
        PropertyItem {
            host: id.host.clone(),
            property: id.property.clone(),
            version: self.version(),
            value: self.value().map(str::to_owned),
        }
    }
}

/// One changed property inside a snapshot or delta batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyItem {
    pub host: String,
    pub property: String,
    pub version: Version,
    /// `None` marks a tombstone
    pub value: Option<String>,
}

impl PropertyItem {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// A delta batch pushed to every subscriber of `application`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertiesChanges {
    pub application: String,
    /// Application version after the commit that produced this batch
    pub last_version: Version,
    pub items: Vec<PropertyItem>,
}

impl PropertiesChanges {
    /// Single-record batch produced by one committed mutation.
    pub fn from_record(record: &PropertyRecord) -> Self {
        Self {
            application: record.id().application.clone(),
            last_version: record.version(),
            items: vec![record.to_item()],
        }
    }

    /// Highest item version in the batch.
    pub fn max_version(&self) -> Option<Version> {
        self.items.iter().map(|i| i.version).max()
    }
}

/// Result of a successfully committed mutation.
///
/// This exact value is stored with the request id and returned on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationReceipt {
    ApplicationCreated { application: String },
    HostCreated { host: String },
    PropertyChanged { record: PropertyRecord },
}

impl MutationReceipt {
    /// Version assigned by the mutation (property mutations only).
    pub fn version(&self) -> Option<Version> {
        match self {
            MutationReceipt::PropertyChanged { record } => Some(record.version()),
            _ => None,
        }
    }
}

/// Search filters. Every filter is optional and applied independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Exact application name
    pub application: Option<String>,
    /// Substring of the host name
    pub host: Option<String>,
    /// Substring of the property name
    pub name: Option<String>,
    /// Substring of the value
    pub value: Option<String>,
}

impl SearchQuery {
    pub fn matches(&self, record: &PropertyRecord) -> bool {
        let value = match record.value() {
            Some(v) => v,
            None => return false,
        };
        let id = record.id();
        self.application.as_deref().map_or(true, |a| id.application == a)
            && self.host.as_deref().map_or(true, |h| id.host.contains(h))
            && self.name.as_deref().map_or(true, |n| id.property.contains(n))
            && self.value.as_deref().map_or(true, |v| value.contains(v))
    }
}

/// Why a change feed ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedEnd {
    /// Expected end: closed by the caller or the server shut the feed down
    Closed,
    /// Unexpected end; the owner should resubscribe
    Failed { reason: String },
}

impl FeedEnd {
    pub fn is_failure(&self) -> bool {
        matches!(self, FeedEnd::Failed { .. })
    }
}

/// What a sync engine reads from its feed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Changes(Arc<PropertiesChanges>),
    /// Always the last message
    Ended(FeedEnd),
}

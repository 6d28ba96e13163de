//! Authoritative version store.
//!
//! ```text
//!   mutation(request_id, ..)
//!        │
//!        ▼
//!  ┌──────────────┐  replay?   ┌──────────────────┐
//!  │ VersionStore │ ─────────► │ idempotency recs │
//!  │              │            └──────────────────┘
//!  │  app lock ───┼── exists? version check? ── allocate last_version + 1
//!  │              │
//!  │  commit: record + application counter + request receipt (one unit)
//!  └──────────────┘
//! ```
//!
//! Two implementations share the rules in this module:
//! - [`MemoryStore`]: one lock per application
//! - [`RocksStore`]: RocksDB column families, one `WriteBatch` per mutation

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    Application, Host, MutationReceipt, PropertyId, PropertyRecord, RequestId, SearchQuery,
    Version,
};

/// Typed, recoverable outcomes of a rejected request.
///
/// These travel on the wire unchanged so callers can branch on them.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Rejection {
    #[error("Application already exists: {application}")]
    ApplicationAlreadyExists { application: String },

    #[error("Host already exists: {host}")]
    HostAlreadyExists { host: String },

    #[error("Application not found: {application}")]
    ApplicationNotFound { application: String },

    #[error("Host not found: {host}")]
    HostNotFound { host: String },

    #[error("Property not found: {id}")]
    PropertyNotFound { id: PropertyId },

    #[error("Update conflict on {id}: expected {expected:?}, current {current:?}")]
    UpdateConflict {
        id: PropertyId,
        expected: Option<Version>,
        current: Option<Version>,
    },

    #[error("Delete conflict on {id}: expected {expected}, current {current}")]
    DeleteConflict {
        id: PropertyId,
        expected: Version,
        current: Version,
    },

    #[error("Invalid name: {name:?}")]
    InvalidName { name: String },
}

/// Store failures: typed rejections plus infrastructure errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Compression error: {0}")]
    Compression(String),
}

impl StoreError {
    /// The typed rejection, if this is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            StoreError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// A committed (or replayed) mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub receipt: MutationReceipt,
    /// `true` when the receipt came from the idempotency records
    pub replayed: bool,
}

impl Committed {
    pub(crate) fn fresh(receipt: MutationReceipt) -> Self {
        Self {
            receipt,
            replayed: false,
        }
    }

    pub(crate) fn replayed(receipt: MutationReceipt) -> Self {
        Self {
            receipt,
            replayed: true,
        }
    }
}

/// The authoritative property store.
///
/// Mutations touching the same application are linearized; every successful
/// property mutation allocates `application.last_version + 1`.
pub trait VersionStore: Send + Sync {
    fn create_application(&self, request_id: RequestId, name: &str)
        -> Result<Committed, StoreError>;

    fn create_host(&self, request_id: RequestId, name: &str) -> Result<Committed, StoreError>;

    /// Insert or replace a property value.
    ///
    /// `expected` must equal the live version of the identity; `None` is only
    /// valid when the identity has no live record.
    fn update_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        value: &str,
        expected: Option<Version>,
    ) -> Result<Committed, StoreError>;

    /// Replace a live property with a tombstone carrying a fresh version.
    fn delete_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        expected: Version,
    ) -> Result<Committed, StoreError>;

    /// Current record for an identity, tombstones included.
    fn read_property(&self, id: &PropertyId) -> Result<Option<PropertyRecord>, StoreError>;

    fn application(&self, name: &str) -> Result<Option<Application>, StoreError>;

    fn list_applications(&self) -> Result<Vec<Application>, StoreError>;

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError>;

    /// Live records of one application, ordered by host then property.
    fn list_properties(&self, application: &str) -> Result<Vec<PropertyRecord>, StoreError>;

    fn search_properties(&self, query: &SearchQuery) -> Result<Vec<PropertyRecord>, StoreError> {
        let applications = match &query.application {
            Some(name) => match self.application(name)? {
                Some(app) => vec![app],
                None => return Ok(Vec::new()),
            },
            None => self.list_applications()?,
        };

        let mut found = Vec::new();
        for app in applications {
            found.extend(
                self.list_properties(&app.name)?
                    .into_iter()
                    .filter(|r| query.matches(r)),
            );
        }
        Ok(found)
    }

    /// Every live record of every application.
    fn configuration_snapshot_list(&self) -> Result<Vec<PropertyRecord>, StoreError> {
        let mut all = Vec::new();
        for app in self.list_applications()? {
            all.extend(self.list_properties(&app.name)?);
        }
        Ok(all)
    }
}

/// Names are non-empty and free of NUL (used as a key separator).
pub(crate) fn validate_name(name: &str) -> Result<(), Rejection> {
    if name.is_empty() || name.contains('\0') {
        return Err(Rejection::InvalidName { name: name.into() });
    }
    Ok(())
}

pub(crate) fn validate_id(id: &PropertyId) -> Result<(), Rejection> {
    validate_name(&id.application)?;
    validate_name(&id.host)?;
    validate_name(&id.property)
}

/// A property mutation, validated against the current record before a
/// version is allocated.
pub(crate) enum PropertyMutation {
    Update {
        value: String,
        expected: Option<Version>,
    },
    Delete {
        expected: Version,
    },
}

impl PropertyMutation {
    pub(crate) fn check(
        &self,
        id: &PropertyId,
        current: Option<&PropertyRecord>,
    ) -> Result<(), Rejection> {
        match self {
            PropertyMutation::Update { expected, .. } => check_update(id, current, *expected),
            PropertyMutation::Delete { expected } => check_delete(id, current, *expected),
        }
    }

    pub(crate) fn into_record(self, id: PropertyId, version: Version) -> PropertyRecord {
        match self {
            PropertyMutation::Update { value, .. } => PropertyRecord::Updated { id, version, value },
            PropertyMutation::Delete { .. } => PropertyRecord::Deleted { id, version },
        }
    }
}

/// Optimistic-concurrency check for an update.
///
/// Only a live record can conflict: its version must equal `expected`.
/// With no live record (absent or tombstoned) any expectation passes.
pub(crate) fn check_update(
    id: &PropertyId,
    current: Option<&PropertyRecord>,
    expected: Option<Version>,
) -> Result<(), Rejection> {
    match current.and_then(PropertyRecord::live_version) {
        Some(live) if expected != Some(live) => Err(Rejection::UpdateConflict {
            id: id.clone(),
            expected,
            current: Some(live),
        }),
        _ => Ok(()),
    }
}

/// Existence and version check for a delete.
pub(crate) fn check_delete(
    id: &PropertyId,
    current: Option<&PropertyRecord>,
    expected: Version,
) -> Result<(), Rejection> {
    match current.and_then(PropertyRecord::live_version) {
        None => Err(Rejection::PropertyNotFound { id: id.clone() }),
        Some(live) if live != expected => Err(Rejection::DeleteConflict {
            id: id.clone(),
            expected,
            current: live,
        }),
        Some(_) => Ok(()),
    }
}

//! # propsync: Versioned configuration properties with live sync
//!
//! A central server stores properties per application and host, stamps
//! every change with a per-application version, and streams changes to
//! subscribed clients, which keep a local mirror converged.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ ConfigClient │ ◄─────────────────► │ ConfigServer │
//! │ (per service)│    Binary Proto     │  (central)   │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │ Mirror       │                     │ VersionStore │
//! │ + TypedView  │                     │ (authority)  │
//! └──────────────┘                     └──────┬───────┘
//!                                             │
//!                                     ┌───────┴────────┐
//!                                     │ ChangeNotifier │
//!                                     │ (fan-out)      │
//!                                     └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`]: Applications, hosts, property records and change batches
//! - [`store`]: Authoritative versioned store (in-memory and RocksDB)
//! - [`idempotency`]: Request-id receipts for at-most-once mutations
//! - [`notifier`]: Subscriptions and per-application change feeds
//! - [`service`]: Store + notifier behind one request handler
//! - [`protocol`]: Binary wire protocol (bincode-encoded messages)
//! - [`server`]: WebSocket configuration server
//! - [`client`]: WebSocket client with request correlation and watches
//! - [`mirror`]: Client-side replica and the sync engine feeding it
//! - [`typed`]: Schema-checked typed views over a mirror
//! - [`auth`]: Roles and the mutation authorization boundary
//! - [`retry`]: Fixed-delay retry for transient failures

pub mod auth;
pub mod client;
pub mod idempotency;
pub mod mirror;
pub mod model;
pub mod notifier;
pub mod protocol;
pub mod retry;
pub mod server;
pub mod service;
pub mod store;
pub mod typed;

// Re-exports for convenience
pub use auth::{
    AuthError, Authenticator, CredentialSource, Role, StaticAuthenticator, UserInfo,
};
pub use client::{ClientConfig, ClientError, ConfigClient, ConnectionState, WatchHandle};
pub use mirror::{Mirror, MirrorStats, PropertyChange, SyncEngine};
pub use model::{
    Application, FeedEnd, FeedMessage, Host, MutationReceipt, PropertiesChanges, PropertyId,
    PropertyItem, PropertyRecord, RequestId, SearchQuery, SubscriberId, Version,
};
pub use notifier::{ChangeNotifier, Feed, FeedError, Subscription};
pub use protocol::{ClientMessage, ProtocolError, Request, Response, ServerMessage};
pub use retry::RetryPolicy;
pub use server::{ConfigServer, ServerConfig, ServerError, ServerStats};
pub use service::PropertyService;
pub use store::{MemoryStore, Rejection, RocksStore, StoreConfig, StoreError, VersionStore};
pub use typed::{Converter, PropertySchema, TypedValue, TypedView, ValueKind};

//! WebSocket client for the configuration server.
//!
//! Provides:
//! - Typed request methods, each with a deadline
//! - Automatic retry of idempotent reads (never of mutations)
//! - Change feeds routed by subscriber id
//! - `watch`: subscribe, seed a [`Mirror`], and keep it in sync
//!
//! ```text
//!  caller ──► request() ──► outgoing mpsc ──► writer task ──► WebSocket
//!     ▲                                                          │
//!     └── oneshot (by correlation id) ◄── reader task ◄──────────┘
//!                                             │
//!                     feeds[subscriber_id] ◄──┘ (Changes / FeedEnded)
//! ```

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::mirror::{Mirror, SyncEngine};
use crate::model::{
    Application, FeedEnd, FeedMessage, Host, MutationReceipt, PropertyId, PropertyRecord,
    RequestId, SearchQuery, SubscriberId, Version,
};
use crate::notifier::Subscription;
use crate::protocol::{ClientMessage, ProtocolError, Request, Response, ServerMessage};
use crate::retry::{retry, RetryPolicy, Transient};
use crate::store::Rejection;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// e.g. `ws://127.0.0.1:9090`
    pub server_url: String,
    /// Deadline for every request
    pub request_timeout: Duration,
    /// How long `shutdown` waits for background tasks before aborting them
    pub shutdown_grace: Duration,
    /// Retry schedule for idempotent reads
    pub read_retry: RetryPolicy,
    /// Bearer token attached to every request
    pub auth_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            request_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
            read_retry: RetryPolicy::default(),
            auth_token: None,
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Disconnected from server")]
    Disconnected,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl ClientError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ClientError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

impl Transient for ClientError {
    fn is_transient(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }
}

type FeedSenders = Arc<Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<FeedMessage>>>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// The configuration client.
pub struct ConfigClient {
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: mpsc::Sender<Vec<u8>>,
    pending: Pending,
    feeds: FeedSenders,
    next_correlation: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl ConfigClient {
    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));

        let (ws_stream, _) = tokio_tungstenite::connect_async(config.server_url.as_str())
            .await
            .map_err(|e| {
                ClientError::Connect(format!("{}: {e}", config.server_url))
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        // Before the reader exists, so its Disconnected is never overwritten.
        *state.write().await = ConnectionState::Connected;

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        let writer = tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: route responses and pushes
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let feeds: FeedSenders = Arc::new(Mutex::new(HashMap::new()));
        let reader = {
            let pending = pending.clone();
            let feeds = feeds.clone();
            let state = state.clone();
            tokio::spawn(async move {
                while let Some(msg) = ws_reader.next().await {
                    match msg {
                        Ok(Message::Binary(data)) => match ServerMessage::decode(&data) {
                            Ok(msg) => route(msg, &pending, &feeds),
                            Err(e) => log::warn!("Dropping undecodable server frame: {e}"),
                        },
                        Ok(Message::Close(_)) => break,
                        Err(e) => {
                            log::error!("WebSocket error: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                // Connection lost: fail outstanding requests and open feeds.
                *state.write().await = ConnectionState::Disconnected;
                pending.lock().clear();
                for (_, tx) in feeds.lock().drain() {
                    let _ = tx.send(FeedMessage::Ended(FeedEnd::Failed {
                        reason: "connection lost".into(),
                    }));
                }
            })
        };

        log::info!("Connected to {}", config.server_url);

        Ok(Self {
            config,
            state,
            outgoing_tx: out_tx,
            pending,
            feeds,
            next_correlation: AtomicU64::new(1),
            tasks: vec![writer, reader],
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Send one request and wait for its response, up to `request_timeout`.
    ///
    /// Idempotent reads are resent on timeout under `read_retry`; mutations
    /// and feed control go out exactly once.
    pub async fn request(&self, request: Request) -> Result<Response, ClientError> {
        if request.is_idempotent_read() {
            retry(&self.config.read_retry, "read", || self.send_once(request.clone())).await
        } else {
            self.send_once(request).await
        }
    }

    async fn send_once(&self, request: Request) -> Result<Response, ClientError> {
        if *self.state.read().await == ConnectionState::Disconnected {
            return Err(ClientError::Disconnected);
        }

        let correlation_id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id, tx);

        let encoded = ClientMessage::Request {
            correlation_id,
            auth_token: self.config.auth_token.clone(),
            request,
        }
        .encode()?;

        if self.outgoing_tx.send(encoded).await.is_err() {
            self.pending.lock().remove(&correlation_id);
            return Err(ClientError::Disconnected);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                self.pending.lock().remove(&correlation_id);
                Err(ClientError::Timeout(self.config.request_timeout))
            }
        }
    }

    // ─── Mutations ────────────────────────────────────────────────────

    pub async fn create_application(
        &self,
        request_id: RequestId,
        name: &str,
    ) -> Result<MutationReceipt, ClientError> {
        let response = self
            .request(Request::CreateApplication {
                request_id,
                application_name: name.into(),
            })
            .await?;
        committed(response)
    }

    pub async fn create_host(
        &self,
        request_id: RequestId,
        name: &str,
    ) -> Result<MutationReceipt, ClientError> {
        let response = self
            .request(Request::CreateHost {
                request_id,
                host_name: name.into(),
            })
            .await?;
        committed(response)
    }

    pub async fn update_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        value: &str,
        expected: Option<Version>,
    ) -> Result<MutationReceipt, ClientError> {
        let response = self
            .request(Request::update_property(request_id, id, value, expected))
            .await?;
        committed(response)
    }

    pub async fn delete_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        expected: Version,
    ) -> Result<MutationReceipt, ClientError> {
        let response = self
            .request(Request::delete_property(request_id, id, expected))
            .await?;
        committed(response)
    }

    // ─── Reads ────────────────────────────────────────────────────────

    pub async fn list_applications(&self) -> Result<Vec<Application>, ClientError> {
        match self.request(Request::ListApplications).await? {
            Response::Applications(apps) => Ok(apps),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_hosts(&self) -> Result<Vec<Host>, ClientError> {
        match self.request(Request::ListHosts).await? {
            Response::Hosts(hosts) => Ok(hosts),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_properties(
        &self,
        application: &str,
    ) -> Result<Vec<PropertyRecord>, ClientError> {
        let request = Request::ListProperties {
            application_name: application.into(),
        };
        match self.request(request).await? {
            Response::Properties(records) => Ok(records),
            other => Err(unexpected(other)),
        }
    }

    pub async fn read_property(
        &self,
        id: &PropertyId,
    ) -> Result<Option<PropertyRecord>, ClientError> {
        match self.request(Request::read_property(id)).await? {
            Response::Property(record) => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    pub async fn search_properties(
        &self,
        query: SearchQuery,
    ) -> Result<Vec<PropertyRecord>, ClientError> {
        match self.request(Request::SearchProperties(query)).await? {
            Response::Properties(records) => Ok(records),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.request(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    // ─── Watch ────────────────────────────────────────────────────────

    /// Register (or re-register) `subscriber_id` and fetch the snapshot.
    pub async fn subscribe(
        &self,
        application: &str,
        host_filter: Option<&str>,
        subscriber_id: SubscriberId,
    ) -> Result<Subscription, ClientError> {
        let request = Request::SubscribeApplication {
            application_name: application.into(),
            host_name: host_filter.map(str::to_owned),
            subscriber_id,
        };
        match self.request(request).await? {
            Response::Subscribed {
                subscriber_id,
                snapshot,
                last_version,
            } => Ok(Subscription {
                subscriber_id,
                application: application.into(),
                snapshot,
                last_delivered_version: last_version,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Start the server push for a subscription.
    ///
    /// The local route is in place before the request goes out, so no push
    /// can arrive unrouted.
    pub async fn open_feed(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<mpsc::UnboundedReceiver<FeedMessage>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().insert(subscriber_id, tx);

        let outcome = self.request(Request::OpenFeed { subscriber_id }).await;
        match outcome {
            Ok(Response::FeedOpened { .. }) => Ok(rx),
            Ok(other) => {
                self.feeds.lock().remove(&subscriber_id);
                Err(unexpected(other))
            }
            Err(e) => {
                self.feeds.lock().remove(&subscriber_id);
                Err(e)
            }
        }
    }

    /// Expected, caller-initiated close. The local feed ends with `Closed`.
    pub async fn close_feed(&self, subscriber_id: SubscriberId) -> Result<(), ClientError> {
        if let Some(tx) = self.feeds.lock().remove(&subscriber_id) {
            let _ = tx.send(FeedMessage::Ended(FeedEnd::Closed));
        }
        match self.request(Request::CloseFeed { subscriber_id }).await? {
            Response::FeedClosed { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Subscribe to `application` and keep a fresh mirror in sync.
    pub async fn watch(
        &self,
        application: &str,
        host_filter: Option<&str>,
    ) -> Result<WatchHandle, ClientError> {
        let mirror = Arc::new(Mirror::new(application));
        self.watch_into(mirror, host_filter, Uuid::new_v4()).await
    }

    /// Subscribe into an existing mirror; the snapshot is reconciled, not
    /// blindly loaded.
    pub async fn watch_into(
        &self,
        mirror: Arc<Mirror>,
        host_filter: Option<&str>,
        subscriber_id: SubscriberId,
    ) -> Result<WatchHandle, ClientError> {
        let subscription = self
            .subscribe(mirror.application(), host_filter, subscriber_id)
            .await?;
        mirror.reset_from_snapshot(&subscription.snapshot);

        let feed = match self.open_feed(subscriber_id).await {
            Ok(feed) => feed,
            Err(e) => {
                // Nothing would ever drain this subscription.
                if let Err(close) = self.close_feed(subscriber_id).await {
                    log::debug!("Could not drop subscription {subscriber_id}: {close}");
                }
                return Err(e);
            }
        };
        let task = tokio::spawn(SyncEngine::new(mirror.clone(), feed).run());

        Ok(WatchHandle {
            subscriber_id,
            host_filter: host_filter.map(str::to_owned),
            mirror,
            task,
        })
    }

    /// Re-establish a watch, keeping its mirror and subscriber id.
    pub async fn resubscribe(&self, handle: WatchHandle) -> Result<WatchHandle, ClientError> {
        let WatchHandle {
            subscriber_id,
            host_filter,
            mirror,
            task,
        } = handle;

        if !task.is_finished() {
            let _ = self.close_feed(subscriber_id).await;
            task.abort();
        }
        log::info!("Resubscribing {subscriber_id} to {}", mirror.application());
        self.watch_into(mirror, host_filter.as_deref(), subscriber_id)
            .await
    }

    /// Close a watch and wait for its engine.
    pub async fn unwatch(&self, handle: WatchHandle) -> Result<FeedEnd, ClientError> {
        self.close_feed(handle.subscriber_id).await?;
        Ok(handle.wait().await)
    }

    /// Close all feeds, disconnect, and wait up to `shutdown_grace` for the
    /// background tasks before aborting them.
    pub async fn shutdown(self) {
        for (_, tx) in self.feeds.lock().drain() {
            let _ = tx.send(FeedMessage::Ended(FeedEnd::Closed));
        }
        drop(self.outgoing_tx);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        for task in self.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout_at(deadline, task).await.is_err() {
                log::warn!("Client task still running after grace period; aborting");
                abort.abort();
            }
        }
        log::info!("Disconnected from {}", self.config.server_url);
    }
}

fn route(msg: ServerMessage, pending: &Pending, feeds: &FeedSenders) {
    match msg {
        ServerMessage::Response {
            correlation_id,
            response,
        } => {
            if let Some(tx) = pending.lock().remove(&correlation_id) {
                let _ = tx.send(response);
            } else {
                log::debug!("Late response for request {correlation_id}");
            }
        }
        ServerMessage::Changes {
            subscriber_id,
            changes,
        } => {
            let mut feeds = feeds.lock();
            let delivered = feeds
                .get(&subscriber_id)
                .is_some_and(|tx| tx.send(FeedMessage::Changes(Arc::new(changes))).is_ok());
            if !delivered {
                feeds.remove(&subscriber_id);
            }
        }
        ServerMessage::FeedEnded {
            subscriber_id,
            reason,
        } => {
            if let Some(tx) = feeds.lock().remove(&subscriber_id) {
                let _ = tx.send(FeedMessage::Ended(reason));
            }
        }
    }
}

fn committed(response: Response) -> Result<MutationReceipt, ClientError> {
    match response {
        Response::Committed(receipt) => Ok(receipt),
        other => Err(unexpected(other)),
    }
}

/// Map a non-success response to an error.
fn unexpected(response: Response) -> ClientError {
    match response {
        Response::Rejected(rejection) => ClientError::Rejected(rejection),
        Response::Failed { message } => ClientError::Server(message),
        Response::Unauthorized { message } => ClientError::Unauthorized(message),
        other => ProtocolError::UnexpectedResponse(format!("{other:?}")).into(),
    }
}

/// A running watch: the mirror plus the engine that feeds it.
pub struct WatchHandle {
    subscriber_id: SubscriberId,
    host_filter: Option<String>,
    mirror: Arc<Mirror>,
    task: JoinHandle<FeedEnd>,
}

impl WatchHandle {
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the feed to end.
    pub async fn wait(self) -> FeedEnd {
        match self.task.await {
            Ok(end) => end,
            Err(e) => FeedEnd::Failed {
                reason: format!("sync engine stopped: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertiesChanges;
    use tokio::net::TcpListener;

    fn quick_config(server_url: String) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_millis(100),
            read_retry: RetryPolicy::new(Duration::from_millis(10), Some(3)),
            ..ClientConfig::new(server_url)
        }
    }

    /// Accept one connection and answer each request through `answer`,
    /// called with the request and its 1-based arrival number. `None`
    /// leaves the request unanswered. Returns the url and every request
    /// seen.
    async fn scripted_server<F>(answer: F) -> (String, Arc<Mutex<Vec<Request>>>)
    where
        F: Fn(&Request, usize) -> Option<Response> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Binary(data) = msg else {
                    continue;
                };
                let Ok(ClientMessage::Request {
                    correlation_id,
                    request,
                    ..
                }) = ClientMessage::decode(&data)
                else {
                    continue;
                };
                let n = {
                    let mut log = log.lock();
                    log.push(request.clone());
                    log.len()
                };
                if let Some(response) = answer(&request, n) {
                    let frame = ServerMessage::Response {
                        correlation_id,
                        response,
                    }
                    .encode()
                    .unwrap();
                    if ws.send(Message::Binary(frame.into())).await.is_err() {
                        break;
                    }
                }
            }
        });

        (format!("ws://{addr}"), seen)
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "ws://127.0.0.1:9090");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.auth_token.is_none());
        assert_eq!(ClientConfig::new("ws://x:1").server_url, "ws://x:1");
    }

    #[test]
    fn test_only_timeouts_are_transient() {
        assert!(ClientError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ClientError::Disconnected.is_transient());
        assert!(!ClientError::Rejected(Rejection::HostNotFound { host: "h".into() })
            .is_transient());
    }

    #[test]
    fn test_unexpected_maps_outcomes() {
        let rejected = unexpected(Response::Rejected(Rejection::ApplicationNotFound {
            application: "a".into(),
        }));
        assert!(rejected.rejection().is_some());
        assert!(matches!(
            unexpected(Response::Unauthorized {
                message: "no".into()
            }),
            ClientError::Unauthorized(_)
        ));
        assert!(matches!(
            unexpected(Response::Pong),
            ClientError::Protocol(ProtocolError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_route_pushes_by_subscriber() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let feeds: FeedSenders = Arc::new(Mutex::new(HashMap::new()));
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        feeds.lock().insert(id, tx);

        let changes = PropertiesChanges {
            application: "billing".into(),
            last_version: 1,
            items: Vec::new(),
        };
        route(
            ServerMessage::Changes {
                subscriber_id: id,
                changes: changes.clone(),
            },
            &pending,
            &feeds,
        );
        route(
            ServerMessage::FeedEnded {
                subscriber_id: id,
                reason: FeedEnd::Closed,
            },
            &pending,
            &feeds,
        );

        assert_eq!(
            rx.recv().await,
            Some(FeedMessage::Changes(Arc::new(changes)))
        );
        assert_eq!(rx.recv().await, Some(FeedMessage::Ended(FeedEnd::Closed)));
        assert!(feeds.lock().is_empty());
    }

    #[tokio::test]
    async fn test_route_response_by_correlation() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let feeds: FeedSenders = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(9, tx);

        route(
            ServerMessage::Response {
                correlation_id: 9,
                response: Response::Pong,
            },
            &pending,
            &feeds,
        );
        assert_eq!(rx.await.unwrap(), Response::Pong);
        assert!(pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let config = ClientConfig::new("ws://127.0.0.1:1");
        assert!(matches!(
            ConfigClient::connect(config).await,
            Err(ClientError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_are_resent_after_timeout() {
        let (url, seen) = scripted_server(|request, n| match request {
            Request::ListApplications if n > 1 => Some(Response::Applications(Vec::new())),
            _ => None,
        })
        .await;
        let client = ConfigClient::connect(quick_config(url)).await.unwrap();

        assert!(client.list_applications().await.unwrap().is_empty());
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_mutations_are_sent_once() {
        let (url, seen) = scripted_server(|_, _| None).await;
        let client = ConfigClient::connect(quick_config(url)).await.unwrap();

        let err = client.create_host(Uuid::new_v4(), "host1").await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_closes_subscription() {
        let (url, seen) = scripted_server(|request, _| match request {
            Request::SubscribeApplication { subscriber_id, .. } => Some(Response::Subscribed {
                subscriber_id: *subscriber_id,
                snapshot: Vec::new(),
                last_version: 0,
            }),
            Request::OpenFeed { .. } => Some(Response::Failed {
                message: "feed refused".into(),
            }),
            Request::CloseFeed { subscriber_id } => Some(Response::FeedClosed {
                subscriber_id: *subscriber_id,
            }),
            _ => None,
        })
        .await;
        let client = ConfigClient::connect(quick_config(url)).await.unwrap();
        let id = Uuid::new_v4();

        let Err(err) = client
            .watch_into(Arc::new(Mirror::new("billing")), None, id)
            .await
        else {
            panic!("watch should fail when the feed is refused");
        };
        assert!(matches!(err, ClientError::Server(_)));
        assert_eq!(
            seen.lock().last(),
            Some(&Request::CloseFeed { subscriber_id: id })
        );
    }

    #[tokio::test]
    async fn test_requests_fail_fast_once_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.close(None).await;
        });

        let config = ClientConfig {
            request_timeout: Duration::from_secs(5),
            ..ClientConfig::new(format!("ws://{addr}"))
        };
        let client = ConfigClient::connect(config).await.unwrap();
        for _ in 0..100 {
            if client.state().await == ConnectionState::Disconnected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.state().await, ConnectionState::Disconnected);

        let started = tokio::time::Instant::now();
        let id = PropertyId::new("billing", "host1", "price");
        assert!(matches!(
            client.update_property(Uuid::new_v4(), &id, "1", None).await,
            Err(ClientError::Disconnected)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

//! WebSocket configuration server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                                   ┌── MemoryStore
//!             ├── connection task ── PropertyService ┤   or
//! Client B ──┘        │                  │          └── RocksStore
//!                     │                  ▼
//!                     │            ChangeNotifier ── broadcast per application
//!                     │                  │
//!                     └── feed forwarders ◄┘ (one task per open feed)
//! ```
//!
//! Each connection owns:
//! - a request loop answering `ClientMessage::Request` in arrival order
//! - one forwarding task per feed it opened, pushing into a bounded queue
//! - the subscriptions it made, released when the connection ends
//!
//! Shutdown ends every feed, tells each connection to flush and close, and
//! aborts whatever is still running after `shutdown_grace`.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::auth::{
    authorize_mutation, AuthError, Authenticator, CredentialSource, StaticAuthenticator,
};
use crate::model::{FeedMessage, SubscriberId};
use crate::notifier::ChangeNotifier;
use crate::protocol::{ClientMessage, ProtocolError, Request, Response, ServerMessage};
use crate::retry::RetryPolicy;
use crate::service::PropertyService;
use crate::store::{MemoryStore, RocksStore, StoreConfig, StoreError, VersionStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Batches buffered per application, and per connection push queue,
    /// before a slow subscriber's feed ends
    pub broadcast_capacity: usize,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Frames larger than this are dropped unread
    pub max_frame_bytes: usize,
    /// Token table; mutations need an owner token when set
    pub credentials: Option<CredentialSource>,
    /// How long connections get to flush and close on shutdown
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            storage_path: None,
            max_frame_bytes: 1024 * 1024,
            credentials: None,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Failures building a server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_requests: u64,
    pub total_mutations: u64,
    pub unauthorized_requests: u64,
    pub feeds_opened: u64,
}

/// Everything a connection task needs.
#[derive(Clone)]
struct ConnectionContext {
    service: PropertyService,
    authenticator: Option<Arc<dyn Authenticator>>,
    stats: Arc<RwLock<ServerStats>>,
    max_frame_bytes: usize,
    push_capacity: usize,
}

/// Feeds and subscriptions created over one connection.
#[derive(Default)]
struct ConnectionFeeds {
    forwarders: HashMap<SubscriberId, JoinHandle<()>>,
    /// Registration generation of each subscription made here
    subscribed: HashMap<SubscriberId, u64>,
}

impl ConnectionFeeds {
    /// Stop the forwarders and drop this connection's subscriptions,
    /// leaving any that were since re-made elsewhere.
    fn release(self, notifier: &ChangeNotifier) -> (usize, usize) {
        let forwarders = self.forwarders.len();
        for (_, task) in self.forwarders {
            task.abort();
        }
        let released = self
            .subscribed
            .into_iter()
            .filter(|(id, generation)| notifier.release(id, *generation))
            .count();
        (forwarders, released)
    }
}

/// The configuration server.
pub struct ConfigServer {
    config: ServerConfig,
    service: PropertyService,
    authenticator: Option<Arc<dyn Authenticator>>,
    stats: Arc<RwLock<ServerStats>>,
}

impl ConfigServer {
    /// Create a server, opening RocksDB when `storage_path` is set and
    /// loading the token table when `credentials` is.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store: Arc<dyn VersionStore> = match &config.storage_path {
            Some(path) => Arc::new(RocksStore::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?),
            None => Arc::new(MemoryStore::new()),
        };
        let authenticator = match &config.credentials {
            Some(source) => Some(StaticAuthenticator::load(source, &RetryPolicy::default())?),
            None => None,
        };

        let server = Self::with_store(config, store);
        Ok(match authenticator {
            Some(auth) => server.with_authenticator(Arc::new(auth)),
            None => server,
        })
    }

    /// Create a server over an already-open store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn VersionStore>) -> Self {
        let service = PropertyService::new(store, config.broadcast_capacity);
        Self {
            config,
            service,
            authenticator: None,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::with_store(ServerConfig::default(), Arc::new(MemoryStore::new()))
    }

    /// Require an owner role on mutations.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Bind `bind_addr` and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        self.serve_until(listener, std::future::pending::<()>()).await
    }

    /// Serve until `shutdown` resolves, then end every feed and close every
    /// connection within `shutdown_grace`.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()>,
    {
        log::info!("Config server listening on {}", listener.local_addr()?);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        let result: Result<(), BoxError> = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => break Err(e.into()),
                    };
                    log::debug!("New TCP connection from {addr}");

                    let ctx = self.context();
                    let stop = stop_rx.clone();
                    connections.spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, addr, ctx, stop).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => break Ok(()),
            }
        };

        // Feeds end first so their end markers are flushed before the close.
        self.service.notifier().shutdown();
        let _ = stop_tx.send(true);

        let grace = self.config.shutdown_grace;
        let deadline = tokio::time::Instant::now() + grace;
        while !connections.is_empty() {
            if tokio::time::timeout_at(deadline, connections.join_next())
                .await
                .is_err()
            {
                log::warn!(
                    "Aborting {} connections still open after {grace:?}",
                    connections.len()
                );
                connections.shutdown().await;
            }
        }

        log::info!("Config server stopped");
        result
    }

    fn context(&self) -> ConnectionContext {
        ConnectionContext {
            service: self.service.clone(),
            authenticator: self.authenticator.clone(),
            stats: self.stats.clone(),
            max_frame_bytes: self.config.max_frame_bytes,
            push_capacity: self.config.broadcast_capacity.max(1),
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: ConnectionContext,
        stop: watch::Receiver<bool>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (ws_sender, ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = ctx.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut feeds = ConnectionFeeds::default();
        let result =
            Self::connection_loop(&ctx, addr, ws_sender, ws_receiver, &mut feeds, stop).await;

        // Cleanup: stop this connection's forwarders and drop what it
        // subscribed, whether or not a feed was ever opened.
        let (forwarders, released) = feeds.release(ctx.service.notifier());
        if forwarders > 0 || released > 0 {
            log::debug!("Closed {forwarders} feeds and {released} subscriptions of {addr}");
        }

        ctx.stats.write().await.active_connections -= 1;
        result
    }

    async fn connection_loop(
        ctx: &ConnectionContext,
        addr: SocketAddr,
        mut ws_sender: WsSink,
        mut ws_receiver: WsSource,
        feeds: &mut ConnectionFeeds,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), BoxError> {
        // Feed forwarders push here; this loop owns the socket.
        let (push_tx, mut push_rx) = mpsc::channel::<ServerMessage>(ctx.push_capacity);

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            if data.len() > ctx.max_frame_bytes {
                                let err = ProtocolError::FrameTooLarge {
                                    size: data.len(),
                                    limit: ctx.max_frame_bytes,
                                };
                                log::warn!("Dropping frame from {addr}: {err}");
                                continue;
                            }
                            match ClientMessage::decode(&data) {
                                Ok(ClientMessage::Request { correlation_id, auth_token, request }) => {
                                    let response = Self::dispatch(
                                        ctx,
                                        request,
                                        auth_token.as_deref(),
                                        feeds,
                                        &push_tx,
                                    )
                                    .await;
                                    let encoded = ServerMessage::Response { correlation_id, response }.encode()?;
                                    ws_sender.send(Message::Binary(encoded.into())).await?;
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            return Ok(());
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            return Ok(());
                        }

                        _ => {}
                    }
                }

                Some(push) = push_rx.recv() => {
                    let encoded = push.encode()?;
                    ws_sender.send(Message::Binary(encoded.into())).await?;
                }

                _ = stop.changed() => {
                    // Forwarders exit after queueing their end markers.
                    drop(push_tx);
                    while let Some(push) = push_rx.recv().await {
                        ws_sender.send(Message::Binary(push.encode()?.into())).await?;
                    }
                    let _ = ws_sender.send(Message::Close(None)).await;
                    log::info!("Closed connection from {addr} on shutdown");
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(
        ctx: &ConnectionContext,
        request: Request,
        auth_token: Option<&str>,
        feeds: &mut ConnectionFeeds,
        push_tx: &mpsc::Sender<ServerMessage>,
    ) -> Response {
        let is_mutation = request.is_mutation();
        {
            let mut s = ctx.stats.write().await;
            s.total_requests += 1;
            if is_mutation {
                s.total_mutations += 1;
            }
        }

        if is_mutation {
            if let Some(authenticator) = &ctx.authenticator {
                if let Err(e) = authorize_mutation(authenticator.as_ref(), auth_token) {
                    log::warn!("Rejected mutation: {e}");
                    ctx.stats.write().await.unauthorized_requests += 1;
                    return Response::Unauthorized {
                        message: e.to_string(),
                    };
                }
            }
        }

        let notifier = ctx.service.notifier();
        match request {
            request @ Request::SubscribeApplication { .. } => {
                let response = ctx.service.handle(request);
                if let Response::Subscribed { subscriber_id, .. } = &response {
                    if let Some(generation) = notifier.generation_of(subscriber_id) {
                        feeds.subscribed.insert(*subscriber_id, generation);
                    }
                }
                response
            }
            Request::OpenFeed { subscriber_id } => match ctx.service.open_feed(subscriber_id) {
                Ok(feed) => {
                    let task = feed.forward_with(push_tx.clone(), |subscriber_id, msg| match msg {
                        FeedMessage::Changes(changes) => ServerMessage::Changes {
                            subscriber_id,
                            changes: (*changes).clone(),
                        },
                        FeedMessage::Ended(reason) => ServerMessage::FeedEnded {
                            subscriber_id,
                            reason,
                        },
                    });
                    if let Some(old) = feeds.forwarders.insert(subscriber_id, task) {
                        old.abort();
                    }
                    ctx.stats.write().await.feeds_opened += 1;
                    Response::FeedOpened { subscriber_id }
                }
                Err(e) => Response::Failed {
                    message: e.to_string(),
                },
            },
            Request::CloseFeed { subscriber_id } => {
                if let Some(task) = feeds.forwarders.remove(&subscriber_id) {
                    task.abort();
                }
                feeds.subscribed.remove(&subscriber_id);
                notifier.unsubscribe(&subscriber_id);
                Response::FeedClosed { subscriber_id }
            }
            other => ctx.service.handle(other),
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// The service behind this server, for in-process use.
    pub fn service(&self) -> &PropertyService {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Role, StaticAuthenticator, UserInfo};
    use crate::model::{FeedEnd, PropertyId};
    use uuid::Uuid;

    fn subscribe(subscriber_id: SubscriberId) -> Request {
        Request::SubscribeApplication {
            application_name: "billing".into(),
            host_name: None,
            subscriber_id,
        }
    }

    fn seeded(config: ServerConfig) -> ConfigServer {
        let server = ConfigServer::with_store(config, Arc::new(MemoryStore::new()));
        let service = server.service();
        service.create_application(Uuid::new_v4(), "billing").unwrap();
        service.create_host(Uuid::new_v4(), "host1").unwrap();
        server
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.max_frame_bytes, 1024 * 1024);
        assert!(config.storage_path.is_none());
        assert!(config.credentials.is_none());
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
    }

    #[test]
    fn test_server_creation() {
        let server = ConfigServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
        assert!(server.authenticator.is_none());
    }

    #[tokio::test]
    async fn test_server_with_storage_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            storage_path: Some(dir.path().join("db")),
            ..ServerConfig::default()
        };

        {
            let server = ConfigServer::new(config.clone()).unwrap();
            server
                .service()
                .create_application(Uuid::new_v4(), "billing")
                .unwrap();
        }

        let server = ConfigServer::new(config).unwrap();
        let apps = server.service().list_applications().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "billing");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = ConfigServer::with_defaults();
        assert_eq!(server.stats().await, ServerStats::default());
    }

    #[tokio::test]
    async fn test_dispatch_enforces_owner_role() {
        let auth = StaticAuthenticator::new()
            .with_user("owner", UserInfo::new("o", [Role::ApplicationOwner], None))
            .with_user("dev", UserInfo::new("d", [Role::Developer], None));
        let server = ConfigServer::with_defaults().with_authenticator(Arc::new(auth));
        let ctx = server.context();
        let (push_tx, _push_rx) = mpsc::channel(16);
        let mut feeds = ConnectionFeeds::default();

        let create = |name: &str| Request::CreateApplication {
            request_id: Uuid::new_v4(),
            application_name: name.into(),
        };

        let denied =
            ConfigServer::dispatch(&ctx, create("billing"), Some("dev"), &mut feeds, &push_tx)
                .await;
        assert!(matches!(denied, Response::Unauthorized { .. }));

        let anonymous =
            ConfigServer::dispatch(&ctx, create("billing"), None, &mut feeds, &push_tx).await;
        assert!(matches!(anonymous, Response::Unauthorized { .. }));

        let allowed =
            ConfigServer::dispatch(&ctx, create("billing"), Some("owner"), &mut feeds, &push_tx)
                .await;
        assert!(matches!(allowed, Response::Committed(_)));

        // Reads never need a token.
        let read = ConfigServer::dispatch(
            &ctx,
            Request::read_property(&PropertyId::new("billing", "h", "p")),
            None,
            &mut feeds,
            &push_tx,
        )
        .await;
        assert_eq!(read, Response::Property(None));

        let stats = server.stats().await;
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.total_mutations, 3);
        assert_eq!(stats.unauthorized_requests, 2);
    }

    #[tokio::test]
    async fn test_dispatch_open_and_close_feed() {
        let server = ConfigServer::with_defaults();
        let ctx = server.context();
        let (push_tx, mut push_rx) = mpsc::channel(16);
        let mut feeds = ConnectionFeeds::default();
        let service = server.service();

        service.create_application(Uuid::new_v4(), "billing").unwrap();
        service.create_host(Uuid::new_v4(), "host1").unwrap();
        let subscriber_id = Uuid::new_v4();
        let subscribed = ConfigServer::dispatch(
            &ctx,
            subscribe(subscriber_id),
            None,
            &mut feeds,
            &push_tx,
        )
        .await;
        assert!(matches!(subscribed, Response::Subscribed { .. }));
        assert!(feeds.subscribed.contains_key(&subscriber_id));

        let opened = ConfigServer::dispatch(
            &ctx,
            Request::OpenFeed { subscriber_id },
            None,
            &mut feeds,
            &push_tx,
        )
        .await;
        assert_eq!(opened, Response::FeedOpened { subscriber_id });

        service
            .update_property(
                Uuid::new_v4(),
                &PropertyId::new("billing", "host1", "price"),
                "10",
                None,
            )
            .unwrap();
        match push_rx.recv().await.unwrap() {
            ServerMessage::Changes { changes, .. } => assert_eq!(changes.last_version, 1),
            other => panic!("unexpected push {other:?}"),
        }

        let closed = ConfigServer::dispatch(
            &ctx,
            Request::CloseFeed { subscriber_id },
            None,
            &mut feeds,
            &push_tx,
        )
        .await;
        assert_eq!(closed, Response::FeedClosed { subscriber_id });
        assert!(feeds.forwarders.is_empty());
        assert!(feeds.subscribed.is_empty());
        assert!(!service.notifier().is_subscribed(&subscriber_id));
    }

    #[tokio::test]
    async fn test_open_unknown_feed_fails() {
        let server = ConfigServer::with_defaults();
        let ctx = server.context();
        let (push_tx, _push_rx) = mpsc::channel(16);
        let mut feeds = ConnectionFeeds::default();

        let response = ConfigServer::dispatch(
            &ctx,
            Request::OpenFeed {
                subscriber_id: Uuid::new_v4(),
            },
            None,
            &mut feeds,
            &push_tx,
        )
        .await;
        assert!(matches!(response, Response::Failed { .. }));
    }

    #[tokio::test]
    async fn test_undrained_feed_ends_failed() {
        let server = seeded(ServerConfig {
            broadcast_capacity: 2,
            ..ServerConfig::default()
        });
        let ctx = server.context();
        let (push_tx, mut push_rx) = mpsc::channel(ctx.push_capacity);
        let mut feeds = ConnectionFeeds::default();
        let service = server.service();
        let subscriber_id = Uuid::new_v4();

        ConfigServer::dispatch(&ctx, subscribe(subscriber_id), None, &mut feeds, &push_tx).await;
        let opened = ConfigServer::dispatch(
            &ctx,
            Request::OpenFeed { subscriber_id },
            None,
            &mut feeds,
            &push_tx,
        )
        .await;
        assert_eq!(opened, Response::FeedOpened { subscriber_id });

        // Never drained while publishing past the queue bound.
        let price = PropertyId::new("billing", "host1", "price");
        let mut expected = None;
        for i in 0..6 {
            expected = service
                .update_property(Uuid::new_v4(), &price, &i.to_string(), expected)
                .unwrap()
                .version();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!service.notifier().is_subscribed(&subscriber_id));

        let mut batches = 0;
        loop {
            match push_rx.recv().await.unwrap() {
                ServerMessage::Changes { .. } => batches += 1,
                ServerMessage::FeedEnded { reason, .. } => {
                    assert!(matches!(reason, FeedEnd::Failed { .. }));
                    break;
                }
                other => panic!("unexpected push {other:?}"),
            }
        }
        assert!(batches <= 2);
    }

    #[tokio::test]
    async fn test_release_drops_unopened_subscriptions() {
        let server = seeded(ServerConfig::default());
        let ctx = server.context();
        let (push_tx, _push_rx) = mpsc::channel(16);
        let mut feeds = ConnectionFeeds::default();
        let notifier = server.service().notifier();

        let ids: Vec<SubscriberId> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            ConfigServer::dispatch(&ctx, subscribe(*id), None, &mut feeds, &push_tx).await;
        }
        assert_eq!(notifier.subscriber_count(), 3);

        // Another connection re-made one of them; it must survive.
        notifier.subscribe("billing", None, ids[0]).unwrap();

        let (forwarders, released) = feeds.release(notifier);
        assert_eq!(forwarders, 0);
        assert_eq!(released, 2);
        assert_eq!(notifier.subscriber_count(), 1);
        assert!(notifier.is_subscribed(&ids[0]));
    }

    #[tokio::test]
    async fn test_credentials_configure_authenticator() {
        let config = ServerConfig {
            credentials: Some(CredentialSource::Inline(
                "t-owner alice application_owner\nt-dev bob developer\n".into(),
            )),
            ..ServerConfig::default()
        };
        let server = ConfigServer::new(config).unwrap();
        let ctx = server.context();
        let (push_tx, _push_rx) = mpsc::channel(16);
        let mut feeds = ConnectionFeeds::default();

        let create = Request::CreateHost {
            request_id: Uuid::new_v4(),
            host_name: "host1".into(),
        };
        let denied =
            ConfigServer::dispatch(&ctx, create.clone(), Some("t-dev"), &mut feeds, &push_tx).await;
        assert!(matches!(denied, Response::Unauthorized { .. }));
        let allowed =
            ConfigServer::dispatch(&ctx, create, Some("t-owner"), &mut feeds, &push_tx).await;
        assert!(matches!(allowed, Response::Committed(_)));
    }

    #[test]
    fn test_malformed_credentials_fail_startup() {
        let config = ServerConfig {
            credentials: Some(CredentialSource::Inline("t-owner alice wizard".into())),
            ..ServerConfig::default()
        };
        assert!(matches!(
            ConfigServer::new(config),
            Err(ServerError::Auth(AuthError::MalformedCredentials(_)))
        ));
    }
}

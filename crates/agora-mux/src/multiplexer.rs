//! Many connections presented as one duplex envelope stream.
//!
//! Each connected [`Connection`] gets its own receive task feeding the shared
//! inbox, and a single send task drains the outbox, picking a connection per
//! envelope. Shutdown is coordinated through a watch channel.

use crate::connection::{Connection, ConnectionState, EnvelopeStream};
use crate::error::MuxError;
use agora_types::config::MultiplexerConfig;
use agora_types::{ConnectionId, Envelope, ProtocolId};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection lookup and routing precedence.
#[derive(Clone, Default)]
struct Router {
    connections: Vec<Arc<dyn Connection>>,
    routing: BTreeMap<ProtocolId, ConnectionId>,
    configured_default: Option<ConnectionId>,
    flagged_default: Option<ConnectionId>,
}

impl Router {
    fn get(&self, id: &ConnectionId) -> Option<&Arc<dyn Connection>> {
        self.connections.iter().find(|c| c.connection_id() == id)
    }

    fn default_id(&self) -> Option<&ConnectionId> {
        self.configured_default
            .as_ref()
            .or(self.flagged_default.as_ref())
            .or_else(|| self.connections.first().map(|c| c.connection_id()))
    }

    /// Pinned connection, then the routing table, then the default.
    fn route(&self, envelope: &Envelope) -> Result<&Arc<dyn Connection>, MuxError> {
        let id = envelope
            .connection_id()
            .or_else(|| self.routing.get(&envelope.protocol_id))
            .or_else(|| self.default_id())
            .ok_or_else(|| MuxError::NoRoute(envelope.protocol_id.clone()))?;
        self.get(id)
            .ok_or_else(|| MuxError::UnknownConnection(id.clone()))
    }

    async fn dispatch(&self, envelope: Envelope, timeout: Duration) {
        let connection = match self.route(&envelope) {
            Ok(c) => c,
            Err(e) => {
                warn!(to = %envelope.to, protocol = %envelope.protocol_id, error = %e, "Dropping outbound envelope");
                return;
            }
        };
        let id = connection.connection_id().clone();
        if !connection.accepts_protocol(&envelope.protocol_id) {
            warn!(
                connection = %id,
                protocol = %envelope.protocol_id,
                "Connection does not carry this protocol, dropping envelope"
            );
            return;
        }
        let to = envelope.to.clone();
        match tokio::time::timeout(timeout, connection.send(envelope)).await {
            Ok(Ok(())) => debug!(connection = %id, to = %to, "Envelope sent"),
            Ok(Err(e)) => warn!(connection = %id, to = %to, error = %e, "Failed to send envelope"),
            Err(_) => warn!(connection = %id, to = %to, "Send timed out after {timeout:?}"),
        }
    }
}

/// Presents N connections as one logical duplex envelope stream.
///
/// Connections are registered before `connect`; every other operation takes
/// `&self`, so a multiplexer can be shared behind an `Arc`.
pub struct Multiplexer {
    config: MultiplexerConfig,
    router: Arc<Router>,
    inbox_tx: mpsc::Sender<Envelope>,
    inbox_rx: Mutex<mpsc::Receiver<Envelope>>,
    outbox: RwLock<Option<mpsc::Sender<Envelope>>>,
    /// `true` while stopped.
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    connected: AtomicBool,
    lifecycle: Mutex<()>,
}

impl Multiplexer {
    pub fn new(config: MultiplexerConfig) -> Result<Self, MuxError> {
        let router = Router {
            routing: config.resolve_routing()?,
            configured_default: config.resolve_default_connection()?,
            ..Router::default()
        };
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(true);
        Ok(Self {
            config,
            router: Arc::new(router),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            outbox: RwLock::new(None),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        })
    }

    /// Register a connection. The first one added, or the last one flagged
    /// `is_default`, receives envelopes no other route claims.
    pub fn add_connection(
        &mut self,
        connection: Arc<dyn Connection>,
        is_default: bool,
    ) -> Result<(), MuxError> {
        let id = connection.connection_id().clone();
        let router = Arc::make_mut(&mut self.router);
        if router.get(&id).is_some() {
            return Err(MuxError::DuplicateConnection(id));
        }
        if is_default {
            router.flagged_default = Some(id.clone());
        }
        router.connections.push(connection);
        debug!(connection = %id, is_default, "Connection registered");
        Ok(())
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.router
            .connections
            .iter()
            .map(|c| c.connection_id().clone())
            .collect()
    }

    pub fn default_connection(&self) -> Option<&ConnectionId> {
        self.router.default_id()
    }

    pub fn connection_states(&self) -> Vec<(ConnectionId, ConnectionState)> {
        self.router
            .connections
            .iter()
            .map(|c| (c.connection_id().clone(), c.state()))
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect every registered connection, all or nothing.
    ///
    /// If any connection fails or times out, the ones that did connect are
    /// disconnected again and the first failure is returned.
    pub async fn connect(&self) -> Result<(), MuxError> {
        let _guard = self.lifecycle.lock().await;
        if self.is_connected() {
            debug!("Multiplexer already connected");
            return Ok(());
        }
        if self.router.connections.is_empty() {
            return Err(MuxError::NoConnections);
        }

        let timeout = self.config.connect_timeout();
        let attempts = self.router.connections.iter().map(|connection| {
            let connection = connection.clone();
            async move {
                let id = connection.connection_id().clone();
                match tokio::time::timeout(timeout, connection.connect()).await {
                    Ok(Ok(stream)) => Ok((connection, stream)),
                    Ok(Err(source)) => Err(MuxError::Connection { id, source }),
                    Err(_) => Err(MuxError::Timeout { id, timeout }),
                }
            }
        });
        let results = futures::future::join_all(attempts).await;

        let mut streams: Vec<(Arc<dyn Connection>, EnvelopeStream)> = Vec::new();
        let mut failure = None;
        for result in results {
            match result {
                Ok(pair) => streams.push(pair),
                Err(e) => {
                    error!(error = %e, "Connection failed to connect");
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            drop(streams);
            warn!("Rolling back multiplexer connect");
            self.disconnect_all().await;
            return Err(e);
        }

        self.shutdown_tx.send_replace(false);
        let mut tasks = self.tasks.lock().await;
        for (connection, stream) in streams {
            tasks.push(spawn_receiver(
                connection.connection_id().clone(),
                stream,
                self.inbox_tx.clone(),
                self.shutdown_tx.subscribe(),
            ));
        }

        let (outbox_tx, outbox_rx) = mpsc::channel(self.config.outbox_capacity.max(1));
        tasks.push(spawn_sender(
            self.router.clone(),
            outbox_rx,
            self.shutdown_tx.subscribe(),
            self.config.put_timeout(),
        ));
        *self.outbox.write().unwrap_or_else(|e| e.into_inner()) = Some(outbox_tx);
        self.connected.store(true, Ordering::SeqCst);

        info!(
            connections = self.router.connections.len(),
            "Multiplexer connected"
        );
        Ok(())
    }

    /// Stop all loops and disconnect all connections. Safe to call repeatedly.
    ///
    /// Envelopes still queued in the outbox are not drained.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        if !self.connected.swap(false, Ordering::SeqCst) {
            debug!("Multiplexer already disconnected");
            return;
        }
        self.outbox
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.shutdown_tx.send_replace(true);

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        let timeout = self.config.disconnect_timeout();
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("Multiplexer task did not stop within {timeout:?}, aborting");
                abort.abort();
            }
        }

        self.disconnect_all().await;
        info!("Multiplexer disconnected");
    }

    async fn disconnect_all(&self) {
        let timeout = self.config.disconnect_timeout();
        for connection in &self.router.connections {
            let id = connection.connection_id();
            match tokio::time::timeout(timeout, connection.disconnect()).await {
                Ok(Ok(())) => debug!(connection = %id, "Connection disconnected"),
                Ok(Err(e)) => warn!(connection = %id, error = %e, "Failed to disconnect"),
                Err(_) => warn!(connection = %id, "Disconnect timed out after {timeout:?}"),
            }
        }
    }

    /// Queue an envelope for sending.
    ///
    /// The route is resolved up front so callers learn about a missing or
    /// unknown connection immediately. Waits at most the configured put
    /// timeout for outbox space.
    pub async fn put(&self, envelope: Envelope) -> Result<(), MuxError> {
        let outbox = self
            .outbox
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(MuxError::NotConnected)?;
        self.router.route(&envelope)?;

        let timeout = self.config.put_timeout();
        match outbox.send_timeout(envelope, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(MuxError::OutboxFull(timeout)),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(MuxError::NotConnected),
        }
    }

    /// Next inbound envelope.
    ///
    /// Returns `None` once the multiplexer is stopped and the inbox is empty.
    pub async fn get(&self) -> Option<Envelope> {
        let mut inbox = self.inbox_rx.lock().await;
        if let Ok(envelope) = inbox.try_recv() {
            return Some(envelope);
        }
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return None;
        }
        tokio::select! {
            envelope = inbox.recv() => envelope,
            _ = shutdown.changed() => inbox.try_recv().ok(),
        }
    }

    /// Like [`get`](Self::get), giving up after `timeout`.
    pub async fn get_timeout(&self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, self.get()).await.ok().flatten()
    }

    /// Next inbound envelope if one is already queued.
    pub fn try_get(&self) -> Option<Envelope> {
        self.inbox_rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("connections", &self.connection_ids())
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn spawn_receiver(
    id: ConnectionId,
    mut stream: EnvelopeStream,
    inbox: mpsc::Sender<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(envelope)) => {
                        debug!(connection = %id, sender = %envelope.sender, "Envelope received");
                        tokio::select! {
                            sent = inbox.send(envelope) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                            _ = shutdown.changed() => break,
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection = %id, error = %e, "Failed to receive envelope");
                    }
                    None => {
                        info!(connection = %id, "Connection stream ended");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(connection = %id, "Receive loop stopping");
                        break;
                    }
                }
            }
        }
    })
}

fn spawn_sender(
    router: Arc<Router>,
    mut outbox: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                next = outbox.recv() => match next {
                    Some(envelope) => router.dispatch(envelope, timeout).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Send loop stopping");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_routing() {
        let mut config = MultiplexerConfig::default();
        config
            .default_routing
            .insert("not a protocol".to_string(), "local".to_string());
        assert!(matches!(
            Multiplexer::new(config),
            Err(MuxError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_without_connections() {
        let mux = Multiplexer::new(MultiplexerConfig::default()).unwrap();
        assert!(matches!(mux.connect().await, Err(MuxError::NoConnections)));
        assert!(!mux.is_connected());
    }

    #[tokio::test]
    async fn test_get_when_stopped_returns_none() {
        let mux = Multiplexer::new(MultiplexerConfig::default()).unwrap();
        assert!(mux.get().await.is_none());
        assert!(mux.try_get().is_none());
        mux.disconnect().await;
    }
}

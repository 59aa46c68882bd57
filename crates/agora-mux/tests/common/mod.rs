//! Mock connection shared by the multiplexer integration tests.

#![allow(dead_code)]

use agora_mux::{Connection, ConnectionError, ConnectionState, EnvelopeStream, StateCell};
use agora_types::{Address, ConnectionId, Envelope, ProtocolId};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A connection whose inbound side is fed by the test and whose outbound
/// side records every envelope it is asked to send.
pub struct MockConnection {
    id: ConnectionId,
    state: StateCell,
    inbound: Mutex<Option<mpsc::Sender<Envelope>>>,
    sent: Mutex<Vec<Envelope>>,
    fail_connect: bool,
    connect_delay: Option<Duration>,
    restricted_to: Option<BTreeSet<ProtocolId>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl MockConnection {
    pub fn new(id: &str) -> Self {
        Self {
            id: ConnectionId::new(id),
            state: StateCell::new(),
            inbound: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            fail_connect: false,
            connect_delay: None,
            restricted_to: None,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn failing(id: &str) -> Self {
        Self {
            fail_connect: true,
            ..Self::new(id)
        }
    }

    pub fn slow(id: &str, delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::new(id)
        }
    }

    pub fn restricted_to(mut self, protocol: ProtocolId) -> Self {
        self.restricted_to = Some(BTreeSet::from([protocol]));
        self
    }

    /// Push an envelope into the inbound stream.
    pub async fn inject(&self, envelope: Envelope) {
        let tx = self
            .inbound
            .lock()
            .unwrap()
            .clone()
            .expect("mock connection is not connected");
        tx.send(envelope).await.expect("inbound stream dropped");
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until at least `count` envelopes were sent.
    pub async fn wait_sent(&self, count: usize) -> Vec<Envelope> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "connection {} sent {} envelopes, expected {count}",
            self.id,
            self.sent().len()
        );
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn restricted_to_protocols(&self) -> Option<&BTreeSet<ProtocolId>> {
        self.restricted_to.as_ref()
    }

    async fn connect(&self) -> Result<EnvelopeStream, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.state.set(ConnectionState::Connecting);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect {
            self.state.set(ConnectionState::Disconnected);
            return Err(ConnectionError::Transport("refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        *self.inbound.lock().unwrap() = Some(tx);
        self.state.set(ConnectionState::Connected);
        Ok(Box::pin(
            ReceiverStream::new(rx).map(Ok::<Envelope, ConnectionError>),
        ))
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inbound.lock().unwrap().take();
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected(self.id.clone()));
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

pub fn protocol(id: &'static str) -> ProtocolId {
    ProtocolId::from_static(id)
}

pub fn envelope(to: &str, sender: &str, protocol_id: ProtocolId, payload: Vec<u8>) -> Envelope {
    Envelope::new(Address::from(to), Address::from(sender), protocol_id, payload)
}

pub fn arc(connection: MockConnection) -> Arc<MockConnection> {
    Arc::new(connection)
}

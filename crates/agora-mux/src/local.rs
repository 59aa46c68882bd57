//! In-process transport: agents on one node exchange envelopes through a
//! shared bus keyed by address.

use crate::connection::{Connection, ConnectionState, EnvelopeStream, StateCell};
use crate::error::ConnectionError;
use agora_types::{Address, ConnectionId, Envelope, ProtocolId};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Per-agent queue depth on the bus.
const MAILBOX_CAPACITY: usize = 1024;

/// The in-process bus. Cloning shares the same bus.
#[derive(Clone, Default)]
pub struct LocalNode {
    mailboxes: Arc<DashMap<Address, mpsc::Sender<Envelope>>>,
}

impl LocalNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection for `address` attached to this bus.
    pub fn connection(&self, address: impl Into<Address>) -> LocalConnection {
        LocalConnection {
            id: ConnectionId::new("local"),
            address: address.into(),
            node: self.clone(),
            state: StateCell::new(),
            restricted_to: None,
        }
    }

    fn register(&self, address: &Address) -> Result<mpsc::Receiver<Envelope>, ConnectionError> {
        use dashmap::mapref::entry::Entry;
        match self.mailboxes.entry(address.clone()) {
            Entry::Occupied(_) => Err(ConnectionError::Transport(format!(
                "address '{address}' is already registered on this node"
            ))),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    fn unregister(&self, address: &Address) {
        self.mailboxes.remove(address);
    }

    /// Hand an envelope to the mailbox of `envelope.to`.
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        // Clone the sender so no map guard is held across the await.
        let mailbox = self
            .mailboxes
            .get(&envelope.to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ConnectionError::UnknownRecipient(envelope.to.clone()))?;
        mailbox
            .send(envelope)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Addresses currently attached to the bus.
    pub fn agents(&self) -> Vec<Address> {
        let mut agents: Vec<Address> = self.mailboxes.iter().map(|e| e.key().clone()).collect();
        agents.sort();
        agents
    }
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("agents", &self.agents())
            .finish()
    }
}

/// One agent's attachment to a [`LocalNode`].
#[derive(Debug)]
pub struct LocalConnection {
    id: ConnectionId,
    address: Address,
    node: LocalNode,
    state: StateCell,
    restricted_to: Option<BTreeSet<ProtocolId>>,
}

impl LocalConnection {
    pub fn with_id(mut self, id: ConnectionId) -> Self {
        self.id = id;
        self
    }

    /// Only carry the given protocols.
    pub fn restricted_to(mut self, protocols: impl IntoIterator<Item = ProtocolId>) -> Self {
        self.restricted_to = Some(protocols.into_iter().collect());
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

#[async_trait]
impl Connection for LocalConnection {
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
        if !self
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return Err(ConnectionError::AlreadyConnected(self.id.clone()));
        }
        let rx = match self.node.register(&self.address) {
            Ok(rx) => rx,
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        self.state.set(ConnectionState::Connected);
        info!(address = %self.address, "Local connection attached");
        Ok(Box::pin(
            ReceiverStream::new(rx).map(Ok::<Envelope, ConnectionError>),
        ))
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        if self.state.get() == ConnectionState::Disconnected {
            return Ok(());
        }
        self.state.set(ConnectionState::Disconnecting);
        self.node.unregister(&self.address);
        self.state.set(ConnectionState::Disconnected);
        debug!(address = %self.address, "Local connection detached");
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected(self.id.clone()));
        }
        self.node.deliver(envelope).await
    }
}

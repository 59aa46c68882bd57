//! One agent's view of one protocol over a shared multiplexer.

use crate::error::EndpointError;
use crate::multiplexer::Multiplexer;
use crate::reporter::ErrorReporter;
use agora_protocol::protocols::default::ErrorCode;
use agora_protocol::{Dialogue, DialogueLabel, DialoguePolicy, Dialogues, Message, Protocol};
use agora_types::{Address, Envelope, ProtocolId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type EndpointMessage<R> = Message<<R as DialoguePolicy>::Protocol>;
type EndpointContent<R> = <<R as DialoguePolicy>::Protocol as Protocol>::Content;

/// A message accepted into a dialogue.
#[derive(Debug, Clone)]
pub struct Received<P: Protocol> {
    /// Current label of the dialogue the message joined.
    pub label: DialogueLabel,
    pub message: Message<P>,
}

/// Encodes, decodes and routes messages of one protocol for one agent.
///
/// The dialogue registry sits behind a single async mutex, so messages that
/// arrive from several connections at once are matched one at a time.
pub struct ProtocolEndpoint<R: DialoguePolicy> {
    address: Address,
    dialogues: Mutex<Dialogues<R>>,
    multiplexer: Arc<Multiplexer>,
    reporter: Option<Arc<ErrorReporter>>,
}

impl<R: DialoguePolicy> ProtocolEndpoint<R> {
    pub fn new(address: Address, policy: R, multiplexer: Arc<Multiplexer>) -> Self {
        Self {
            dialogues: Mutex::new(Dialogues::new(address.clone(), policy)),
            address,
            multiplexer,
            reporter: None,
        }
    }

    /// Answer refused envelopes with default-protocol errors.
    pub fn with_error_reporter(mut self, reporter: Arc<ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn protocol_id(&self) -> &'static ProtocolId {
        <R::Protocol as Protocol>::protocol_id()
    }

    /// Open a dialogue with `counterparty` and send the opening message.
    pub async fn open(
        &self,
        counterparty: Address,
        content: EndpointContent<R>,
    ) -> Result<(DialogueLabel, EndpointMessage<R>), EndpointError> {
        let (message, label) = {
            let mut dialogues = self.dialogues.lock().await;
            let (message, dialogue) = dialogues.create(counterparty, content)?;
            (message, dialogue.label().clone())
        };
        self.send(&message).await?;
        Ok((label, message))
    }

    /// Reply in an existing dialogue and send the reply.
    pub async fn reply(
        &self,
        label: &DialogueLabel,
        content: EndpointContent<R>,
    ) -> Result<EndpointMessage<R>, EndpointError> {
        let message = self.dialogues.lock().await.reply(label, content)?;
        self.send(&message).await?;
        Ok(message)
    }

    /// Wrap an addressed message in an envelope and queue it.
    pub async fn send(&self, message: &EndpointMessage<R>) -> Result<(), EndpointError> {
        let to = message.to().ok_or(EndpointError::MissingAddress("to"))?;
        let sender = message
            .sender()
            .ok_or(EndpointError::MissingAddress("sender"))?;
        let envelope = Envelope::new(
            to.clone(),
            sender.clone(),
            self.protocol_id().clone(),
            message.encode(),
        );
        self.multiplexer.put(envelope).await?;
        Ok(())
    }

    /// Decode an inbound envelope and match it to a dialogue.
    ///
    /// Undecodable, invalid and unidentified messages are reported to the
    /// sender when an error reporter is attached; nothing is dispatched.
    pub async fn handle(
        &self,
        envelope: Envelope,
    ) -> Result<Received<R::Protocol>, EndpointError> {
        let expected = self.protocol_id();
        if envelope.protocol_id != *expected {
            return Err(EndpointError::WrongProtocol {
                expected: expected.clone(),
                actual: envelope.protocol_id,
            });
        }

        let mut message = match EndpointMessage::<R>::decode(&envelope.message) {
            Ok(message) => message,
            Err(e) => {
                self.report(&envelope, ErrorCode::DecodingError, e.to_string())
                    .await;
                return Err(e.into());
            }
        };
        if let Some(e) = message.validation_error().cloned() {
            self.report(&envelope, ErrorCode::InvalidMessage, e.to_string())
                .await;
            return Err(e.into());
        }
        message.set_sender(envelope.sender.clone())?;
        message.set_to(envelope.to.clone())?;

        let matched = {
            let mut dialogues = self.dialogues.lock().await;
            dialogues
                .update(message.clone())
                .map(|dialogue| dialogue.label().clone())
        };
        match matched {
            Ok(label) => {
                debug!(dialogue = %label, message = %message, "Message accepted");
                Ok(Received { label, message })
            }
            Err(e) => {
                self.report(&envelope, ErrorCode::InvalidDialogue, e.to_string())
                    .await;
                Err(e.into())
            }
        }
    }

    async fn report(&self, envelope: &Envelope, code: ErrorCode, error_msg: String) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if let Err(e) = reporter.report(envelope, code, error_msg).await {
            warn!(sender = %envelope.sender, error = %e, "Failed to send error reply");
        }
    }

    /// Run `f` against a dialogue.
    pub async fn inspect<T>(
        &self,
        label: &DialogueLabel,
        f: impl FnOnce(&Dialogue<R>) -> T,
    ) -> Option<T> {
        self.dialogues.lock().await.get_by_label(label).map(f)
    }

    /// Run `f` against a dialogue's protocol-specific state.
    pub async fn with_state<T>(
        &self,
        label: &DialogueLabel,
        f: impl FnOnce(&mut R::State) -> T,
    ) -> Option<T> {
        let mut dialogues = self.dialogues.lock().await;
        dialogues
            .dialogue_mut(label)
            .map(|dialogue| f(dialogue.state_mut()))
    }

    /// Run `f` against the whole registry.
    pub async fn with_dialogues<T>(&self, f: impl FnOnce(&Dialogues<R>) -> T) -> T {
        f(&*self.dialogues.lock().await)
    }
}

impl<R: DialoguePolicy> std::fmt::Debug for ProtocolEndpoint<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEndpoint")
            .field("address", &self.address)
            .field("protocol", &self.protocol_id().to_string())
            .field("reports_errors", &self.reporter.is_some())
            .finish()
    }
}

//! Protocol-level error replies for envelopes an agent could not accept.

use crate::error::EndpointError;
use crate::multiplexer::Multiplexer;
use agora_protocol::protocols::default::{
    DefaultContent, DefaultDialoguePolicy, DefaultProtocol, ErrorCode,
};
use agora_protocol::{Dialogues, Protocol};
use agora_types::{Address, Envelope};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Key in `error_data` holding the offending envelope's encoded bytes.
pub const ENVELOPE_KEY: &str = "envelope";

/// Sends a default-protocol `error` back to the sender of a refused envelope.
///
/// Owns the agent's default-protocol dialogues. Envelopes that are
/// themselves default-protocol messages are never answered.
pub struct ErrorReporter {
    address: Address,
    dialogues: Mutex<Dialogues<DefaultDialoguePolicy>>,
    multiplexer: Arc<Multiplexer>,
    reported: AtomicU64,
}

impl ErrorReporter {
    pub fn new(address: Address, multiplexer: Arc<Multiplexer>) -> Self {
        // Each report opens a dialogue that ends on its first message.
        let mut dialogues = Dialogues::new(address.clone(), DefaultDialoguePolicy::new());
        dialogues.set_keep_terminal_dialogues(false);
        Self {
            dialogues: Mutex::new(dialogues),
            address,
            multiplexer,
            reported: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Number of envelopes reported so far.
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    /// Report `envelope` to its sender. Returns `false` when the envelope was
    /// a default-protocol message and no reply was sent.
    pub async fn report(
        &self,
        envelope: &Envelope,
        error_code: ErrorCode,
        error_msg: impl Into<String>,
    ) -> Result<bool, EndpointError> {
        if envelope.protocol_id == *DefaultProtocol::protocol_id() {
            debug!(sender = %envelope.sender, "Not replying to a default-protocol envelope");
            return Ok(false);
        }
        let error_msg = error_msg.into();
        self.reported.fetch_add(1, Ordering::Relaxed);
        warn!(
            sender = %envelope.sender,
            protocol = %envelope.protocol_id,
            code = %error_code,
            error = %error_msg,
            "Refusing envelope"
        );

        let content = DefaultContent::Error {
            error_code,
            error_msg,
            error_data: BTreeMap::from([(ENVELOPE_KEY.to_string(), envelope.encode())]),
        };
        let message = {
            let mut dialogues = self.dialogues.lock().await;
            dialogues.create(envelope.sender.clone(), content)?.0
        };
        let reply = Envelope::new(
            envelope.sender.clone(),
            self.address.clone(),
            DefaultProtocol::protocol_id().clone(),
            message.encode(),
        );
        self.multiplexer.put(reply).await?;
        Ok(true)
    }

    /// Report an envelope for a protocol this agent does not serve.
    pub async fn report_unsupported(&self, envelope: &Envelope) -> Result<bool, EndpointError> {
        let msg = format!("Unsupported protocol: {}", envelope.protocol_id);
        self.report(envelope, ErrorCode::UnsupportedProtocol, msg)
            .await
    }

    /// Run `f` against the default-protocol dialogues.
    pub async fn with_dialogues<T>(
        &self,
        f: impl FnOnce(&Dialogues<DefaultDialoguePolicy>) -> T,
    ) -> T {
        f(&*self.dialogues.lock().await)
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("address", &self.address)
            .field("reported", &self.reported())
            .finish()
    }
}

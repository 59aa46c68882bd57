//! The per-conversation state machine.

use crate::error::{ExtendError, LabelParseError, SetOnceError};
use crate::message::{DialogueReference, Message};
use crate::protocol::{Performative, Protocol};
use agora_types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Primary key of a dialogue.
///
/// Two dialogues are the same dialogue iff their labels are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogueLabel {
    pub dialogue_reference: DialogueReference,
    pub opponent_address: Address,
    pub starter_address: Address,
}

impl DialogueLabel {
    pub fn new(
        dialogue_reference: DialogueReference,
        opponent_address: Address,
        starter_address: Address,
    ) -> Self {
        Self {
            dialogue_reference,
            opponent_address,
            starter_address,
        }
    }

    /// The same label with the responder reference cleared.
    pub fn incomplete_version(&self) -> Self {
        Self {
            dialogue_reference: DialogueReference::opening(
                self.dialogue_reference.starter.clone(),
            ),
            opponent_address: self.opponent_address.clone(),
            starter_address: self.starter_address.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.dialogue_reference.is_complete()
    }
}

/// `starter_responder_opponent_starteraddr`.
///
/// `_` and `\` inside a component are escaped with a backslash, so every
/// label parses back from its string form.
impl fmt::Display for DialogueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let components = [
            self.dialogue_reference.starter.as_str(),
            self.dialogue_reference.responder.as_str(),
            self.opponent_address.as_str(),
            self.starter_address.as_str(),
        ];
        for (i, component) in components.into_iter().enumerate() {
            if i > 0 {
                f.write_str("_")?;
            }
            for c in component.chars() {
                if c == '_' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

/// Split on unescaped `_`. `None` on a trailing lone backslash.
fn split_label(s: &str) -> Option<Vec<String>> {
    let mut parts = vec![String::new()];
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => parts.last_mut()?.push(chars.next()?),
            '_' => parts.push(String::new()),
            c => parts.last_mut()?.push(c),
        }
    }
    Some(parts)
}

impl FromStr for DialogueLabel {
    type Err = LabelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = split_label(s).ok_or_else(|| LabelParseError(s.to_string()))?;
        match <[String; 4]>::try_from(parts) {
            Ok([starter, responder, opponent, starter_address]) if !starter.is_empty() => {
                Ok(Self::new(
                    DialogueReference::new(starter, responder),
                    Address::new(opponent),
                    Address::new(starter_address),
                ))
            }
            _ => Err(LabelParseError(s.to_string())),
        }
    }
}

/// Which performatives may open, close and follow one another.
#[derive(Debug, Clone)]
pub struct DialogueRules<F: Performative> {
    initial: BTreeSet<F>,
    terminal: BTreeSet<F>,
    valid_replies: BTreeMap<F, BTreeSet<F>>,
}

impl<F: Performative> DialogueRules<F> {
    pub fn new(
        initial: impl IntoIterator<Item = F>,
        terminal: impl IntoIterator<Item = F>,
        valid_replies: impl IntoIterator<Item = (F, Vec<F>)>,
    ) -> Self {
        Self {
            initial: initial.into_iter().collect(),
            terminal: terminal.into_iter().collect(),
            valid_replies: valid_replies
                .into_iter()
                .map(|(from, replies)| (from, replies.into_iter().collect()))
                .collect(),
        }
    }

    pub fn is_initial(&self, performative: F) -> bool {
        self.initial.contains(&performative)
    }

    pub fn is_terminal(&self, performative: F) -> bool {
        self.terminal.contains(&performative)
    }

    pub fn is_valid_reply(&self, target: F, reply: F) -> bool {
        self.valid_replies
            .get(&target)
            .is_some_and(|replies| replies.contains(&reply))
    }

    pub fn valid_replies(&self, target: F) -> impl Iterator<Item = F> + '_ {
        self.valid_replies
            .get(&target)
            .into_iter()
            .flat_map(|replies| replies.iter().copied())
    }

    pub fn terminal(&self) -> impl Iterator<Item = F> + '_ {
        self.terminal.iter().copied()
    }
}

/// Protocol-specific behaviour plugged into the generic dialogue machinery.
pub trait DialoguePolicy: Send + Sync + 'static {
    type Protocol: Protocol;
    /// Role of this agent in a dialogue, fixed at creation.
    type Role: Copy + Eq + fmt::Debug + Send + Sync + 'static;
    /// Protocol-specific dialogue state.
    type State: Default + fmt::Debug + Send + Sync + 'static;

    fn rules(&self) -> &DialogueRules<<Self::Protocol as Protocol>::Performative>;

    /// Derive this agent's role from the opening message.
    fn role_from_first_message(
        &self,
        message: &Message<Self::Protocol>,
        self_address: &Address,
    ) -> Self::Role;

    /// Extra checks run after the generic rules pass.
    fn validate_next(
        &self,
        _dialogue: &Dialogue<Self>,
        _message: &Message<Self::Protocol>,
    ) -> Result<(), String>
    where
        Self: Sized,
    {
        Ok(())
    }
}

type PolicyContent<R> = <<R as DialoguePolicy>::Protocol as Protocol>::Content;

/// One conversation between this agent and one opponent.
pub struct Dialogue<R: DialoguePolicy> {
    label: DialogueLabel,
    role: R::Role,
    self_address: Address,
    messages: Vec<Message<R::Protocol>>,
    state: R::State,
    policy: Arc<R>,
}

impl<R: DialoguePolicy> Dialogue<R> {
    pub fn new(label: DialogueLabel, role: R::Role, self_address: Address, policy: Arc<R>) -> Self {
        Self {
            label,
            role,
            self_address,
            messages: Vec::new(),
            state: R::State::default(),
            policy,
        }
    }

    pub fn label(&self) -> &DialogueLabel {
        &self.label
    }

    pub fn role(&self) -> R::Role {
        self.role
    }

    pub fn self_address(&self) -> &Address {
        &self.self_address
    }

    pub fn opponent(&self) -> &Address {
        &self.label.opponent_address
    }

    pub fn is_self_initiated(&self) -> bool {
        self.label.opponent_address != self.label.starter_address
    }

    /// Every message, in order.
    pub fn messages(&self) -> &[Message<R::Protocol>] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message<R::Protocol>> {
        self.messages.last()
    }

    pub fn get_message(&self, message_id: i64) -> Option<&Message<R::Protocol>> {
        self.messages.iter().find(|m| m.message_id() == message_id)
    }

    /// Whether the last message has a terminal performative.
    pub fn is_terminated(&self) -> bool {
        self.last_message()
            .is_some_and(|m| self.policy.rules().is_terminal(m.performative()))
    }

    pub fn state(&self) -> &R::State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut R::State {
        &mut self.state
    }

    pub(crate) fn complete_label(&mut self, label: DialogueLabel) {
        debug_assert!(!self.label.is_complete() && label.is_complete());
        self.label = label;
    }

    /// Append a message after checking it continues this dialogue.
    ///
    /// On top of the Light Protocol Rules the message must be between this
    /// dialogue's two parties, carry its reference, and either open the
    /// dialogue (id 1, target 0, initial performative) or follow the last
    /// message exactly (id = last + 1, target = last id, valid reply).
    pub fn extend(&mut self, message: Message<R::Protocol>) -> Result<(), ExtendError> {
        if let Some(e) = message.validation_error() {
            return Err(ExtendError::Invalid(e.clone()));
        }

        let sender = message.sender().ok_or(ExtendError::MissingAddress("sender"))?;
        let to = message.to().ok_or(ExtendError::MissingAddress("to"))?;
        let outgoing = *sender == self.self_address && *to == self.label.opponent_address;
        let incoming = *sender == self.label.opponent_address && *to == self.self_address;
        if !outgoing && !incoming {
            return Err(ExtendError::WrongParty {
                sender: sender.to_string(),
                to: to.to_string(),
            });
        }

        let reference = message.dialogue_reference();
        let own = &self.label.dialogue_reference;
        let responder_conflict = !reference.responder.is_empty()
            && !own.responder.is_empty()
            && reference.responder != own.responder;
        if reference.starter != own.starter || responder_conflict {
            return Err(ExtendError::ReferenceMismatch {
                starter: reference.starter.clone(),
                responder: reference.responder.clone(),
            });
        }

        let rules = self.policy.rules();
        let performative = message.performative();
        match self.messages.last() {
            None => {
                if message.message_id() != 1 || message.target() != 0 {
                    return Err(ExtendError::NotOpening {
                        message_id: message.message_id(),
                        target: message.target(),
                    });
                }
                if !rules.is_initial(performative) {
                    return Err(ExtendError::InvalidInitialPerformative(
                        performative.to_string(),
                    ));
                }
            }
            Some(last) => {
                if rules.is_terminal(last.performative()) {
                    return Err(ExtendError::Terminated);
                }
                let expected = last.message_id() + 1;
                if message.message_id() != expected {
                    return Err(ExtendError::OutOfSequence {
                        expected,
                        actual: message.message_id(),
                    });
                }
                if message.target() != last.message_id() {
                    return Err(ExtendError::TargetMismatch {
                        expected: last.message_id(),
                        actual: message.target(),
                    });
                }
                if !rules.is_valid_reply(last.performative(), performative) {
                    return Err(ExtendError::InvalidReply {
                        target: last.performative().to_string(),
                        reply: performative.to_string(),
                    });
                }
            }
        }

        self.policy
            .validate_next(self, &message)
            .map_err(ExtendError::Policy)?;

        debug!(
            dialogue = %self.label,
            message_id = message.message_id(),
            performative = %performative,
            incoming,
            "Dialogue extended"
        );
        self.messages.push(message);
        Ok(())
    }

    /// Build the next message of this dialogue from this agent and append it.
    pub fn reply(
        &mut self,
        content: PolicyContent<R>,
    ) -> Result<Message<R::Protocol>, ExtendError> {
        let last_id = self
            .last_message()
            .map(|m| m.message_id())
            .ok_or(ExtendError::Empty)?;
        let message = Message::from_content(
            self.label.dialogue_reference.clone(),
            last_id + 1,
            last_id,
            content,
        )
        .addressed(self.self_address.clone(), self.label.opponent_address.clone());
        self.extend(message.clone())?;
        Ok(message)
    }
}

impl<R: DialoguePolicy> fmt::Debug for Dialogue<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialogue")
            .field("label", &self.label)
            .field("role", &self.role)
            .field("self_address", &self.self_address)
            .field("messages", &self.messages.len())
            .field("state", &self.state)
            .finish()
    }
}

/// A value that may be assigned at most once.
///
/// Reading before assignment and assigning twice are both errors, so
/// negotiated state cannot be silently overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOnce<T> {
    name: &'static str,
    value: Option<T>,
}

impl<T> SetOnce<T> {
    pub const fn named(name: &'static str) -> Self {
        Self { name, value: None }
    }

    pub fn get(&self) -> Result<&T, SetOnceError> {
        self.value.as_ref().ok_or(SetOnceError::NotSet(self.name))
    }

    pub fn set(&mut self, value: T) -> Result<(), SetOnceError> {
        if self.value.is_some() {
            return Err(SetOnceError::AlreadySet(self.name));
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

impl<T> Default for SetOnce<T> {
    fn default() -> Self {
        Self::named("value")
    }
}

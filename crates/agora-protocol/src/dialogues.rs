//! The per-agent, per-protocol dialogue registry.

use crate::dialogue::{Dialogue, DialogueLabel, DialoguePolicy};
use crate::error::DialogueError;
use crate::message::{DialogueReference, Message};
use crate::protocol::{Performative, Protocol};
use agora_types::Address;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

type PolicyPerformative<R> = <<R as DialoguePolicy>::Protocol as Protocol>::Performative;
type PolicyContent<R> = <<R as DialoguePolicy>::Protocol as Protocol>::Content;
type PolicyMessage<R> = Message<<R as DialoguePolicy>::Protocol>;
type TerminalCallback<R> = Box<dyn Fn(&Dialogue<R>) + Send + Sync>;

/// How many dialogues ended in each terminal performative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueStats<F: Performative> {
    self_initiated: BTreeMap<F, u64>,
    other_initiated: BTreeMap<F, u64>,
}

impl<F: Performative> DialogueStats<F> {
    /// Start with every terminal performative at zero.
    pub fn new(terminal: impl IntoIterator<Item = F>) -> Self {
        let zeroed: BTreeMap<F, u64> = terminal.into_iter().map(|f| (f, 0)).collect();
        Self {
            self_initiated: zeroed.clone(),
            other_initiated: zeroed,
        }
    }

    pub fn add_dialogue_endstate(&mut self, end_state: F, is_self_initiated: bool) {
        let counts = if is_self_initiated {
            &mut self.self_initiated
        } else {
            &mut self.other_initiated
        };
        *counts.entry(end_state).or_insert(0) += 1;
    }

    pub fn self_initiated(&self) -> &BTreeMap<F, u64> {
        &self.self_initiated
    }

    pub fn other_initiated(&self) -> &BTreeMap<F, u64> {
        &self.other_initiated
    }

    pub fn count(&self, end_state: F, is_self_initiated: bool) -> u64 {
        let counts = if is_self_initiated {
            &self.self_initiated
        } else {
            &self.other_initiated
        };
        counts.get(&end_state).copied().unwrap_or(0)
    }
}

/// Every dialogue one agent holds for one protocol.
///
/// The registry is the single authority on whether a message continues a
/// known dialogue or legitimately opens a new one. It is not synchronized;
/// callers that receive from several tasks must serialize access.
///
/// Terminated dialogues are kept unless
/// [`set_keep_terminal_dialogues`](Self::set_keep_terminal_dialogues) turns
/// that off, in which case a dialogue is dropped as soon as it ends. Its end
/// state is still counted and the terminal callbacks still run.
pub struct Dialogues<R: DialoguePolicy> {
    self_address: Address,
    policy: Arc<R>,
    dialogues: HashMap<DialogueLabel, Dialogue<R>>,
    incomplete_to_complete: HashMap<DialogueLabel, DialogueLabel>,
    stats: DialogueStats<PolicyPerformative<R>>,
    keep_terminal: bool,
    on_terminal: Vec<TerminalCallback<R>>,
    /// The last dialogue dropped on termination, so `create`/`update` can
    /// still hand back a reference to it.
    retired: Option<Dialogue<R>>,
}

impl<R: DialoguePolicy> Dialogues<R> {
    pub fn new(self_address: Address, policy: R) -> Self {
        let stats = DialogueStats::new(policy.rules().terminal());
        Self {
            self_address,
            policy: Arc::new(policy),
            dialogues: HashMap::new(),
            incomplete_to_complete: HashMap::new(),
            stats,
            keep_terminal: true,
            on_terminal: Vec::new(),
            retired: None,
        }
    }

    /// Whether dialogues stay in the registry after they end.
    pub fn set_keep_terminal_dialogues(&mut self, keep: bool) {
        self.keep_terminal = keep;
    }

    pub fn keeps_terminal_dialogues(&self) -> bool {
        self.keep_terminal
    }

    /// Run `callback` every time a dialogue reaches a terminal performative.
    pub fn on_terminal(&mut self, callback: impl Fn(&Dialogue<R>) + Send + Sync + 'static) {
        self.on_terminal.push(Box::new(callback));
    }

    pub fn self_address(&self) -> &Address {
        &self.self_address
    }

    pub fn policy(&self) -> &R {
        &self.policy
    }

    pub fn stats(&self) -> &DialogueStats<PolicyPerformative<R>> {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.dialogues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogues.is_empty()
    }

    pub fn dialogues(&self) -> impl Iterator<Item = &Dialogue<R>> {
        self.dialogues.values()
    }

    /// Open a new dialogue with `counterparty`.
    ///
    /// Returns the opening message (id 1, target 0, addressed and ready to
    /// encode) and the new dialogue.
    pub fn create(
        &mut self,
        counterparty: Address,
        content: PolicyContent<R>,
    ) -> Result<(PolicyMessage<R>, &Dialogue<R>), DialogueError> {
        let starter = Uuid::new_v4().simple().to_string();
        if self.starter_in_use(&starter) {
            error!(
                agent = %self.self_address,
                starter = %starter,
                "Allocated a starter reference that is already in use"
            );
            return Err(DialogueError::DuplicateReference(starter));
        }

        let message = Message::from_content(DialogueReference::opening(starter), 1, 0, content)
            .addressed(self.self_address.clone(), counterparty.clone());
        if let Some(e) = message.validation_error() {
            return Err(DialogueError::Invalid(e.clone()));
        }

        let label = DialogueLabel::new(
            message.dialogue_reference().clone(),
            counterparty,
            self.self_address.clone(),
        );
        let role = self
            .policy
            .role_from_first_message(&message, &self.self_address);
        let mut dialogue = Dialogue::new(
            label.clone(),
            role,
            self.self_address.clone(),
            Arc::clone(&self.policy),
        );
        dialogue
            .extend(message.clone())
            .map_err(|source| DialogueError::Rejected {
                label: label.clone(),
                source,
            })?;

        debug!(dialogue = %label, performative = %message.performative(), "Dialogue created");
        self.dialogues.entry(label.clone()).or_insert(dialogue);
        let dialogue = self
            .settle(&label)
            .ok_or_else(|| DialogueError::UnknownDialogue(label.clone()))?;
        Ok((message, dialogue))
    }

    /// Route an incoming or outgoing message to its dialogue.
    ///
    /// - An opener (responder reference empty, id 1, target 0) for an unknown
    ///   label creates a dialogue. An incoming opener gets a fresh responder
    ///   reference.
    /// - A message with a complete reference may match a self-initiated
    ///   dialogue still under its incomplete label. Once the dialogue accepts
    ///   it, the dialogue moves to the complete label.
    /// - Anything else must match an existing dialogue.
    ///
    /// A message that matches nothing is [`DialogueError::Unidentified`];
    /// one its dialogue refuses is [`DialogueError::Rejected`]. Neither
    /// creates nor mutates any dialogue.
    pub fn update(&mut self, message: PolicyMessage<R>) -> Result<&Dialogue<R>, DialogueError> {
        let sender = message
            .sender()
            .cloned()
            .ok_or(DialogueError::MissingAddress("sender"))?;
        let to = message
            .to()
            .cloned()
            .ok_or(DialogueError::MissingAddress("to"))?;
        let incoming = sender != self.self_address;
        if incoming && to != self.self_address {
            return Err(DialogueError::Misaddressed {
                sender: sender.to_string(),
                to: to.to_string(),
                agent: self.self_address.to_string(),
            });
        }
        let counterparty = if incoming { sender } else { to };

        let reference = message.dialogue_reference().clone();
        let unidentified = || DialogueError::Unidentified {
            starter: reference.starter.clone(),
            responder: reference.responder.clone(),
        };
        if reference.starter.is_empty() {
            warn!(agent = %self.self_address, from = %counterparty, "Message without starter reference");
            return Err(unidentified());
        }

        let is_opener =
            reference.responder.is_empty() && message.message_id() == 1 && message.target() == 0;
        let mut created = None;
        let mut completion = None;
        let label = if is_opener {
            let starter_address = if incoming {
                counterparty.clone()
            } else {
                self.self_address.clone()
            };
            let opening = DialogueLabel::new(reference.clone(), counterparty.clone(), starter_address);
            let existing = self.latest_label(opening.clone());
            if self.dialogues.contains_key(&existing) {
                Some(existing)
            } else {
                let label = self.insert_new(opening, incoming, &message);
                created = Some(label.clone());
                Some(label)
            }
        } else {
            let found = self.find_label(&reference, &counterparty);
            if found.is_none() && reference.is_complete() {
                completion = self.pending_completion(&reference, &counterparty);
                completion.as_ref().map(|(incomplete, _)| incomplete.clone())
            } else {
                found
            }
        };

        let Some(label) = label else {
            warn!(
                agent = %self.self_address,
                from = %counterparty,
                reference = %reference,
                message_id = message.message_id(),
                "Unidentified dialogue"
            );
            return Err(unidentified());
        };

        let outcome = match self.dialogues.get_mut(&label) {
            Some(dialogue) => dialogue.extend(message),
            None => return Err(unidentified()),
        };

        match outcome {
            Ok(()) => {
                let label = match completion {
                    Some((incomplete, complete)) => {
                        self.complete(incomplete, complete.clone());
                        complete
                    }
                    None => label,
                };
                self.settle(&label)
                    .ok_or_else(|| DialogueError::UnknownDialogue(label.clone()))
            }
            Err(source) => {
                if created.as_ref() == Some(&label) {
                    self.dialogues.remove(&label);
                    self.incomplete_to_complete.retain(|_, complete| *complete != label);
                }
                warn!(dialogue = %label, error = %source, "Dialogue rejected message");
                Err(DialogueError::Rejected { label, source })
            }
        }
    }

    /// The dialogue a message belongs to, if any.
    pub fn get_dialogue(&self, message: &PolicyMessage<R>) -> Option<&Dialogue<R>> {
        let sender = message.sender()?;
        let counterparty = if *sender == self.self_address {
            message.to()?
        } else {
            sender
        };
        let label = self.find_label(message.dialogue_reference(), counterparty)?;
        self.dialogues.get(&label)
    }

    /// Look up a dialogue by label, following incomplete-to-complete promotion.
    pub fn get_by_label(&self, label: &DialogueLabel) -> Option<&Dialogue<R>> {
        self.dialogues.get(&self.latest_label(label.clone()))
    }

    pub fn dialogue_mut(&mut self, label: &DialogueLabel) -> Option<&mut Dialogue<R>> {
        let label = self.latest_label(label.clone());
        self.dialogues.get_mut(&label)
    }

    /// Reply in the dialogue identified by `label` and record its end state.
    pub fn reply(
        &mut self,
        label: &DialogueLabel,
        content: PolicyContent<R>,
    ) -> Result<PolicyMessage<R>, DialogueError> {
        let label = self.latest_label(label.clone());
        let dialogue = self
            .dialogues
            .get_mut(&label)
            .ok_or_else(|| DialogueError::UnknownDialogue(label.clone()))?;
        let message = dialogue
            .reply(content)
            .map_err(|source| DialogueError::Rejected {
                label: label.clone(),
                source,
            })?;
        self.settle(&label);
        Ok(message)
    }

    /// Count the end state of a dialogue that just terminated, run the
    /// terminal callbacks and drop it unless terminal dialogues are kept.
    fn settle(&mut self, label: &DialogueLabel) -> Option<&Dialogue<R>> {
        let dialogue = self.dialogues.get(label)?;
        let end_state = match dialogue.last_message() {
            Some(last) if dialogue.is_terminated() => last.performative(),
            _ => return self.dialogues.get(label),
        };
        self.stats
            .add_dialogue_endstate(end_state, dialogue.is_self_initiated());
        for callback in &self.on_terminal {
            callback(dialogue);
        }
        if self.keep_terminal {
            return self.dialogues.get(label);
        }

        let dialogue = self.dialogues.remove(label)?;
        self.incomplete_to_complete
            .retain(|incomplete, complete| complete != label && incomplete != label);
        debug!(dialogue = %label, end_state = %end_state, "Terminal dialogue dropped");
        Some(&*self.retired.insert(dialogue))
    }

    fn starter_in_use(&self, starter: &str) -> bool {
        self.dialogues
            .keys()
            .chain(self.incomplete_to_complete.keys())
            .any(|label| label.dialogue_reference.starter == starter)
    }

    fn latest_label(&self, label: DialogueLabel) -> DialogueLabel {
        match self.incomplete_to_complete.get(&label) {
            Some(complete) => complete.clone(),
            None => label,
        }
    }

    fn find_label(
        &self,
        reference: &DialogueReference,
        counterparty: &Address,
    ) -> Option<DialogueLabel> {
        let self_initiated = self.latest_label(DialogueLabel::new(
            reference.clone(),
            counterparty.clone(),
            self.self_address.clone(),
        ));
        if self.dialogues.contains_key(&self_initiated) {
            return Some(self_initiated);
        }
        let other_initiated = self.latest_label(DialogueLabel::new(
            reference.clone(),
            counterparty.clone(),
            counterparty.clone(),
        ));
        self.dialogues
            .contains_key(&other_initiated)
            .then_some(other_initiated)
    }

    /// Insert an empty dialogue for an opener and return its label.
    ///
    /// Opponent-initiated dialogues are stored under a complete label with a
    /// freshly assigned responder reference.
    fn insert_new(
        &mut self,
        opening: DialogueLabel,
        incoming: bool,
        message: &PolicyMessage<R>,
    ) -> DialogueLabel {
        let role = self
            .policy
            .role_from_first_message(message, &self.self_address);
        let label = if incoming {
            let responder = Uuid::new_v4().simple().to_string();
            let complete = DialogueLabel::new(
                DialogueReference::new(opening.dialogue_reference.starter.clone(), responder),
                opening.opponent_address.clone(),
                opening.starter_address.clone(),
            );
            self.incomplete_to_complete.insert(opening, complete.clone());
            complete
        } else {
            opening
        };
        debug!(dialogue = %label, incoming, "New dialogue");
        let dialogue = Dialogue::new(
            label.clone(),
            role,
            self.self_address.clone(),
            Arc::clone(&self.policy),
        );
        self.dialogues.insert(label.clone(), dialogue);
        label
    }

    /// The incomplete and complete labels of a self-initiated dialogue that
    /// `reference` would complete. Nothing is moved.
    fn pending_completion(
        &self,
        reference: &DialogueReference,
        counterparty: &Address,
    ) -> Option<(DialogueLabel, DialogueLabel)> {
        let incomplete = DialogueLabel::new(
            DialogueReference::opening(reference.starter.clone()),
            counterparty.clone(),
            self.self_address.clone(),
        );
        if !self.dialogues.contains_key(&incomplete) {
            return None;
        }
        let complete = DialogueLabel::new(
            reference.clone(),
            counterparty.clone(),
            self.self_address.clone(),
        );
        Some((incomplete, complete))
    }

    /// Move a self-initiated dialogue to its complete label once the
    /// counterparty's responder reference has been accepted.
    fn complete(&mut self, incomplete: DialogueLabel, complete: DialogueLabel) {
        if let Some(mut dialogue) = self.dialogues.remove(&incomplete) {
            debug!(from = %incomplete, to = %complete, "Dialogue label completed");
            dialogue.complete_label(complete.clone());
            self.dialogues.insert(complete.clone(), dialogue);
            self.incomplete_to_complete.insert(incomplete, complete);
        }
    }
}

impl<R: DialoguePolicy> std::fmt::Debug for Dialogues<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialogues")
            .field("self_address", &self.self_address)
            .field("dialogues", &self.dialogues.len())
            .field("keep_terminal", &self.keep_terminal)
            .field("stats", &self.stats)
            .finish()
    }
}

//! A negotiation protocol exercising every field kind, shared by the
//! integration tests.

#![allow(dead_code)]

use agora_protocol::{
    custom_field, define_protocol, define_union, CustomType, Dialogue, DialoguePolicy,
    DialogueRules, Message, SetOnce,
};
use agora_types::{wire, Address, DecodeError};
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, BTreeSet};

/// Goods offered at a quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub item: String,
    pub quantity: i64,
}

impl CustomType for Proposal {
    const TYPE_NAME: &'static str = "Proposal";

    fn encode_custom(&self, buf: &mut BytesMut) {
        wire::put_str(buf, &self.item);
        wire::put_i64(buf, self.quantity);
    }

    fn decode_custom(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            item: wire::get_str(buf)?,
            quantity: wire::get_i64(buf)?,
        })
    }
}

custom_field!(Proposal);

define_union! {
    /// What a call for proposals asks for.
    pub enum Query {
        1 => Text(String),
        2 => Keywords(Vec<String>),
        3 => Blobs(Vec<Bytes>),
        4 => Structured(Proposal),
    }
}

define_protocol! {
    pub protocol NegotiationProtocol {
        id: "agora/negotiation:0.1.0",
        performative: NegotiationPerformative,
        content: NegotiationContent,
        messages {
            Cfp = 1 => "cfp" { query: Query },
            Propose = 2 => "propose" {
                proposal: Proposal,
                price: f64,
                tags: BTreeSet<String>,
                terms: BTreeMap<String, i64>,
            },
            Inform = 3 => "inform" {
                info: Option<String>,
                data: Bytes,
                flags: Vec<bool>,
            },
            Accept = 4 => "accept" {},
            Decline = 5 => "decline" { reason: Option<String> },
        }
    }
}

pub type NegotiationMessage = Message<NegotiationProtocol>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Buyer,
    Seller,
}

#[derive(Debug)]
pub struct NegotiationState {
    pub agreed: SetOnce<Proposal>,
}

impl Default for NegotiationState {
    fn default() -> Self {
        Self {
            agreed: SetOnce::named("agreed"),
        }
    }
}

pub struct NegotiationPolicy {
    rules: DialogueRules<NegotiationPerformative>,
}

impl NegotiationPolicy {
    pub fn new() -> Self {
        use NegotiationPerformative::*;
        Self {
            rules: DialogueRules::new(
                [Cfp],
                [Accept, Decline],
                [
                    (Cfp, vec![Propose, Inform, Decline]),
                    (Propose, vec![Propose, Accept, Decline]),
                    (Inform, vec![Propose, Decline]),
                ],
            ),
        }
    }
}

impl DialoguePolicy for NegotiationPolicy {
    type Protocol = NegotiationProtocol;
    type Role = NegotiationRole;
    type State = NegotiationState;

    fn rules(&self) -> &DialogueRules<NegotiationPerformative> {
        &self.rules
    }

    fn role_from_first_message(
        &self,
        message: &NegotiationMessage,
        self_address: &Address,
    ) -> NegotiationRole {
        if message.sender() == Some(self_address) {
            NegotiationRole::Buyer
        } else {
            NegotiationRole::Seller
        }
    }

    fn validate_next(
        &self,
        _dialogue: &Dialogue<Self>,
        message: &NegotiationMessage,
    ) -> Result<(), String> {
        match message.content() {
            NegotiationContent::Propose { price, .. } if *price <= 0.0 => {
                Err(format!("price must be positive, got {price}"))
            }
            _ => Ok(()),
        }
    }
}

pub fn proposal() -> Proposal {
    Proposal {
        item: "apples".to_string(),
        quantity: 12,
    }
}

pub fn cfp() -> NegotiationContent {
    NegotiationContent::Cfp {
        query: Query::Keywords(vec!["fruit".to_string(), "fresh".to_string()]),
    }
}

pub fn propose(price: f64) -> NegotiationContent {
    NegotiationContent::Propose {
        proposal: proposal(),
        price,
        tags: BTreeSet::from(["organic".to_string()]),
        terms: BTreeMap::from([("delivery_days".to_string(), 3)]),
    }
}

/// Hand a message to the other side the way a transport would: only the
/// encoded body crosses, addresses come from the envelope.
pub fn deliver(message: &NegotiationMessage) -> NegotiationMessage {
    let mut delivered = NegotiationMessage::decode(&message.encode()).expect("decodes");
    delivered
        .set_sender(message.sender().expect("sender").clone())
        .expect("fresh sender");
    delivered
        .set_to(message.to().expect("to").clone())
        .expect("fresh to");
    delivered
}

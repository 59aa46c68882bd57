//! Wire codec round-trip and malformed-input tests.

mod common;

use agora_protocol::{DialogueReference, Performative, Protocol};
use agora_types::DecodeError;
use bytes::Bytes;
use common::*;
use std::collections::{BTreeMap, BTreeSet};

fn reference() -> DialogueReference {
    DialogueReference::new("7f3a", "91bc")
}

fn assert_roundtrip(message: NegotiationMessage) {
    assert!(message.is_valid(), "{:?}", message.validation_error());
    let decoded = NegotiationMessage::decode(&message.encode()).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(decoded.dialogue_reference(), message.dialogue_reference());
    assert_eq!(decoded.performative(), message.performative());
    assert!(decoded.is_valid());
}

#[test]
fn test_roundtrip_every_performative() {
    let contents = vec![
        (1, 0, cfp()),
        (2, 1, propose(4.5)),
        (
            3,
            2,
            NegotiationContent::Inform {
                info: Some("in stock".to_string()),
                data: Bytes::from_static(b"\x00\xff"),
                flags: vec![true, false],
            },
        ),
        (4, 3, NegotiationContent::Accept {}),
        (5, 4, NegotiationContent::Decline { reason: None }),
    ];
    let mut seen = BTreeSet::new();
    for (id, target, content) in contents {
        let message = NegotiationMessage::from_content(reference(), id, target, content);
        seen.insert(message.performative());
        assert_roundtrip(message);
    }
    assert_eq!(seen.len(), NegotiationPerformative::ALL.len());
}

#[test]
fn test_roundtrip_empty_collections_and_absent_optionals() {
    assert_roundtrip(NegotiationMessage::from_content(
        reference(),
        2,
        1,
        NegotiationContent::Propose {
            proposal: proposal(),
            price: 1.0,
            tags: BTreeSet::new(),
            terms: BTreeMap::new(),
        },
    ));
    let absent = NegotiationMessage::from_content(
        reference(),
        2,
        1,
        NegotiationContent::Inform {
            info: None,
            data: Bytes::new(),
            flags: vec![],
        },
    );
    let empty = NegotiationMessage::from_content(
        reference(),
        2,
        1,
        NegotiationContent::Inform {
            info: Some(String::new()),
            data: Bytes::new(),
            flags: vec![],
        },
    );
    assert_ne!(absent.encode(), empty.encode());
    assert_roundtrip(absent);
    assert_roundtrip(empty);
}

#[test]
fn test_union_alternatives_decoded_by_tag() {
    let queries = [
        Query::Text(String::new()),
        Query::Keywords(vec![]),
        Query::Blobs(vec![]),
        Query::Structured(proposal()),
    ];
    for query in queries {
        let message = NegotiationMessage::from_content(
            DialogueReference::opening("s"),
            1,
            0,
            NegotiationContent::Cfp {
                query: query.clone(),
            },
        );
        let decoded = NegotiationMessage::decode(&message.encode()).unwrap();
        match decoded.content() {
            NegotiationContent::Cfp { query: got } => assert_eq!(got, &query),
            other => panic!("unexpected content {other:?}"),
        }
    }
}

#[test]
fn test_incomplete_reference_roundtrip() {
    assert_roundtrip(NegotiationMessage::from_content(
        DialogueReference::opening("only-starter"),
        1,
        0,
        cfp(),
    ));
}

#[test]
fn test_truncated_input_is_decoding_error() {
    let encoded = NegotiationMessage::from_content(reference(), 2, 1, propose(9.0)).encode();
    for len in 0..encoded.len() {
        assert!(
            NegotiationMessage::decode(&encoded[..len]).is_err(),
            "prefix of length {len} decoded"
        );
    }
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut data = NegotiationMessage::from_content(reference(), 1, 0, cfp())
        .encode()
        .to_vec();
    data.extend_from_slice(b"xx");
    assert_eq!(
        NegotiationMessage::decode(&data).unwrap_err(),
        DecodeError::TrailingBytes(2)
    );
}

#[test]
fn test_unknown_union_tag_rejected() {
    let data = NegotiationMessage::from_content(
        DialogueReference::opening("s"),
        1,
        0,
        NegotiationContent::Cfp {
            query: Query::Text("x".to_string()),
        },
    )
    .encode()
    .to_vec();
    // id, target, "s", "", performative tag, union tag
    let union_tag_at = 1 + 1 + 2 + 1 + 1;
    assert_eq!(data[union_tag_at], 1);
    let mut tampered = data.clone();
    tampered[union_tag_at] = 42;
    assert_eq!(
        NegotiationMessage::decode(&tampered).unwrap_err(),
        DecodeError::UnknownTag {
            context: "Query",
            tag: 42
        }
    );
}

#[test]
fn test_schema_matches_declaration() {
    let schema = NegotiationProtocol::schema();
    assert_eq!(schema.protocol_id().to_string(), "agora/negotiation:0.1.0");
    let propose = schema.performative_by_name("propose").unwrap();
    let rendered: Vec<String> = propose
        .fields
        .iter()
        .map(|f| f.field_type.to_string())
        .collect();
    assert_eq!(
        rendered,
        vec![
            "ct:Proposal",
            "pt:float",
            "pt:set[pt:str]",
            "pt:dict[pt:str, pt:int]"
        ]
    );
    let cfp = schema.performative_by_name("cfp").unwrap();
    assert_eq!(
        cfp.fields[0].field_type.to_string(),
        "pt:union[pt:str, pt:list[pt:str], pt:list[pt:bytes], ct:Proposal]"
    );
}

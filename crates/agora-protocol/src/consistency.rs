//! The Light Protocol Rules.
//!
//! 1. `dialogue_reference` is a pair of strings and `message_id`/`target` are
//!    integers. The [`Message`] type guarantees this.
//! 2. The performative is declared by the schema, and the fields present are
//!    exactly the fields declared for it, with the declared types. Optional
//!    fields count only when present.
//! 3. Message 1 targets 0. Any other message targets a strictly earlier one.
//!
//! The check is stateless; sequencing within a dialogue is enforced by
//! [`Dialogue::extend`](crate::Dialogue::extend).

use crate::error::ValidationError;
use crate::message::Message;
use crate::protocol::{Content, Performative, Protocol};
use std::collections::BTreeSet;

/// Re-run the Light Protocol Rules against a message.
pub fn check_consistency<P: Protocol>(message: &Message<P>) -> Result<(), ValidationError> {
    check_parts::<P>(
        message.message_id(),
        message.target(),
        message.performative(),
        message.content(),
    )
}

pub(crate) fn check_parts<P: Protocol>(
    message_id: i64,
    target: i64,
    performative: P::Performative,
    content: &P::Content,
) -> Result<(), ValidationError> {
    check_content::<P>(performative, content)?;
    check_sequencing(message_id, target)
}

fn check_content<P: Protocol>(
    performative: P::Performative,
    content: &P::Content,
) -> Result<(), ValidationError> {
    let spec = P::schema()
        .performative(performative.tag())
        .filter(|spec| spec.name == performative.name())
        .ok_or_else(|| ValidationError::UnknownPerformative(performative.name().to_string()))?;

    let content_performative = content.performative();
    if content_performative != performative {
        return Err(ValidationError::PerformativeMismatch {
            declared: performative.name().to_string(),
            content: content_performative.name().to_string(),
        });
    }

    let mut seen = BTreeSet::new();
    for (name, actual) in content.fields() {
        if !seen.insert(name) {
            return Err(ValidationError::DuplicateField {
                performative: spec.name.to_string(),
                field: name.to_string(),
            });
        }
        let declared = spec
            .field(name)
            .ok_or_else(|| ValidationError::UnexpectedField {
                performative: spec.name.to_string(),
                field: name.to_string(),
            })?;
        if declared.field_type != actual {
            return Err(ValidationError::WrongFieldType {
                performative: spec.name.to_string(),
                field: name.to_string(),
                expected: declared.field_type.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    if let Some(missing) = spec.required_fields().find(|f| !seen.contains(f.name)) {
        return Err(ValidationError::MissingField {
            performative: spec.name.to_string(),
            field: missing.name.to_string(),
        });
    }

    Ok(())
}

fn check_sequencing(message_id: i64, target: i64) -> Result<(), ValidationError> {
    if message_id == 1 {
        if target != 0 {
            return Err(ValidationError::OpeningTarget { target });
        }
    } else if !(0 < target && target < message_id) {
        return Err(ValidationError::TargetOutOfRange { message_id, target });
    }
    Ok(())
}

//! Envelope relay validation.
//!
//! A candidate message is relayed only if its sender is registered on the
//! submitting connection and it carries an envelope for every registered
//! participant, the sender included. Envelopes addressed to names that are
//! not registered are tolerated and forwarded untouched: a participant that
//! leaves while a message is in flight must not cause a rejection.

use std::collections::BTreeMap;

use parlor_proto::{OutgoingMessage, RelayedMessage};

use crate::{
    error::RelayError,
    registry::{ConnectionId, ParticipantRegistry},
};

/// Validate a candidate message against the current registry.
///
/// Checks run in order and the first failure wins: sender present, sender
/// bound to `connection_id`, envelope coverage.
pub fn validate(
    registry: &ParticipantRegistry,
    connection_id: ConnectionId,
    candidate: OutgoingMessage,
) -> Result<RelayedMessage, RelayError> {
    let sender = candidate.sender.filter(|s| !s.is_empty()).ok_or(RelayError::MissingSender)?;

    if !registry.is_bound_to(&sender, connection_id) {
        return Err(RelayError::SenderNotRegistered { sender });
    }

    let envelopes = candidate.envelopes.unwrap_or_default();
    let missing = missing_recipients(registry, &envelopes);
    if !missing.is_empty() {
        return Err(RelayError::IncompleteEnvelope { missing });
    }

    Ok(RelayedMessage {
        sender,
        ciphertext: candidate.ciphertext,
        iv: candidate.iv,
        timestamp: candidate.timestamp,
        envelopes,
    })
}

/// Registered usernames with no envelope, sorted.
pub fn missing_recipients(
    registry: &ParticipantRegistry,
    envelopes: &BTreeMap<String, String>,
) -> Vec<String> {
    // BTreeSet iteration is already sorted
    registry
        .usernames()
        .into_iter()
        .filter(|username| !envelopes.contains_key(*username))
        .map(str::to_string)
        .collect()
}

//! Presence notifications.
//!
//! Every registry change produces a point event (`user_joined` or
//! `user_left`) broadcast to everyone except the participant concerned,
//! followed by a full `participants` snapshot broadcast to every connection.
//! The point event always comes first so clients can apply it before
//! reconciling against the snapshot.

use parlor_proto::{ParticipantSummary, ServerMessage};

use crate::{driver::RelayAction, registry::IdentityRecord};

/// Actions announcing that `record` joined.
pub fn arrival(record: &IdentityRecord, snapshot: Vec<ParticipantSummary>) -> [RelayAction; 2] {
    [
        RelayAction::Broadcast {
            message: ServerMessage::UserJoined {
                username: record.username.clone(),
                fingerprint: record.fingerprint.to_string(),
            },
            exclude: Some(record.connection_id),
        },
        snapshot_broadcast(snapshot),
    ]
}

/// Actions announcing that `record` left.
pub fn departure(record: &IdentityRecord, snapshot: Vec<ParticipantSummary>) -> [RelayAction; 2] {
    [
        RelayAction::Broadcast {
            message: ServerMessage::UserLeft {
                username: record.username.clone(),
                fingerprint: record.fingerprint.to_string(),
            },
            exclude: Some(record.connection_id),
        },
        snapshot_broadcast(snapshot),
    ]
}

fn snapshot_broadcast(participants: Vec<ParticipantSummary>) -> RelayAction {
    RelayAction::Broadcast { message: ServerMessage::Participants { participants }, exclude: None }
}

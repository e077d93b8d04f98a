//! Fuzz target for the relay hub
//!
//! Drives a `RelayHub` with arbitrary register, send, leave and disconnect
//! sequences and checks it against the reference model after every step.
//!
//! # Invariants
//!
//! - Registry stays a bijection between connections and names
//! - Every accepted message is in the audit log exactly once
//! - A message reaches connections only if every participant had an envelope

#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parlor_core::{LogKey, RelayConfig, RelayEvent, RelayHub};
use parlor_harness::{ModelWorld, Operation, RecordingOutbox, SimEnv, pool_name, public_key_for};
use parlor_proto::{OutgoingMessage, RegisterRequest};

const CLIENTS: u8 = 4;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    seed: u64,
    ops: Vec<Operation>,
}

fuzz_target!(|input: FuzzInput| {
    let env = SimEnv::with_seed(input.seed);
    let hub = RelayHub::new(env.clone(), &LogKey::generate(&env), RelayConfig::default());
    let outbox = RecordingOutbox::new();
    let mut model = ModelWorld::new(usize::from(CLIENTS));

    for op in input.ops {
        let op = clamp(op);
        let expected = model.apply(&op);
        let conn_id = |c: u8| u64::from(c) + 1;

        // Only operations the model accepted are forwarded, so the hub sees
        // the same connection lifecycle.
        if expected.is_err() {
            continue;
        }
        match op {
            Operation::Connect { client_id } => {
                hub.dispatch(RelayEvent::ConnectionOpened { conn_id: conn_id(client_id) }, &outbox);
            },
            Operation::Disconnect { client_id } => {
                hub.dispatch(RelayEvent::ConnectionClosed { conn_id: conn_id(client_id) }, &outbox);
            },
            Operation::Register { client_id, name, key } => {
                let request = RegisterRequest {
                    username: Some(pool_name(name).to_string()),
                    public_key: Some(public_key_for(key)),
                };
                assert!(hub.register(conn_id(client_id), request, &outbox).is_ok());
            },
            Operation::SendMessage { client_id, sender, coverage } => {
                let roster: BTreeSet<String> =
                    hub.list_participants().into_iter().map(|p| p.username).collect();
                let own = hub.inspect(|d| d.registry().binding(conn_id(client_id)).map(str::to_string));
                let candidate = OutgoingMessage {
                    sender: sender.resolve(own.as_deref()),
                    ciphertext: Some("Y3Q=".to_string()),
                    iv: None,
                    timestamp: None,
                    envelopes: Some(
                        coverage.recipients(&roster).into_iter().map(|n| (n, String::new())).collect(),
                    ),
                };
                assert!(hub.send_message(conn_id(client_id), candidate, &outbox).is_ok());
            },
            Operation::Leave { client_id } => hub.leave(conn_id(client_id), &outbox),
            Operation::LookupKey { .. } | Operation::AdvanceTime { .. } => {},
        }

        assert!(hub.inspect(|d| d.check_invariants()).is_ok());
        assert_eq!(hub.audit_log().len(), model.observable_state().audit_entries);
    }
});

fn clamp(op: Operation) -> Operation {
    match op {
        Operation::Connect { client_id } => Operation::Connect { client_id: client_id % CLIENTS },
        Operation::Disconnect { client_id } => {
            Operation::Disconnect { client_id: client_id % CLIENTS }
        },
        Operation::Register { client_id, name, key } => {
            Operation::Register { client_id: client_id % CLIENTS, name, key }
        },
        Operation::SendMessage { client_id, sender, coverage } => {
            Operation::SendMessage { client_id: client_id % CLIENTS, sender, coverage }
        },
        Operation::Leave { client_id } => Operation::Leave { client_id: client_id % CLIENTS },
        other => other,
    }
}

//! Property tests for the registry, envelope validation and the audit log.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Instant,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use parlor_core::{
    AuditError, AuditLog, Environment, LogKey, ParticipantRegistry, RelayError, decrypt_entry,
    relay,
};
use parlor_proto::{OutgoingMessage, RelayedMessage};
use proptest::prelude::*;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

#[derive(Debug, Clone)]
enum Op {
    Register { conn: u64, name: usize },
    Remove { conn: u64 },
}

const NAMES: [&str; 5] = ["alice", "bob", "carol", "dave", "Alice"];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..6, 0usize..NAMES.len()).prop_map(|(conn, name)| Op::Register { conn, name }),
        1 => (0u64..6).prop_map(|conn| Op::Remove { conn }),
    ]
}

#[derive(Clone)]
struct SeededEnv(std::sync::Arc<std::sync::Mutex<ChaCha20Rng>>);

impl Environment for SeededEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time_secs(&self) -> i64 {
        0
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.0.lock().unwrap().fill_bytes(buffer);
    }
}

fn registry_with(names: &BTreeSet<String>) -> ParticipantRegistry {
    let mut registry = ParticipantRegistry::new();
    for (conn, name) in (1u64..).zip(names) {
        registry.register(conn, Some(name), Some("a2V5"), Instant::now()).unwrap();
    }
    registry
}

proptest! {
    #[test]
    fn registry_stays_bijective(ops in proptest::collection::vec(op_strategy(), 0..64)) {
        let mut registry = ParticipantRegistry::new();

        for op in ops {
            match op {
                Op::Register { conn, name } => {
                    let name = NAMES[name];
                    let holder = registry.lookup(name).map(|r| r.connection_id);
                    let result = registry.register(conn, Some(name), Some("a2V5"), Instant::now());

                    match holder {
                        Some(other) if other != conn => {
                            prop_assert_eq!(result, Err(RelayError::Conflict { username: name.to_string() }));
                        },
                        _ => {
                            prop_assert!(result.is_ok());
                            prop_assert_eq!(registry.binding(conn), Some(name));
                        },
                    }
                },
                Op::Remove { conn } => {
                    registry.remove(conn);
                    prop_assert_eq!(registry.binding(conn), None);
                },
            }

            prop_assert!(registry.check_invariants().is_ok());
            let snapshot = registry.snapshot();
            let unique: BTreeSet<&str> = snapshot.iter().map(|p| p.username.as_str()).collect();
            prop_assert_eq!(unique.len(), snapshot.len());
        }
    }

    #[test]
    fn strict_subset_reports_exact_missing(
        names in proptest::collection::btree_set("[a-z]{2,8}", 2..8),
        keep_mask in any::<u8>(),
    ) {
        let registry = registry_with(&names);
        let sender = names.iter().next().unwrap().clone();

        let covered: BTreeSet<String> = names
            .iter()
            .enumerate()
            .filter(|(i, name)| **name == sender || keep_mask & (1 << (i % 8)) != 0)
            .map(|(_, name)| name.clone())
            .collect();
        let expected: Vec<String> = names.difference(&covered).cloned().collect();
        prop_assume!(!expected.is_empty());

        let candidate = OutgoingMessage {
            sender: Some(sender),
            envelopes: Some(covered.iter().map(|n| (n.clone(), "ZQ==".to_string())).collect()),
            ..OutgoingMessage::default()
        };

        prop_assert_eq!(
            relay::validate(&registry, 1, candidate),
            Err(RelayError::IncompleteEnvelope { missing: expected })
        );
    }

    #[test]
    fn exact_cover_relays_unmodified(names in proptest::collection::btree_set("[a-z]{2,8}", 1..8)) {
        let registry = registry_with(&names);
        let sender = names.iter().next().unwrap().clone();
        let envelopes: BTreeMap<String, String> =
            names.iter().map(|n| (n.clone(), STANDARD.encode(n.as_bytes()))).collect();

        let candidate = OutgoingMessage {
            sender: Some(sender.clone()),
            ciphertext: Some("Y3Q=".to_string()),
            iv: Some("aXY=".to_string()),
            timestamp: Some("t".to_string()),
            envelopes: Some(envelopes.clone()),
        };

        let relayed = relay::validate(&registry, 1, candidate).unwrap();
        prop_assert_eq!(relayed, RelayedMessage {
            sender,
            ciphertext: Some("Y3Q=".to_string()),
            iv: Some("aXY=".to_string()),
            timestamp: Some("t".to_string()),
            envelopes,
        });
    }

    #[test]
    fn audit_entries_decrypt_only_under_their_key(
        seed in any::<u64>(),
        ciphertext in "[A-Za-z0-9+/]{0,64}",
        flip in any::<usize>(),
    ) {
        let env = SeededEnv(std::sync::Arc::new(std::sync::Mutex::new(ChaCha20Rng::seed_from_u64(seed))));
        let key = LogKey::generate(&env);
        let log = AuditLog::new(&key);
        let message = RelayedMessage {
            sender: "alice".to_string(),
            ciphertext: Some(ciphertext),
            iv: None,
            timestamp: None,
            envelopes: BTreeMap::from([("alice".to_string(), "ZQ==".to_string())]),
        };
        log.append(&env, &message).unwrap();
        let entry = log.export_all().remove(0);

        let record = decrypt_entry(&key, &entry).unwrap();
        prop_assert_eq!(&record.message, &message);
        prop_assert_eq!(record.stored_at.as_str(), "1970-01-01T00:00:00Z");

        let wrong = LogKey::generate(&env);
        prop_assert_eq!(decrypt_entry(&wrong, &entry), Err(AuditError::Authentication));

        let mut tampered = entry.clone();
        let mut bytes = STANDARD.decode(&tampered.ciphertext).unwrap();
        let index = flip % bytes.len();
        bytes[index] ^= 0x80;
        tampered.ciphertext = STANDARD.encode(bytes);
        prop_assert_eq!(decrypt_entry(&key, &tampered), Err(AuditError::Authentication));
    }
}

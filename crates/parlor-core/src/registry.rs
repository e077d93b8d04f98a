//! Participant Registry
//!
//! Binds usernames to public-key identities and to the connection that
//! registered them.
//!
//! ## Invariants
//!
//! - Each username maps to at most one identity record
//! - Each connection is bound to at most one username
//! - The two maps agree: `identities[bindings[c]].connection_id == c`
//!
//! ## Design
//!
//! Registration is a two-step transition: [`ParticipantRegistry::prepare`]
//! validates without mutating, [`ParticipantRegistry::remove`] evicts the
//! connection's prior identity, and [`ParticipantRegistry::install`] commits.
//! The driver runs the steps back to back so it can announce the departure of
//! the evicted identity with the snapshot taken between them.
//! [`ParticipantRegistry::register`] runs all three for callers that do not
//! care about the intermediate state.

use std::{
    collections::{BTreeSet, HashMap},
    time::Instant,
};

use parlor_proto::ParticipantSummary;

use crate::{error::RelayError, fingerprint::Fingerprint};

/// Opaque per-connection identifier assigned by the transport.
pub type ConnectionId = u64;

/// Minimum username length, in characters, after trimming.
pub const MIN_USERNAME_CHARS: usize = 2;

/// A registered participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Trimmed username
    pub username: String,
    /// Base64 public key as supplied
    pub public_key: String,
    /// Fingerprint derived from the decoded key
    pub fingerprint: Fingerprint,
    /// Connection that owns this identity
    pub connection_id: ConnectionId,
    /// When the identity was installed
    pub joined_at: Instant,
}

impl IdentityRecord {
    /// Public view for presence snapshots.
    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            username: self.username.clone(),
            fingerprint: self.fingerprint.to_string(),
            public_key: self.public_key.clone(),
        }
    }
}

/// A validated registration that has not been installed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRegistration {
    connection_id: ConnectionId,
    username: String,
    public_key: String,
    fingerprint: Fingerprint,
}

impl PendingRegistration {
    /// Username that will be installed.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Fingerprint that will be installed.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The newly installed identity
    pub record: IdentityRecord,
    /// Identity previously bound to the same connection, if any
    pub evicted: Option<IdentityRecord>,
}

/// Username and connection bindings for every registered participant.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    /// Username to identity
    identities: HashMap<String, IdentityRecord>,
    /// Connection to the username it registered
    bindings: HashMap<ConnectionId, String>,
}

impl ParticipantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a registration request without mutating anything.
    ///
    /// Checks, in order: both fields present and non-empty, username length,
    /// username not held by another connection, public key decodes.
    pub fn prepare(
        &self,
        connection_id: ConnectionId,
        username: Option<&str>,
        public_key: Option<&str>,
    ) -> Result<PendingRegistration, RelayError> {
        let username = username.map(str::trim).unwrap_or_default();
        let public_key = public_key.unwrap_or_default();
        if username.is_empty() || public_key.is_empty() {
            return Err(RelayError::MissingFields);
        }

        if username.chars().count() < MIN_USERNAME_CHARS {
            return Err(RelayError::UsernameTooShort { min: MIN_USERNAME_CHARS });
        }

        self.ensure_available(connection_id, username)?;

        let fingerprint = Fingerprint::of_base64(public_key)?;

        Ok(PendingRegistration {
            connection_id,
            username: username.to_string(),
            public_key: public_key.to_string(),
            fingerprint,
        })
    }

    /// Commit a prepared registration.
    ///
    /// The connection must have no current binding; call
    /// [`ParticipantRegistry::remove`] first. The username is re-checked so a
    /// stale `PendingRegistration` can never overwrite another connection's
    /// identity.
    pub fn install(
        &mut self,
        pending: PendingRegistration,
        joined_at: Instant,
    ) -> Result<IdentityRecord, RelayError> {
        self.ensure_available(pending.connection_id, &pending.username)?;

        if let Some(stale) = self.remove(pending.connection_id) {
            tracing::debug!(username = %stale.username, "install replaced a stale binding");
        }

        let record = IdentityRecord {
            username: pending.username,
            public_key: pending.public_key,
            fingerprint: pending.fingerprint,
            connection_id: pending.connection_id,
            joined_at,
        };

        self.bindings.insert(record.connection_id, record.username.clone());
        self.identities.insert(record.username.clone(), record.clone());

        debug_assert!(self.check_invariants().is_ok());
        Ok(record)
    }

    /// Validate, evict and install in one step.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        username: Option<&str>,
        public_key: Option<&str>,
        joined_at: Instant,
    ) -> Result<Registration, RelayError> {
        let pending = self.prepare(connection_id, username, public_key)?;
        let evicted = self.remove(connection_id);
        let record = self.install(pending, joined_at)?;
        Ok(Registration { record, evicted })
    }

    /// Remove the identity bound to a connection.
    ///
    /// Idempotent: returns `None` if the connection was not registered.
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<IdentityRecord> {
        let username = self.bindings.remove(&connection_id)?;
        self.identities.remove(&username)
    }

    /// Look up an identity by exact username.
    pub fn lookup(&self, username: &str) -> Option<&IdentityRecord> {
        self.identities.get(username)
    }

    /// Username bound to a connection, if any.
    pub fn binding(&self, connection_id: ConnectionId) -> Option<&str> {
        self.bindings.get(&connection_id).map(String::as_str)
    }

    /// Identity bound to a connection, if any.
    pub fn identity_for(&self, connection_id: ConnectionId) -> Option<&IdentityRecord> {
        self.binding(connection_id).and_then(|username| self.identities.get(username))
    }

    /// Whether `username` is registered on exactly this connection.
    pub fn is_bound_to(&self, username: &str, connection_id: ConnectionId) -> bool {
        self.lookup(username).is_some_and(|record| record.connection_id == connection_id)
    }

    /// Every registered username.
    pub fn usernames(&self) -> BTreeSet<&str> {
        self.identities.keys().map(String::as_str).collect()
    }

    /// Presence snapshot ordered by case-insensitive username.
    ///
    /// Ties (usernames differing only in case) are broken by the exact
    /// username so the order is total.
    pub fn snapshot(&self) -> Vec<ParticipantSummary> {
        let mut summaries: Vec<ParticipantSummary> =
            self.identities.values().map(IdentityRecord::summary).collect();
        sort_presence(&mut summaries);
        summaries
    }

    /// Snapshot as it would be after installing `pending`.
    ///
    /// The connection's current identity, if any, is left out since
    /// installing evicts it. Nothing is mutated.
    pub fn snapshot_with(&self, pending: &PendingRegistration) -> Vec<ParticipantSummary> {
        let evicted = self.binding(pending.connection_id);
        let mut summaries: Vec<ParticipantSummary> = self
            .identities
            .values()
            .filter(|record| Some(record.username.as_str()) != evicted)
            .map(IdentityRecord::summary)
            .collect();
        summaries.push(ParticipantSummary {
            username: pending.username.clone(),
            fingerprint: pending.fingerprint.to_string(),
            public_key: pending.public_key.clone(),
        });
        sort_presence(&mut summaries);
        summaries
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Verify the username and connection maps agree.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.identities.len() != self.bindings.len() {
            return Err(format!(
                "{} identities but {} connection bindings",
                self.identities.len(),
                self.bindings.len()
            ));
        }

        for (connection_id, username) in &self.bindings {
            let Some(record) = self.identities.get(username) else {
                return Err(format!("connection {connection_id} bound to unknown {username:?}"));
            };
            if record.connection_id != *connection_id {
                return Err(format!(
                    "{username:?} owned by connection {} but bound from {connection_id}",
                    record.connection_id
                ));
            }
        }

        for (username, record) in &self.identities {
            if &record.username != username {
                return Err(format!("record for {username:?} names {:?}", record.username));
            }
        }

        Ok(())
    }

    fn ensure_available(
        &self,
        connection_id: ConnectionId,
        username: &str,
    ) -> Result<(), RelayError> {
        match self.identities.get(username) {
            Some(existing) if existing.connection_id != connection_id => {
                Err(RelayError::Conflict { username: username.to_string() })
            },
            _ => Ok(()),
        }
    }
}

/// Case-insensitive order, ties broken by the exact username.
fn sort_presence(summaries: &mut [ParticipantSummary]) {
    summaries.sort_by(|a, b| {
        a.username
            .to_lowercase()
            .cmp(&b.username.to_lowercase())
            .then_with(|| a.username.cmp(&b.username))
    });
}

//! Model world: the oracle for relay behavior.

use std::collections::{BTreeMap, BTreeSet};

use super::operation::{
    ClientId, Operation, OperationError, OperationResult, pool_name, public_key_for,
};

/// Delivery counters for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Received {
    /// `receive_message` broadcasts
    pub messages: usize,
    /// `user_joined` notifications
    pub joined: usize,
    /// `user_left` notifications
    pub left: usize,
}

/// State visible from outside the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Registered names and their clients, in presence order
    pub participants: Vec<(String, ClientId)>,
    /// Number of audit log entries
    pub audit_entries: usize,
    /// Counters per client, indexed by client id
    pub received: Vec<Received>,
}

/// Reference implementation of the relay.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    connected: Vec<bool>,
    owners: BTreeMap<String, ClientId>,
    names: Vec<Option<String>>,
    received: Vec<Received>,
    audit_entries: usize,
}

impl ModelWorld {
    /// World with `num_clients` disconnected clients.
    pub fn new(num_clients: usize) -> Self {
        Self {
            connected: vec![false; num_clients],
            owners: BTreeMap::new(),
            names: vec![None; num_clients],
            received: vec![Received::default(); num_clients],
            audit_entries: 0,
        }
    }

    /// Number of clients.
    pub fn num_clients(&self) -> usize {
        self.connected.len()
    }

    /// Whether `client_id`'s connection is open.
    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.connected.get(usize::from(client_id)).copied().unwrap_or(false)
    }

    /// Name `client_id` is registered under.
    pub fn name_of(&self, client_id: ClientId) -> Option<&str> {
        self.names.get(usize::from(client_id)).and_then(|n| n.as_deref())
    }

    /// Registered names, in byte order.
    pub fn roster(&self) -> BTreeSet<String> {
        self.owners.keys().cloned().collect()
    }

    /// Apply an operation.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        if let Some(client_id) = op.client_id()
            && usize::from(client_id) >= self.num_clients()
        {
            return OperationResult::Error(OperationError::NotConnected);
        }

        match op {
            Operation::Connect { client_id } => {
                self.connected[usize::from(*client_id)] = true;
                OperationResult::Ok
            },
            Operation::Disconnect { client_id } => {
                if !self.is_connected(*client_id) {
                    return OperationResult::Error(OperationError::NotConnected);
                }
                self.connected[usize::from(*client_id)] = false;
                self.unbind(*client_id);
                OperationResult::Ok
            },
            Operation::Register { client_id, name, key } => {
                self.register(*client_id, pool_name(*name), &public_key_for(*key))
            },
            Operation::SendMessage { client_id, sender, coverage } => {
                if !self.is_connected(*client_id) {
                    return OperationResult::Error(OperationError::NotConnected);
                }
                let Some(sender) = sender.resolve(self.name_of(*client_id)) else {
                    return OperationResult::Error(OperationError::MissingSender);
                };
                if self.owners.get(&sender) != Some(client_id) {
                    return OperationResult::Error(OperationError::SenderNotRegistered);
                }

                let roster = self.roster();
                let recipients = coverage.recipients(&roster);
                let missing: Vec<String> = roster.difference(&recipients).cloned().collect();
                if !missing.is_empty() {
                    return OperationResult::Error(OperationError::IncompleteEnvelope(missing));
                }

                for client in self.connected_clients() {
                    self.received[client].messages += 1;
                }
                self.audit_entries += 1;
                OperationResult::Ok
            },
            Operation::Leave { client_id } => {
                if !self.is_connected(*client_id) {
                    return OperationResult::Error(OperationError::NotConnected);
                }
                self.unbind(*client_id);
                OperationResult::Ok
            },
            Operation::LookupKey { name } => {
                // Lookups are exact, " dave " never matches "dave"
                OperationResult::Lookup { found: self.owners.contains_key(pool_name(*name)) }
            },
            Operation::AdvanceTime { .. } => OperationResult::Ok,
        }
    }

    fn register(&mut self, client_id: ClientId, name: &str, key: &str) -> OperationResult {
        if !self.is_connected(client_id) {
            return OperationResult::Error(OperationError::NotConnected);
        }

        let name = name.trim();
        if name.is_empty() {
            return OperationResult::Error(OperationError::MissingFields);
        }
        if name.chars().count() < 2 {
            return OperationResult::Error(OperationError::UsernameTooShort);
        }
        if self.owners.get(name).is_some_and(|owner| *owner != client_id) {
            return OperationResult::Error(OperationError::Conflict);
        }
        if key.contains(' ') || key.contains('!') {
            return OperationResult::Error(OperationError::MalformedKey);
        }

        // Re-registration announces the departure of the old identity first
        self.unbind(client_id);

        self.owners.insert(name.to_string(), client_id);
        self.names[usize::from(client_id)] = Some(name.to_string());
        for client in self.connected_clients() {
            if client != usize::from(client_id) {
                self.received[client].joined += 1;
            }
        }
        OperationResult::Ok
    }

    fn unbind(&mut self, client_id: ClientId) {
        let Some(name) = self.names[usize::from(client_id)].take() else {
            return;
        };
        self.owners.remove(&name);
        for client in self.connected_clients() {
            if client != usize::from(client_id) {
                self.received[client].left += 1;
            }
        }
    }

    fn connected_clients(&self) -> Vec<usize> {
        self.connected.iter().enumerate().filter(|(_, open)| **open).map(|(i, _)| i).collect()
    }

    /// Snapshot of everything observable.
    pub fn observable_state(&self) -> ObservableState {
        let mut participants: Vec<(String, ClientId)> =
            self.owners.iter().map(|(name, owner)| (name.clone(), *owner)).collect();
        participants.sort_by(|(a, _), (b, _)| {
            a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
        });

        ObservableState {
            participants,
            audit_entries: self.audit_entries,
            received: self.received.clone(),
        }
    }
}

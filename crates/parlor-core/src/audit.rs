//! Encrypted append-only audit log.
//!
//! Every relayed message is serialized to a JSON [`AuditRecord`], sealed with
//! AES-256-GCM under the server log key with a fresh random 96-bit nonce, and
//! appended as an [`AuditLogEntry`]. Entries are never modified or removed.
//! Export returns them in append order and requires the shared export token
//! when one is configured.
//!
//! Decryption is only needed offline, by an operator holding the log key:
//! [`decrypt_entry`] and [`decrypt_entries`].
//!
//! The log is a cheap handle: clones share the same entries. Appends take the
//! write lock; exports take the read lock and never contend with the relay
//! driver. Failed appends are counted so operators can alert on
//! [`AuditLog::failed_appends`].

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::DateTime;
use parking_lot::RwLock;
use parlor_proto::{AuditLogEntry, RelayedMessage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    env::Environment,
    error::{AuditError, DecodeError, RelayError},
};

/// Log key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// AEAD nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Format of `stored_at`: UTC, second precision, `Z` suffix.
pub const STORED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Symmetric key sealing the audit log.
///
/// Zeroized on drop and redacted from `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LogKey([u8; KEY_SIZE]);

impl LogKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decode a base64 key. Must decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, AuditError> {
        let mut decoded = STANDARD.decode(encoded.trim()).map_err(DecodeError::from)?;
        let result = <[u8; KEY_SIZE]>::try_from(decoded.as_slice())
            .map(Self)
            .map_err(|_| AuditError::KeyLength(decoded.len()));
        decoded.zeroize();
        result
    }

    /// Generate an ephemeral key from the environment's entropy.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        env.random_bytes(&mut bytes);
        Self(bytes)
    }

    /// Base64 encoding, for handing an ephemeral key to an operator.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new((&self.0).into())
    }
}

impl fmt::Debug for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogKey(<redacted>)")
    }
}

/// Plaintext of one audit entry: the relayed message plus the time it was
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// The message exactly as relayed
    #[serde(flatten)]
    pub message: RelayedMessage,
    /// Server wall-clock time of the append
    pub stored_at: String,
}

/// Shared handle to the encrypted log.
#[derive(Clone)]
pub struct AuditLog {
    cipher: Aes256Gcm,
    entries: Arc<RwLock<Vec<AuditLogEntry>>>,
    failures: Arc<AtomicU64>,
}

impl AuditLog {
    /// Create an empty log sealed under `key`.
    pub fn new(key: &LogKey) -> Self {
        Self {
            cipher: key.cipher(),
            entries: Arc::new(RwLock::new(Vec::new())),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seal and append one relayed message.
    ///
    /// Returns the entry's index. On error nothing is appended and the
    /// failure counter is bumped.
    pub fn append<E: Environment>(
        &self,
        env: &E,
        message: &RelayedMessage,
    ) -> Result<usize, AuditError> {
        let record = AuditRecord {
            message: message.clone(),
            stored_at: format_stored_at(env.unix_time_secs()),
        };
        self.seal(env, &record)
    }

    fn seal<E: Environment, R: Serialize>(&self, env: &E, record: &R) -> Result<usize, AuditError> {
        let result = self.try_seal(env, record);
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn try_seal<E: Environment, R: Serialize>(
        &self,
        env: &E,
        record: &R,
    ) -> Result<usize, AuditError> {
        let plaintext =
            serde_json::to_vec(record).map_err(|e| AuditError::Serialize(e.to_string()))?;

        let mut nonce = [0u8; NONCE_SIZE];
        env.random_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| AuditError::Encrypt)?;

        let entry =
            AuditLogEntry { nonce: STANDARD.encode(nonce), ciphertext: STANDARD.encode(ciphertext) };

        let mut entries = self.entries.write();
        entries.push(entry);
        Ok(entries.len() - 1)
    }

    /// Every entry in append order.
    pub fn export_all(&self) -> Vec<AuditLogEntry> {
        self.entries.read().clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Appends that failed since the log was created.
    pub fn failed_appends(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("entries", &self.len())
            .field("failed_appends", &self.failed_appends())
            .finish_non_exhaustive()
    }
}

/// Shared secret gating audit export.
///
/// Only the SHA-256 digest of the token is held, and comparison runs in
/// constant time over the digests.
#[derive(Clone, Default)]
pub struct ExportToken {
    digest: Option<[u8; 32]>,
}

impl ExportToken {
    /// Gate export behind `token`. `None` or an empty token leaves export
    /// unrestricted.
    pub fn new(token: Option<&str>) -> Self {
        let digest = token.filter(|t| !t.is_empty()).map(|t| Sha256::digest(t).into());
        Self { digest }
    }

    /// Export open to any caller.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Whether a token must be supplied.
    pub fn is_required(&self) -> bool {
        self.digest.is_some()
    }

    /// Check a supplied token.
    pub fn authorize(&self, supplied: Option<&str>) -> Result<(), RelayError> {
        let Some(expected) = &self.digest else {
            return Ok(());
        };
        let supplied: [u8; 32] = Sha256::digest(supplied.unwrap_or_default()).into();
        if bool::from(expected.ct_eq(&supplied)) { Ok(()) } else { Err(RelayError::Unauthorized) }
    }
}

impl fmt::Debug for ExportToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportToken").field("required", &self.is_required()).finish()
    }
}

/// Decrypt one exported entry.
pub fn decrypt_entry(key: &LogKey, entry: &AuditLogEntry) -> Result<AuditRecord, AuditError> {
    let nonce = STANDARD.decode(&entry.nonce).map_err(DecodeError::from)?;
    if nonce.len() != NONCE_SIZE {
        return Err(AuditError::NonceLength(nonce.len()));
    }
    let ciphertext = STANDARD.decode(&entry.ciphertext).map_err(DecodeError::from)?;

    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| AuditError::Authentication)?;

    serde_json::from_slice(&plaintext).map_err(|e| AuditError::Record(e.to_string()))
}

/// Decrypt a full export, failing on the first bad entry.
pub fn decrypt_entries(
    key: &LogKey,
    entries: &[AuditLogEntry],
) -> Result<Vec<AuditRecord>, AuditError> {
    entries.iter().map(|entry| decrypt_entry(key, entry)).collect()
}

/// Render Unix seconds as `YYYY-MM-DDTHH:MM:SSZ`.
///
/// Out-of-range values clamp to the epoch.
pub fn format_stored_at(unix_secs: i64) -> String {
    DateTime::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .format(STORED_AT_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
        time::Instant,
    };

    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[derive(Clone)]
    struct FixedEnv {
        rng: Arc<Mutex<ChaCha20Rng>>,
        unix_secs: i64,
    }

    impl FixedEnv {
        fn new(seed: u64, unix_secs: i64) -> Self {
            Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))), unix_secs }
        }
    }

    impl Environment for FixedEnv {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn unix_time_secs(&self) -> i64 {
            self.unix_secs
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap().fill_bytes(buffer);
        }
    }

    fn message(sender: &str) -> RelayedMessage {
        RelayedMessage {
            sender: sender.to_string(),
            ciphertext: Some("Y2lwaGVy".to_string()),
            iv: Some("aXY=".to_string()),
            timestamp: Some("1700000000".to_string()),
            envelopes: BTreeMap::from([(sender.to_string(), "ZW52".to_string())]),
        }
    }

    #[test]
    fn append_then_decrypt() {
        let env = FixedEnv::new(1, 1_700_000_000);
        let key = LogKey::generate(&env);
        let log = AuditLog::new(&key);

        assert_eq!(log.append(&env, &message("alice")).unwrap(), 0);
        assert_eq!(log.append(&env, &message("bob")).unwrap(), 1);

        let records = decrypt_entries(&key, &log.export_all()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, message("alice"));
        assert_eq!(records[1].message.sender, "bob");
        assert_eq!(records[0].stored_at, "2023-11-14T22:13:20Z");
    }

    #[test]
    fn nonces_are_fresh_and_twelve_bytes() {
        let env = FixedEnv::new(2, 0);
        let log = AuditLog::new(&LogKey::generate(&env));
        for _ in 0..16 {
            log.append(&env, &message("alice")).unwrap();
        }

        let entries = log.export_all();
        let mut nonces: Vec<&str> = entries.iter().map(|e| e.nonce.as_str()).collect();
        for nonce in &nonces {
            assert_eq!(STANDARD.decode(nonce).unwrap().len(), NONCE_SIZE);
        }
        nonces.sort_unstable();
        nonces.dedup();
        assert_eq!(nonces.len(), 16);
    }

    #[test]
    fn record_json_carries_wire_field_names() {
        let record = AuditRecord { message: message("alice"), stored_at: format_stored_at(0) };
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();

        for field in ["from", "ciphertext", "iv", "timestamp", "envelopes", "stored_at"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["stored_at"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let env = FixedEnv::new(3, 0);
        let log = AuditLog::new(&LogKey::generate(&env));
        log.append(&env, &message("alice")).unwrap();

        let other = LogKey::generate(&env);
        assert_eq!(decrypt_entry(&other, &log.export_all()[0]), Err(AuditError::Authentication));
    }

    #[test]
    fn tampered_entry_fails_authentication() {
        let env = FixedEnv::new(4, 0);
        let key = LogKey::generate(&env);
        let log = AuditLog::new(&key);
        log.append(&env, &message("alice")).unwrap();

        let mut entry = log.export_all().remove(0);
        let mut ciphertext = STANDARD.decode(&entry.ciphertext).unwrap();
        ciphertext[0] ^= 0x01;
        entry.ciphertext = STANDARD.encode(ciphertext);

        assert_eq!(decrypt_entry(&key, &entry), Err(AuditError::Authentication));
    }

    #[test]
    fn short_nonce_rejected() {
        let key = LogKey::from_bytes([7; KEY_SIZE]);
        let entry = AuditLogEntry { nonce: STANDARD.encode([0u8; 8]), ciphertext: String::new() };
        assert_eq!(decrypt_entry(&key, &entry), Err(AuditError::NonceLength(8)));
    }

    #[test]
    fn key_from_base64_requires_32_bytes() {
        let key = LogKey::from_bytes([9; KEY_SIZE]);
        let restored = LogKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(restored.to_base64(), key.to_base64());

        assert_eq!(LogKey::from_base64(&STANDARD.encode([0u8; 16])).unwrap_err(), AuditError::KeyLength(16));
        assert!(matches!(LogKey::from_base64("!!"), Err(AuditError::Decode(_))));
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = LogKey::from_bytes([0xAB; KEY_SIZE]);
        assert_eq!(format!("{key:?}"), "LogKey(<redacted>)");
    }

    #[test]
    fn export_token_gate() {
        let open = ExportToken::new(None);
        assert!(!open.is_required());
        assert!(open.authorize(None).is_ok());
        assert!(ExportToken::new(Some("")).authorize(Some("anything")).is_ok());

        let gated = ExportToken::new(Some("s3cret"));
        assert!(gated.is_required());
        assert!(gated.authorize(Some("s3cret")).is_ok());
        assert_eq!(gated.authorize(Some("wrong")), Err(RelayError::Unauthorized));
        assert_eq!(gated.authorize(None), Err(RelayError::Unauthorized));
        assert!(!format!("{gated:?}").contains("s3cret"));
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refused"))
        }
    }

    #[test]
    fn failed_append_is_counted_and_not_stored() {
        let env = FixedEnv::new(5, 0);
        let log = AuditLog::new(&LogKey::generate(&env));
        let shared = log.clone();

        let err = log.seal(&env, &Unserializable).unwrap_err();
        assert!(matches!(err, AuditError::Serialize(_)));
        assert_eq!(shared.failed_appends(), 1);
        assert!(shared.is_empty());

        log.append(&env, &message("alice")).unwrap();
        assert_eq!(shared.failed_appends(), 1);
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn export_token_differing_in_last_byte_is_refused() {
        let gated = ExportToken::new(Some("s3cret-a"));
        assert_eq!(gated.authorize(Some("s3cret-b")), Err(RelayError::Unauthorized));
        assert_eq!(gated.authorize(Some("s3cret-a ")), Err(RelayError::Unauthorized));
    }

    #[test]
    fn stored_at_format() {
        assert_eq!(format_stored_at(86_400 + 3_661), "1970-01-02T01:01:01Z");
    }
}

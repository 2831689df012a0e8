//! Envelope keys: per-file keys wrapped under the server master key
//!
//! `wrapped_file_key = AES-256-CBC(master_key, wrap_iv, file_key)` with
//! PKCS#7 padding, so a 32-byte key wraps to 48 bytes. Both values are
//! persisted hex-encoded next to the file record.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use svault_core::config::MasterKeyConfig;
use svault_core::{MasterKey, VaultError, VaultResult};
use tracing::debug;
use zeroize::Zeroizing;

use crate::keys::FileKey;
use crate::suite::{aes256_cbc_decrypt, aes256_cbc_encrypt};

/// Size of the envelope IV (one AES block)
pub const WRAP_IV_SIZE: usize = 16;

/// The wrapped key stored alongside one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEnvelope {
    pub file_id: i64,
    /// AES-256-CBC wrapped file key (hex)
    pub wrapped_file_key: String,
    /// IV used for the wrap (hex)
    pub wrap_iv: String,
}

/// Wrap a file key under `master` with an explicit IV.
pub fn wrap_key(
    master: &MasterKey,
    iv: &[u8; WRAP_IV_SIZE],
    file_key: &FileKey,
) -> VaultResult<Vec<u8>> {
    aes256_cbc_encrypt(master.as_bytes(), iv, file_key.as_bytes())
}

/// Reverse of `wrap_key`. Any failure is a key mismatch, reported as
/// `Forbidden`.
pub fn unwrap_key(
    master: &MasterKey,
    iv: &[u8; WRAP_IV_SIZE],
    wrapped: &[u8],
) -> VaultResult<FileKey> {
    let plaintext = Zeroizing::new(
        aes256_cbc_decrypt(master.as_bytes(), iv, wrapped)
            .map_err(|_| VaultError::Forbidden("file key unwrap failed".into()))?,
    );
    FileKey::from_slice(&plaintext)
}

/// Wraps and unwraps file keys with the process-wide master key.
///
/// Holds the key behind an `Arc`; clones share it and never mutate it.
#[derive(Debug, Clone)]
pub struct EnvelopeManager {
    master_key: Arc<MasterKey>,
}

impl EnvelopeManager {
    pub fn new(master_key: Arc<MasterKey>) -> Self {
        Self { master_key }
    }

    /// Resolve the master key from configuration. Absence is fatal
    /// (`Configuration`), not a per-request error.
    pub fn from_config(config: &MasterKeyConfig) -> VaultResult<Self> {
        Ok(Self::new(Arc::new(config.load()?)))
    }

    /// Wrap `file_key` for storage under a fresh random IV.
    pub fn wrap(&self, file_id: i64, file_key: &FileKey) -> VaultResult<FileEnvelope> {
        let mut iv = [0u8; WRAP_IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let wrapped = wrap_key(&self.master_key, &iv, file_key)?;
        debug!(file_id, "wrapped file key");

        Ok(FileEnvelope {
            file_id,
            wrapped_file_key: hex::encode(wrapped),
            wrap_iv: hex::encode(iv),
        })
    }

    /// Recover the file key from a stored envelope.
    pub fn unwrap(&self, envelope: &FileEnvelope) -> VaultResult<FileKey> {
        let malformed = || {
            VaultError::Forbidden(format!(
                "envelope for file {} is malformed",
                envelope.file_id
            ))
        };

        let iv_bytes = hex::decode(&envelope.wrap_iv).map_err(|_| malformed())?;
        let iv: [u8; WRAP_IV_SIZE] = iv_bytes.as_slice().try_into().map_err(|_| malformed())?;
        let wrapped = hex::decode(&envelope.wrapped_file_key).map_err(|_| malformed())?;

        let key = unwrap_key(&self.master_key, &iv, &wrapped)?;
        debug!(file_id = envelope.file_id, "unwrapped file key");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_file_key;
    use crate::KEY_SIZE;

    fn manager(byte: u8) -> EnvelopeManager {
        EnvelopeManager::new(Arc::new(MasterKey::from_bytes([byte; KEY_SIZE])))
    }

    #[test]
    fn test_wrap_unwrap_fixed_iv() {
        let master = MasterKey::from_bytes([42u8; KEY_SIZE]);
        let iv = [7u8; WRAP_IV_SIZE];
        let file_key = generate_file_key();

        let wrapped = wrap_key(&master, &iv, &file_key).unwrap();
        assert_eq!(wrapped.len(), 48, "32-byte key plus one padding block");

        let unwrapped = unwrap_key(&master, &iv, &wrapped).unwrap();
        assert_eq!(unwrapped.as_bytes(), file_key.as_bytes());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelopes = manager(42);
        let file_key = generate_file_key();

        let envelope = envelopes.wrap(7, &file_key).unwrap();
        assert_eq!(envelope.file_id, 7);
        assert_eq!(envelope.wrap_iv.len(), WRAP_IV_SIZE * 2);

        let unwrapped = envelopes.unwrap(&envelope).unwrap();
        assert_eq!(unwrapped.as_bytes(), file_key.as_bytes());
    }

    #[test]
    fn test_fresh_iv_per_wrap() {
        let envelopes = manager(42);
        let file_key = generate_file_key();
        let a = envelopes.wrap(1, &file_key).unwrap();
        let b = envelopes.wrap(1, &file_key).unwrap();
        assert_ne!(a.wrap_iv, b.wrap_iv);
        assert_ne!(a.wrapped_file_key, b.wrapped_file_key);
    }

    #[test]
    fn test_unwrap_wrong_master_key() {
        let file_key = generate_file_key();
        let envelope = manager(1).wrap(1, &file_key).unwrap();

        // A wrong key yields bad padding or, rarely, a wrong-length key
        match manager(2).unwrap(&envelope) {
            Err(VaultError::Forbidden(_)) => {}
            Ok(key) => assert_ne!(key.as_bytes(), file_key.as_bytes()),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unwrap_malformed_envelope() {
        let envelopes = manager(42);
        let mut envelope = envelopes.wrap(3, &generate_file_key()).unwrap();
        envelope.wrap_iv = "zz".into();
        assert!(matches!(
            envelopes.unwrap(&envelope),
            Err(VaultError::Forbidden(_))
        ));
    }

    #[test]
    fn test_from_config_without_key() {
        let config = MasterKeyConfig {
            env: "SVAULT_TEST_ENVELOPE_KEY_NEVER_SET".into(),
            file: None,
        };
        let err = EnvelopeManager::from_config(&config).unwrap_err();
        assert!(matches!(err, VaultError::Configuration(_)));
    }
}

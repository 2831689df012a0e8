//! Per-file keys and per-user RSA key pairs
//!
//! A user's private key is only ever stored as an encrypted PKCS#8 PEM
//! (PBES2: PBKDF2-HMAC-SHA256 + AES-256-CBC) keyed by the user's passphrase.
//! The public key is stored as SPKI PEM.

use pkcs8::pkcs5::pbes2;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use svault_core::config::{KeysConfig, MIN_RSA_BITS};
use svault_core::{VaultError, VaultResult};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::KEY_SIZE;

const ENCRYPTED_PEM_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// A per-file 256-bit encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Accepts exactly 32 bytes; anything else is a key mismatch.
    pub fn from_slice(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(VaultError::Forbidden(format!(
                "unwrapped key has wrong size: {} bytes (expected {KEY_SIZE})",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit file encryption key.
pub fn generate_file_key() -> FileKey {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    FileKey::from_bytes(bytes)
}

/// A user's key pair in its storable form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// SPKI PEM
    pub public_key: String,
    /// Encrypted PKCS#8 PEM
    pub private_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"[ENCRYPTED]")
            .finish()
    }
}

/// Key-pair generation parameters
#[derive(Debug, Clone, Copy)]
pub struct KeyPairParams {
    /// RSA modulus size in bits (minimum 4096)
    pub rsa_bits: usize,
    /// PBKDF2 rounds for the private key PEM
    pub pbkdf2_rounds: u32,
}

impl Default for KeyPairParams {
    fn default() -> Self {
        Self::from(&KeysConfig::default())
    }
}

impl From<&KeysConfig> for KeyPairParams {
    fn from(config: &KeysConfig) -> Self {
        Self {
            rsa_bits: config.rsa_bits,
            pbkdf2_rounds: config.pbkdf2_rounds,
        }
    }
}

/// Generate an RSA key pair whose private half is exported already
/// encrypted under `passphrase`.
pub fn generate_key_pair(
    passphrase: &SecretString,
    params: &KeyPairParams,
) -> VaultResult<KeyPair> {
    if passphrase.expose_secret().is_empty() {
        return Err(VaultError::InvalidCredentials(
            "passphrase is required to protect the private key".into(),
        ));
    }
    if params.rsa_bits < MIN_RSA_BITS {
        return Err(VaultError::Configuration(format!(
            "RSA modulus of {} bits is below the minimum of {MIN_RSA_BITS}",
            params.rsa_bits
        )));
    }

    let private = RsaPrivateKey::new(&mut OsRng, params.rsa_bits)
        .map_err(|e| VaultError::Crypto(format!("RSA key generation failed: {e}")))?;
    debug!(bits = params.rsa_bits, "generated RSA key pair");

    export_key_pair(&private, passphrase, params.pbkdf2_rounds)
}

/// Serialize an in-memory key into its storable form.
pub(crate) fn export_key_pair(
    private: &RsaPrivateKey,
    passphrase: &SecretString,
    pbkdf2_rounds: u32,
) -> VaultResult<KeyPair> {
    let public_key = public_key_pem(&RsaPublicKey::from(private))?;
    let private_key = encrypt_private_key(private, passphrase, pbkdf2_rounds)?;
    Ok(KeyPair {
        public_key,
        private_key,
    })
}

fn encrypt_private_key(
    private: &RsaPrivateKey,
    passphrase: &SecretString,
    pbkdf2_rounds: u32,
) -> VaultResult<String> {
    let der = private
        .to_pkcs8_der()
        .map_err(|e| VaultError::Crypto(format!("PKCS#8 encoding failed: {e}")))?;
    let info = pkcs8::PrivateKeyInfo::try_from(der.as_bytes())
        .map_err(|e| VaultError::Crypto(format!("PKCS#8 encoding failed: {e}")))?;

    let mut salt = [0u8; 16];
    let mut iv = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let pbes2_params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(pbkdf2_rounds, &salt, &iv)
        .map_err(|e| VaultError::Crypto(format!("PBES2 parameters: {e}")))?;
    let encrypted = info
        .encrypt_with_params(pbes2_params, passphrase.expose_secret().as_bytes())
        .map_err(|e| VaultError::Crypto(format!("private key encryption failed: {e}")))?;

    let pem = encrypted
        .to_pem(ENCRYPTED_PEM_LABEL, LineEnding::LF)
        .map_err(|e| VaultError::Crypto(format!("PEM encoding failed: {e}")))?;
    Ok(pem.to_string())
}

/// Decrypt a stored private key with the owner's passphrase.
///
/// A stored key that does not parse as an encrypted PKCS#8 PEM is
/// `Unauthorized` with a fixed message; the parser error is only logged.
/// Once the document parses, any failure of the PBES2 layer or of the
/// decrypted key structure is `BadPassphrase`: CBC padding occasionally
/// validates under a wrong passphrase, and the garbage it yields then
/// fails the DER parse instead.
pub fn unlock_private_key(
    encrypted_pem: &str,
    passphrase: &SecretString,
) -> VaultResult<RsaPrivateKey> {
    if encrypted_pem.trim().is_empty() {
        return Err(VaultError::InvalidCredentials("private key is missing".into()));
    }
    if passphrase.expose_secret().is_empty() {
        return Err(VaultError::InvalidCredentials("passphrase is missing".into()));
    }

    let unreadable = |e: &dyn std::fmt::Display| {
        debug!(error = %e, "private key unlock failed");
        VaultError::Unauthorized("failed to unlock private key".into())
    };

    let (label, document) = pkcs8::Document::from_pem(encrypted_pem.trim())
        .map_err(|e| unreadable(&e))?;
    if label != ENCRYPTED_PEM_LABEL {
        return Err(unreadable(&format!("unexpected PEM label {label:?}")));
    }
    let info = pkcs8::EncryptedPrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| unreadable(&e))?;

    let bad_passphrase = |e: &dyn std::fmt::Display| {
        warn!("private key unlock failed: bad passphrase");
        debug!(error = %e, "PBES2 decrypt rejected");
        VaultError::BadPassphrase
    };

    let decrypted = info
        .decrypt(passphrase.expose_secret().as_bytes())
        .map_err(|e| bad_passphrase(&e))?;
    RsaPrivateKey::from_pkcs8_der(decrypted.as_bytes()).map_err(|e| bad_passphrase(&e))
}

/// Parse an SPKI PEM public key.
pub fn parse_public_key(pem: &str) -> VaultResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem.trim())
        .map_err(|e| VaultError::InvalidRequest(format!("invalid public key: {e}")))
}

pub fn public_key_pem(key: &RsaPublicKey) -> VaultResult<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| VaultError::Crypto(format!("SPKI encoding failed: {e}")))
}

/// SHA-256 of the SPKI DER encoding, hex.
pub fn public_key_fingerprint(key: &RsaPublicKey) -> VaultResult<String> {
    let der = key
        .to_public_key_der()
        .map_err(|e| VaultError::Crypto(format!("SPKI encoding failed: {e}")))?;
    Ok(hex::encode(Sha256::digest(der.as_bytes())))
}

#[cfg(test)]
pub(crate) mod test_keys {
    //! One 2048-bit key per test binary; generation dominates test time.

    use super::*;
    use std::sync::OnceLock;

    pub const PASSPHRASE: &str = "correct horse battery staple";

    pub fn private_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
    }

    pub fn other_private_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
    }

    pub fn key_pair() -> &'static KeyPair {
        static PAIR: OnceLock<KeyPair> = OnceLock::new();
        PAIR.get_or_init(|| {
            export_key_pair(private_key(), &SecretString::from(PASSPHRASE), 1000).unwrap()
        })
    }
}

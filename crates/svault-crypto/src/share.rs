//! Share key exchange: re-wrapping a file key for another user
//!
//! On approval the file key is unwrapped with the master key and wrapped
//! again with RSA-OAEP (SHA-256) under the requester's public key. The file
//! body is never re-encrypted; each grant costs one RSA operation.
//!
//! ```text
//! PENDING --approve--> APPROVED   (terminal, retrieval allowed)
//! PENDING --reject---> REJECTED   (terminal)
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use secrecy::SecretString;
use sha2::Sha256;
use svault_core::config::SharingConfig;
use svault_core::{unix_now, ShareGrant, VaultError, VaultResult};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cascade::Cascade;
use crate::envelope::{EnvelopeManager, FileEnvelope};
use crate::keys::{parse_public_key, public_key_fingerprint, unlock_private_key, FileKey};
use crate::suite::EncryptionMethod;

/// RSA-OAEP(SHA-256) wrap of a file key for one recipient.
pub fn wrap_for_recipient(file_key: &FileKey, recipient: &RsaPublicKey) -> VaultResult<Vec<u8>> {
    recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), file_key.as_bytes())
        .map_err(|e| VaultError::Crypto(format!("RSA-OAEP wrap failed: {e}")))
}

/// Reverse of `wrap_for_recipient`. Failure means the grant does not belong
/// to this key or is corrupted, so it is `Forbidden`.
pub fn unwrap_from_recipient(wrapped: &[u8], private: &RsaPrivateKey) -> VaultResult<FileKey> {
    let plaintext = Zeroizing::new(
        private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| VaultError::Forbidden("shared key could not be unwrapped".into()))?,
    );
    FileKey::from_slice(&plaintext)
}

/// Drives share grants through their lifecycle.
#[derive(Debug, Clone)]
pub struct ShareExchange {
    envelopes: EnvelopeManager,
    grant_ttl_secs: u64,
}

impl ShareExchange {
    pub fn new(envelopes: EnvelopeManager, config: &SharingConfig) -> Self {
        Self {
            envelopes,
            grant_ttl_secs: config.grant_ttl_secs,
        }
    }

    /// Open a PENDING grant for `requester_id` on `owner_id`'s file.
    ///
    /// Uniqueness of pending grants per (file, requester) is the metadata
    /// store's job.
    pub fn request_access(
        &self,
        grant_id: i64,
        owner_id: i64,
        requester_id: i64,
        file_id: i64,
    ) -> VaultResult<ShareGrant> {
        let grant = ShareGrant::request(
            grant_id,
            owner_id,
            requester_id,
            file_id,
            self.grant_ttl_secs,
            unix_now(),
        )?;
        debug!(grant_id, file_id, requester_id, "share access requested");
        Ok(grant)
    }

    /// PENDING -> APPROVED: wrap the file key for the requester.
    pub fn approve(
        &self,
        grant: &mut ShareGrant,
        envelope: &FileEnvelope,
        requester_public_key_pem: &str,
    ) -> VaultResult<()> {
        grant.ensure_pending("approve")?;
        if grant.is_expired(unix_now()) {
            return Err(VaultError::Forbidden(format!(
                "share grant {} has expired",
                grant.id
            )));
        }
        if envelope.file_id != grant.file_id {
            return Err(VaultError::InvalidRequest(format!(
                "envelope belongs to file {}, grant is for file {}",
                envelope.file_id, grant.file_id
            )));
        }

        let requester_key = parse_public_key(requester_public_key_pem)?;
        let file_key = self.envelopes.unwrap(envelope)?;
        let wrapped = wrap_for_recipient(&file_key, &requester_key)?;
        let fingerprint = public_key_fingerprint(&requester_key)?;

        grant.record_approval(
            STANDARD.encode(wrapped),
            requester_public_key_pem.to_string(),
            fingerprint,
        )?;
        info!(
            grant_id = grant.id,
            file_id = grant.file_id,
            requester_id = grant.requester_id,
            "share grant approved"
        );
        Ok(())
    }

    /// PENDING -> REJECTED.
    pub fn reject(&self, grant: &mut ShareGrant) -> VaultResult<()> {
        grant.reject()?;
        info!(grant_id = grant.id, "share grant rejected");
        Ok(())
    }

    /// Recover the file key as the requester of an APPROVED grant.
    pub fn unwrap_for_requester(
        &self,
        grant: &ShareGrant,
        requester_private_key_pem: &str,
        passphrase: &SecretString,
    ) -> VaultResult<FileKey> {
        grant.ensure_retrievable(unix_now())?;

        let private =
            unlock_private_key(requester_private_key_pem, passphrase).map_err(|e| {
                if e.is_unauthorized() {
                    warn!(grant_id = grant.id, "requester key unlock failed");
                    VaultError::Forbidden(format!(
                        "share grant {} cannot be opened with these credentials",
                        grant.id
                    ))
                } else {
                    e
                }
            })?;

        let encoded = grant.encrypted_key_for_requester.as_deref().ok_or_else(|| {
            VaultError::Forbidden(format!("share grant {} carries no key", grant.id))
        })?;
        let wrapped = STANDARD
            .decode(encoded)
            .map_err(|_| VaultError::Forbidden(format!("share grant {} is corrupted", grant.id)))?;

        unwrap_from_recipient(&wrapped, &private).map_err(|e| {
            warn!(grant_id = grant.id, "shared key unwrap failed");
            e
        })
    }

    /// Decrypt a shared file body as the requester.
    pub fn retrieve_as_requester(
        &self,
        grant: &ShareGrant,
        ciphertext: &[u8],
        method: EncryptionMethod,
        requester_private_key_pem: &str,
        passphrase: &SecretString,
    ) -> VaultResult<Vec<u8>> {
        let file_key = self.unwrap_for_requester(grant, requester_private_key_pem, passphrase)?;
        Cascade::new(method).decrypt(ciphertext, file_key.as_bytes())
    }
}

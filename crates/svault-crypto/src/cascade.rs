//! Cascade encryption: one buffer through an ordered list of cipher suites
//!
//! Blob format (binary):
//! ```text
//! [salt_0 (16) ‖ iv_0] [salt_1 (16) ‖ iv_1] ... [ciphertext]
//! ```
//! Header blocks appear in layer order (layer 0 is applied first and
//! removed last). Their sizes are fixed by the suites, so the header length
//! is known statically and the blob carries no length fields.
//!
//! Every layer derives its own key with scrypt from the shared secret and
//! that layer's salt.

use rand::RngCore;
use svault_core::{VaultError, VaultResult};
use tracing::debug;

use crate::kdf::{derive_key, KdfParams};
use crate::suite::{CipherSuite, EncryptionMethod};
use crate::SALT_SIZE;

/// A fixed layer list plus the KDF cost used for every layer key.
#[derive(Debug, Clone)]
pub struct Cascade {
    method: EncryptionMethod,
    kdf: KdfParams,
}

impl Cascade {
    pub fn new(method: EncryptionMethod) -> Self {
        Self {
            method,
            kdf: KdfParams::default(),
        }
    }

    /// Every suite in `CASCADE_ORDER`.
    pub fn standard() -> Self {
        Self::new(EncryptionMethod::Cascade)
    }

    pub fn method(&self) -> EncryptionMethod {
        self.method
    }

    pub fn layers(&self) -> &'static [CipherSuite] {
        self.method.layers()
    }

    /// Total header length: the sum of every layer's salt and IV.
    pub fn metadata_len(&self) -> usize {
        self.layers().iter().map(|suite| suite.metadata_len()).sum()
    }

    /// Encrypt `data` through every layer, innermost first.
    pub fn encrypt(&self, data: &[u8], secret: &[u8]) -> VaultResult<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let mut metadata = Vec::with_capacity(self.metadata_len());
        let mut running = data.to_vec();

        for &suite in self.layers() {
            let mut salt = [0u8; SALT_SIZE];
            rng.fill_bytes(&mut salt);
            let mut iv = vec![0u8; suite.iv_len()];
            rng.fill_bytes(&mut iv);

            let key = derive_key(secret, &salt, suite.key_len(), &self.kdf)?;
            running = suite.encrypt(key.as_bytes(), &iv, &running)?;

            metadata.extend_from_slice(&salt);
            metadata.extend_from_slice(&iv);
        }

        if running.is_empty() {
            return Err(VaultError::InvalidRequest(format!(
                "empty input cannot be sealed with length-preserving method {}",
                self.method
            )));
        }

        debug!(
            method = %self.method,
            plaintext_len = data.len(),
            blob_len = metadata.len() + running.len(),
            "cascade encrypt"
        );

        metadata.extend_from_slice(&running);
        Ok(metadata)
    }

    /// Undo `encrypt`, outermost layer first.
    ///
    /// Fails with `TooShort` when the blob is no longer than the header, and
    /// with `DecryptionFailed(suite)` naming the first layer that rejects.
    pub fn decrypt(&self, blob: &[u8], secret: &[u8]) -> VaultResult<Vec<u8>> {
        let header_len = self.metadata_len();
        if blob.len() <= header_len {
            return Err(VaultError::TooShort {
                len: blob.len(),
                min: header_len,
            });
        }

        let (metadata, ciphertext) = blob.split_at(header_len);

        // Header offset of each layer, in layer order
        let mut offsets = Vec::with_capacity(self.layers().len());
        let mut offset = 0;
        for suite in self.layers() {
            offsets.push(offset);
            offset += suite.metadata_len();
        }

        let mut running = ciphertext.to_vec();
        for (&suite, &start) in self.layers().iter().zip(&offsets).rev() {
            let salt = &metadata[start..start + SALT_SIZE];
            let iv = &metadata[start + SALT_SIZE..start + suite.metadata_len()];

            let key = derive_key(secret, salt, suite.key_len(), &self.kdf)?;
            running = suite.decrypt(key.as_bytes(), iv, &running).map_err(|e| {
                debug!(suite = suite.algorithm(), "cascade layer rejected ciphertext");
                e
            })?;
        }

        debug!(
            method = %self.method,
            blob_len = blob.len(),
            plaintext_len = running.len(),
            "cascade decrypt"
        );
        Ok(running)
    }
}

impl Default for Cascade {
    fn default() -> Self {
        Self::standard()
    }
}

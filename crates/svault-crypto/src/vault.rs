//! Upload and retrieval pipeline
//!
//! ```text
//! seal_upload:  [sign PDF] -> cascade encrypt (fresh file key) -> wrap key
//! open_as_owner:      unwrap key (master) -> cascade decrypt
//! open_as_requester:  unwrap key (grant, RSA) -> cascade decrypt
//! ```
//!
//! The caller persists `FileRecord` in the metadata store and the ciphertext
//! in the object store; nothing here does I/O.

use std::borrow::Cow;
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use svault_core::{MasterKey, ShareGrant, VaultConfig, VaultError, VaultResult};
use tracing::{debug, info};

use crate::cascade::Cascade;
use crate::envelope::{EnvelopeManager, FileEnvelope};
use crate::keys::{generate_file_key, parse_public_key, unlock_private_key};
use crate::pdf::PdfSigner;
use crate::share::ShareExchange;
use crate::suite::EncryptionMethod;

/// Uploads with this content type are signed when the owner's key is given.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Everything about a sealed file except its ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub envelope: FileEnvelope,
    pub method: EncryptionMethod,
    pub content_type: String,
    /// Whether the plaintext carries an embedded PDF signature
    pub signed: bool,
}

impl FileRecord {
    pub fn file_id(&self) -> i64 {
        self.envelope.file_id
    }
}

/// Output of `Vault::seal_upload`.
#[derive(Debug, Clone)]
pub struct SealedFile {
    pub record: FileRecord,
    pub ciphertext: Vec<u8>,
}

/// The owner's encrypted private key and the passphrase that unlocks it.
#[derive(Clone, Copy)]
pub struct OwnerCredentials<'a> {
    pub private_key_pem: &'a str,
    pub passphrase: &'a SecretString,
}

impl std::fmt::Debug for OwnerCredentials<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OwnerCredentials([REDACTED])")
    }
}

/// Composes the envelope manager, share exchange and PDF signer.
///
/// Holds no mutable state; share one instance across workers.
#[derive(Debug, Clone)]
pub struct Vault {
    envelopes: EnvelopeManager,
    shares: ShareExchange,
    pdf: PdfSigner,
}

impl Vault {
    pub fn new(master_key: Arc<MasterKey>, config: &VaultConfig) -> Self {
        let envelopes = EnvelopeManager::new(master_key);
        Self {
            shares: ShareExchange::new(envelopes.clone(), &config.sharing),
            envelopes,
            pdf: PdfSigner::for_key_bits(config.keys.rsa_bits),
        }
    }

    /// Resolve the master key and build the pipeline. Fails with
    /// `Configuration` when the key is absent.
    pub fn from_config(config: &VaultConfig) -> VaultResult<Self> {
        let master_key = config.master_key.load()?;
        info!(
            rsa_bits = config.keys.rsa_bits,
            grant_ttl_secs = config.sharing.grant_ttl_secs,
            "vault initialized"
        );
        Ok(Self::new(Arc::new(master_key), config))
    }

    pub fn envelopes(&self) -> &EnvelopeManager {
        &self.envelopes
    }

    pub fn shares(&self) -> &ShareExchange {
        &self.shares
    }

    pub fn pdf_signer(&self) -> &PdfSigner {
        &self.pdf
    }

    /// Encrypt an upload under a fresh file key and wrap that key.
    ///
    /// PDFs are signed first when `owner` is given, so the signature travels
    /// inside the ciphertext.
    pub fn seal_upload(
        &self,
        file_id: i64,
        data: &[u8],
        content_type: &str,
        method: EncryptionMethod,
        owner: Option<OwnerCredentials<'_>>,
    ) -> VaultResult<SealedFile> {
        let body: Cow<'_, [u8]> = match owner {
            Some(owner) if content_type == PDF_CONTENT_TYPE => {
                let private = unlock_private_key(owner.private_key_pem, owner.passphrase)?;
                Cow::Owned(self.pdf.sign(data, &private)?)
            }
            _ => Cow::Borrowed(data),
        };
        let signed = matches!(body, Cow::Owned(_));

        let file_key = generate_file_key();
        let ciphertext = Cascade::new(method).encrypt(&body, file_key.as_bytes())?;
        let envelope = self.envelopes.wrap(file_id, &file_key)?;

        info!(
            file_id,
            %method,
            signed,
            ciphertext_len = ciphertext.len(),
            "sealed upload"
        );
        Ok(SealedFile {
            record: FileRecord {
                envelope,
                method,
                content_type: content_type.to_string(),
                signed,
            },
            ciphertext,
        })
    }

    /// Decrypt a file as its owner, through the master key.
    pub fn open_as_owner(&self, record: &FileRecord, ciphertext: &[u8]) -> VaultResult<Vec<u8>> {
        let file_key = self.envelopes.unwrap(&record.envelope)?;
        let plaintext = Cascade::new(record.method).decrypt(ciphertext, file_key.as_bytes())?;
        debug!(file_id = record.file_id(), "opened as owner");
        Ok(plaintext)
    }

    /// Decrypt a shared file as the requester of an APPROVED grant.
    pub fn open_as_requester(
        &self,
        grant: &ShareGrant,
        record: &FileRecord,
        ciphertext: &[u8],
        requester_private_key_pem: &str,
        passphrase: &SecretString,
    ) -> VaultResult<Vec<u8>> {
        if grant.file_id != record.file_id() {
            return Err(VaultError::Forbidden(format!(
                "share grant {} does not cover file {}",
                grant.id,
                record.file_id()
            )));
        }
        let plaintext = self.shares.retrieve_as_requester(
            grant,
            ciphertext,
            record.method,
            requester_private_key_pem,
            passphrase,
        )?;
        debug!(
            file_id = record.file_id(),
            grant_id = grant.id,
            "opened as requester"
        );
        Ok(plaintext)
    }

    /// Check an opened PDF against its owner's public key.
    pub fn verify_pdf(&self, document: &[u8], owner_public_key_pem: &str) -> VaultResult<bool> {
        let public = parse_public_key(owner_public_key_pem)?;
        PdfSigner::verify(document, &public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::test_keys::{self, PASSPHRASE};
    use crate::suite::CipherSuite;
    use crate::KEY_SIZE;

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";

    fn vault() -> Vault {
        let mut config = VaultConfig::default();
        config.keys.rsa_bits = 2048;
        Vault::new(Arc::new(MasterKey::from_bytes([5u8; KEY_SIZE])), &config)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let vault = vault();
        let sealed = vault
            .seal_upload(1, b"quarterly report", "text/plain", EncryptionMethod::Cascade, None)
            .unwrap();

        assert!(!sealed.record.signed);
        assert_eq!(sealed.record.file_id(), 1);
        assert_ne!(sealed.ciphertext, b"quarterly report");

        let opened = vault.open_as_owner(&sealed.record, &sealed.ciphertext).unwrap();
        assert_eq!(opened, b"quarterly report");
    }

    #[test]
    fn test_seal_single_suite() {
        let vault = vault();
        let method = EncryptionMethod::Single(CipherSuite::WeakBlock);
        let sealed = vault
            .seal_upload(2, b"legacy", "text/plain", method, None)
            .unwrap();
        assert_eq!(sealed.record.method, method);
        assert_eq!(
            vault.open_as_owner(&sealed.record, &sealed.ciphertext).unwrap(),
            b"legacy"
        );
    }

    #[test]
    fn test_pdf_signed_on_upload() {
        let vault = vault();
        let pair = test_keys::key_pair();
        let passphrase = SecretString::from(PASSPHRASE);
        let owner = OwnerCredentials {
            private_key_pem: &pair.private_key,
            passphrase: &passphrase,
        };

        let sealed = vault
            .seal_upload(3, PDF, PDF_CONTENT_TYPE, EncryptionMethod::Cascade, Some(owner))
            .unwrap();
        assert!(sealed.record.signed);

        let opened = vault.open_as_owner(&sealed.record, &sealed.ciphertext).unwrap();
        assert!(opened.len() > PDF.len());
        assert!(vault.verify_pdf(&opened, &pair.public_key).unwrap());
    }

    #[test]
    fn test_pdf_wrong_passphrase_aborts_upload() {
        let vault = vault();
        let pair = test_keys::key_pair();
        let wrong = SecretString::from("wrong");
        let owner = OwnerCredentials {
            private_key_pem: &pair.private_key,
            passphrase: &wrong,
        };

        let err = vault
            .seal_upload(4, PDF, PDF_CONTENT_TYPE, EncryptionMethod::Cascade, Some(owner))
            .unwrap_err();
        assert!(matches!(err, VaultError::BadPassphrase), "{err}");
    }

    #[test]
    fn test_non_pdf_not_signed() {
        let vault = vault();
        let pair = test_keys::key_pair();
        let passphrase = SecretString::from(PASSPHRASE);
        let owner = OwnerCredentials {
            private_key_pem: &pair.private_key,
            passphrase: &passphrase,
        };

        let sealed = vault
            .seal_upload(5, PDF, "application/octet-stream", EncryptionMethod::Cascade, Some(owner))
            .unwrap();
        assert!(!sealed.record.signed);
        assert_eq!(
            vault.open_as_owner(&sealed.record, &sealed.ciphertext).unwrap(),
            PDF
        );
    }

    #[test]
    fn test_open_with_other_master_key_fails() {
        let sealed = vault()
            .seal_upload(6, b"secret", "text/plain", EncryptionMethod::Cascade, None)
            .unwrap();

        let other = Vault::new(
            Arc::new(MasterKey::from_bytes([6u8; KEY_SIZE])),
            &VaultConfig::default(),
        );
        assert!(other.open_as_owner(&sealed.record, &sealed.ciphertext).is_err());
    }

    #[test]
    fn test_grant_for_other_file_forbidden() {
        let vault = vault();
        let pair = test_keys::key_pair();
        let sealed = vault
            .seal_upload(7, b"body", "text/plain", EncryptionMethod::Cascade, None)
            .unwrap();

        let grant = vault.shares().request_access(1, 10, 20, 8).unwrap();
        let err = vault
            .open_as_requester(
                &grant,
                &sealed.record,
                &sealed.ciphertext,
                &pair.private_key,
                &SecretString::from(PASSPHRASE),
            )
            .unwrap_err();
        assert!(matches!(err, VaultError::Forbidden(_)));
    }

    #[test]
    fn test_record_serializes() {
        let sealed = vault()
            .seal_upload(9, b"x", "text/plain", EncryptionMethod::Cascade, None)
            .unwrap();
        let json = serde_json::to_string(&sealed.record).unwrap();
        assert!(json.contains("\"method\":\"cascade\""));
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sealed.record);
    }
}

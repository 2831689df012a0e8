//! svault-crypto: the SecureVault security core
//!
//! Architecture: cascade-encrypt file bodies, envelope-wrap the file key
//!
//! Pipeline: [sign PDF] → cascade encrypt (fresh file key) → wrap key under master key → store
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, server configuration, read once at startup)
//!   └── File Key (per-file, 256-bit random, AES-256-CBC wrapped by master key)
//!       ├── Cascade layer keys (scrypt(file_key, per-layer salt))
//!       └── Share grants (RSA-OAEP-SHA256 wrapped for each approved requester)
//! User Key Pair (RSA ≥ 4096-bit)
//!   ├── Public key (SPKI PEM)
//!   └── Private key (PKCS#8 PEM, PBES2-encrypted under the user's passphrase)
//! ```

pub mod cascade;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod pdf;
pub mod share;
pub mod suite;
pub mod vault;

pub use cascade::Cascade;
pub use envelope::{unwrap_key, wrap_key, EnvelopeManager, FileEnvelope};
pub use kdf::{derive_key, DerivedKey, KdfParams};
pub use keys::{
    generate_file_key, generate_key_pair, parse_public_key, public_key_fingerprint,
    unlock_private_key, FileKey, KeyPair, KeyPairParams,
};
pub use pdf::{PdfSigner, SignaturePlacement};
pub use share::{unwrap_from_recipient, wrap_for_recipient, ShareExchange};
pub use suite::{CipherSuite, EncryptionMethod, CASCADE_ORDER};
pub use vault::{FileRecord, OwnerCredentials, SealedFile, Vault, PDF_CONTENT_TYPE};

/// Size of a file key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the per-layer scrypt salt
pub const SALT_SIZE: usize = 16;

//! Key derivation: scrypt secret + salt → per-layer symmetric key

use scrypt::{scrypt, Params};
use svault_core::{VaultError, VaultResult};
use zeroize::Zeroizing;

/// Output length handed to scrypt when the caller asks for less.
const MIN_DERIVE_LEN: usize = 32;

/// scrypt cost parameters.
///
/// The defaults are part of the stored-blob format: changing them makes
/// existing cascade blobs undecryptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N (default: 14, N = 16384)
    pub log_n: u8,
    /// Block size (default: 8)
    pub r: u32,
    /// Parallelism (default: 1)
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }
}

/// A symmetric key derived for exactly one cipher operation. Zeroized on drop.
pub struct DerivedKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive `output_len` bytes from `secret` and `salt` with scrypt.
///
/// Lengths below 32 bytes are derived at 32 and truncated, so an 8-byte DES
/// key is the prefix of the 32-byte derivation for the same inputs.
pub fn derive_key(
    secret: &[u8],
    salt: &[u8],
    output_len: usize,
    params: &KdfParams,
) -> VaultResult<DerivedKey> {
    if secret.is_empty() {
        return Err(VaultError::InvalidCredentials(
            "key derivation secret is empty".into(),
        ));
    }
    if output_len == 0 {
        return Err(VaultError::Crypto("requested a zero-length key".into()));
    }

    let scrypt_params = Params::new(params.log_n, params.r, params.p, MIN_DERIVE_LEN)
        .map_err(|e| VaultError::Crypto(format!("invalid scrypt params: {e}")))?;

    let mut buf = Zeroizing::new(vec![0u8; output_len.max(MIN_DERIVE_LEN)]);
    scrypt(secret, salt, &scrypt_params, &mut buf)
        .map_err(|e| VaultError::Crypto(format!("scrypt KDF failed: {e}")))?;
    buf.truncate(output_len);

    Ok(DerivedKey { bytes: buf })
}

//! The fixed set of symmetric cipher suites and the per-upload method choice
//!
//! | Suite          | Algorithm      | Key | IV | Integrity                 |
//! |----------------|----------------|-----|----|---------------------------|
//! | `StrongBlock`  | AES-256-CBC    | 32  | 16 | HMAC-SHA256 over IV ‖ ct  |
//! | `StreamLegacy` | RC4            | 16  | 0  | none                      |
//! | `WeakBlock`    | DES-CBC        | 8   | 8  | none                      |
//!
//! Block suites use PKCS#7 padding.

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rc4::{consts::U16, KeyInit, Rc4, StreamCipher};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use svault_core::{VaultError, VaultResult};
use zeroize::Zeroizing;

use crate::SALT_SIZE;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type DesCbcEnc = cbc::Encryptor<des::Des>;
type DesCbcDec = cbc::Decryptor<des::Des>;
type HmacSha256 = Hmac<Sha256>;

/// Size of the HMAC-SHA256 tag appended by `StrongBlock`
pub const MAC_SIZE: usize = 32;

const MAC_KEY_INFO: &[u8] = b"svault-strong-block-mac";

/// One symmetric algorithm with its mandated key and IV sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherSuite {
    #[serde(rename = "aes-256-cbc")]
    StrongBlock,
    #[serde(rename = "rc4")]
    StreamLegacy,
    #[serde(rename = "des-cbc")]
    WeakBlock,
}

/// Layer order of the full cascade. Stored blobs depend on it.
pub const CASCADE_ORDER: [CipherSuite; 3] = [
    CipherSuite::StrongBlock,
    CipherSuite::StreamLegacy,
    CipherSuite::WeakBlock,
];

impl CipherSuite {
    pub fn algorithm(self) -> &'static str {
        match self {
            CipherSuite::StrongBlock => "aes-256-cbc",
            CipherSuite::StreamLegacy => "rc4",
            CipherSuite::WeakBlock => "des-cbc",
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            CipherSuite::StrongBlock => 32,
            CipherSuite::StreamLegacy => 16,
            CipherSuite::WeakBlock => 8,
        }
    }

    pub fn iv_len(self) -> usize {
        match self {
            CipherSuite::StrongBlock => 16,
            CipherSuite::StreamLegacy => 0,
            CipherSuite::WeakBlock => 8,
        }
    }

    /// Bytes this suite contributes to a cascade blob header (salt ‖ IV).
    pub fn metadata_len(self) -> usize {
        SALT_SIZE + self.iv_len()
    }

    pub(crate) fn encrypt(self, key: &[u8], iv: &[u8], data: &[u8]) -> VaultResult<Vec<u8>> {
        match self {
            CipherSuite::StrongBlock => {
                let mut out = aes256_cbc_encrypt(key, iv, data)?;
                let tag = strong_block_tag(key, iv, &out)?;
                out.extend_from_slice(&tag);
                Ok(out)
            }
            CipherSuite::StreamLegacy => rc4_apply(key, data),
            CipherSuite::WeakBlock => {
                let enc = DesCbcEnc::new_from_slices(key, iv)
                    .map_err(|e| VaultError::Crypto(format!("DES-CBC init: {e}")))?;
                Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(data))
            }
        }
    }

    pub(crate) fn decrypt(self, key: &[u8], iv: &[u8], data: &[u8]) -> VaultResult<Vec<u8>> {
        let failed = || VaultError::DecryptionFailed {
            suite: self.algorithm(),
        };

        match self {
            CipherSuite::StrongBlock => {
                if data.len() < MAC_SIZE {
                    return Err(failed());
                }
                let (ciphertext, tag) = data.split_at(data.len() - MAC_SIZE);

                let mut mac = strong_block_mac(key)?;
                mac.update(iv);
                mac.update(ciphertext);
                mac.verify_slice(tag).map_err(|_| failed())?;

                aes256_cbc_decrypt(key, iv, ciphertext).map_err(|_| failed())
            }
            CipherSuite::StreamLegacy => rc4_apply(key, data),
            CipherSuite::WeakBlock => {
                let dec = DesCbcDec::new_from_slices(key, iv).map_err(|_| failed())?;
                dec.decrypt_padded_vec_mut::<Pkcs7>(data)
                    .map_err(|_| failed())
            }
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.algorithm())
    }
}

impl FromStr for CipherSuite {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CASCADE_ORDER
            .into_iter()
            .find(|suite| suite.algorithm() == s)
            .ok_or_else(|| VaultError::UnsupportedSuite(s.to_string()))
    }
}

/// How an uploaded file body is encrypted. Persisted with the file record
/// as `cascade` or a single suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EncryptionMethod {
    /// Every suite, in `CASCADE_ORDER`
    #[default]
    Cascade,
    /// One suite on its own
    Single(CipherSuite),
}

impl EncryptionMethod {
    /// The layers applied, innermost first.
    pub fn layers(self) -> &'static [CipherSuite] {
        match self {
            EncryptionMethod::Cascade => &CASCADE_ORDER,
            EncryptionMethod::Single(CipherSuite::StrongBlock) => &[CipherSuite::StrongBlock],
            EncryptionMethod::Single(CipherSuite::StreamLegacy) => &[CipherSuite::StreamLegacy],
            EncryptionMethod::Single(CipherSuite::WeakBlock) => &[CipherSuite::WeakBlock],
        }
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionMethod::Cascade => f.write_str("cascade"),
            EncryptionMethod::Single(suite) => suite.fmt(f),
        }
    }
}

impl FromStr for EncryptionMethod {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "cascade" {
            return Ok(EncryptionMethod::Cascade);
        }
        s.parse().map(EncryptionMethod::Single)
    }
}

impl TryFrom<String> for EncryptionMethod {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EncryptionMethod> for String {
    fn from(method: EncryptionMethod) -> Self {
        method.to_string()
    }
}

/// Plain AES-256-CBC with PKCS#7 padding. Also used for envelope wrapping.
pub(crate) fn aes256_cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8]) -> VaultResult<Vec<u8>> {
    let enc = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| VaultError::Crypto(format!("AES-256-CBC init: {e}")))?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(data))
}

pub(crate) fn aes256_cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> VaultResult<Vec<u8>> {
    let failed = || VaultError::DecryptionFailed {
        suite: CipherSuite::StrongBlock.algorithm(),
    };
    let dec = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| failed())?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| failed())
}

fn rc4_apply(key: &[u8], data: &[u8]) -> VaultResult<Vec<u8>> {
    let mut cipher = Rc4::<U16>::new_from_slice(key)
        .map_err(|e| VaultError::Crypto(format!("RC4 init: {e}")))?;
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    Ok(out)
}

/// HMAC key for the strong layer, expanded from its cipher key.
fn strong_block_mac(key: &[u8]) -> VaultResult<HmacSha256> {
    let hkdf = Hkdf::<Sha256>::new(None, key);
    let mut mac_key = Zeroizing::new([0u8; 32]);
    hkdf.expand(MAC_KEY_INFO, &mut mac_key[..])
        .map_err(|e| VaultError::Crypto(format!("HKDF expand failed: {e}")))?;
    <HmacSha256 as Mac>::new_from_slice(&mac_key[..])
        .map_err(|e| VaultError::Crypto(format!("HMAC init: {e}")))
}

fn strong_block_tag(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> VaultResult<[u8; MAC_SIZE]> {
    let mut mac = strong_block_mac(key)?;
    mac.update(iv);
    mac.update(ciphertext);
    let mut tag = [0u8; MAC_SIZE];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

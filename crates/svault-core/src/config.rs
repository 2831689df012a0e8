use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::error::{VaultError, VaultResult};

/// Size of the server master key in bytes (256-bit)
pub const MASTER_KEY_SIZE: usize = 32;

/// Smallest RSA modulus accepted for user key pairs
pub const MIN_RSA_BITS: usize = 4096;

/// Top-level configuration (loaded from svault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub logging: LoggingConfig,
    pub keys: KeysConfig,
    pub sharing: SharingConfig,
    pub master_key: MasterKeyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// User key-pair parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// RSA modulus size in bits (default: 4096, minimum 4096)
    pub rsa_bits: usize,
    /// PBKDF2-HMAC-SHA256 rounds protecting the private key PEM
    pub pbkdf2_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    /// Lifetime of a share request in seconds (default: 7 days)
    pub grant_ttl_secs: u64,
}

/// Where the hex-encoded master key comes from. The key itself never
/// appears in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterKeyConfig {
    /// Environment variable holding the hex key (default: SVAULT_MASTER_KEY)
    pub env: String,
    /// File holding the hex key, consulted when the variable is unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            rsa_bits: MIN_RSA_BITS,
            pbkdf2_rounds: 100_000,
        }
    }
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            grant_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl Default for MasterKeyConfig {
    fn default() -> Self {
        Self {
            env: "SVAULT_MASTER_KEY".into(),
            file: None,
        }
    }
}

impl VaultConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> VaultResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| VaultError::Configuration(format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    ///
    /// The fallback is silent; the binary reports it once logging is up.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            VaultError::Configuration(format!("reading config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.keys.rsa_bits < MIN_RSA_BITS {
            return Err(VaultError::Configuration(format!(
                "keys.rsa_bits = {} is below the minimum of {MIN_RSA_BITS}",
                self.keys.rsa_bits
            )));
        }
        if self.keys.pbkdf2_rounds == 0 {
            return Err(VaultError::Configuration(
                "keys.pbkdf2_rounds must be non-zero".into(),
            ));
        }
        if self.sharing.grant_ttl_secs == 0 {
            return Err(VaultError::Configuration(
                "sharing.grant_ttl_secs must be non-zero".into(),
            ));
        }
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(VaultError::Configuration(format!(
                "logging.format must be \"text\" or \"json\", got {other:?}"
            ))),
        }
    }
}

impl MasterKeyConfig {
    /// Resolve the master key: environment variable first, then file.
    ///
    /// Absence is a deployment error, reported as `Configuration`.
    pub fn load(&self) -> VaultResult<MasterKey> {
        if let Ok(value) = std::env::var(&self.env) {
            let secret = SecretString::from(value);
            return MasterKey::from_hex(secret.expose_secret());
        }

        if let Some(path) = &self.file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                VaultError::Configuration(format!(
                    "reading master key file {}: {e}",
                    path.display()
                ))
            })?;
            let secret = SecretString::from(content);
            return MasterKey::from_hex(secret.expose_secret());
        }

        Err(VaultError::Configuration(format!(
            "master key not configured (set {} or master_key.file)",
            self.env
        )))
    }
}

/// The server-held 256-bit key that wraps every per-file key.
///
/// Loaded once at startup and only ever read afterwards. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; MASTER_KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Decode a 64-digit hex string (surrounding whitespace ignored).
    pub fn from_hex(hex_key: &str) -> VaultResult<Self> {
        let mut decoded = hex::decode(hex_key.trim())
            .map_err(|_| VaultError::Configuration("master key is not valid hex".into()))?;

        if decoded.len() != MASTER_KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(VaultError::Configuration(format!(
                "master key must be {MASTER_KEY_SIZE} bytes, got {len}"
            )));
        }

        let mut bytes = [0u8; MASTER_KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

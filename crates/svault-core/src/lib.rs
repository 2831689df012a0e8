//! svault-core: types shared by the SecureVault crates
//!
//! Nothing in here touches key material beyond loading the master key from
//! its configured source; the cryptography lives in `svault-crypto`.

pub mod config;
pub mod error;
pub mod types;

pub use config::{MasterKey, VaultConfig, MASTER_KEY_SIZE};
pub use error::{VaultError, VaultResult};
pub use types::{unix_now, ShareGrant, ShareStatus};

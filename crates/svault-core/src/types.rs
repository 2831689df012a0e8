use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{VaultError, VaultResult};

/// Lifecycle state of a share request.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareStatus {
    Pending,
    Approved,
    Rejected,
}

impl ShareStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ShareStatus::Pending)
    }
}

impl fmt::Display for ShareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShareStatus::Pending => "PENDING",
            ShareStatus::Approved => "APPROVED",
            ShareStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// A request by one user to read another user's file.
///
/// Persisted by the metadata store. The only fields that change after
/// creation are `status` and, on approval, the wrapped key and the public key
/// it was wrapped for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub id: i64,
    pub owner_id: i64,
    pub requester_id: i64,
    pub file_id: i64,
    pub status: ShareStatus,
    /// RSA-OAEP wrapped file key (base64), set on approval
    #[serde(default)]
    pub encrypted_key_for_requester: Option<String>,
    /// SPKI PEM of the public key the file key was wrapped for
    #[serde(default)]
    pub requester_public_key_used: Option<String>,
    /// SHA-256 of the SPKI DER (hex), for key-rotation audits
    #[serde(default)]
    pub requester_key_fingerprint: Option<String>,
    /// Unix timestamp of the request
    pub created_at: u64,
    /// Unix timestamp after which the grant can no longer be approved or used
    pub expires_at: u64,
}

impl ShareGrant {
    /// Open a new PENDING request. Owners cannot request their own files.
    pub fn request(
        id: i64,
        owner_id: i64,
        requester_id: i64,
        file_id: i64,
        ttl_secs: u64,
        now: u64,
    ) -> VaultResult<Self> {
        if owner_id == requester_id {
            return Err(VaultError::InvalidRequest(
                "cannot request access to your own file".into(),
            ));
        }

        Ok(Self {
            id,
            owner_id,
            requester_id,
            file_id,
            status: ShareStatus::Pending,
            encrypted_key_for_requester: None,
            requester_public_key_used: None,
            requester_key_fingerprint: None,
            created_at: now,
            expires_at: now.saturating_add(ttl_secs),
        })
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Fail with `InvalidState` unless the grant is still PENDING.
    pub fn ensure_pending(&self, action: &'static str) -> VaultResult<()> {
        if self.status.is_terminal() {
            tracing::warn!(
                grant_id = self.id,
                status = %self.status,
                action,
                "rejected transition on terminal share grant"
            );
            return Err(VaultError::InvalidState {
                status: self.status,
                action,
            });
        }
        Ok(())
    }

    /// PENDING -> REJECTED.
    pub fn reject(&mut self) -> VaultResult<()> {
        self.ensure_pending("reject")?;
        self.status = ShareStatus::Rejected;
        tracing::debug!(grant_id = self.id, "share grant rejected");
        Ok(())
    }

    /// PENDING -> APPROVED, recording the wrapped key.
    ///
    /// Only the key exchange calls this, after it has wrapped the file key for
    /// `public_key_pem`.
    pub fn record_approval(
        &mut self,
        encrypted_key_b64: String,
        public_key_pem: String,
        fingerprint: String,
    ) -> VaultResult<()> {
        self.ensure_pending("approve")?;
        self.encrypted_key_for_requester = Some(encrypted_key_b64);
        self.requester_public_key_used = Some(public_key_pem);
        self.requester_key_fingerprint = Some(fingerprint);
        self.status = ShareStatus::Approved;
        Ok(())
    }

    /// Fail with `Forbidden` unless the grant is APPROVED and unexpired.
    pub fn ensure_retrievable(&self, now: u64) -> VaultResult<()> {
        if self.status != ShareStatus::Approved {
            return Err(VaultError::Forbidden(format!(
                "share grant {} is {}",
                self.id, self.status
            )));
        }
        if self.is_expired(now) {
            return Err(VaultError::Forbidden(format!(
                "share grant {} has expired",
                self.id
            )));
        }
        Ok(())
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

mod account;
mod auth;
mod auth_request;
mod authenticator;
mod invite;
mod key_store;
mod org;
mod session;
mod vault;

pub use account::Account;
pub use auth::{
    AccountStatus, AuthRecord, KeyStoreRef, OrgInviteRef, PendingHandshake, TrustedDevice,
};
pub use auth_request::{AuthRequest, AuthRequestStatus};
pub use authenticator::{AuthPurpose, AuthType, Authenticator, AuthenticatorInfo, AuthenticatorStatus};
pub use invite::{Invite, InviteSender, Invitee};
pub use key_store::KeyStoreEntry;
pub use org::{Group, Org, OrgInfo, OrgMember, OrgRole, VaultAssignment, VaultEntry};
pub use session::{Session, SessionInfo};
pub use vault::Vault;

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque version stamp for optimistic concurrency. Regenerated on every
/// mutation; a write is accepted only if the caller's observed revision
/// matches the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Replace this revision with a fresh one. Called on every accepted write.
    pub fn bump(&mut self) {
        *self = Self::new();
    }

    /// Reject a write based on a stale observation. Mismatch always fails,
    /// even if the proposed content is identical to the stored content.
    pub fn ensure_current(&self, observed: &Revision) -> Result<(), ServerError> {
        if self != observed {
            return Err(ServerError::OutdatedRevision);
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-reported device identity, attached to sessions and trust decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

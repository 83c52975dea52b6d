//! Entitlement gate consulted before quota-sensitive mutations.
//!
//! The provisioning engine itself is external; the core fetches a snapshot
//! for the requesting identity and applies two distinct rejections so
//! clients can render different guidance: status problems
//! (ProvisioningNotAllowed) and numeric quota exhaustion
//! (ProvisioningQuotaExceeded). A quota of -1 means unlimited.

use crate::error::ServerError;
use crate::models::AuthRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStatus {
    Active,
    /// Reads allowed, all writes blocked.
    Frozen,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountQuota {
    pub orgs: i64,
}

impl Default for AccountQuota {
    fn default() -> Self {
        Self { orgs: -1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgQuota {
    pub members: i64,
    pub groups: i64,
    pub vaults: i64,
}

impl Default for OrgQuota {
    fn default() -> Self {
        Self {
            members: -1,
            groups: -1,
            vaults: -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultQuota {
    /// Attachment storage, in bytes.
    pub storage: i64,
}

impl Default for VaultQuota {
    fn default() -> Self {
        Self { storage: -1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProvisioning {
    pub status: ProvisioningStatus,
    pub quota: AccountQuota,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgProvisioning {
    pub org_id: Uuid,
    pub status: ProvisioningStatus,
    pub quota: OrgQuota,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultProvisioning {
    pub vault_id: Uuid,
    pub quota: VaultQuota,
}

/// Entitlement snapshot for one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provisioning {
    pub account: AccountProvisioning,
    pub orgs: Vec<OrgProvisioning>,
    pub vaults: Vec<VaultProvisioning>,
}

impl Provisioning {
    pub fn org(&self, org_id: &Uuid) -> Option<&OrgProvisioning> {
        self.orgs.iter().find(|o| o.org_id == *org_id)
    }

    pub fn vault(&self, vault_id: &Uuid) -> Option<&VaultProvisioning> {
        self.vaults.iter().find(|v| v.vault_id == *vault_id)
    }

    /// Status governing writes to a vault: the owning org's status when the
    /// vault is org-linked, the account status otherwise.
    pub fn status_for_org(&self, org_id: &Uuid) -> ProvisioningStatus {
        self.org(org_id)
            .map(|o| o.status)
            .unwrap_or(self.account.status)
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn get_provisioning(&self, auth: &AuthRecord) -> Result<Provisioning, ServerError>;

    /// Notification hook so the engine can release entitlements.
    async fn account_deleted(&self, auth: &AuthRecord) -> Result<(), ServerError>;
}

/// Provisioner granting active status and unlimited quotas to everyone.
pub struct UnrestrictedProvisioner;

#[async_trait]
impl Provisioner for UnrestrictedProvisioner {
    async fn get_provisioning(&self, _auth: &AuthRecord) -> Result<Provisioning, ServerError> {
        Ok(Provisioning {
            account: AccountProvisioning {
                status: ProvisioningStatus::Active,
                quota: AccountQuota::default(),
            },
            orgs: Vec::new(),
            vaults: Vec::new(),
        })
    }

    async fn account_deleted(&self, _auth: &AuthRecord) -> Result<(), ServerError> {
        Ok(())
    }
}

/// Reject any mutation under a non-active status.
pub fn ensure_active(status: ProvisioningStatus) -> Result<(), ServerError> {
    match status {
        ProvisioningStatus::Active => Ok(()),
        ProvisioningStatus::Frozen | ProvisioningStatus::Suspended => {
            Err(ServerError::ProvisioningNotAllowed)
        }
    }
}

/// Reject when adding `adding` items to `current` would exceed `quota`.
/// A negative quota is unlimited.
pub fn check_quota(quota: i64, current: usize, adding: usize) -> Result<(), ServerError> {
    if quota >= 0 && (current + adding) as i64 > quota {
        return Err(ServerError::ProvisioningQuotaExceeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_boundaries() {
        assert!(check_quota(-1, usize::MAX / 2, 10).is_ok());
        assert!(check_quota(3, 2, 1).is_ok());
        assert!(check_quota(3, 3, 1).is_err());
        assert!(check_quota(0, 0, 1).is_err());
    }

    #[test]
    fn frozen_blocks_writes() {
        assert!(ensure_active(ProvisioningStatus::Active).is_ok());
        assert!(matches!(
            ensure_active(ProvisioningStatus::Frozen),
            Err(ServerError::ProvisioningNotAllowed)
        ));
    }
}

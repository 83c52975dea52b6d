//! Organization model - shared membership, groups, and vault assignments.

use super::{Invite, Revision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role hierarchy: Owner > Admin > Member. Suspended revokes both read and
/// write until an owner restores the member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
    Suspended,
}

/// A vault a member or group has been given access to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultAssignment {
    pub vault_id: Uuid,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgMember {
    pub account_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: OrgRole,

    /// Member public key, recorded when the invite is accepted.
    pub public_key: Option<String>,

    pub vaults: Vec<VaultAssignment>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub members: Vec<Uuid>,
    pub vaults: Vec<VaultAssignment>,
}

/// Reference to an org vault, kept on the org itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: Uuid,
    pub name: String,
}

/// Denormalized org identity, cached on member accounts and org vaults and
/// refreshed whenever the org changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgInfo {
    pub id: Uuid,
    pub name: String,
    pub revision: Revision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    pub id: Uuid,
    pub name: String,
    pub owner: Uuid,
    pub revision: Revision,

    /// Org public key (opaque, client-generated).
    pub public_key: String,

    /// Client-encrypted accessor/signing key material. Never interpreted
    /// server-side.
    pub encrypted_keys: String,

    pub members: Vec<OrgMember>,
    pub groups: Vec<Group>,
    pub vaults: Vec<VaultEntry>,
    pub invites: Vec<Invite>,

    /// Monotonically non-decreasing watermark of the oldest acceptable
    /// member-entry update time.
    pub min_member_updated: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Org {
    pub fn new(owner: &super::Account, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            owner: owner.id,
            revision: Revision::new(),
            public_key: String::new(),
            encrypted_keys: String::new(),
            members: vec![OrgMember {
                account_id: owner.id,
                email: owner.email.clone(),
                name: owner.name.clone(),
                role: OrgRole::Owner,
                public_key: Some(owner.public_key.clone()),
                vaults: Vec::new(),
                updated_at: now,
            }],
            groups: Vec::new(),
            vaults: Vec::new(),
            invites: Vec::new(),
            min_member_updated: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn member(&self, account_id: &Uuid) -> Option<&OrgMember> {
        self.members.iter().find(|m| m.account_id == *account_id)
    }

    pub fn role_of(&self, account_id: &Uuid) -> Option<OrgRole> {
        self.member(account_id).map(|m| m.role)
    }

    pub fn is_owner(&self, account_id: &Uuid) -> bool {
        matches!(self.role_of(account_id), Some(OrgRole::Owner))
    }

    pub fn is_admin(&self, account_id: &Uuid) -> bool {
        matches!(self.role_of(account_id), Some(OrgRole::Owner | OrgRole::Admin))
    }

    /// Whether the account may read this org at all. Suspended members are
    /// treated as outsiders.
    pub fn can_read(&self, account_id: &Uuid) -> bool {
        matches!(
            self.role_of(account_id),
            Some(OrgRole::Owner | OrgRole::Admin | OrgRole::Member)
        )
    }

    /// Vault-level read access: admins see every vault, members see their
    /// direct and group assignments.
    pub fn can_read_vault(&self, account_id: &Uuid, vault_id: &Uuid) -> bool {
        match self.role_of(account_id) {
            Some(OrgRole::Owner | OrgRole::Admin) => true,
            Some(OrgRole::Member) => self
                .assignments_for(account_id)
                .any(|a| a.vault_id == *vault_id),
            _ => false,
        }
    }

    /// Vault-level write access: like read, but read-only assignments do not
    /// grant it.
    pub fn can_write_vault(&self, account_id: &Uuid, vault_id: &Uuid) -> bool {
        match self.role_of(account_id) {
            Some(OrgRole::Owner | OrgRole::Admin) => true,
            Some(OrgRole::Member) => self
                .assignments_for(account_id)
                .any(|a| a.vault_id == *vault_id && !a.read_only),
            _ => false,
        }
    }

    fn assignments_for<'a>(
        &'a self,
        account_id: &'a Uuid,
    ) -> impl Iterator<Item = &'a VaultAssignment> {
        let direct = self
            .member(account_id)
            .into_iter()
            .flat_map(|m| m.vaults.iter());
        let via_groups = self
            .groups
            .iter()
            .filter(move |g| g.members.contains(account_id))
            .flat_map(|g| g.vaults.iter());
        direct.chain(via_groups)
    }

    pub fn invite(&self, invite_id: &Uuid) -> Option<&Invite> {
        self.invites.iter().find(|i| i.id == *invite_id)
    }

    pub fn info(&self) -> OrgInfo {
        OrgInfo {
            id: self.id,
            name: self.name.clone(),
            revision: self.revision.clone(),
        }
    }
}

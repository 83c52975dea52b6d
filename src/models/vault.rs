//! Vault model - an encrypted container of shared or private data.

use super::{OrgInfo, Revision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Private vaults are implicitly created and destroyed with their account;
/// org vaults are explicit child entities of an org. The payload is
/// client-encrypted and opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    pub id: Uuid,
    pub name: String,

    /// Cached org identity for org vaults, refreshed when the org changes.
    pub org: Option<OrgInfo>,

    /// Owning account for private vaults.
    pub owner: Option<Uuid>,

    pub revision: Revision,
    pub encrypted_data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vault {
    pub fn private(owner: Uuid, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            org: None,
            owner: Some(owner),
            revision: Revision::new(),
            encrypted_data: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_org(org: OrgInfo, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            org: Some(org),
            owner: None,
            revision: Revision::new(),
            encrypted_data: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

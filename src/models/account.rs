//! Account model - public profile of a registered user.

use super::{OrgInfo, Revision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public account record. Credential material lives on the per-email
/// [`AuthRecord`](super::AuthRecord), not here; the profile blob is encrypted
/// client-side and opaque to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,

    /// Account public key (opaque, client-generated).
    pub public_key: String,

    /// Key-derivation parameters the client needs to unlock its data.
    pub key_params: serde_json::Value,

    /// Client-encrypted profile blob. Never interpreted server-side.
    pub encrypted_profile: String,

    pub revision: Revision,

    /// Cached membership entries, refreshed whenever the org changes.
    pub orgs: Vec<OrgInfo>,

    /// The account's private vault, created and destroyed with the account.
    pub main_vault: Uuid,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        email: String,
        name: String,
        public_key: String,
        key_params: serde_json::Value,
        encrypted_profile: String,
        main_vault: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            public_key,
            key_params,
            encrypted_profile,
            revision: Revision::new(),
            orgs: Vec::new(),
            main_vault,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh or insert the cached entry for an org this account belongs to.
    pub fn upsert_org_info(&mut self, info: OrgInfo) {
        match self.orgs.iter_mut().find(|o| o.id == info.id) {
            Some(entry) => *entry = info,
            None => self.orgs.push(info),
        }
    }

    pub fn remove_org_info(&mut self, org_id: &Uuid) {
        self.orgs.retain(|o| o.id != *org_id);
    }
}

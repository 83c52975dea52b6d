//! Key-store entries - opaque payloads gated by re-proving an authenticator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStoreEntry {
    pub id: Uuid,
    pub account_id: Uuid,

    /// Reading the entry requires a verified challenge against this
    /// authenticator.
    pub authenticator_id: Uuid,

    pub data: String,
    pub created_at: DateTime<Utc>,
}

impl KeyStoreEntry {
    pub fn new(account_id: Uuid, authenticator_id: Uuid, data: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            authenticator_id,
            data,
            created_at: Utc::now(),
        }
    }
}

//! Org membership invites, stored as children of the org.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteSender {
    pub email: String,
    pub name: String,
}

/// Identity the invitee attaches on acceptance; membership is finalized by
/// an admin through a subsequent org update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitee {
    pub account_id: Uuid,
    pub name: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invite {
    pub id: Uuid,
    pub org_id: Uuid,
    pub org_name: String,
    pub email: String,
    pub accepted: bool,
    pub invited_by: Option<InviteSender>,
    pub invitee: Option<Invitee>,

    /// Client-encrypted confirmation material, opaque to the server.
    #[serde(default)]
    pub secret_data: serde_json::Value,

    pub created_at: DateTime<Utc>,
    #[serde(default = "Invite::default_expiry")]
    pub expires: DateTime<Utc>,
}

impl Invite {
    pub fn is_expired(&self) -> bool {
        self.expires < Utc::now()
    }

    /// Default invite lifetime, applied when the inviting client does not
    /// supply an expiry.
    pub fn default_expiry() -> DateTime<Utc> {
        Utc::now() + Duration::hours(72)
    }
}

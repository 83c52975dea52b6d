//! Session model - an authenticated device binding.

use super::DeviceInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side session record. The signing key is needed to verify future
/// signed requests and is persisted here, but it is never part of the
/// client-facing [`SessionInfo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,

    /// Base64 HMAC signing key negotiated during the handshake.
    pub key: String,

    pub device: Option<DeviceInfo>,
    pub last_location: Option<String>,
}

impl Session {
    pub fn new(account_id: Uuid, key: String, device: Option<DeviceInfo>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            created_at: now,
            last_used: now,
            expires: None,
            key,
            device,
            last_location: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expires, Some(expires) if expires < Utc::now())
    }

    /// Client-facing view. The signing key is omitted by type, not stripped
    /// at serialization time.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            account_id: self.account_id,
            created_at: self.created_at,
            last_used: self.last_used,
            expires: self.expires,
            device: self.device.clone(),
        }
    }
}

/// Session as exposed to clients and denormalized onto the auth record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    pub device: Option<DeviceInfo>,
}

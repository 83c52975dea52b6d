//! Per-email authentication record, distinct from the public account
//! profile. Keyed by a hash of the normalized email so the store never
//! indexes plaintext addresses.

use super::{
    AuthPurpose, AuthRequest, AuthRequestStatus, Authenticator, DeviceInfo, SessionInfo,
};
use crate::utils::email_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// The email has been referenced (invite, verification) but no account
    /// exists yet.
    Unregistered,
    Active,
    Suspended,
    Deleted,
}

/// A device previously bound to this record, exempt from re-verification
/// for login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub device: DeviceInfo,
    pub added_at: DateTime<Utc>,
}

/// Server-side state of one in-flight SRP exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingHandshake {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,

    /// Server public challenge, returned to the client.
    pub server_public: String,

    /// Opaque exchange state owned by the SRP primitive.
    pub state: String,
}

/// Reference to a key-store entry owned by this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStoreRef {
    pub id: Uuid,
    pub authenticator_id: Uuid,
}

/// Reference to a pending org invite addressed to this email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgInviteRef {
    pub org_id: Uuid,
    pub invite_id: Uuid,
    pub org_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    /// Hash of the normalized email address.
    pub id: String,
    pub email: String,
    pub status: AccountStatus,
    pub account_id: Option<Uuid>,

    /// SRP password verifier (opaque). The password itself never reaches
    /// the server.
    pub verifier: Option<String>,

    /// Key-derivation parameters matching the verifier.
    pub key_params: serde_json::Value,

    pub authenticators: Vec<Authenticator>,

    /// Preference order over authenticator ids, applied when selecting a
    /// method for a verification request.
    pub mfa_order: Vec<Uuid>,

    /// Denormalized info for the record's active sessions. Signing keys
    /// live only on the session entities.
    pub sessions: Vec<SessionInfo>,

    pub trusted_devices: Vec<TrustedDevice>,
    pub pending_handshakes: Vec<PendingHandshake>,
    pub auth_requests: Vec<AuthRequest>,
    pub key_store_entries: Vec<KeyStoreRef>,
    pub invites: Vec<OrgInviteRef>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthRecord {
    /// Create a fresh, unregistered record. Records are created lazily on
    /// first reference so their existence reveals nothing about whether an
    /// account exists.
    pub fn new(email: &str) -> Self {
        let now = Utc::now();
        Self {
            id: email_id(email),
            email: email.trim().to_lowercase(),
            status: AccountStatus::Unregistered,
            account_id: None,
            verifier: None,
            key_params: serde_json::Value::Null,
            authenticators: Vec::new(),
            mfa_order: Vec::new(),
            sessions: Vec::new(),
            trusted_devices: Vec::new(),
            pending_handshakes: Vec::new(),
            auth_requests: Vec::new(),
            key_store_entries: Vec::new(),
            invites: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_trusted_device(&self, device: &DeviceInfo) -> bool {
        !device.id.is_empty() && self.trusted_devices.iter().any(|t| t.device.id == device.id)
    }

    pub fn trust_device(&mut self, device: DeviceInfo) {
        if !self.is_trusted_device(&device) && !device.id.is_empty() {
            self.trusted_devices.push(TrustedDevice {
                device,
                added_at: Utc::now(),
            });
        }
    }

    pub fn authenticator(&self, id: &Uuid) -> Option<&Authenticator> {
        self.authenticators.iter().find(|a| a.id == *id)
    }

    pub fn authenticator_mut(&mut self, id: &Uuid) -> Option<&mut Authenticator> {
        self.authenticators.iter_mut().find(|a| a.id == *id)
    }

    /// Position in the stored preference order; unlisted authenticators sort
    /// last, in registration order.
    pub fn preference_index(&self, id: &Uuid) -> usize {
        self.mfa_order
            .iter()
            .position(|o| o == id)
            .unwrap_or(self.mfa_order.len())
    }

    pub fn auth_request(&self, id: &Uuid) -> Option<&AuthRequest> {
        self.auth_requests.iter().find(|r| r.id == *id)
    }

    pub fn auth_request_mut(&mut self, id: &Uuid) -> Option<&mut AuthRequest> {
        self.auth_requests.iter_mut().find(|r| r.id == *id)
    }

    /// Redeem a verified token for the given purpose, removing the request.
    /// Tokens are single-use: a second redemption attempt fails.
    pub fn consume_token(&mut self, purpose: AuthPurpose, token: &str) -> bool {
        let index = self.auth_requests.iter().position(|r| {
            r.status == AuthRequestStatus::Verified && r.purpose == purpose && r.token == token
        });
        match index {
            Some(i) => {
                self.auth_requests.remove(i);
                true
            }
            None => false,
        }
    }

    /// Upsert denormalized session info, keyed by session id.
    pub fn upsert_session_info(&mut self, info: SessionInfo) {
        match self.sessions.iter_mut().find(|s| s.id == info.id) {
            Some(entry) => *entry = info,
            None => self.sessions.push(info),
        }
    }

    pub fn remove_session_info(&mut self, session_id: &Uuid) {
        self.sessions.retain(|s| s.id != *session_id);
    }

    /// Drop handshakes older than the given age in milliseconds.
    pub fn prune_handshakes(&mut self, max_age_ms: i64) {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(max_age_ms);
        self.pending_handshakes.retain(|h| h.created_at >= cutoff);
    }

    /// Drop verification requests older than the given age, answered or not.
    /// Anyone can start a request against any address, so without a cutoff
    /// the record grows without bound.
    pub fn prune_auth_requests(&mut self, max_age_ms: i64) {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(max_age_ms);
        self.auth_requests.retain(|r| r.created_at >= cutoff);
    }
}

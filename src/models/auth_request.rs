//! One-time verification challenges.

use super::{AuthPurpose, AuthType};
use crate::utils::generate_token;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthRequestStatus {
    Pending,
    Verified,
}

/// A single-use verification challenge tied to a purpose and an
/// authenticator. Consumed on first successful redemption; there is no
/// terminal failure state - the try counter is left to provider-side
/// lockout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub id: Uuid,
    pub authenticator_id: Uuid,
    pub auth_type: AuthType,
    pub purpose: AuthPurpose,

    /// Token handed out once the request is verified; redeeming it consumes
    /// the request.
    pub token: String,

    /// Failed verification attempts. Incremented and persisted on every
    /// provider rejection so repeated guesses stay observable.
    pub tries: u32,

    pub status: AuthRequestStatus,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,

    /// Provider-specific opaque state (e.g. the hash of an emailed code).
    pub state: serde_json::Value,
}

impl AuthRequest {
    pub fn new(auth_type: AuthType, authenticator_id: Uuid, purpose: AuthPurpose) -> Self {
        Self {
            id: Uuid::new_v4(),
            authenticator_id,
            auth_type,
            purpose,
            token: generate_token(),
            tries: 0,
            status: AuthRequestStatus::Pending,
            created_at: Utc::now(),
            verified_at: None,
            state: serde_json::Value::Null,
        }
    }

    pub fn mark_verified(&mut self) {
        self.status = AuthRequestStatus::Verified;
        self.verified_at = Some(Utc::now());
    }
}

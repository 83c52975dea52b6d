//! Registered multi-factor verification methods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Supported authenticator types. Each type is backed by a pluggable
/// provider registered with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Email,
    Totp,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthType::Email => write!(f, "email"),
            AuthType::Totp => write!(f, "totp"),
        }
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(AuthType::Email),
            "totp" => Ok(AuthType::Totp),
            other => Err(format!("unknown authenticator type: {}", other)),
        }
    }
}

/// What a verification token may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPurpose {
    Login,
    Signup,
    Recover,
    GetLegacyData,
    AccessKeyStore,
    TestAuthenticator,
}

impl AuthPurpose {
    pub fn all() -> Vec<AuthPurpose> {
        vec![
            AuthPurpose::Login,
            AuthPurpose::Signup,
            AuthPurpose::Recover,
            AuthPurpose::GetLegacyData,
            AuthPurpose::AccessKeyStore,
            AuthPurpose::TestAuthenticator,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorStatus {
    /// Registration started but not yet activated.
    Registering,
    Active,
}

/// A registered multi-factor verification method, child of the auth record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authenticator {
    pub id: Uuid,
    pub auth_type: AuthType,
    pub status: AuthenticatorStatus,
    pub purposes: Vec<AuthPurpose>,
    pub description: Option<String>,
    pub last_used: Option<DateTime<Utc>>,

    /// Provider-specific opaque state (e.g. a TOTP secret reference).
    pub state: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl Authenticator {
    pub fn new(auth_type: AuthType, purposes: Vec<AuthPurpose>) -> Self {
        Self {
            id: Uuid::new_v4(),
            auth_type,
            status: AuthenticatorStatus::Registering,
            purposes,
            description: None,
            last_used: None,
            state: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// An always-available authenticator for one of the configured default
    /// types, usable without prior registration.
    pub fn ad_hoc(auth_type: AuthType) -> Self {
        let mut authenticator = Self::new(auth_type, AuthPurpose::all());
        authenticator.status = AuthenticatorStatus::Active;
        authenticator
    }

    pub fn supports(&self, purpose: AuthPurpose) -> bool {
        self.purposes.contains(&purpose)
    }

    pub fn info(&self) -> AuthenticatorInfo {
        AuthenticatorInfo {
            id: self.id,
            auth_type: self.auth_type,
            status: self.status,
            purposes: self.purposes.clone(),
            description: self.description.clone(),
            last_used: self.last_used,
        }
    }
}

/// Authenticator as exposed to clients - without provider state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatorInfo {
    pub id: Uuid,
    pub auth_type: AuthType,
    pub status: AuthenticatorStatus,
    pub purposes: Vec<AuthPurpose>,
    pub description: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

//! Per-request context - the resolved identity a handler runs under.

use crate::error::ServerError;
use crate::models::{Account, AuthRecord, DeviceInfo, Session};

/// Ephemeral per-request bag. Never persisted. Anonymous requests leave the
/// identity fields empty and operations requiring authentication fail when
/// they first touch them.
#[derive(Debug, Default)]
pub struct Context {
    pub session: Option<Session>,
    pub account: Option<Account>,
    pub auth: Option<AuthRecord>,
    pub device: Option<DeviceInfo>,
}

impl Context {
    pub fn require_account(&self) -> Result<&Account, ServerError> {
        self.account.as_ref().ok_or(ServerError::InvalidSession)
    }

    pub fn require_auth(&self) -> Result<(&Account, &AuthRecord), ServerError> {
        match (&self.account, &self.auth) {
            (Some(account), Some(auth)) => Ok((account, auth)),
            _ => Err(ServerError::InvalidSession),
        }
    }

    pub fn require_session(&self) -> Result<&Session, ServerError> {
        self.session.as_ref().ok_or(ServerError::InvalidSession)
    }

    /// Lock scope for this request: the account plus every org it belongs
    /// to, collected up front so all locks are requested in one step.
    pub fn lock_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(account) = &self.account {
            ids.push(account.id.to_string());
            ids.extend(account.orgs.iter().map(|o| o.id.to_string()));
        }
        ids
    }
}

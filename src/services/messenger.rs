//! Outbound message delivery, consumed fire-and-forget.

use crate::error::ServerError;
use crate::models::AuthPurpose;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum Message {
    /// One-time verification code for an auth request.
    VerificationCode {
        purpose: AuthPurpose,
        code: String,
    },

    /// Somebody invited the recipient to an org.
    InviteReceived {
        org_name: String,
        invited_by: String,
        link: String,
    },

    /// An invitee accepted; sent to the inviter so they can finalize
    /// membership.
    InviteAccepted {
        org_name: String,
        invitee: String,
        link: String,
    },

    /// Internal failure report for the operator address.
    ErrorReport {
        operation: String,
        message: String,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::VerificationCode { .. } => "verification_code",
            Message::InviteReceived { .. } => "invite_received",
            Message::InviteAccepted { .. } => "invite_accepted",
            Message::ErrorReport { .. } => "error_report",
        }
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, to: &str, message: &Message) -> Result<(), ServerError>;
}

/// Messenger that records deliveries in the log instead of sending them.
/// Verification codes are sensitive and are never written out.
pub struct LoggingMessenger;

#[async_trait]
impl Messenger for LoggingMessenger {
    async fn send(&self, to: &str, message: &Message) -> Result<(), ServerError> {
        tracing::info!(recipient = %to, kind = %message.kind(), "message sent");
        Ok(())
    }
}

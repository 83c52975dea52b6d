//! Optional bridge to a predecessor system holding pre-migration data.

use crate::error::ServerError;
use async_trait::async_trait;

#[async_trait]
pub trait LegacyBridge: Send + Sync {
    /// Opaque encrypted container for the email, if the legacy system has
    /// one.
    async fn get_store(&self, email: &str) -> Result<Option<serde_json::Value>, ServerError>;

    async fn delete_account(&self, email: &str) -> Result<(), ServerError>;
}

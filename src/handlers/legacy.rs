//! Access to pre-migration data held by a predecessor system, when a
//! bridge is configured.

use crate::error::ServerError;
use crate::models::AuthPurpose;
use crate::services::storage::Entity;
use crate::services::Context;
use crate::Server;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct GetLegacyDataParams {
    pub email: String,

    /// Verified legacy-data token; not needed when the caller's session
    /// already belongs to the address.
    #[serde(default)]
    pub verify: Option<String>,
}

/// Fetch the legacy data container for an email. Callers prove control of
/// the address either through their session or through a verified token.
pub async fn get_legacy_data(
    server: &Server,
    ctx: &mut Context,
    params: GetLegacyDataParams,
) -> Result<Value, ServerError> {
    let bridge = server
        .legacy
        .as_ref()
        .ok_or_else(|| ServerError::NotSupported("no legacy data store connected".to_string()))?;

    let email = params.email.trim().to_lowercase();
    let own_session = ctx
        .account
        .as_ref()
        .is_some_and(|account| account.email == email);

    if !own_session {
        let mut auth = server.fetch_auth_or_new(&email).await?;
        let verified = params
            .verify
            .as_deref()
            .is_some_and(|token| auth.consume_token(AuthPurpose::GetLegacyData, token));
        if !verified {
            return Err(ServerError::AuthenticationRequired);
        }
        auth.updated_at = Utc::now();
        server.storage.save(Entity::Auth(auth)).await?;
    }

    bridge
        .get_store(&email)
        .await?
        .ok_or(ServerError::NotFound)
}

/// Delete the caller's data in the predecessor system.
pub async fn delete_legacy_account(server: &Server, ctx: &mut Context) -> Result<Value, ServerError> {
    let bridge = server
        .legacy
        .as_ref()
        .ok_or_else(|| ServerError::NotSupported("no legacy data store connected".to_string()))?;

    let account = ctx.require_account()?;
    bridge.delete_account(&account.email).await?;

    tracing::info!(account_id = %account.id, "legacy account deleted");
    Ok(Value::Null)
}

//! Key-store entries: opaque payloads whose retrieval requires re-proving
//! one specific authenticator, independent of session state. Used by
//! clients for things like biometric-unlock wrapping keys.

use crate::error::ServerError;
use crate::models::{AuthPurpose, AuthRequestStatus, AuthenticatorStatus, KeyStoreEntry, KeyStoreRef};
use crate::services::storage::{Entity, EntityKind};
use crate::services::Context;
use crate::Server;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateKeyStoreEntryParams {
    /// Opaque payload.
    pub data: String,

    /// Authenticator that must be re-proven to read the entry back.
    pub authenticator_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct KeyStoreEntryResult {
    pub id: Uuid,
    pub authenticator_id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

pub async fn create_key_store_entry(
    server: &Server,
    ctx: &mut Context,
    params: CreateKeyStoreEntryParams,
) -> Result<KeyStoreEntryResult, ServerError> {
    let account = ctx.require_account()?;
    let account_id = account.id;
    // Re-fetch under the write lock; the context copy predates it.
    let mut auth = server.fetch_auth(&account.email).await?;

    let valid = auth
        .authenticator(&params.authenticator_id)
        .is_some_and(|a| a.status == AuthenticatorStatus::Active);
    if !valid {
        return Err(ServerError::NotFound);
    }

    let entry = KeyStoreEntry::new(account_id, params.authenticator_id, params.data);
    auth.key_store_entries.push(KeyStoreRef {
        id: entry.id,
        authenticator_id: entry.authenticator_id,
    });
    auth.updated_at = Utc::now();

    futures::try_join!(
        server.storage.save(Entity::KeyStoreEntry(entry.clone())),
        server.storage.save(Entity::Auth(auth)),
    )?;

    Ok(KeyStoreEntryResult {
        id: entry.id,
        authenticator_id: entry.authenticator_id,
        data: None,
    })
}

#[derive(Debug, Deserialize)]
pub struct GetKeyStoreEntryParams {
    pub id: Uuid,

    /// Verified token from a key-store-access challenge against the entry's
    /// gating authenticator.
    pub verify: String,
}

/// Read an entry back. The token must come from a verified challenge
/// against the exact authenticator the entry is bound to; it is consumed on
/// success.
pub async fn get_key_store_entry(
    server: &Server,
    _ctx: &mut Context,
    params: GetKeyStoreEntryParams,
) -> Result<KeyStoreEntryResult, ServerError> {
    let entry = server.fetch_key_store_entry(&params.id).await?;
    let owner = server.fetch_account(&entry.account_id).await?;
    let mut auth = server.fetch_auth(&owner.email).await?;

    let index = auth.auth_requests.iter().position(|r| {
        r.status == AuthRequestStatus::Verified
            && r.purpose == AuthPurpose::AccessKeyStore
            && r.token == params.verify
            && r.authenticator_id == entry.authenticator_id
    });
    let Some(index) = index else {
        return Err(ServerError::AuthenticationRequired);
    };
    auth.auth_requests.remove(index);
    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth)).await?;

    Ok(KeyStoreEntryResult {
        id: entry.id,
        authenticator_id: entry.authenticator_id,
        data: Some(entry.data),
    })
}

#[derive(Debug, Deserialize)]
pub struct DeleteKeyStoreEntryParams {
    pub id: Uuid,
}

pub async fn delete_key_store_entry(
    server: &Server,
    ctx: &mut Context,
    params: DeleteKeyStoreEntryParams,
) -> Result<Value, ServerError> {
    let account = ctx.require_account()?;
    let account_id = account.id;
    let mut auth = server.fetch_auth(&account.email).await?;

    let entry = server.fetch_key_store_entry(&params.id).await?;
    if entry.account_id != account_id {
        return Err(ServerError::NotFound);
    }

    auth.key_store_entries.retain(|e| e.id != params.id);
    auth.updated_at = Utc::now();
    server
        .storage
        .delete(EntityKind::KeyStoreEntry, &params.id.to_string())
        .await?;
    server.storage.save(Entity::Auth(auth)).await?;
    Ok(Value::Null)
}

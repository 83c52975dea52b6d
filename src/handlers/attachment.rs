//! Vault attachments - opaque encrypted blobs stored outside the entity
//! store, accounted against the vault's storage quota.

use crate::error::ServerError;
use crate::services::provisioning::{check_quota, ensure_active};
use crate::services::Context;
use crate::Server;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateAttachmentParams {
    pub vault_id: Uuid,

    /// Attachment payload, base64.
    pub data: String,

    /// Client-assigned id; generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateAttachmentResult {
    pub id: Uuid,
}

pub async fn create_attachment(
    server: &Server,
    ctx: &mut Context,
    params: CreateAttachmentParams,
) -> Result<CreateAttachmentResult, ServerError> {
    let (account, auth) = ctx.require_auth()?;
    let account_id = account.id;

    let vault = server.fetch_vault(&params.vault_id).await?;
    let org = super::vault::ensure_read_access(server, account, &vault).await?;
    if let Some(org) = &org {
        if !org.can_write_vault(&account_id, &vault.id) {
            return Err(ServerError::InsufficientPermissions);
        }
    }

    let data = BASE64
        .decode(&params.data)
        .map_err(|e| ServerError::BadRequest(format!("invalid attachment encoding: {}", e)))?;

    let provisioning = server.provisioner.get_provisioning(auth).await?;
    let status = match &vault.org {
        Some(info) => provisioning.status_for_org(&info.id),
        None => provisioning.account.status,
    };
    ensure_active(status)?;

    let storage_quota = provisioning
        .vault(&vault.id)
        .map(|v| v.quota.storage)
        .unwrap_or(-1);
    let usage = server.attachments.usage(&vault.id).await?;
    check_quota(storage_quota, usage as usize, data.len())?;

    let id = params.id.unwrap_or_else(Uuid::new_v4);
    server.attachments.put(&vault.id, &id, &data).await?;

    tracing::debug!(vault_id = %vault.id, attachment_id = %id, bytes = data.len(), "attachment stored");
    Ok(CreateAttachmentResult { id })
}

#[derive(Debug, Deserialize)]
pub struct GetAttachmentParams {
    pub vault_id: Uuid,
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct GetAttachmentResult {
    pub id: Uuid,

    /// Attachment payload, base64.
    pub data: String,
}

pub async fn get_attachment(
    server: &Server,
    ctx: &mut Context,
    params: GetAttachmentParams,
) -> Result<GetAttachmentResult, ServerError> {
    let account = ctx.require_account()?;

    let vault = server.fetch_vault(&params.vault_id).await?;
    super::vault::ensure_read_access(server, account, &vault).await?;

    let data = server.attachments.get(&vault.id, &params.id).await?;
    Ok(GetAttachmentResult {
        id: params.id,
        data: BASE64.encode(&data),
    })
}

#[derive(Debug, Deserialize)]
pub struct DeleteAttachmentParams {
    pub vault_id: Uuid,
    pub id: Uuid,
}

pub async fn delete_attachment(
    server: &Server,
    ctx: &mut Context,
    params: DeleteAttachmentParams,
) -> Result<Value, ServerError> {
    let account = ctx.require_account()?;
    let account_id = account.id;

    let vault = server.fetch_vault(&params.vault_id).await?;
    let org = super::vault::ensure_read_access(server, account, &vault).await?;
    if let Some(org) = &org {
        if !org.can_write_vault(&account_id, &vault.id) {
            return Err(ServerError::InsufficientPermissions);
        }
    }

    server.attachments.delete(&vault.id, &params.id).await?;
    Ok(Value::Null)
}

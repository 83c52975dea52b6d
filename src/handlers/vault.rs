//! Vault lifecycle and access control.
//!
//! Read denial is NotFound so unreadable vaults are indistinguishable from
//! nonexistent ones; only a caller who can already see a vault is told that
//! a write exceeds their permissions.

use crate::error::ServerError;
use crate::models::{Account, Org, Revision, Vault, VaultEntry};
use crate::services::provisioning::{check_quota, ensure_active};
use crate::services::storage::{Entity, EntityKind};
use crate::services::Context;
use crate::Server;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateVaultParams {
    pub org_id: Uuid,
    pub name: String,
}

/// Create a vault inside an org. Admin only, gated on the org's
/// provisioning status and vault quota.
pub async fn create_vault(
    server: &Server,
    ctx: &mut Context,
    params: CreateVaultParams,
) -> Result<Vault, ServerError> {
    let (account, auth) = ctx.require_auth()?;
    let account_id = account.id;

    let mut org = server.fetch_org(&params.org_id).await?;
    if !org.can_read(&account_id) {
        return Err(ServerError::NotFound);
    }
    if !org.is_admin(&account_id) {
        return Err(ServerError::InsufficientPermissions);
    }

    let provisioning = server.provisioner.get_provisioning(auth).await?;
    ensure_active(provisioning.status_for_org(&org.id))?;
    let vault_quota = provisioning
        .org(&org.id)
        .map(|o| o.quota.vaults)
        .unwrap_or(-1);
    check_quota(vault_quota, org.vaults.len(), 1)?;

    let vault = Vault::for_org(org.info(), params.name.clone());
    org.vaults.push(VaultEntry {
        id: vault.id,
        name: params.name,
    });
    org.revision.bump();
    org.updated_at = Utc::now();

    futures::try_join!(
        server.storage.save(Entity::Vault(vault.clone())),
        server.storage.save(Entity::Org(org.clone())),
    )?;
    super::org::propagate_org_info(server, &org).await?;

    tracing::info!(vault_id = %vault.id, org_id = %org.id, "vault created");
    Ok(vault)
}

#[derive(Debug, Deserialize)]
pub struct GetVaultParams {
    pub id: Uuid,
}

pub async fn get_vault(
    server: &Server,
    ctx: &mut Context,
    params: GetVaultParams,
) -> Result<Vault, ServerError> {
    let account = ctx.require_account()?;
    let vault = server.fetch_vault(&params.id).await?;
    ensure_read_access(server, account, &vault).await?;
    Ok(vault)
}

#[derive(Debug, Deserialize)]
pub struct UpdateVaultParams {
    pub id: Uuid,

    /// Revision the client based its changes on.
    pub revision: Revision,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub encrypted_data: Option<String>,
}

pub async fn update_vault(
    server: &Server,
    ctx: &mut Context,
    params: UpdateVaultParams,
) -> Result<Vault, ServerError> {
    let (account, auth) = ctx.require_auth()?;
    let account_id = account.id;

    let mut vault = server.fetch_vault(&params.id).await?;
    let org = ensure_read_access(server, account, &vault).await?;

    if let Some(org) = &org {
        if !org.can_write_vault(&account_id, &vault.id) {
            return Err(ServerError::InsufficientPermissions);
        }
    }

    let provisioning = server.provisioner.get_provisioning(auth).await?;
    let status = match &vault.org {
        Some(info) => provisioning.status_for_org(&info.id),
        None => provisioning.account.status,
    };
    ensure_active(status)?;

    vault.revision.ensure_current(&params.revision)?;
    if let Some(name) = params.name {
        // A rename edits the org's vault list, so the org revision advances
        // too; otherwise a stale org document could silently undo it.
        if let Some(mut org) = org {
            if let Some(entry) = org.vaults.iter_mut().find(|e| e.id == vault.id) {
                entry.name = name.clone();
                org.revision.bump();
                org.updated_at = Utc::now();
                vault.org = Some(org.info());
                server.storage.save(Entity::Org(org.clone())).await?;
                super::org::propagate_org_info(server, &org).await?;
            }
        }
        vault.name = name;
    }
    if let Some(data) = params.encrypted_data {
        vault.encrypted_data = data;
    }
    vault.revision.bump();
    vault.updated_at = Utc::now();
    server.storage.save(Entity::Vault(vault.clone())).await?;

    Ok(vault)
}

#[derive(Debug, Deserialize)]
pub struct DeleteVaultParams {
    pub id: Uuid,
}

/// Delete an org vault, its attachments, and every assignment pointing at
/// it. Private vaults live and die with their account and cannot be deleted
/// directly.
pub async fn delete_vault(
    server: &Server,
    ctx: &mut Context,
    params: DeleteVaultParams,
) -> Result<Value, ServerError> {
    let account = ctx.require_account()?;
    let account_id = account.id;

    let vault = server.fetch_vault(&params.id).await?;
    let org = ensure_read_access(server, account, &vault).await?;
    let Some(mut org) = org else {
        return Err(ServerError::BadRequest(
            "private vaults cannot be deleted directly".to_string(),
        ));
    };
    if !org.is_admin(&account_id) {
        return Err(ServerError::InsufficientPermissions);
    }

    server.attachments.delete_all(&vault.id).await?;

    org.vaults.retain(|e| e.id != vault.id);
    for member in &mut org.members {
        member.vaults.retain(|a| a.vault_id != vault.id);
    }
    for group in &mut org.groups {
        group.vaults.retain(|a| a.vault_id != vault.id);
    }
    org.revision.bump();
    org.updated_at = Utc::now();

    server
        .storage
        .delete(EntityKind::Vault, &vault.id.to_string())
        .await?;
    server.storage.save(Entity::Org(org.clone())).await?;
    super::org::propagate_org_info(server, &org).await?;

    tracing::info!(vault_id = %vault.id, "vault deleted");
    Ok(Value::Null)
}

/// Resolve read access, loading the owning org for org vaults. Denial is
/// always NotFound.
pub(crate) async fn ensure_read_access(
    server: &Server,
    account: &Account,
    vault: &Vault,
) -> Result<Option<Org>, ServerError> {
    match (&vault.org, vault.owner) {
        (Some(info), _) => {
            let org = server.fetch_org(&info.id).await?;
            if !org.can_read_vault(&account.id, &vault.id) {
                return Err(ServerError::NotFound);
            }
            Ok(Some(org))
        }
        (None, Some(owner)) if owner == account.id => Ok(None),
        _ => Err(ServerError::NotFound),
    }
}

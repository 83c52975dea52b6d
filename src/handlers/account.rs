//! Account lifecycle: registration, profile updates, recovery, deletion.

use crate::error::ServerError;
use crate::models::{Account, AccountStatus, AuthPurpose, OrgRole, Vault};
use crate::services::storage::{Entity, EntityKind};
use crate::services::Context;
use crate::Server;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateAccountParams {
    pub email: String,
    pub name: String,

    /// Account public key, opaque.
    pub public_key: String,

    /// SRP verifier derived from the chosen password, base64.
    pub verifier: String,

    #[serde(default)]
    pub key_params: Value,

    /// Client-encrypted profile blob.
    #[serde(default)]
    pub encrypted_profile: String,

    /// Verified signup token; required unless email verification on signup
    /// is disabled.
    #[serde(default)]
    pub verify: Option<String>,
}

/// Register a new account, together with its private main vault.
pub async fn create_account(
    server: &Server,
    _ctx: &mut Context,
    params: CreateAccountParams,
) -> Result<Account, ServerError> {
    let mut auth = server.fetch_auth_or_new(&params.email).await?;

    if server.config.verify_email_on_signup {
        let verified = params
            .verify
            .as_deref()
            .is_some_and(|token| auth.consume_token(AuthPurpose::Signup, token));
        if !verified {
            return Err(ServerError::AuthenticationRequired);
        }
    }

    if auth.status == AccountStatus::Active {
        return Err(ServerError::AccountExists);
    }

    // The vault needs the account id and vice versa; fix the owner up after
    // both ids exist.
    let mut vault = Vault::private(Uuid::nil(), "Main".to_string());
    let account = Account::new(
        auth.email.clone(),
        params.name,
        params.public_key,
        params.key_params.clone(),
        params.encrypted_profile,
        vault.id,
    );
    vault.owner = Some(account.id);

    auth.status = AccountStatus::Active;
    auth.account_id = Some(account.id);
    auth.verifier = Some(params.verifier);
    auth.key_params = params.key_params;
    auth.updated_at = Utc::now();

    futures::try_join!(
        server.storage.save(Entity::Vault(vault)),
        server.storage.save(Entity::Account(account.clone())),
        server.storage.save(Entity::Auth(auth)),
    )?;

    tracing::info!(account_id = %account.id, "account created");
    Ok(account)
}

pub async fn get_account(_server: &Server, ctx: &mut Context) -> Result<Account, ServerError> {
    Ok(ctx.require_account()?.clone())
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountParams {
    /// Revision the client based its changes on.
    pub revision: crate::models::Revision,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub encrypted_profile: Option<String>,
}

/// Update the caller's own account. A name change is propagated to the
/// cached member entries of every org the account belongs to; orgs that no
/// longer exist are pruned from the membership cache on the way.
pub async fn update_account(
    server: &Server,
    ctx: &mut Context,
    params: UpdateAccountParams,
) -> Result<Account, ServerError> {
    // Re-fetch under the write lock; the context copy predates it and could
    // carry a revision a concurrent writer has already replaced.
    let account_id = ctx.require_account()?.id;
    let mut account = server.fetch_account(&account_id).await?;
    account.revision.ensure_current(&params.revision)?;

    let name_changed = params
        .name
        .as_ref()
        .is_some_and(|name| *name != account.name);

    if let Some(name) = params.name {
        account.name = name;
    }
    if let Some(public_key) = params.public_key {
        account.public_key = public_key;
    }
    if let Some(profile) = params.encrypted_profile {
        account.encrypted_profile = profile;
    }
    account.revision.bump();
    account.updated_at = Utc::now();

    if name_changed {
        let mut gone = Vec::new();
        for org_info in &account.orgs {
            let mut org = match server.fetch_org(&org_info.id).await {
                Ok(org) => org,
                Err(ServerError::NotFound) => {
                    gone.push(org_info.id);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(member) = org.members.iter_mut().find(|m| m.account_id == account.id) {
                member.name = account.name.clone();
                member.updated_at = Utc::now();
                server.storage.save(Entity::Org(org)).await?;
            }
        }
        for org_id in gone {
            account.remove_org_info(&org_id);
        }
    }

    server.storage.save(Entity::Account(account.clone())).await?;
    Ok(account)
}

#[derive(Debug, Deserialize)]
pub struct RecoverAccountParams {
    pub email: String,

    /// Replacement SRP verifier, base64.
    pub verifier: String,

    #[serde(default)]
    pub key_params: Value,

    /// Verified recovery token.
    pub verify: String,
}

/// Reset credentials after a lost master password.
///
/// Recovery regenerates the account's cryptographic identity, so everything
/// bound to the old one is dropped: sessions, trusted devices, pending
/// handshakes. Membership in orgs the account does not own is suspended
/// until an org owner re-confirms the new keys.
pub async fn recover_account(
    server: &Server,
    _ctx: &mut Context,
    params: RecoverAccountParams,
) -> Result<Account, ServerError> {
    let mut auth = server.fetch_auth_or_new(&params.email).await?;

    if !auth.consume_token(AuthPurpose::Recover, &params.verify) {
        return Err(ServerError::AuthenticationRequired);
    }
    let Some(account_id) = auth.account_id else {
        return Err(ServerError::NotFound);
    };
    let mut account = server.fetch_account(&account_id).await?;

    auth.verifier = Some(params.verifier);
    auth.key_params = params.key_params;
    auth.trusted_devices.clear();
    auth.pending_handshakes.clear();
    for session in std::mem::take(&mut auth.sessions) {
        server
            .storage
            .delete(EntityKind::Session, &session.id.to_string())
            .await?;
    }
    auth.updated_at = Utc::now();

    for org_info in account.orgs.clone() {
        let mut org = match server.fetch_org(&org_info.id).await {
            Ok(org) => org,
            Err(ServerError::NotFound) => {
                account.remove_org_info(&org_info.id);
                continue;
            }
            Err(err) => return Err(err),
        };
        if org.owner == account.id {
            continue;
        }
        if let Some(member) = org.members.iter_mut().find(|m| m.account_id == account.id) {
            member.role = OrgRole::Suspended;
            member.public_key = None;
            member.updated_at = Utc::now();
            org.revision.bump();
            org.updated_at = Utc::now();
            account.upsert_org_info(org.info());
            server.storage.save(Entity::Org(org)).await?;
        }
    }

    account.updated_at = Utc::now();
    futures::try_join!(
        server.storage.save(Entity::Account(account.clone())),
        server.storage.save(Entity::Auth(auth)),
    )?;

    tracing::info!(account_id = %account.id, "account recovered");
    Ok(account)
}

/// Delete the caller's account and everything anchored to it.
///
/// Accounts still owning an org must transfer or delete it first, so shared
/// data never becomes ownerless as a side effect.
pub async fn delete_account(server: &Server, ctx: &mut Context) -> Result<Value, ServerError> {
    let account_id = ctx.require_account()?.id;
    let account = server.fetch_account(&account_id).await?;
    let mut auth = server.fetch_auth(&account.email).await?;

    let mut member_orgs = Vec::new();
    for org_info in &account.orgs {
        match server.fetch_org(&org_info.id).await {
            Ok(org) if org.owner == account.id => {
                return Err(ServerError::BadRequest(
                    "delete or transfer owned orgs before deleting the account".to_string(),
                ));
            }
            Ok(org) => member_orgs.push(org),
            Err(ServerError::NotFound) => {}
            Err(err) => return Err(err),
        }
    }

    for mut org in member_orgs {
        org.members.retain(|m| m.account_id != account.id);
        for group in &mut org.groups {
            group.members.retain(|id| *id != account.id);
        }
        org.revision.bump();
        org.updated_at = Utc::now();
        super::org::propagate_org_info(server, &org).await?;
        server.storage.save(Entity::Org(org)).await?;
    }

    server.attachments.delete_all(&account.main_vault).await?;
    server
        .storage
        .delete(EntityKind::Vault, &account.main_vault.to_string())
        .await?;

    for session in &auth.sessions {
        server
            .storage
            .delete(EntityKind::Session, &session.id.to_string())
            .await?;
    }
    for entry in &auth.key_store_entries {
        server
            .storage
            .delete(EntityKind::KeyStoreEntry, &entry.id.to_string())
            .await?;
    }

    server
        .storage
        .delete(EntityKind::Account, &account.id.to_string())
        .await?;

    auth.status = AccountStatus::Deleted;
    auth.account_id = None;
    auth.verifier = None;
    auth.key_params = Value::Null;
    auth.authenticators.clear();
    auth.mfa_order.clear();
    auth.sessions.clear();
    auth.trusted_devices.clear();
    auth.pending_handshakes.clear();
    auth.auth_requests.clear();
    auth.key_store_entries.clear();
    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth.clone())).await?;

    server.provisioner.account_deleted(&auth).await?;

    tracing::info!(account_id = %account.id, "account deleted");
    Ok(Value::Null)
}

//! Org lifecycle and the membership/invite update machinery.
//!
//! Orgs are updated as whole documents under an optimistic revision; the
//! handler diffs the submitted document against the stored one to enforce
//! per-field permissions and to derive side effects (invite delivery,
//! membership cache updates, quota gating).

use crate::error::ServerError;
use crate::models::{
    Group, Invite, InviteSender, Org, OrgMember, Revision, VaultEntry,
};
use crate::services::provisioning::{check_quota, ensure_active, OrgQuota};
use crate::services::storage::{Entity, EntityKind};
use crate::services::{Context, Message};
use crate::Server;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateOrgParams {
    pub name: String,
}

/// Create an org owned by the caller. Gated on the account's provisioning
/// status and org quota.
pub async fn create_org(
    server: &Server,
    ctx: &mut Context,
    params: CreateOrgParams,
) -> Result<Org, ServerError> {
    let (account, auth) = ctx.require_auth()?;
    let account_id = account.id;
    let auth = auth.clone();
    // Re-fetch under the write lock; the context copy predates it.
    let mut account = server.fetch_account(&account_id).await?;

    let provisioning = server.provisioner.get_provisioning(&auth).await?;
    ensure_active(provisioning.account.status)?;

    // The org quota counts orgs owned, not memberships.
    let mut owned = 0;
    for info in &account.orgs {
        match server.fetch_org(&info.id).await {
            Ok(org) if org.owner == account.id => owned += 1,
            Ok(_) => {}
            Err(ServerError::NotFound) => {}
            Err(err) => return Err(err),
        }
    }
    check_quota(provisioning.account.quota.orgs, owned, 1)?;

    let org = Org::new(&account, params.name);
    account.upsert_org_info(org.info());
    account.updated_at = Utc::now();

    futures::try_join!(
        server.storage.save(Entity::Org(org.clone())),
        server.storage.save(Entity::Account(account)),
    )?;

    tracing::info!(org_id = %org.id, "org created");
    Ok(org)
}

#[derive(Debug, Deserialize)]
pub struct GetOrgParams {
    pub id: Uuid,
}

/// Read an org. Non-members and suspended members get NotFound, never a
/// permission error, so org existence stays hidden.
pub async fn get_org(
    server: &Server,
    ctx: &mut Context,
    params: GetOrgParams,
) -> Result<Org, ServerError> {
    let account = ctx.require_account()?;
    let org = server.fetch_org(&params.id).await?;
    if !org.can_read(&account.id) {
        return Err(ServerError::NotFound);
    }
    Ok(org)
}

/// Full replacement document for an org update.
#[derive(Debug, Deserialize)]
pub struct UpdateOrgParams {
    pub id: Uuid,

    /// Revision the client based its changes on.
    pub revision: Revision,

    pub name: String,
    pub public_key: String,
    pub encrypted_keys: String,
    pub members: Vec<OrgMember>,
    pub groups: Vec<Group>,
    pub vaults: Vec<VaultEntry>,
    pub invites: Vec<Invite>,
    pub min_member_updated: DateTime<Utc>,
}

/// Update an org document.
///
/// Permissions are enforced per field class against the stored state:
/// membership, invites, the org name, and key material are owner-only;
/// groups and the vault list are admin-only; a document changing neither is
/// accepted from any non-suspended member. The member-entry watermark may
/// only move forward, and no submitted member entry may be older than it.
pub async fn update_org(
    server: &Server,
    ctx: &mut Context,
    params: UpdateOrgParams,
) -> Result<Org, ServerError> {
    let (account, auth) = ctx.require_auth()?;
    let account = account.clone();

    let stored = server.fetch_org(&params.id).await?;
    if !stored.can_read(&account.id) {
        return Err(ServerError::NotFound);
    }
    stored.revision.ensure_current(&params.revision)?;

    let owner_fields_changed = params.members != stored.members
        || params.invites != stored.invites
        || params.name != stored.name
        || params.public_key != stored.public_key
        || params.encrypted_keys != stored.encrypted_keys;
    let admin_fields_changed =
        params.groups != stored.groups || params.vaults != stored.vaults;

    if owner_fields_changed && !stored.is_owner(&account.id) {
        return Err(ServerError::InsufficientPermissions);
    }
    if admin_fields_changed && !stored.is_admin(&account.id) {
        return Err(ServerError::InsufficientPermissions);
    }

    if params.min_member_updated < stored.min_member_updated {
        return Err(ServerError::BadRequest(
            "member update watermark may not move backwards".to_string(),
        ));
    }
    if params
        .members
        .iter()
        .any(|m| m.updated_at < params.min_member_updated)
    {
        return Err(ServerError::BadRequest(
            "member entry is older than the update watermark".to_string(),
        ));
    }

    let provisioning = server.provisioner.get_provisioning(auth).await?;
    ensure_active(provisioning.status_for_org(&stored.id))?;
    let quota = provisioning
        .org(&stored.id)
        .map(|o| o.quota.clone())
        .unwrap_or_default();

    let added_members: Vec<&OrgMember> = params
        .members
        .iter()
        .filter(|m| stored.member(&m.account_id).is_none())
        .collect();
    let removed_members: Vec<&OrgMember> = stored
        .members
        .iter()
        .filter(|m| !params.members.iter().any(|n| n.account_id == m.account_id))
        .collect();
    if !added_members.is_empty() {
        check_quota(quota.members, stored.members.len(), added_members.len())?;
    }
    check_group_and_vault_quotas(&stored, &params, &quota)?;

    let added_invites: Vec<Invite> = params
        .invites
        .iter()
        .filter(|i| stored.invite(&i.id).is_none())
        .cloned()
        .collect();
    let removed_invites: Vec<&Invite> = stored
        .invites
        .iter()
        .filter(|i| !params.invites.iter().any(|n| n.id == i.id))
        .collect();

    let mut org = stored.clone();
    org.name = params.name;
    org.public_key = params.public_key;
    org.encrypted_keys = params.encrypted_keys;
    org.members = params.members;
    org.groups = params.groups;
    org.vaults = params.vaults;
    org.invites = params.invites;
    org.min_member_updated = params.min_member_updated;

    // Normalize freshly added invites: the inviter and org identity are
    // server-assigned, whatever the client sent.
    let sender = InviteSender {
        email: account.email.clone(),
        name: account.name.clone(),
    };
    for invite in org.invites.iter_mut() {
        if added_invites.iter().any(|a| a.id == invite.id) {
            invite.org_id = org.id;
            invite.org_name = org.name.clone();
            invite.accepted = false;
            invite.invitee = None;
            invite.invited_by = Some(sender.clone());
        }
    }

    org.revision.bump();
    org.updated_at = Utc::now();
    server.storage.save(Entity::Org(org.clone())).await?;

    for invite in &added_invites {
        deliver_invite(server, &org, &invite.id).await?;
    }
    for invite in removed_invites {
        remove_invite_ref(server, &invite.email, &invite.id).await?;
    }
    for member in removed_members {
        match server.fetch_account(&member.account_id).await {
            Ok(mut removed) => {
                removed.remove_org_info(&org.id);
                server.storage.save(Entity::Account(removed)).await?;
            }
            Err(ServerError::NotFound) => {}
            Err(err) => return Err(err),
        }
    }

    propagate_org_info(server, &org).await?;

    tracing::info!(org_id = %org.id, "org updated");
    Ok(org)
}

#[derive(Debug, Deserialize)]
pub struct DeleteOrgParams {
    pub id: Uuid,
}

/// Delete an org and cascade through its vaults, attachments, membership
/// caches, and outstanding invites. Owner only.
pub async fn delete_org(
    server: &Server,
    ctx: &mut Context,
    params: DeleteOrgParams,
) -> Result<Value, ServerError> {
    let account = ctx.require_account()?;
    let account_id = account.id;

    let org = server.fetch_org(&params.id).await?;
    if !org.can_read(&account_id) {
        return Err(ServerError::NotFound);
    }
    if !org.is_owner(&account_id) {
        return Err(ServerError::InsufficientPermissions);
    }

    for entry in &org.vaults {
        server.attachments.delete_all(&entry.id).await?;
        server
            .storage
            .delete(EntityKind::Vault, &entry.id.to_string())
            .await?;
    }
    for member in &org.members {
        match server.fetch_account(&member.account_id).await {
            Ok(mut member_account) => {
                member_account.remove_org_info(&org.id);
                server.storage.save(Entity::Account(member_account)).await?;
            }
            Err(ServerError::NotFound) => {}
            Err(err) => return Err(err),
        }
    }
    for invite in &org.invites {
        remove_invite_ref(server, &invite.email, &invite.id).await?;
    }

    server
        .storage
        .delete(EntityKind::Org, &org.id.to_string())
        .await?;

    tracing::info!(org_id = %org.id, "org deleted");
    Ok(Value::Null)
}

/// Refresh the denormalized org identity on every member account and org
/// vault. Dangling references (deleted accounts, deleted vaults) are
/// skipped; membership pruning happens where the deletion happens.
pub(crate) async fn propagate_org_info(server: &Server, org: &Org) -> Result<(), ServerError> {
    let info = org.info();

    for member in &org.members {
        match server.fetch_account(&member.account_id).await {
            Ok(mut account) => {
                account.upsert_org_info(info.clone());
                server.storage.save(Entity::Account(account)).await?;
            }
            Err(ServerError::NotFound) => {}
            Err(err) => return Err(err),
        }
    }

    for entry in &org.vaults {
        match server.fetch_vault(&entry.id).await {
            Ok(mut vault) => {
                vault.org = Some(info.clone());
                server.storage.save(Entity::Vault(vault)).await?;
            }
            Err(ServerError::NotFound) => {}
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

/// Notify the invitee and leave a reference on their auth record so the
/// invite shows up before they have an account.
async fn deliver_invite(
    server: &Server,
    org: &Org,
    invite_id: &Uuid,
) -> Result<(), ServerError> {
    let Some(invite) = org.invite(invite_id) else {
        return Ok(());
    };

    let mut invitee_auth = server.fetch_auth_or_new(&invite.email).await?;
    invitee_auth.invites.push(crate::models::OrgInviteRef {
        org_id: org.id,
        invite_id: invite.id,
        org_name: org.name.clone(),
    });
    invitee_auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(invitee_auth)).await?;

    let link = format!(
        "{}/invite/{}/{}",
        server.config.client_url, org.id, invite.id
    );
    // Delivery is fire-and-forget; the org update already committed.
    let message = Message::InviteReceived {
        org_name: org.name.clone(),
        invited_by: invite
            .invited_by
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default(),
        link,
    };
    if let Err(err) = server.messenger.send(&invite.email, &message).await {
        tracing::warn!(invite_id = %invite.id, error = %err, "invite notification failed");
    }
    Ok(())
}

async fn remove_invite_ref(
    server: &Server,
    email: &str,
    invite_id: &Uuid,
) -> Result<(), ServerError> {
    let mut invitee_auth = match server.fetch_auth(email).await {
        Ok(auth) => auth,
        Err(ServerError::NotFound) => return Ok(()),
        Err(err) => return Err(err),
    };
    if invitee_auth.invites.iter().any(|r| r.invite_id == *invite_id) {
        invitee_auth.invites.retain(|r| r.invite_id != *invite_id);
        invitee_auth.updated_at = Utc::now();
        server.storage.save(Entity::Auth(invitee_auth)).await?;
    }
    Ok(())
}

fn check_group_and_vault_quotas(
    stored: &Org,
    params: &UpdateOrgParams,
    quota: &OrgQuota,
) -> Result<(), ServerError> {
    if params.groups.len() > stored.groups.len() {
        check_quota(
            quota.groups,
            stored.groups.len(),
            params.groups.len() - stored.groups.len(),
        )?;
    }
    if params.vaults.len() > stored.vaults.len() {
        check_quota(
            quota.vaults,
            stored.vaults.len(),
            params.vaults.len() - stored.vaults.len(),
        )?;
    }
    Ok(())
}

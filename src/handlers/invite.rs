//! Org invite retrieval and acceptance.
//!
//! Acceptance records the invitee's identity and keys on the invite;
//! membership itself is finalized by an org owner through a subsequent org
//! update.

use crate::error::ServerError;
use crate::models::{Invite, Invitee};
use crate::services::storage::Entity;
use crate::services::{Context, Message};
use crate::Server;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct GetInviteParams {
    pub org_id: Uuid,
    pub id: Uuid,
}

/// Read an invite. Visible to org admins and to the invited address; anyone
/// else gets NotFound.
pub async fn get_invite(
    server: &Server,
    ctx: &mut Context,
    params: GetInviteParams,
) -> Result<Invite, ServerError> {
    let account = ctx.require_account()?;
    let org = server.fetch_org(&params.org_id).await?;
    let invite = org.invite(&params.id).ok_or(ServerError::NotFound)?;

    let is_invitee = invite.email == account.email;
    if !is_invitee && !org.is_admin(&account.id) {
        return Err(ServerError::NotFound);
    }
    Ok(invite.clone())
}

#[derive(Debug, Deserialize)]
pub struct AcceptInviteParams {
    pub org_id: Uuid,
    pub id: Uuid,

    /// Client-encrypted confirmation material, opaque.
    #[serde(default)]
    pub secret_data: Value,
}

/// Accept an invite addressed to the caller's email. Notifies the inviter
/// so they can finalize membership.
pub async fn accept_invite(
    server: &Server,
    ctx: &mut Context,
    params: AcceptInviteParams,
) -> Result<Invite, ServerError> {
    let account = ctx.require_account()?.clone();

    let mut org = server.fetch_org(&params.org_id).await?;
    let invite = org
        .invites
        .iter_mut()
        .find(|i| i.id == params.id)
        .ok_or(ServerError::NotFound)?;

    if invite.email != account.email {
        return Err(ServerError::NotFound);
    }
    if invite.is_expired() {
        return Err(ServerError::BadRequest("invite has expired".to_string()));
    }

    invite.accepted = true;
    invite.invitee = Some(Invitee {
        account_id: account.id,
        name: account.name.clone(),
        public_key: account.public_key.clone(),
    });
    if !params.secret_data.is_null() {
        invite.secret_data = params.secret_data;
    }
    let accepted = invite.clone();

    org.revision.bump();
    org.updated_at = Utc::now();
    server.storage.save(Entity::Org(org.clone())).await?;
    super::org::propagate_org_info(server, &org).await?;

    if let Some(sender) = &accepted.invited_by {
        let link = format!(
            "{}/org/{}/invites/{}",
            server.config.client_url, org.id, accepted.id
        );
        // Delivery is fire-and-forget; the acceptance already committed.
        let message = Message::InviteAccepted {
            org_name: org.name.clone(),
            invitee: account.name.clone(),
            link,
        };
        if let Err(err) = server.messenger.send(&sender.email, &message).await {
            tracing::warn!(invite_id = %accepted.id, error = %err, "acceptance notification failed");
        }
    }

    tracing::info!(org_id = %org.id, invite_id = %accepted.id, "invite accepted");
    Ok(accepted)
}

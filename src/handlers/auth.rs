//! Login handshake orchestration and auth-record management.
//!
//! The handshake runs against the stored SRP verifier and never exposes it:
//! every failure after the email-verification gate collapses into
//! InvalidCredentials, and the negotiated session key leaves the server only
//! as an HMAC signing secret, never in a response body.

use crate::error::ServerError;
use crate::models::{
    AuthPurpose, AuthenticatorInfo, KeyStoreRef, OrgInviteRef, PendingHandshake, Session,
    SessionInfo, TrustedDevice,
};
use crate::services::storage::{Entity, EntityKind};
use crate::services::Context;
use crate::utils::secrets_equal;
use crate::Server;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct InitAuthParams {
    pub email: String,

    /// Verified login token, required unless the request comes from a
    /// trusted device.
    #[serde(default)]
    pub verify: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitAuthResult {
    pub account_id: Uuid,
    pub key_params: Value,
    pub handshake_id: Uuid,

    /// Server public value of the SRP exchange, base64.
    pub server_public: String,
}

/// Begin a login handshake.
///
/// The caller must first prove control of the email (verified login token)
/// or come from a trusted device; only then does the response reveal whether
/// an account exists at all.
pub async fn init_auth(
    server: &Server,
    ctx: &mut Context,
    params: InitAuthParams,
) -> Result<InitAuthResult, ServerError> {
    let mut auth = server.fetch_auth_or_new(&params.email).await?;

    let device_trusted = ctx
        .device
        .as_ref()
        .is_some_and(|d| auth.is_trusted_device(d));
    let token_ok = params
        .verify
        .as_deref()
        .is_some_and(|token| auth.consume_token(AuthPurpose::Login, token));
    if !device_trusted && !token_ok {
        return Err(ServerError::AuthenticationRequired);
    }

    let (Some(account_id), Some(verifier)) = (auth.account_id, auth.verifier.clone()) else {
        // Gate passed but nothing is registered under this address.
        return Err(ServerError::NotFound);
    };

    let verifier_bytes = BASE64
        .decode(&verifier)
        .map_err(|e| ServerError::Internal(anyhow::anyhow!("corrupt verifier: {}", e)))?;
    let challenge = server.srp.initiate(&verifier_bytes)?;

    let handshake = PendingHandshake {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        server_public: BASE64.encode(&challenge.server_public),
        state: BASE64.encode(&challenge.state),
    };

    auth.prune_handshakes(server.config.max_request_age);
    auth.prune_auth_requests(server.config.max_request_age);
    auth.pending_handshakes.push(handshake.clone());
    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth.clone())).await?;

    tracing::debug!(handshake_id = %handshake.id, "handshake initiated");

    Ok(InitAuthResult {
        account_id,
        key_params: auth.key_params,
        handshake_id: handshake.id,
        server_public: handshake.server_public,
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionParams {
    /// Account id returned by initAuth.
    pub account_id: Uuid,
    pub handshake_id: Uuid,

    /// Client public value of the SRP exchange, base64.
    pub client_public: String,

    /// Client proof of the negotiated key, base64.
    pub proof: String,

    /// Bind the requesting device as trusted, skipping the verification
    /// step on future logins.
    #[serde(default)]
    pub add_trusted_device: bool,
}

/// Complete a handshake and mint a session.
///
/// Unknown account, unknown handshake, and wrong proof are indistinguishable
/// to the caller. A failed proof leaves the pending handshake in place so
/// the client may retry until it is pruned by age.
pub async fn create_session(
    server: &Server,
    ctx: &mut Context,
    params: CreateSessionParams,
) -> Result<SessionInfo, ServerError> {
    let account = match server.fetch_account(&params.account_id).await {
        Ok(account) => account,
        Err(ServerError::NotFound) => return Err(ServerError::InvalidCredentials),
        Err(err) => return Err(err),
    };
    let mut auth = match server.fetch_auth(&account.email).await {
        Ok(auth) => auth,
        Err(ServerError::NotFound) => return Err(ServerError::InvalidCredentials),
        Err(err) => return Err(err),
    };

    auth.prune_handshakes(server.config.max_request_age);
    auth.prune_auth_requests(server.config.max_request_age);
    let Some(handshake) = auth
        .pending_handshakes
        .iter()
        .find(|h| h.id == params.handshake_id)
        .cloned()
    else {
        return Err(ServerError::InvalidCredentials);
    };

    let state = BASE64
        .decode(&handshake.state)
        .map_err(|e| ServerError::Internal(anyhow::anyhow!("corrupt handshake state: {}", e)))?;
    let client_public = BASE64
        .decode(&params.client_public)
        .map_err(|_| ServerError::InvalidCredentials)?;
    let proof = BASE64
        .decode(&params.proof)
        .map_err(|_| ServerError::InvalidCredentials)?;

    // Whatever the exchange primitive disliked - a malformed public value,
    // a degenerate parameter - the caller only ever learns that the
    // credentials did not check out.
    let keys = server
        .srp
        .complete(&state, &client_public)
        .map_err(|err| match err {
            err @ ServerError::Internal(_) => err,
            _ => ServerError::InvalidCredentials,
        })?;
    if !secrets_equal(&keys.expected_proof, &proof) {
        // Persist the prune but keep this handshake retryable.
        server.storage.save(Entity::Auth(auth)).await?;
        return Err(ServerError::InvalidCredentials);
    }

    let session = Session::new(account.id, BASE64.encode(&keys.session_key), ctx.device.clone());

    auth.pending_handshakes.retain(|h| h.id != handshake.id);
    auth.upsert_session_info(session.info());
    if params.add_trusted_device {
        if let Some(device) = ctx.device.clone() {
            auth.trust_device(device);
        }
    }
    auth.updated_at = Utc::now();

    futures::try_join!(
        server.storage.save(Entity::Session(session.clone())),
        server.storage.save(Entity::Auth(auth)),
    )?;

    tracing::info!(session_id = %session.id, account_id = %account.id, "session created");

    // The signing key stays server-side; the client derives the same key
    // from the exchange.
    Ok(session.info())
}

#[derive(Debug, Deserialize)]
pub struct RevokeSessionParams {
    pub id: Uuid,
}

/// Revoke one of the caller's own sessions. Foreign session ids report
/// NotFound, same as ids that never existed.
pub async fn revoke_session(
    server: &Server,
    ctx: &mut Context,
    params: RevokeSessionParams,
) -> Result<Value, ServerError> {
    let account = ctx.require_account()?;
    let account_id = account.id;
    // Re-fetch under the write lock; the context copy predates it.
    let mut auth = server.fetch_auth(&account.email).await?;

    let session = server.fetch_session(&params.id).await?;
    if session.account_id != account_id {
        return Err(ServerError::NotFound);
    }

    auth.remove_session_info(&params.id);
    auth.updated_at = Utc::now();
    server
        .storage
        .delete(EntityKind::Session, &params.id.to_string())
        .await?;
    server.storage.save(Entity::Auth(auth)).await?;

    tracing::info!(session_id = %params.id, "session revoked");
    Ok(Value::Null)
}

#[derive(Debug, Deserialize)]
pub struct UpdateAuthParams {
    /// New SRP verifier, base64. Replacing it invalidates the old password.
    #[serde(default)]
    pub verifier: Option<String>,
    #[serde(default)]
    pub key_params: Option<Value>,
    #[serde(default)]
    pub mfa_order: Option<Vec<Uuid>>,
}

/// Update credential material or authenticator preference order on the
/// caller's own auth record.
pub async fn update_auth(
    server: &Server,
    ctx: &mut Context,
    params: UpdateAuthParams,
) -> Result<Value, ServerError> {
    let account = ctx.require_account()?;
    let mut auth = server.fetch_auth(&account.email).await?;

    if let Some(verifier) = params.verifier {
        auth.verifier = Some(verifier);
    }
    if let Some(key_params) = params.key_params {
        auth.key_params = key_params;
    }
    if let Some(order) = params.mfa_order {
        for id in &order {
            if auth.authenticator(id).is_none() {
                return Err(ServerError::BadRequest(
                    "mfa order references an unknown authenticator".to_string(),
                ));
            }
        }
        auth.mfa_order = order;
    }
    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth)).await?;
    Ok(Value::Null)
}

#[derive(Debug, Deserialize)]
pub struct RemoveTrustedDeviceParams {
    pub id: String,
}

pub async fn remove_trusted_device(
    server: &Server,
    ctx: &mut Context,
    params: RemoveTrustedDeviceParams,
) -> Result<Value, ServerError> {
    let account = ctx.require_account()?;
    let mut auth = server.fetch_auth(&account.email).await?;

    if !auth.trusted_devices.iter().any(|t| t.device.id == params.id) {
        return Err(ServerError::NotFound);
    }
    auth.trusted_devices.retain(|t| t.device.id != params.id);
    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth)).await?;
    Ok(Value::Null)
}

/// Client-facing view of the caller's auth record. Verifier, handshake
/// state, and per-authenticator provider state are omitted by type.
#[derive(Debug, Serialize)]
pub struct AuthInfo {
    pub email: String,
    pub key_params: Value,
    pub authenticators: Vec<AuthenticatorInfo>,
    pub mfa_order: Vec<Uuid>,
    pub sessions: Vec<SessionInfo>,
    pub trusted_devices: Vec<TrustedDevice>,
    pub key_store_entries: Vec<KeyStoreRef>,
    pub invites: Vec<OrgInviteRef>,
}

pub async fn get_auth_info(_server: &Server, ctx: &mut Context) -> Result<AuthInfo, ServerError> {
    let (_, auth) = ctx.require_auth()?;

    Ok(AuthInfo {
        email: auth.email.clone(),
        key_params: auth.key_params.clone(),
        authenticators: auth.authenticators.iter().map(|a| a.info()).collect(),
        mfa_order: auth.mfa_order.clone(),
        sessions: auth.sessions.clone(),
        trusted_devices: auth.trusted_devices.clone(),
        key_store_entries: auth.key_store_entries.clone(),
        invites: auth.invites.clone(),
    })
}

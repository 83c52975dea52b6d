//! Multi-factor verification requests and authenticator lifecycle.
//!
//! A request is a single-use challenge: started against one authenticator,
//! verified by its provider, and redeemed exactly once for its token. The
//! handlers here own the state machine; providers own the challenge itself.

use crate::error::ServerError;
use crate::models::{
    AuthPurpose, AuthRecord, AuthRequest, AuthRequestStatus, AuthType, Authenticator,
    AuthenticatorStatus,
};
use crate::services::storage::{Entity, EntityKind};
use crate::services::{Context, Provisioning};
use crate::Server;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StartAuthRequestParams {
    pub email: String,
    pub purpose: AuthPurpose,

    /// Restrict selection to one authenticator type.
    #[serde(default)]
    pub auth_type: Option<AuthType>,

    /// Restrict selection to one specific authenticator.
    #[serde(default)]
    pub authenticator_id: Option<Uuid>,

    /// Provider-specific input, passed through opaquely.
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct StartAuthRequestResult {
    pub id: Uuid,
    pub auth_type: AuthType,
    pub authenticator_id: Uuid,

    /// Provider response data for the challenge.
    pub data: Value,

    /// Present only when the request was verified immediately (trusted
    /// device shortcut).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Entitlement snapshot, included on the trusted-device login path so
    /// the client can skip a round trip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<Provisioning>,
}

/// Start a verification request.
///
/// Selection considers active authenticators matching the purpose and any
/// id/type filter, in the record's preference order. If nothing matches but
/// the requested type is one of the configured default types, an ad-hoc
/// authenticator is created on the fly, so the outcome never reveals
/// whether the email is registered.
pub async fn start_auth_request(
    server: &Server,
    ctx: &mut Context,
    params: StartAuthRequestParams,
) -> Result<StartAuthRequestResult, ServerError> {
    let mut auth = server.fetch_auth_or_new(&params.email).await?;

    auth.prune_auth_requests(server.config.max_request_age);
    ensure_default_authenticators(server, &mut auth).await?;

    let authenticator_id = select_authenticator(
        &auth,
        params.purpose,
        params.auth_type,
        params.authenticator_id,
    )
    .ok_or(ServerError::NotFound)?;

    // Select returns ids present in the record, so the lookups cannot miss.
    let authenticator = auth
        .authenticator(&authenticator_id)
        .cloned()
        .ok_or(ServerError::NotFound)?;

    let mut request = AuthRequest::new(authenticator.auth_type, authenticator.id, params.purpose);

    let trusted = ctx
        .device
        .as_ref()
        .is_some_and(|d| auth.is_trusted_device(d));

    let (data, token, provisioning) = if params.purpose == AuthPurpose::Login && trusted {
        // Known device: skip the challenge entirely.
        request.mark_verified();
        let provisioning = server.provisioner.get_provisioning(&auth).await?;
        (Value::Null, Some(request.token.clone()), Some(provisioning))
    } else {
        let provider = server.providers.provider_for(authenticator.auth_type)?;
        let data = provider
            .init_auth_request(&authenticator, &mut request, &params.data)
            .await?;
        (data, None, None)
    };

    let result = StartAuthRequestResult {
        id: request.id,
        auth_type: request.auth_type,
        authenticator_id: authenticator.id,
        data,
        token,
        provisioning,
    };

    auth.auth_requests.push(request);
    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth)).await?;

    Ok(result)
}

#[derive(Debug, Deserialize)]
pub struct CompleteAuthRequestParams {
    pub email: String,
    pub id: Uuid,

    /// Provider-specific answer (e.g. the received code).
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct CompleteAuthRequestResult {
    pub token: String,
}

/// Answer a pending verification request.
///
/// A rejected answer increments the persisted try counter and fails with
/// AuthenticationFailed; a correct one marks the request verified and
/// returns its single-use token.
pub async fn complete_auth_request(
    server: &Server,
    _ctx: &mut Context,
    params: CompleteAuthRequestParams,
) -> Result<CompleteAuthRequestResult, ServerError> {
    let mut auth = server.fetch_auth(&params.email).await?;
    let token = verify_pending_request(server, &mut auth, &params.id, &params.data).await?;
    Ok(CompleteAuthRequestResult { token })
}

/// Shared verification core for completeAuthRequest and its legacy alias.
async fn verify_pending_request(
    server: &Server,
    auth: &mut AuthRecord,
    request_id: &Uuid,
    data: &Value,
) -> Result<String, ServerError> {
    let request = auth
        .auth_request(request_id)
        .filter(|r| r.status == AuthRequestStatus::Pending)
        .cloned()
        .ok_or(ServerError::NotFound)?;
    let authenticator = auth
        .authenticator(&request.authenticator_id)
        .cloned()
        .ok_or(ServerError::NotFound)?;
    if authenticator.auth_type != request.auth_type {
        // A request can only be answered through the method it was started
        // against; anything else is a protocol violation.
        return Err(ServerError::AuthenticationFailed);
    }

    let provider = server.providers.provider_for(request.auth_type)?;
    let mut updated = request.clone();

    match provider
        .verify_auth_request(&authenticator, &mut updated, data)
        .await
    {
        Ok(()) => {}
        Err(ServerError::AuthenticationFailed) => {
            if let Some(stored) = auth.auth_request_mut(request_id) {
                stored.tries += 1;
                stored.state = updated.state;
            }
            auth.updated_at = Utc::now();
            server.storage.save(Entity::Auth(auth.clone())).await?;
            return Err(ServerError::AuthenticationFailed);
        }
        Err(err) => return Err(err),
    }

    updated.mark_verified();
    let token = updated.token.clone();

    if updated.purpose == AuthPurpose::TestAuthenticator {
        // A test challenge proves the method works; there is nothing to
        // redeem afterwards.
        auth.auth_requests.retain(|r| r.id != *request_id);
    } else if let Some(stored) = auth.auth_request_mut(request_id) {
        *stored = updated;
    }
    if let Some(a) = auth.authenticator_mut(&request.authenticator_id) {
        a.last_used = Some(Utc::now());
    }
    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth.clone())).await?;

    Ok(token)
}

#[derive(Debug, Deserialize)]
pub struct StartRegisterAuthenticatorParams {
    pub auth_type: AuthType,
    #[serde(default)]
    pub purposes: Option<Vec<AuthPurpose>>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct StartRegisterAuthenticatorResult {
    pub id: Uuid,
    pub data: Value,
}

/// Begin registering a new authenticator on the caller's record. It stays
/// inactive until the activation challenge is answered.
pub async fn start_register_authenticator(
    server: &Server,
    ctx: &mut Context,
    params: StartRegisterAuthenticatorParams,
) -> Result<StartRegisterAuthenticatorResult, ServerError> {
    let account = ctx.require_account()?;
    // Re-fetch under the write lock; the context copy predates it.
    let mut auth = server.fetch_auth(&account.email).await?;

    let purposes = params.purposes.unwrap_or_else(AuthPurpose::all);
    let mut authenticator = Authenticator::new(params.auth_type, purposes);

    let provider = server.providers.provider_for(params.auth_type)?;
    let data = provider
        .init_authenticator(&mut authenticator, &auth, &params.data)
        .await?;

    let id = authenticator.id;
    auth.authenticators.push(authenticator);
    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth)).await?;

    Ok(StartRegisterAuthenticatorResult { id, data })
}

#[derive(Debug, Deserialize)]
pub struct CompleteRegisterAuthenticatorParams {
    pub id: Uuid,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct CompleteRegisterAuthenticatorResult {
    pub id: Uuid,
    pub data: Value,
}

pub async fn complete_register_authenticator(
    server: &Server,
    ctx: &mut Context,
    params: CompleteRegisterAuthenticatorParams,
) -> Result<CompleteRegisterAuthenticatorResult, ServerError> {
    let account = ctx.require_account()?;
    let mut auth = server.fetch_auth(&account.email).await?;

    let mut authenticator = auth
        .authenticator(&params.id)
        .filter(|a| a.status == AuthenticatorStatus::Registering)
        .cloned()
        .ok_or(ServerError::NotFound)?;

    let provider = server.providers.provider_for(authenticator.auth_type)?;
    let data = provider
        .activate_authenticator(&mut authenticator, &params.data)
        .await?;

    authenticator.status = AuthenticatorStatus::Active;
    if let Some(stored) = auth.authenticator_mut(&params.id) {
        *stored = authenticator;
    }
    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth)).await?;

    Ok(CompleteRegisterAuthenticatorResult { id: params.id, data })
}

#[derive(Debug, Deserialize)]
pub struct DeleteAuthenticatorParams {
    pub id: Uuid,
}

/// Remove an authenticator, along with its pending requests and any
/// key-store entries gated by it. The last active authenticator cannot be
/// removed; that would lock the account out of every verification flow.
pub async fn delete_authenticator(
    server: &Server,
    ctx: &mut Context,
    params: DeleteAuthenticatorParams,
) -> Result<Value, ServerError> {
    let account = ctx.require_account()?;
    let mut auth = server.fetch_auth(&account.email).await?;

    let target = auth.authenticator(&params.id).ok_or(ServerError::NotFound)?;
    let active_remaining = auth
        .authenticators
        .iter()
        .filter(|a| a.status == AuthenticatorStatus::Active && a.id != params.id)
        .count();
    if target.status == AuthenticatorStatus::Active && active_remaining == 0 {
        return Err(ServerError::BadRequest(
            "cannot delete the last active authenticator".to_string(),
        ));
    }

    auth.authenticators.retain(|a| a.id != params.id);
    auth.auth_requests.retain(|r| r.authenticator_id != params.id);
    auth.mfa_order.retain(|id| *id != params.id);

    let orphaned: Vec<_> = auth
        .key_store_entries
        .iter()
        .filter(|e| e.authenticator_id == params.id)
        .map(|e| e.id)
        .collect();
    for entry_id in &orphaned {
        server
            .storage
            .delete(EntityKind::KeyStoreEntry, &entry_id.to_string())
            .await?;
    }
    auth.key_store_entries
        .retain(|e| e.authenticator_id != params.id);

    auth.updated_at = Utc::now();
    server.storage.save(Entity::Auth(auth)).await?;
    Ok(Value::Null)
}

fn default_alias_purpose() -> AuthPurpose {
    AuthPurpose::Login
}

#[derive(Debug, Deserialize)]
pub struct RequestMfaCodeParams {
    pub email: String,
    /// Older clients omit the purpose when logging in.
    #[serde(default = "default_alias_purpose")]
    pub purpose: AuthPurpose,
    #[serde(default)]
    pub data: Value,
}

/// Legacy alias used by older clients: always an email challenge.
pub async fn request_mfa_code(
    server: &Server,
    ctx: &mut Context,
    params: RequestMfaCodeParams,
) -> Result<Value, ServerError> {
    start_auth_request(
        server,
        ctx,
        StartAuthRequestParams {
            email: params.email,
            purpose: params.purpose,
            auth_type: Some(AuthType::Email),
            authenticator_id: None,
            data: params.data,
        },
    )
    .await?;
    // Older clients expect an empty acknowledgment; the request is located
    // later by email and purpose.
    Ok(Value::Null)
}

#[derive(Debug, Deserialize)]
pub struct RetrieveMfaTokenParams {
    pub email: String,
    pub code: String,
    #[serde(default = "default_alias_purpose")]
    pub purpose: AuthPurpose,
}

#[derive(Debug, Serialize)]
pub struct RetrieveMfaTokenResult {
    pub token: String,

    /// Whether an account is registered under the address. Revealed only
    /// here, after the code proved control of the inbox.
    pub has_account: bool,
}

/// Legacy alias: redeem the latest pending email challenge for the purpose.
pub async fn retrieve_mfa_token(
    server: &Server,
    _ctx: &mut Context,
    params: RetrieveMfaTokenParams,
) -> Result<RetrieveMfaTokenResult, ServerError> {
    let mut auth = server.fetch_auth(&params.email).await?;

    let request_id = auth
        .auth_requests
        .iter()
        .rev()
        .find(|r| {
            r.status == AuthRequestStatus::Pending
                && r.auth_type == AuthType::Email
                && r.purpose == params.purpose
        })
        .map(|r| r.id)
        .ok_or(ServerError::NotFound)?;

    let data = serde_json::json!({ "code": params.code });
    let token = verify_pending_request(server, &mut auth, &request_id, &data).await?;

    Ok(RetrieveMfaTokenResult {
        token,
        has_account: auth.account_id.is_some(),
    })
}

/// Make sure each configured default type has a usable authenticator, so
/// verification works without explicit registration.
async fn ensure_default_authenticators(
    server: &Server,
    auth: &mut AuthRecord,
) -> Result<(), ServerError> {
    for auth_type in server.config.default_auth_types.clone() {
        let present = auth
            .authenticators
            .iter()
            .any(|a| a.auth_type == auth_type && a.status == AuthenticatorStatus::Active);
        if present {
            continue;
        }
        let provider = server.providers.provider_for(auth_type)?;
        let mut authenticator = Authenticator::ad_hoc(auth_type);
        provider
            .init_authenticator(&mut authenticator, auth, &Value::Null)
            .await?;
        auth.authenticators.push(authenticator);
    }
    Ok(())
}

/// Pick the authenticator for a request: active, supporting the purpose,
/// matching any filters, preferred order first.
fn select_authenticator(
    auth: &AuthRecord,
    purpose: AuthPurpose,
    auth_type: Option<AuthType>,
    authenticator_id: Option<Uuid>,
) -> Option<Uuid> {
    let mut candidates: Vec<_> = auth
        .authenticators
        .iter()
        .filter(|a| a.status == AuthenticatorStatus::Active && a.supports(purpose))
        .filter(|a| auth_type.is_none_or(|t| a.auth_type == t))
        .filter(|a| authenticator_id.is_none_or(|id| a.id == id))
        .collect();
    candidates.sort_by_key(|a| auth.preference_index(&a.id));
    candidates.first().map(|a| a.id)
}

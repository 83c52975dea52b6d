//! Request dispatch and the error boundary.
//!
//! Every inbound call is a method name plus JSON params. The dispatcher
//! authenticates the request, takes the per-entity write locks, routes to
//! the handler for the operation, and translates any failure into the
//! uniform error envelope.

pub mod account;
pub mod attachment;
pub mod auth;
pub mod invite;
pub mod key_store;
pub mod legacy;
pub mod mfa;
pub mod org;
pub mod vault;

use crate::error::{ErrorEnvelope, ServerError};
use crate::models::DeviceInfo;
use crate::services::Message;
use crate::Server;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Signed auth header binding a request to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAuth {
    pub session_id: Uuid,

    /// Client timestamp, milliseconds since the epoch. Checked against the
    /// anti-replay window.
    pub time: i64,

    /// HMAC-SHA256 over `session_id|time` with the session signing key.
    pub signature: String,
}

/// Inbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub auth: Option<RequestAuth>,
    #[serde(default)]
    pub device: Option<DeviceInfo>,
}

/// Outbound response envelope: exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl Response {
    fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    fn err(error: &ServerError) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }
}

/// The complete operation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    InitAuth,
    CreateSession,
    RevokeSession,
    StartAuthRequest,
    CompleteAuthRequest,
    UpdateAuth,
    RemoveTrustedDevice,
    StartRegisterAuthenticator,
    CompleteRegisterAuthenticator,
    DeleteAuthenticator,
    CreateAccount,
    GetAccount,
    GetAuthInfo,
    UpdateAccount,
    RecoverAccount,
    DeleteAccount,
    CreateOrg,
    GetOrg,
    UpdateOrg,
    DeleteOrg,
    GetVault,
    UpdateVault,
    CreateVault,
    DeleteVault,
    GetInvite,
    AcceptInvite,
    CreateAttachment,
    GetAttachment,
    DeleteAttachment,
    GetLegacyData,
    DeleteLegacyAccount,
    CreateKeyStoreEntry,
    GetKeyStoreEntry,
    DeleteKeyStoreEntry,
    /// Deprecated alias for startAuthRequest with the email type fixed.
    RequestMfaCode,
    /// Deprecated alias for completeAuthRequest with the email type fixed.
    RetrieveMfaToken,
}

impl Operation {
    pub fn from_method(method: &str) -> Option<Self> {
        Some(match method {
            "initAuth" => Operation::InitAuth,
            "createSession" => Operation::CreateSession,
            "revokeSession" => Operation::RevokeSession,
            "startAuthRequest" => Operation::StartAuthRequest,
            "completeAuthRequest" => Operation::CompleteAuthRequest,
            "updateAuth" => Operation::UpdateAuth,
            "removeTrustedDevice" => Operation::RemoveTrustedDevice,
            "startRegisterAuthenticator" => Operation::StartRegisterAuthenticator,
            "completeRegisterAuthenticator" => Operation::CompleteRegisterAuthenticator,
            "deleteAuthenticator" => Operation::DeleteAuthenticator,
            "createAccount" => Operation::CreateAccount,
            "getAccount" => Operation::GetAccount,
            "getAuthInfo" => Operation::GetAuthInfo,
            "updateAccount" => Operation::UpdateAccount,
            "recoverAccount" => Operation::RecoverAccount,
            "deleteAccount" => Operation::DeleteAccount,
            "createOrg" => Operation::CreateOrg,
            "getOrg" => Operation::GetOrg,
            "updateOrg" => Operation::UpdateOrg,
            "deleteOrg" => Operation::DeleteOrg,
            "getVault" => Operation::GetVault,
            "updateVault" => Operation::UpdateVault,
            "createVault" => Operation::CreateVault,
            "deleteVault" => Operation::DeleteVault,
            "getInvite" => Operation::GetInvite,
            "acceptInvite" => Operation::AcceptInvite,
            "createAttachment" => Operation::CreateAttachment,
            "getAttachment" => Operation::GetAttachment,
            "deleteAttachment" => Operation::DeleteAttachment,
            "getLegacyData" => Operation::GetLegacyData,
            "deleteLegacyAccount" => Operation::DeleteLegacyAccount,
            "createKeyStoreEntry" => Operation::CreateKeyStoreEntry,
            "getKeyStoreEntry" => Operation::GetKeyStoreEntry,
            "deleteKeyStoreEntry" => Operation::DeleteKeyStoreEntry,
            "requestMFACode" => Operation::RequestMfaCode,
            "retrieveMFAToken" => Operation::RetrieveMfaToken,
            _ => return None,
        })
    }
}

impl Server {
    /// Top-level entry point. Never panics or leaks internals: any failure
    /// becomes the uniform error envelope, and unrecognized failures are
    /// logged and optionally reported to the operator address.
    pub async fn handle(&self, request: Request) -> Response {
        let method = request.method.clone();
        match self.process(&request).await {
            Ok(result) => Response::ok(result),
            Err(err) => {
                if err.is_internal() {
                    tracing::error!(method = %method, error = ?err, "operation failed");
                    self.report_internal_error(&method, &err);
                } else {
                    tracing::debug!(method = %method, code = %err.code(), "operation rejected");
                }
                Response::err(&err)
            }
        }
    }

    async fn process(&self, request: &Request) -> Result<Value, ServerError> {
        let op = Operation::from_method(&request.method)
            .ok_or_else(|| ServerError::BadRequest(format!("unknown method: {}", request.method)))?;

        let mut ctx = self.authenticate(request).await?;

        // One in-flight mutating operation per account/org identity. The id
        // set is collected in a single step; the guard releases on drop even
        // when the handler fails.
        let mut lock_ids = ctx.lock_ids();
        // An invitee is not yet a member, so the target org sits outside the
        // membership-derived lock set.
        if op == Operation::AcceptInvite {
            if let Some(org_id) = request.params.get("org_id").and_then(Value::as_str) {
                lock_ids.push(org_id.to_string());
            }
        }
        let _guard = if lock_ids.is_empty() {
            None
        } else {
            Some(self.queue.acquire(lock_ids).await)
        };

        self.persist_session_info(&mut ctx).await?;
        self.dispatch(op, &mut ctx, request.params.clone()).await
    }

    async fn dispatch(
        &self,
        op: Operation,
        ctx: &mut crate::services::Context,
        params: Value,
    ) -> Result<Value, ServerError> {
        match op {
            Operation::InitAuth => to_result(auth::init_auth(self, ctx, parse(params)?).await?),
            Operation::CreateSession => {
                to_result(auth::create_session(self, ctx, parse(params)?).await?)
            }
            Operation::RevokeSession => {
                to_result(auth::revoke_session(self, ctx, parse(params)?).await?)
            }
            Operation::UpdateAuth => to_result(auth::update_auth(self, ctx, parse(params)?).await?),
            Operation::RemoveTrustedDevice => {
                to_result(auth::remove_trusted_device(self, ctx, parse(params)?).await?)
            }
            Operation::GetAuthInfo => to_result(auth::get_auth_info(self, ctx).await?),
            Operation::StartAuthRequest => {
                to_result(mfa::start_auth_request(self, ctx, parse(params)?).await?)
            }
            Operation::CompleteAuthRequest => {
                to_result(mfa::complete_auth_request(self, ctx, parse(params)?).await?)
            }
            Operation::StartRegisterAuthenticator => {
                to_result(mfa::start_register_authenticator(self, ctx, parse(params)?).await?)
            }
            Operation::CompleteRegisterAuthenticator => {
                to_result(mfa::complete_register_authenticator(self, ctx, parse(params)?).await?)
            }
            Operation::DeleteAuthenticator => {
                to_result(mfa::delete_authenticator(self, ctx, parse(params)?).await?)
            }
            Operation::RequestMfaCode => {
                to_result(mfa::request_mfa_code(self, ctx, parse(params)?).await?)
            }
            Operation::RetrieveMfaToken => {
                to_result(mfa::retrieve_mfa_token(self, ctx, parse(params)?).await?)
            }
            Operation::CreateAccount => {
                to_result(account::create_account(self, ctx, parse(params)?).await?)
            }
            Operation::GetAccount => to_result(account::get_account(self, ctx).await?),
            Operation::UpdateAccount => {
                to_result(account::update_account(self, ctx, parse(params)?).await?)
            }
            Operation::RecoverAccount => {
                to_result(account::recover_account(self, ctx, parse(params)?).await?)
            }
            Operation::DeleteAccount => to_result(account::delete_account(self, ctx).await?),
            Operation::CreateOrg => to_result(org::create_org(self, ctx, parse(params)?).await?),
            Operation::GetOrg => to_result(org::get_org(self, ctx, parse(params)?).await?),
            Operation::UpdateOrg => to_result(org::update_org(self, ctx, parse(params)?).await?),
            Operation::DeleteOrg => to_result(org::delete_org(self, ctx, parse(params)?).await?),
            Operation::CreateVault => {
                to_result(vault::create_vault(self, ctx, parse(params)?).await?)
            }
            Operation::GetVault => to_result(vault::get_vault(self, ctx, parse(params)?).await?),
            Operation::UpdateVault => {
                to_result(vault::update_vault(self, ctx, parse(params)?).await?)
            }
            Operation::DeleteVault => {
                to_result(vault::delete_vault(self, ctx, parse(params)?).await?)
            }
            Operation::GetInvite => to_result(invite::get_invite(self, ctx, parse(params)?).await?),
            Operation::AcceptInvite => {
                to_result(invite::accept_invite(self, ctx, parse(params)?).await?)
            }
            Operation::CreateAttachment => {
                to_result(attachment::create_attachment(self, ctx, parse(params)?).await?)
            }
            Operation::GetAttachment => {
                to_result(attachment::get_attachment(self, ctx, parse(params)?).await?)
            }
            Operation::DeleteAttachment => {
                to_result(attachment::delete_attachment(self, ctx, parse(params)?).await?)
            }
            Operation::GetLegacyData => {
                to_result(legacy::get_legacy_data(self, ctx, parse(params)?).await?)
            }
            Operation::DeleteLegacyAccount => {
                to_result(legacy::delete_legacy_account(self, ctx).await?)
            }
            Operation::CreateKeyStoreEntry => {
                to_result(key_store::create_key_store_entry(self, ctx, parse(params)?).await?)
            }
            Operation::GetKeyStoreEntry => {
                to_result(key_store::get_key_store_entry(self, ctx, parse(params)?).await?)
            }
            Operation::DeleteKeyStoreEntry => {
                to_result(key_store::delete_key_store_entry(self, ctx, parse(params)?).await?)
            }
        }
    }

    /// Fire-and-forget operator notification for wrapped internal errors.
    /// The client only ever sees the generic envelope.
    fn report_internal_error(&self, method: &str, err: &ServerError) {
        let Some(address) = self.config.report_errors.clone() else {
            return;
        };
        let messenger = self.messenger.clone();
        let message = Message::ErrorReport {
            operation: method.to_string(),
            message: format!("{:?}", err),
        };
        tokio::spawn(async move {
            if let Err(send_err) = messenger.send(&address, &message).await {
                tracing::warn!(error = %send_err, "failed to deliver error report");
            }
        });
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, ServerError> {
    serde_json::from_value(params).map_err(|e| ServerError::BadRequest(e.to_string()))
}

fn to_result<T: Serialize>(value: T) -> Result<Value, ServerError> {
    serde_json::to_value(value)
        .map_err(|e| ServerError::Internal(anyhow::anyhow!("response serialization: {}", e)))
}

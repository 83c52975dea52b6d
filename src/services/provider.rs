//! Pluggable multi-factor authenticator providers.
//!
//! One provider per authenticator type. Providers own the opaque state on
//! authenticators and requests; the core never interprets it.

use crate::error::ServerError;
use crate::models::{AuthRecord, AuthRequest, AuthType, Authenticator, AuthenticatorStatus};
use crate::services::messenger::{Message, Messenger};
use crate::utils::{generate_code, hash_code, secrets_equal};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn supports_type(&self, auth_type: AuthType) -> bool;

    /// Begin registration; may seed authenticator state and kick off an
    /// activation challenge. Returns data for the registering client.
    async fn init_authenticator(
        &self,
        authenticator: &mut Authenticator,
        auth: &AuthRecord,
        data: &Value,
    ) -> Result<Value, ServerError>;

    /// Finish registration, verifying whatever the activation challenge
    /// demanded.
    async fn activate_authenticator(
        &self,
        authenticator: &mut Authenticator,
        data: &Value,
    ) -> Result<Value, ServerError>;

    /// Start a verification request (e.g. deliver a one-time code).
    async fn init_auth_request(
        &self,
        authenticator: &Authenticator,
        request: &mut AuthRequest,
        data: &Value,
    ) -> Result<Value, ServerError>;

    /// Check the caller's answer; fails on mismatch.
    async fn verify_auth_request(
        &self,
        authenticator: &Authenticator,
        request: &mut AuthRequest,
        data: &Value,
    ) -> Result<(), ServerError>;
}

#[derive(Clone, Default)]
pub struct AuthProviderRegistry {
    providers: Vec<Arc<dyn AuthProvider>>,
}

impl AuthProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn AuthProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_for(&self, auth_type: AuthType) -> Result<&Arc<dyn AuthProvider>, ServerError> {
        self.providers
            .iter()
            .find(|p| p.supports_type(auth_type))
            .ok_or_else(|| {
                ServerError::NotSupported(format!(
                    "no provider registered for authenticator type {}",
                    auth_type
                ))
            })
    }
}

const CODE_LENGTH: usize = 6;

/// Verification attempts accepted before the provider refuses outright.
/// The core itself enforces no lockout; this is provider policy.
const MAX_TRIES: u32 = 5;

/// Built-in provider for the always-available email type: delivers a short
/// one-time code and stores only its hash.
pub struct EmailAuthProvider {
    messenger: Arc<dyn Messenger>,
}

impl EmailAuthProvider {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }

    fn email_for(authenticator: &Authenticator) -> Result<String, ServerError> {
        authenticator
            .state
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ServerError::Internal(anyhow::anyhow!("email authenticator without address"))
            })
    }

    fn check_code(stored_hash: Option<&Value>, data: &Value) -> Result<(), ServerError> {
        let presented = data
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| ServerError::BadRequest("missing verification code".to_string()))?;
        let expected = stored_hash
            .and_then(Value::as_str)
            .ok_or(ServerError::AuthenticationFailed)?;

        if !secrets_equal(hash_code(presented).as_bytes(), expected.as_bytes()) {
            return Err(ServerError::AuthenticationFailed);
        }
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for EmailAuthProvider {
    fn supports_type(&self, auth_type: AuthType) -> bool {
        auth_type == AuthType::Email
    }

    async fn init_authenticator(
        &self,
        authenticator: &mut Authenticator,
        auth: &AuthRecord,
        data: &Value,
    ) -> Result<Value, ServerError> {
        let email = data
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or(&auth.email)
            .to_string();

        let mut state = json!({ "email": email });

        // Ad-hoc authenticators are minted active and skip the activation
        // challenge; explicit registrations must confirm the address.
        if authenticator.status == AuthenticatorStatus::Registering {
            let code = generate_code(CODE_LENGTH);
            state["activation_code_hash"] = Value::String(hash_code(&code));
            self.messenger
                .send(
                    &email,
                    &Message::VerificationCode {
                        purpose: crate::models::AuthPurpose::TestAuthenticator,
                        code,
                    },
                )
                .await?;
        }

        authenticator.description.get_or_insert(email.clone());
        authenticator.state = state;
        Ok(json!({ "email": email }))
    }

    async fn activate_authenticator(
        &self,
        authenticator: &mut Authenticator,
        data: &Value,
    ) -> Result<Value, ServerError> {
        Self::check_code(authenticator.state.get("activation_code_hash"), data)?;
        if let Some(state) = authenticator.state.as_object_mut() {
            state.remove("activation_code_hash");
        }
        Ok(Value::Null)
    }

    async fn init_auth_request(
        &self,
        authenticator: &Authenticator,
        request: &mut AuthRequest,
        _data: &Value,
    ) -> Result<Value, ServerError> {
        let email = Self::email_for(authenticator)?;
        let code = generate_code(CODE_LENGTH);
        request.state = json!({ "code_hash": hash_code(&code) });

        self.messenger
            .send(
                &email,
                &Message::VerificationCode {
                    purpose: request.purpose,
                    code,
                },
            )
            .await?;

        Ok(json!({ "sent_to": email }))
    }

    async fn verify_auth_request(
        &self,
        _authenticator: &Authenticator,
        request: &mut AuthRequest,
        data: &Value,
    ) -> Result<(), ServerError> {
        if request.tries >= MAX_TRIES {
            return Err(ServerError::AuthenticationFailed);
        }
        Self::check_code(request.state.get("code_hash"), data)
    }
}

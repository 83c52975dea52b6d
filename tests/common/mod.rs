#![allow(dead_code)]

//! Shared test harness: an in-memory server wired to deterministic mock
//! collaborators, plus client-side helpers for the signup and login flows.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use blindvault::error::ServerError;
use blindvault::models::AuthRecord;
use blindvault::services::{
    AuthProvider, EmailAuthProvider, HandshakeChallenge, HandshakeKeys, MemoryAttachmentStorage,
    MemoryStorage, Message, Messenger, Provisioner, Provisioning, Srp, UnrestrictedProvisioner,
};
use blindvault::utils::generate_request_signature;
use blindvault::{Request, RequestAuth, Response, Server, ServerConfig};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn digest2(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().to_vec()
}

/// Deterministic SRP stand-in. The exchange state is the verifier itself, so
/// a test client holding the verifier can derive the same session key and
/// proof the server expects.
pub struct MockSrp;

impl Srp for MockSrp {
    fn initiate(&self, verifier: &[u8]) -> Result<HandshakeChallenge, ServerError> {
        Ok(HandshakeChallenge {
            server_public: digest2(b"server-public", verifier),
            state: verifier.to_vec(),
        })
    }

    fn complete(
        &self,
        state: &[u8],
        client_public: &[u8],
    ) -> Result<HandshakeKeys, ServerError> {
        // Like a real exchange, a degenerate public value is rejected
        // outright rather than yielding keys.
        if client_public.iter().all(|b| *b == 0) {
            return Err(ServerError::BadRequest(
                "illegal client public value".to_string(),
            ));
        }
        Ok(HandshakeKeys {
            session_key: digest2(state, client_public),
            expected_proof: digest2(client_public, state),
        })
    }
}

/// What a client holding the verifier would present as proof.
pub fn client_proof(verifier: &[u8], client_public: &[u8]) -> Vec<u8> {
    digest2(client_public, verifier)
}

/// The session signing key a client would derive from the exchange.
pub fn client_session_key(verifier: &[u8], client_public: &[u8]) -> Vec<u8> {
    digest2(verifier, client_public)
}

/// Messenger that captures deliveries for inspection and can be switched
/// into a failing mode to simulate an unreachable mail relay.
#[derive(Default)]
pub struct CapturingMessenger {
    pub sent: Mutex<Vec<(String, Message)>>,
    failing: AtomicBool,
}

#[async_trait::async_trait]
impl Messenger for CapturingMessenger {
    async fn send(&self, to: &str, message: &Message) -> Result<(), ServerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServerError::Internal(anyhow::anyhow!("relay unavailable")));
        }
        self.sent
            .lock()
            .expect("messenger lock")
            .push((to.to_string(), message.clone()));
        Ok(())
    }
}

impl CapturingMessenger {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The most recent verification code delivered to an address.
    pub fn last_code(&self, to: &str) -> Option<String> {
        self.sent
            .lock()
            .expect("messenger lock")
            .iter()
            .rev()
            .find_map(|(recipient, message)| match message {
                Message::VerificationCode { code, .. } if recipient == to => Some(code.clone()),
                _ => None,
            })
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .expect("messenger lock")
            .iter()
            .filter(|(_, m)| m.kind() == kind)
            .count()
    }
}

/// Provisioner returning one snapshot for everyone; tests can swap the
/// snapshot mid-flow to simulate plan changes.
pub struct FixedProvisioner {
    snapshot: Mutex<Provisioning>,
}

impl FixedProvisioner {
    pub fn new(snapshot: Provisioning) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn set(&self, snapshot: Provisioning) {
        *self.snapshot.lock().expect("provisioner lock") = snapshot;
    }
}

#[async_trait::async_trait]
impl Provisioner for FixedProvisioner {
    async fn get_provisioning(&self, _auth: &AuthRecord) -> Result<Provisioning, ServerError> {
        Ok(self.snapshot.lock().expect("provisioner lock").clone())
    }

    async fn account_deleted(&self, _auth: &AuthRecord) -> Result<(), ServerError> {
        Ok(())
    }
}

pub struct TestServer {
    pub server: Arc<Server>,
    pub messenger: Arc<CapturingMessenger>,
}

pub fn test_server() -> TestServer {
    test_server_with(Arc::new(UnrestrictedProvisioner))
}

pub fn test_server_with(provisioner: Arc<dyn Provisioner>) -> TestServer {
    build_server(ServerConfig::default(), provisioner)
}

pub fn test_server_with_config(config: ServerConfig) -> TestServer {
    build_server(config, Arc::new(UnrestrictedProvisioner))
}

fn build_server(config: ServerConfig, provisioner: Arc<dyn Provisioner>) -> TestServer {
    let messenger = Arc::new(CapturingMessenger::default());
    let providers: Vec<Arc<dyn AuthProvider>> =
        vec![Arc::new(EmailAuthProvider::new(messenger.clone()))];
    let server = Server::new(
        config,
        Arc::new(MemoryStorage::new()),
        Arc::new(MockSrp),
        messenger.clone(),
        provisioner,
        Arc::new(MemoryAttachmentStorage::new()),
        providers,
    );
    TestServer {
        server: Arc::new(server),
        messenger,
    }
}

pub fn request(method: &str, params: Value) -> Request {
    Request {
        method: method.to_string(),
        params,
        auth: None,
        device: None,
    }
}

/// Everything a test client needs to sign requests for a session.
pub struct SessionCreds {
    pub id: Uuid,
    pub key: Vec<u8>,
}

pub fn signed(method: &str, params: Value, creds: &SessionCreds) -> Request {
    signed_at(method, params, creds, chrono::Utc::now().timestamp_millis())
}

pub fn signed_at(method: &str, params: Value, creds: &SessionCreds, time: i64) -> Request {
    let signature =
        generate_request_signature(&creds.key, &creds.id, time).expect("signature generation");
    Request {
        method: method.to_string(),
        params,
        auth: Some(RequestAuth {
            session_id: creds.id,
            time,
            signature,
        }),
        device: None,
    }
}

pub fn ok(response: Response) -> Value {
    if let Some(error) = &response.error {
        panic!("unexpected error: {} ({})", error.code, error.message);
    }
    response.result.expect("missing result")
}

pub fn err_code(response: Response) -> String {
    response.error.expect("expected an error").code
}

/// Fixed verifier all test accounts share; the mock exchange derives
/// everything from it.
pub const VERIFIER: &[u8] = b"mock-verifier-bytes";

/// Run an email verification round for the purpose, returning the token.
pub async fn verify_email(ts: &TestServer, email: &str, purpose: &str) -> String {
    let started = ok(ts
        .server
        .handle(request(
            "startAuthRequest",
            json!({ "email": email, "purpose": purpose }),
        ))
        .await);
    let id = started["id"].as_str().expect("request id").to_string();
    let code = ts.messenger.last_code(email).expect("verification code sent");
    let completed = ok(ts
        .server
        .handle(request(
            "completeAuthRequest",
            json!({ "email": email, "id": id, "data": { "code": code } }),
        ))
        .await);
    completed["token"].as_str().expect("token").to_string()
}

pub async fn signup(ts: &TestServer, email: &str, name: &str) -> Value {
    let token = verify_email(ts, email, "signup").await;
    ok(ts
        .server
        .handle(request(
            "createAccount",
            json!({
                "email": email,
                "name": name,
                "public_key": format!("pk-{}", email),
                "verifier": BASE64.encode(VERIFIER),
                "verify": token,
            }),
        ))
        .await)
}

pub async fn login(ts: &TestServer, email: &str) -> SessionCreds {
    let token = verify_email(ts, email, "login").await;
    let init = ok(ts
        .server
        .handle(request("initAuth", json!({ "email": email, "verify": token })))
        .await);

    let client_public = b"client-public".to_vec();
    let proof = client_proof(VERIFIER, &client_public);
    let session = ok(ts
        .server
        .handle(request(
            "createSession",
            json!({
                "account_id": init["account_id"],
                "handshake_id": init["handshake_id"],
                "client_public": BASE64.encode(&client_public),
                "proof": BASE64.encode(&proof),
            }),
        ))
        .await);

    let id = session["id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .expect("session id");
    SessionCreds {
        id,
        key: client_session_key(VERIFIER, &client_public),
    }
}

//! Login handshake behavior: the verification gate, proof failure handling,
//! and secret hygiene in responses.

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::*;
use serde_json::json;

#[tokio::test]
async fn init_auth_requires_email_verification() {
    let ts = test_server();
    signup(&ts, "gate@example.com", "Gate").await;

    let response = ts
        .server
        .handle(request("initAuth", json!({ "email": "gate@example.com" })))
        .await;
    assert_eq!(err_code(response), "authentication_required");
}

#[tokio::test]
async fn init_auth_hides_unregistered_emails_behind_the_gate() {
    let ts = test_server();

    // Without a verified token the answer is the same for registered and
    // unregistered addresses.
    let response = ts
        .server
        .handle(request("initAuth", json!({ "email": "ghost@example.com" })))
        .await;
    assert_eq!(err_code(response), "authentication_required");

    // Only after proving inbox control does the caller learn nothing is
    // registered here.
    let token = verify_email(&ts, "ghost@example.com", "login").await;
    let response = ts
        .server
        .handle(request(
            "initAuth",
            json!({ "email": "ghost@example.com", "verify": token }),
        ))
        .await;
    assert_eq!(err_code(response), "not_found");
}

#[tokio::test]
async fn wrong_proof_fails_and_leaves_handshake_retryable() {
    let ts = test_server();
    signup(&ts, "retry@example.com", "Retry").await;

    let token = verify_email(&ts, "retry@example.com", "login").await;
    let init = ok(ts
        .server
        .handle(request(
            "initAuth",
            json!({ "email": "retry@example.com", "verify": token }),
        ))
        .await);

    let client_public = b"client-public".to_vec();
    let response = ts
        .server
        .handle(request(
            "createSession",
            json!({
                "account_id": init["account_id"],
                "handshake_id": init["handshake_id"],
                "client_public": BASE64.encode(&client_public),
                "proof": BASE64.encode(b"not-the-proof"),
            }),
        ))
        .await;
    assert_eq!(err_code(response), "invalid_credentials");

    // Same handshake, correct proof: still valid.
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
    assert!(session["id"].is_string());
}

#[tokio::test]
async fn create_session_response_never_contains_the_signing_key() {
    let ts = test_server();
    signup(&ts, "hygiene@example.com", "Hygiene").await;

    let token = verify_email(&ts, "hygiene@example.com", "login").await;
    let init = ok(ts
        .server
        .handle(request(
            "initAuth",
            json!({ "email": "hygiene@example.com", "verify": token }),
        ))
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

    assert!(session.get("key").is_none());
    assert!(session["account_id"].is_string());
}

#[tokio::test]
async fn unknown_account_and_unknown_handshake_are_indistinguishable() {
    let ts = test_server();
    let account = signup(&ts, "known@example.com", "Known").await;

    let bogus = json!({
        "account_id": uuid::Uuid::new_v4(),
        "handshake_id": uuid::Uuid::new_v4(),
        "client_public": BASE64.encode(b"x"),
        "proof": BASE64.encode(b"y"),
    });
    let response = ts.server.handle(request("createSession", bogus)).await;
    assert_eq!(err_code(response), "invalid_credentials");

    let bad_handshake = json!({
        "account_id": account["id"],
        "handshake_id": uuid::Uuid::new_v4(),
        "client_public": BASE64.encode(b"x"),
        "proof": BASE64.encode(b"y"),
    });
    let response = ts.server.handle(request("createSession", bad_handshake)).await;
    assert_eq!(err_code(response), "invalid_credentials");
}

#[tokio::test]
async fn malformed_public_value_fails_like_a_wrong_proof() {
    let ts = test_server();
    signup(&ts, "zero@example.com", "Zero").await;

    let token = verify_email(&ts, "zero@example.com", "login").await;
    let init = ok(ts
        .server
        .handle(request(
            "initAuth",
            json!({ "email": "zero@example.com", "verify": token }),
        ))
        .await);

    // The exchange primitive rejects a degenerate public value outright;
    // the caller must not be able to tell that apart from a bad proof.
    let response = ts
        .server
        .handle(request(
            "createSession",
            json!({
                "account_id": init["account_id"],
                "handshake_id": init["handshake_id"],
                "client_public": BASE64.encode([0u8; 32]),
                "proof": BASE64.encode(b"whatever"),
            }),
        ))
        .await;
    assert_eq!(err_code(response), "invalid_credentials");
}

#[tokio::test]
async fn login_token_is_single_use() {
    let ts = test_server();
    signup(&ts, "once@example.com", "Once").await;

    let token = verify_email(&ts, "once@example.com", "login").await;
    ok(ts
        .server
        .handle(request(
            "initAuth",
            json!({ "email": "once@example.com", "verify": token.clone() }),
        ))
        .await);

    let response = ts
        .server
        .handle(request(
            "initAuth",
            json!({ "email": "once@example.com", "verify": token }),
        ))
        .await;
    assert_eq!(err_code(response), "authentication_required");
}

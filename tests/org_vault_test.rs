//! Org and vault authorization end to end: membership via invites, role
//! gates, revision checks, provisioning gates, cascades, and propagation of
//! denormalized org identity.

mod common;

use blindvault::services::{
    AccountProvisioning, AccountQuota, OrgProvisioning, OrgQuota, Provisioning,
    ProvisioningStatus,
};
use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

fn unrestricted_snapshot() -> Provisioning {
    Provisioning {
        account: AccountProvisioning {
            status: ProvisioningStatus::Active,
            quota: AccountQuota::default(),
        },
        orgs: Vec::new(),
        vaults: Vec::new(),
    }
}

/// Invite an email into an org, accept as that account, and finalize the
/// membership as the owner. Returns the updated org document.
async fn add_member(
    ts: &TestServer,
    owner: &SessionCreds,
    org_id: &Value,
    member_email: &str,
    member: &SessionCreds,
    vault_assignments: Value,
) -> Value {
    let org = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org_id }), owner))
        .await);

    let invite_id = Uuid::new_v4();
    let now = serde_json::to_value(chrono::Utc::now()).expect("timestamp");
    let expires =
        serde_json::to_value(chrono::Utc::now() + chrono::Duration::hours(72)).expect("timestamp");

    let mut update = org.clone();
    update["invites"] = json!([{
        "id": invite_id,
        "org_id": org["id"],
        "org_name": org["name"],
        "email": member_email,
        "accepted": false,
        "created_at": now,
        "expires": expires,
    }]);
    let org = ok(ts.server.handle(signed("updateOrg", update, owner)).await);

    ok(ts
        .server
        .handle(signed(
            "acceptInvite",
            json!({ "org_id": org["id"], "id": invite_id }),
            member,
        ))
        .await);

    let org = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org_id }), owner))
        .await);
    let member_account = ok(ts.server.handle(signed("getAccount", Value::Null, member)).await);

    let mut update = org.clone();
    let mut members = org["members"].as_array().expect("members").clone();
    members.push(json!({
        "account_id": member_account["id"],
        "email": member_email,
        "name": member_account["name"],
        "role": "member",
        "public_key": member_account["public_key"],
        "vaults": vault_assignments,
        "updated_at": serde_json::to_value(chrono::Utc::now()).expect("timestamp"),
    }));
    update["members"] = Value::Array(members);
    update["invites"] = json!([]);
    ok(ts.server.handle(signed("updateOrg", update, owner)).await)
}

#[tokio::test]
async fn org_and_vault_reads_are_hidden_from_outsiders() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    signup(&ts, "outsider@example.com", "Outsider").await;
    let owner = login(&ts, "owner@example.com").await;
    let outsider = login(&ts, "outsider@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Acme" }), &owner))
        .await);
    let vault = ok(ts
        .server
        .handle(signed(
            "createVault",
            json!({ "org_id": org["id"], "name": "Shared" }),
            &owner,
        ))
        .await);

    let response = ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &outsider))
        .await;
    assert_eq!(err_code(response), "not_found");

    let response = ts
        .server
        .handle(signed("getVault", json!({ "id": vault["id"] }), &outsider))
        .await;
    assert_eq!(err_code(response), "not_found");
}

#[tokio::test]
async fn read_only_members_can_read_but_not_write() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    signup(&ts, "reader@example.com", "Reader").await;
    let owner = login(&ts, "owner@example.com").await;
    let reader = login(&ts, "reader@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Acme" }), &owner))
        .await);
    let vault = ok(ts
        .server
        .handle(signed(
            "createVault",
            json!({ "org_id": org["id"], "name": "Shared" }),
            &owner,
        ))
        .await);

    add_member(
        &ts,
        &owner,
        &org["id"],
        "reader@example.com",
        &reader,
        json!([{ "vault_id": vault["id"], "read_only": true }]),
    )
    .await;

    let fetched = ok(ts
        .server
        .handle(signed("getVault", json!({ "id": vault["id"] }), &reader))
        .await);

    let response = ts
        .server
        .handle(signed(
            "updateVault",
            json!({
                "id": vault["id"],
                "revision": fetched["revision"],
                "encrypted_data": "bmV3LWRhdGE=",
            }),
            &reader,
        ))
        .await;
    assert_eq!(err_code(response), "insufficient_permissions");
}

#[tokio::test]
async fn members_cannot_rename_the_org() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    signup(&ts, "member@example.com", "Member").await;
    let owner = login(&ts, "owner@example.com").await;
    let member = login(&ts, "member@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Acme" }), &owner))
        .await);
    add_member(&ts, &owner, &org["id"], "member@example.com", &member, json!([])).await;

    let mut update = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &member))
        .await);
    update["name"] = json!("Hostile Takeover");
    let response = ts.server.handle(signed("updateOrg", update, &member)).await;
    assert_eq!(err_code(response), "insufficient_permissions");
}

#[tokio::test]
async fn stale_org_revision_is_rejected() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    let owner = login(&ts, "owner@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Acme" }), &owner))
        .await);
    let stale = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &owner))
        .await);

    let mut first = stale.clone();
    first["name"] = json!("Acme One");
    ok(ts.server.handle(signed("updateOrg", first, &owner)).await);

    let mut second = stale;
    second["name"] = json!("Acme Two");
    let response = ts.server.handle(signed("updateOrg", second, &owner)).await;
    assert_eq!(err_code(response), "outdated_revision");
}

#[tokio::test]
async fn org_rename_propagates_to_member_accounts_and_vaults() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    signup(&ts, "member@example.com", "Member").await;
    let owner = login(&ts, "owner@example.com").await;
    let member = login(&ts, "member@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Acme" }), &owner))
        .await);
    let vault = ok(ts
        .server
        .handle(signed(
            "createVault",
            json!({ "org_id": org["id"], "name": "Shared" }),
            &owner,
        ))
        .await);
    add_member(
        &ts,
        &owner,
        &org["id"],
        "member@example.com",
        &member,
        json!([{ "vault_id": vault["id"], "read_only": false }]),
    )
    .await;

    let mut update = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &owner))
        .await);
    update["name"] = json!("Acme Renamed");
    ok(ts.server.handle(signed("updateOrg", update, &owner)).await);

    let member_account = ok(ts
        .server
        .handle(signed("getAccount", Value::Null, &member))
        .await);
    assert_eq!(member_account["orgs"][0]["name"], "Acme Renamed");

    let fetched_vault = ok(ts
        .server
        .handle(signed("getVault", json!({ "id": vault["id"] }), &member))
        .await);
    assert_eq!(fetched_vault["org"]["name"], "Acme Renamed");
}

#[tokio::test]
async fn vault_rename_advances_the_org_revision() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    let owner = login(&ts, "owner@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Acme" }), &owner))
        .await);
    let vault = ok(ts
        .server
        .handle(signed(
            "createVault",
            json!({ "org_id": org["id"], "name": "Old Name" }),
            &owner,
        ))
        .await);
    let stale = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &owner))
        .await);

    let fetched = ok(ts
        .server
        .handle(signed("getVault", json!({ "id": vault["id"] }), &owner))
        .await);
    ok(ts
        .server
        .handle(signed(
            "updateVault",
            json!({
                "id": vault["id"],
                "revision": fetched["revision"],
                "name": "New Name",
            }),
            &owner,
        ))
        .await);

    // The pre-rename org document is now stale; replaying it must not
    // silently revert the vault entry.
    let response = ts.server.handle(signed("updateOrg", stale, &owner)).await;
    assert_eq!(err_code(response), "outdated_revision");

    let current = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &owner))
        .await);
    assert_eq!(current["vaults"][0]["name"], "New Name");
}

#[tokio::test]
async fn notification_failures_do_not_fail_committed_updates() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    signup(&ts, "invitee@example.com", "Invitee").await;
    let owner = login(&ts, "owner@example.com").await;
    let invitee = login(&ts, "invitee@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Acme" }), &owner))
        .await);

    ts.messenger.set_failing(true);

    let invite_id = Uuid::new_v4();
    let mut update = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &owner))
        .await);
    update["invites"] = json!([{
        "id": invite_id,
        "org_id": org["id"],
        "org_name": "Acme",
        "email": "invitee@example.com",
        "accepted": false,
        "created_at": serde_json::to_value(chrono::Utc::now()).expect("timestamp"),
    }]);
    ok(ts.server.handle(signed("updateOrg", update, &owner)).await);

    // The acceptance notification fails too; the acceptance still sticks.
    let params = json!({ "org_id": org["id"], "id": invite_id });
    ok(ts.server.handle(signed("acceptInvite", params, &invitee)).await);

    let current = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &owner))
        .await);
    assert_eq!(current["invites"][0]["accepted"], true);
}

#[tokio::test]
async fn added_invites_get_a_default_expiry() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    let owner = login(&ts, "owner@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Acme" }), &owner))
        .await);

    let mut update = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &owner))
        .await);
    update["invites"] = json!([{
        "id": Uuid::new_v4(),
        "org_id": org["id"],
        "org_name": "Acme",
        "email": "someone@example.com",
        "accepted": false,
        "created_at": serde_json::to_value(chrono::Utc::now()).expect("timestamp"),
    }]);
    let updated = ok(ts.server.handle(signed("updateOrg", update, &owner)).await);

    let expires: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(updated["invites"][0]["expires"].clone()).expect("expiry");
    assert!(expires > chrono::Utc::now());
}

#[tokio::test]
async fn org_quota_counts_ownership_not_membership() {
    let provisioner = Arc::new(FixedProvisioner::new(Provisioning {
        account: AccountProvisioning {
            status: ProvisioningStatus::Active,
            quota: AccountQuota { orgs: 1 },
        },
        orgs: Vec::new(),
        vaults: Vec::new(),
    }));
    let ts = test_server_with(provisioner);
    signup(&ts, "owner@example.com", "Owner").await;
    signup(&ts, "joiner@example.com", "Joiner").await;
    let owner = login(&ts, "owner@example.com").await;
    let joiner = login(&ts, "joiner@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Theirs" }), &owner))
        .await);
    add_member(&ts, &owner, &org["id"], "joiner@example.com", &joiner, json!([])).await;

    // Membership in one org does not count against the caller's own quota.
    ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Mine" }), &joiner))
        .await);

    let response = ts
        .server
        .handle(signed("createOrg", json!({ "name": "Another" }), &joiner))
        .await;
    assert_eq!(err_code(response), "provisioning_quota_exceeded");
}

#[tokio::test]
async fn quota_exhaustion_and_frozen_status_fail_distinctly() {
    let provisioner = Arc::new(FixedProvisioner::new(Provisioning {
        account: AccountProvisioning {
            status: ProvisioningStatus::Active,
            quota: AccountQuota { orgs: 1 },
        },
        orgs: Vec::new(),
        vaults: Vec::new(),
    }));
    let ts = test_server_with(provisioner.clone());
    signup(&ts, "limited@example.com", "Limited").await;
    let creds = login(&ts, "limited@example.com").await;

    ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "First" }), &creds))
        .await);

    // Numeric limit: quota error.
    let response = ts
        .server
        .handle(signed("createOrg", json!({ "name": "Second" }), &creds))
        .await;
    assert_eq!(err_code(response), "provisioning_quota_exceeded");

    // Status problem: a different, non-numeric rejection.
    provisioner.set(Provisioning {
        account: AccountProvisioning {
            status: ProvisioningStatus::Frozen,
            quota: AccountQuota { orgs: -1 },
        },
        orgs: Vec::new(),
        vaults: Vec::new(),
    });
    let response = ts
        .server
        .handle(signed("createOrg", json!({ "name": "Third" }), &creds))
        .await;
    assert_eq!(err_code(response), "provisioning_not_allowed");
}

#[tokio::test]
async fn frozen_accounts_can_still_read_their_vaults() {
    let provisioner = Arc::new(FixedProvisioner::new(unrestricted_snapshot()));
    let ts = test_server_with(provisioner.clone());
    let account = signup(&ts, "cold@example.com", "Cold").await;
    let creds = login(&ts, "cold@example.com").await;
    let vault_id = account["main_vault"].clone();

    let mut frozen = unrestricted_snapshot();
    frozen.account.status = ProvisioningStatus::Frozen;
    provisioner.set(frozen);

    let vault = ok(ts
        .server
        .handle(signed("getVault", json!({ "id": vault_id }), &creds))
        .await);

    let response = ts
        .server
        .handle(signed(
            "updateVault",
            json!({
                "id": vault_id,
                "revision": vault["revision"],
                "encrypted_data": "ZnJvemVu",
            }),
            &creds,
        ))
        .await;
    assert_eq!(err_code(response), "provisioning_not_allowed");
}

#[tokio::test]
async fn org_vault_quota_gates_creation() {
    let provisioner = Arc::new(FixedProvisioner::new(unrestricted_snapshot()));
    let ts = test_server_with(provisioner.clone());
    signup(&ts, "vaultcap@example.com", "VaultCap").await;
    let creds = login(&ts, "vaultcap@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Capped" }), &creds))
        .await);
    let org_id = Uuid::parse_str(org["id"].as_str().expect("org id")).expect("uuid");

    let mut snapshot = unrestricted_snapshot();
    snapshot.orgs.push(OrgProvisioning {
        org_id,
        status: ProvisioningStatus::Active,
        quota: OrgQuota {
            members: -1,
            groups: -1,
            vaults: 1,
        },
    });
    provisioner.set(snapshot);

    ok(ts
        .server
        .handle(signed(
            "createVault",
            json!({ "org_id": org["id"], "name": "One" }),
            &creds,
        ))
        .await);
    let response = ts
        .server
        .handle(signed(
            "createVault",
            json!({ "org_id": org["id"], "name": "Two" }),
            &creds,
        ))
        .await;
    assert_eq!(err_code(response), "provisioning_quota_exceeded");
}

#[tokio::test]
async fn deleting_an_org_cascades_through_vaults_and_memberships() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    signup(&ts, "member@example.com", "Member").await;
    let owner = login(&ts, "owner@example.com").await;
    let member = login(&ts, "member@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Doomed" }), &owner))
        .await);
    let vault = ok(ts
        .server
        .handle(signed(
            "createVault",
            json!({ "org_id": org["id"], "name": "Shared" }),
            &owner,
        ))
        .await);
    add_member(
        &ts,
        &owner,
        &org["id"],
        "member@example.com",
        &member,
        json!([{ "vault_id": vault["id"], "read_only": false }]),
    )
    .await;

    // Non-owners cannot delete.
    let response = ts
        .server
        .handle(signed("deleteOrg", json!({ "id": org["id"] }), &member))
        .await;
    assert_eq!(err_code(response), "insufficient_permissions");

    ok(ts
        .server
        .handle(signed("deleteOrg", json!({ "id": org["id"] }), &owner))
        .await);

    let response = ts
        .server
        .handle(signed("getVault", json!({ "id": vault["id"] }), &owner))
        .await;
    assert_eq!(err_code(response), "not_found");

    let member_account = ok(ts
        .server
        .handle(signed("getAccount", Value::Null, &member))
        .await);
    assert_eq!(member_account["orgs"].as_array().expect("orgs").len(), 0);
}

#[tokio::test]
async fn invites_are_visible_only_to_admins_and_the_invitee() {
    let ts = test_server();
    signup(&ts, "owner@example.com", "Owner").await;
    signup(&ts, "invitee@example.com", "Invitee").await;
    signup(&ts, "bystander@example.com", "Bystander").await;
    let owner = login(&ts, "owner@example.com").await;
    let invitee = login(&ts, "invitee@example.com").await;
    let bystander = login(&ts, "bystander@example.com").await;

    let org = ok(ts
        .server
        .handle(signed("createOrg", json!({ "name": "Acme" }), &owner))
        .await);

    let invite_id = Uuid::new_v4();
    let mut update = ok(ts
        .server
        .handle(signed("getOrg", json!({ "id": org["id"] }), &owner))
        .await);
    update["invites"] = json!([{
        "id": invite_id,
        "org_id": org["id"],
        "org_name": "Acme",
        "email": "invitee@example.com",
        "accepted": false,
        "created_at": serde_json::to_value(chrono::Utc::now()).expect("timestamp"),
        "expires": serde_json::to_value(chrono::Utc::now() + chrono::Duration::hours(72)).expect("timestamp"),
    }]);
    ok(ts.server.handle(signed("updateOrg", update, &owner)).await);
    assert_eq!(ts.messenger.count_kind("invite_received"), 1);

    let params = json!({ "org_id": org["id"], "id": invite_id });
    ok(ts
        .server
        .handle(signed("getInvite", params.clone(), &invitee))
        .await);
    let response = ts
        .server
        .handle(signed("getInvite", params.clone(), &bystander))
        .await;
    assert_eq!(err_code(response), "not_found");

    // Only the invited address can accept.
    let response = ts
        .server
        .handle(signed("acceptInvite", params.clone(), &bystander))
        .await;
    assert_eq!(err_code(response), "not_found");

    ok(ts.server.handle(signed("acceptInvite", params, &invitee)).await);
    assert_eq!(ts.messenger.count_kind("invite_accepted"), 1);
}

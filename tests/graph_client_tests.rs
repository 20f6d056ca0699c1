//! Integration tests for the Graph client and the per-user operations
//!
//! Uses wiremock to simulate Graph responses and verify throttling signals,
//! error propagation, pagination and the operations' decisions.

use entra_bulk::cmd::group::GroupSyncOperation;
use entra_bulk::cmd::mfa::{MfaDisableOperation, MfaExportOperation};
use entra_bulk::cmd::password::PasswordResetOperation;
use entra_bulk::cmd::run::list_users_retrying;
use entra_bulk::engine::{
    BackoffPolicy, EngineConfig, ItemOperation, ItemOutcome, RawRecord, RetryingInvoker, WorkItem,
};
use entra_bulk::error::BulkError;
use entra_bulk::graph::GraphClient;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup() -> (MockServer, Arc<GraphClient>) {
    let server = MockServer::start().await;
    let client = GraphClient::with_base_urls(
        "test-token".into(),
        &format!("{}/v1.0", server.uri()),
        &format!("{}/beta", server.uri()),
    );
    (server, Arc::new(client))
}

fn user(upn: &str, id: &str) -> WorkItem {
    WorkItem::new(upn).with_resolved_key(id)
}

#[tokio::test]
async fn test_get_sends_bearer_token() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/abc"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "abc" })))
        .expect(1)
        .mount(&server)
        .await;

    let body: serde_json::Value = client.get("users/abc").await.unwrap();
    assert_eq!(body["id"], "abc");
}

#[tokio::test]
async fn test_rate_limit_maps_to_throttled_with_retry_after() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "7"))
        .expect(1) // Not retried by the client itself
        .mount(&server)
        .await;

    let err = client.get::<serde_json::Value>("users").await.unwrap_err();
    assert!(err.is_throttled());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_invoker_absorbs_throttling() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/abc"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "abc" })))
        .expect(1)
        .mount(&server)
        .await;

    let invoker = RetryingInvoker::new(5, BackoffPolicy::immediate());
    let body: serde_json::Value = invoker
        .invoke("abc", || client.get("users/abc"))
        .await
        .unwrap();
    assert_eq!(body["id"], "abc");
}

#[tokio::test]
async fn test_invoker_gives_up_after_max_retries() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/abc"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let invoker = RetryingInvoker::new(2, BackoffPolicy::immediate());
    let err = invoker
        .invoke("abc", || client.get::<serde_json::Value>("users/abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, BulkError::ThrottleExhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/missing@contoso.com"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "code": "Request_ResourceNotFound",
                "message": "Resource 'missing@contoso.com' does not exist"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let invoker = RetryingInvoker::new(5, BackoffPolicy::immediate());
    let err = invoker
        .invoke("missing", || {
            client.get::<serde_json::Value>("users/missing@contoso.com")
        })
        .await
        .unwrap_err();

    match err {
        BulkError::GraphApiError(msg) => {
            assert!(msg.contains("404"));
            assert!(msg.contains("does not exist"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_retried_then_succeeds() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let body: serde_json::Value = client.get("flaky").await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_delete_accepts_no_content() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g1/members/u1/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.remove_group_member("g1", "u1").await.unwrap();
}

#[tokio::test]
async fn test_pagination_follows_next_link() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "1", "userPrincipalName": "a@contoso.com" }],
            "@odata.nextLink": format!("{}/v1.0/users-page2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users-page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "2", "userPrincipalName": "b@contoso.com" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let users = client.list_users().await.unwrap();
    let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_listing_restarts_after_throttled_page() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "1", "userPrincipalName": "a@contoso.com" }],
            "@odata.nextLink": format!("{}/v1.0/users-page2", server.uri())
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users-page2"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users-page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "2", "userPrincipalName": "b@contoso.com" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = EngineConfig {
        max_retries: 3,
        ..EngineConfig::immediate()
    };
    let users = list_users_retrying(&client, &config).await.unwrap();
    let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_listing_gives_up_when_throttling_persists() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let config = EngineConfig {
        max_retries: 2,
        ..EngineConfig::immediate()
    };
    let err = list_users_retrying(&client, &config).await.unwrap_err();
    assert!(matches!(err, BulkError::ThrottleExhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn test_resolve_user_id_uses_key_or_looks_up() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/jane_fabrikam.com%23EXT%23%40contoso.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "guest-1" })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/o%27neil%2Bops%26it%40contoso.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "oneil-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let known = user("a@contoso.com", "id-a");
    assert_eq!(client.resolve_user_id(&known).await.unwrap(), "id-a");

    let guest = WorkItem::new("jane_fabrikam.com#EXT#@contoso.com");
    assert_eq!(client.resolve_user_id(&guest).await.unwrap(), "guest-1");

    let reserved = WorkItem::new(" o'neil+ops&it@contoso.com ");
    assert_eq!(client.resolve_user_id(&reserved).await.unwrap(), "oneil-1");
}

#[tokio::test]
async fn test_mfa_export_reports_state() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/beta/users/u1/authentication/requirements"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "perUserMfaState": "enforced" })),
        )
        .mount(&server)
        .await;

    let outcome = MfaExportOperation::new(client)
        .execute(&user("a@contoso.com", "u1"))
        .await
        .unwrap();
    assert_eq!(outcome, ItemOutcome::completed_with("enforced"));
}

#[tokio::test]
async fn test_mfa_disable_skips_already_disabled() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/beta/users/u1/authentication/requirements"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "perUserMfaState": "disabled" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = MfaDisableOperation::new(client)
        .execute(&user("a@contoso.com", "u1"))
        .await
        .unwrap();
    assert!(matches!(outcome, ItemOutcome::Skipped { .. }));
}

#[tokio::test]
async fn test_mfa_disable_patches_enabled_user() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/beta/users/u1/authentication/requirements"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "perUserMfaState": "enabled" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/beta/users/u1/authentication/requirements"))
        .and(body_json(json!({ "perUserMfaState": "disabled" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = MfaDisableOperation::new(client)
        .execute(&user("a@contoso.com", "u1"))
        .await
        .unwrap();
    assert_eq!(outcome, ItemOutcome::completed_with("enabled -> disabled"));
}

async fn mount_registration(server: &MockServer, id: &str, capable: bool) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/v1.0/reports/authenticationMethods/userRegistrationDetails/{}",
            id
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "isMfaCapable": capable,
            "isMfaRegistered": capable,
            "methodsRegistered": []
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_group_sync_decisions() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g1/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "member-capable" }, { "id": "member-incapable" }]
        })))
        .expect(1) // Fetched once, shared by every item
        .mount(&server)
        .await;
    mount_registration(&server, "new-capable", true).await;
    mount_registration(&server, "member-capable", true).await;
    mount_registration(&server, "member-incapable", false).await;
    mount_registration(&server, "new-incapable", false).await;

    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g1/members/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g1/members/member-incapable/$ref"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let op = GroupSyncOperation::new(client, "g1", true);

    let added = op.execute(&user("a", "new-capable")).await.unwrap();
    assert_eq!(added, ItemOutcome::completed_with("added"));

    let member = op.execute(&user("b", "member-capable")).await.unwrap();
    assert!(matches!(member, ItemOutcome::Skipped { .. }));

    let removed = op.execute(&user("c", "member-incapable")).await.unwrap();
    assert_eq!(removed, ItemOutcome::completed_with("removed, not MFA capable"));

    let ignored = op.execute(&user("d", "new-incapable")).await.unwrap();
    assert_eq!(ignored, ItemOutcome::skipped("not MFA capable"));
}

#[tokio::test]
async fn test_password_reset_uses_supplied_password() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/v1.0/users/u1"))
        .and(body_json(json!({
            "passwordProfile": {
                "password": "Correct-Horse-9",
                "forceChangePasswordNextSignIn": true
            }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let headers = Arc::new(vec!["ObjectId".to_string(), "Password".to_string()]);
    let item = WorkItem::new("u1")
        .with_resolved_key("u1")
        .with_raw_record(RawRecord::new(
            headers,
            vec!["u1".into(), "Correct-Horse-9".into()],
        ));

    let outcome = PasswordResetOperation::new(client, true, true, 16)
        .execute(&item)
        .await
        .unwrap();
    assert_eq!(outcome, ItemOutcome::completed_with("password from input set"));
}

#[tokio::test]
async fn test_password_reset_reveals_generated_password_on_request() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/v1.0/users/u1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let item = user("a@contoso.com", "u1");

    let hidden = PasswordResetOperation::new(client.clone(), false, false, 16)
        .execute(&item)
        .await
        .unwrap();
    assert_eq!(hidden, ItemOutcome::completed_with("generated password set"));

    let revealed = PasswordResetOperation::new(client, false, true, 16)
        .execute(&item)
        .await
        .unwrap();
    match revealed {
        ItemOutcome::Completed { detail: Some(detail) } => {
            assert!(detail.starts_with("password: "));
            assert_eq!(detail.len(), "password: ".len() + 16);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

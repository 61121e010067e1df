//! Tests for the E37 backend.

use assert_matches::assert_matches;
use serde_json::json;
use storex::testonly::{MockResponse, MockServer, RecordedRequest};

use super::*;
use crate::testonly::collect_named;

const TOKEN: &str = "eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9.e37";

fn e37_backend(request: &RecordedRequest) -> MockResponse {
    if request.path == LOGIN_PATH {
        let body = request.json();
        return if body["username"] == "admin" && body["password"] == "admin" {
            MockResponse::json_with_status(
                StatusCode::CREATED,
                &json!({ "token": TOKEN, "username": "admin", "permissions": {} }),
            )
        } else {
            MockResponse::json_with_status(
                StatusCode::BAD_REQUEST,
                &json!({ "detail": "Invalid credentials" }),
            )
        };
    }
    let expected_authorization = format!("Bearer {TOKEN}");
    if request.header("authorization") != Some(expected_authorization.as_str()) {
        return MockResponse::json_with_status(StatusCode::UNAUTHORIZED, &json!({}));
    }

    match request.path.as_str() {
        TOKEN_CHECK_PATH => {
            if request.json()["token"] == TOKEN {
                MockResponse::json(&json!({ "username": "admin", "permissions": {} }))
            } else {
                MockResponse::json(&json!({ "login_url": "#/login" }))
            }
        }
        BUCKETS_PATH => MockResponse::json(&json!(["photos", "broken"])),
        "/api/rgw/bucket/photos" => MockResponse::json(&json!({
            "bid": "b-1",
            "bucket": "photos",
            "owner": "alice",
            "usage": {
                "rgw.main": {
                    "num_objects": 10,
                    "size": 4096,
                    "local_allocated_objects": 8,
                    "local_allocated_size": 2048,
                    "external_tape_objects": 2,
                    "external_tape_size": 2048,
                },
                "rgw.multimeta": { "num_objects": 0 },
            },
        })),
        "/api/rgw/bucket/broken" => {
            MockResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "bucket index is corrupted")
        }
        USERS_PATH => MockResponse::json(&json!({
            "keys": ["alice", "bob", "carol"],
            "count": 3,
        })),
        "/api/rgw/user/alice" => MockResponse::json(&json!({
            "keys": [{ "user": "alice", "access_key": "AK" }],
            "summary": [{
                "user": "alice",
                "total": {
                    "ops": 120,
                    "successful_ops": 118,
                    "total_entries": 10,
                    "total_bytes": 4096,
                },
            }],
        })),
        "/api/rgw/user/bob" => MockResponse::json(&json!({
            "keys": [{ "user": "bob" }],
            "summary": [],
        })),
        _ => MockResponse::not_found(),
    }
}

fn client(server: &MockServer) -> E37Client {
    let config = ClientConfig::new(&server.url()).unwrap();
    E37Client::new(&config, "admin", "admin").unwrap()
}

#[tokio::test]
async fn collecting_buckets_skips_failing_items() {
    let server = MockServer::start(e37_backend).await;
    let client = client(&server);
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "buckets_info", &client)
        .await
        .unwrap();
    assert_eq!(lines.len(), 13, "{lines:#?}");
    assert_eq!(lines[0], "e37_object_storage_bucket_total_count 2");

    let labels = r#"e37_bid="b-1",e37_bucket_name="photos",e37_uid="alice""#;
    let expected_lines = [
        format!("e37_object_storage_bucket_num_objects{{{labels}}} 10"),
        format!("e37_object_storage_bucket_size{{{labels}}} 4096"),
        format!("e37_object_storage_bucket_local_allocated_size{{{labels}}} 2048"),
        format!("e37_object_storage_bucket_external_tape_objects{{{labels}}} 2"),
        format!("e37_object_storage_bucket_restore_tape_size{{{labels}}} 0"),
    ];
    for line in &expected_lines {
        assert!(lines.contains(line), "{line} is missing from {lines:#?}");
    }
    assert_eq!(server.requests_to("/api/rgw/bucket/broken").len(), 1);
}

#[tokio::test]
async fn collecting_users() {
    let server = MockServer::start(e37_backend).await;
    let client = client(&server);
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "UsersList_info", &client)
        .await
        .unwrap();
    assert_eq!(
        lines,
        [
            "e37_object_storage_user_total_count 3",
            r#"e37_object_storage_user_total_ops{e37_uid="alice"} 120"#,
            r#"e37_object_storage_user_total_successful_ops{e37_uid="alice"} 118"#,
            r#"e37_object_storage_user_total_entries{e37_uid="alice"} 10"#,
            r#"e37_object_storage_user_total_bytes{e37_uid="alice"} 4096"#,
        ]
    );
}

#[tokio::test]
async fn failing_listing_fails_collector() {
    let server = MockServer::start(|request| match request.path.as_str() {
        BUCKETS_PATH => MockResponse::text(StatusCode::BAD_GATEWAY, "rgw is down"),
        _ => e37_backend(request),
    })
    .await;
    let client = client(&server);
    let registry = collectors().unwrap();

    let err = collect_named(&registry, "buckets_info", &client)
        .await
        .unwrap_err();
    assert_matches!(err, CollectError::Request(RequestError::Protocol { .. }));
}

#[tokio::test]
async fn first_ping_logs_in() {
    let server = MockServer::start(e37_backend).await;
    let client = client(&server);

    assert!(client.ping().await.unwrap());
    assert_eq!(server.requests_to(LOGIN_PATH).len(), 1);
    assert!(server.requests_to(TOKEN_CHECK_PATH).is_empty());

    assert!(client.ping().await.unwrap());
    let checks = server.requests_to(TOKEN_CHECK_PATH);
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].json(), json!({ "token": TOKEN }));
    assert_eq!(server.requests_to(LOGIN_PATH).len(), 1);
}

#[tokio::test]
async fn rejected_token_check_refreshes_token() {
    let server = MockServer::start(|request| match request.path.as_str() {
        TOKEN_CHECK_PATH => MockResponse::json(&json!({ "login_url": "#/login" })),
        _ => e37_backend(request),
    })
    .await;
    let client = client(&server);

    assert!(client.ping().await.unwrap());
    assert!(client.ping().await.unwrap());
    assert_eq!(server.requests_to(LOGIN_PATH).len(), 2);
}

#[tokio::test]
async fn login_requires_created_status() {
    let server = MockServer::start(|request| match request.path.as_str() {
        LOGIN_PATH => MockResponse::json(&json!({ "token": TOKEN })),
        _ => e37_backend(request),
    })
    .await;
    let client = client(&server);

    let err = client.ping().await.unwrap_err();
    assert_matches!(err.0, RequestError::Auth(message) if message.contains("200"));
}

//! Tests for the Xsky backend.

use assert_matches::assert_matches;
use serde_json::json;
use storex::testonly::{MockResponse, MockServer, RecordedRequest};

use super::*;
use crate::testonly::collect_named;

const TOKEN: &str = "5b3f0c9e6d1a4b7e";

fn xsky_backend(request: &RecordedRequest) -> MockResponse {
    if request.path == LOGIN_PATH {
        let body = request.json();
        return if body["auth"]["name"] == "admin" && body["auth"]["password"] == "admin" {
            MockResponse::json_with_status(
                StatusCode::CREATED,
                &json!({ "token": { "uuid": TOKEN, "user": { "name": "admin" } } }),
            )
        } else {
            MockResponse::json_with_status(StatusCode::UNAUTHORIZED, &json!({ "code": 1001 }))
        };
    }
    if request.header("xms-auth-token") != Some(TOKEN) {
        return MockResponse::json_with_status(StatusCode::UNAUTHORIZED, &json!({}));
    }

    match request.path.as_str() {
        HEALTH_PATH => MockResponse::json(&json!({ "status": "ok" })),
        CLUSTER_PATH => MockResponse::json(&json!({
            "cluster": {
                "id": 1,
                "samples": [
                    { "used_kbyte": 1024, "actual_kbyte": 4096.5 },
                    { "used_kbyte": 1, "actual_kbyte": 1 },
                ],
            },
        })),
        DISKS_PATH => MockResponse::json(&json!({
            "disks": [
                { "id": 7, "action_status": "active", "host": { "name": "node-1" } },
                { "id": 8, "action_status": "rebuilding", "host": { "name": "node-2" } },
            ],
            "paging": { "limit": 100, "offset": 0, "total_count": 2 },
        })),
        _ => MockResponse::not_found(),
    }
}

fn client(server: &MockServer, password: &str) -> XskyClient {
    let config = ClientConfig::new(&server.url()).unwrap();
    XskyClient::new(&config, "admin", password).unwrap()
}

#[tokio::test]
async fn collecting_cluster_capacity() {
    let server = MockServer::start(xsky_backend).await;
    let client = client(&server, "admin");
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "cluster_info", &client)
        .await
        .unwrap();
    assert_eq!(
        lines,
        [
            r#"xsky_cluster_info{comments="used_kbyte"} 1024"#,
            r#"xsky_cluster_info{comments="actual_kbyte"} 4096.5"#,
        ]
    );

    let logins = server.requests_to(LOGIN_PATH);
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].method, Method::POST);
}

#[tokio::test]
async fn cluster_without_samples_is_an_error() {
    let server = MockServer::start(|request| match request.path.as_str() {
        CLUSTER_PATH => MockResponse::json(&json!({ "cluster": { "samples": [] } })),
        _ => xsky_backend(request),
    })
    .await;
    let client = client(&server, "admin");
    let registry = collectors().unwrap();

    let err = collect_named(&registry, "cluster_info", &client)
        .await
        .unwrap_err();
    assert_matches!(err, CollectError::UnexpectedResponse { .. });
}

#[tokio::test]
async fn collecting_disks() {
    let server = MockServer::start(xsky_backend).await;
    let client = client(&server, "admin");
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "disk_info", &client)
        .await
        .unwrap();
    assert_eq!(
        lines,
        [
            "xsky_disk_count 2",
            r#"xsky_disk_status{disk_id="7",host_name="node-1"} 1"#,
            r#"xsky_disk_status{disk_id="8",host_name="node-2"} 0"#,
        ]
    );
}

#[tokio::test]
async fn login_requires_created_status() {
    let server = MockServer::start(|request| match request.path.as_str() {
        LOGIN_PATH => MockResponse::json(&json!({ "token": { "uuid": TOKEN } })),
        _ => xsky_backend(request),
    })
    .await;
    let client = client(&server, "admin");

    let err = client.ping().await.unwrap_err();
    assert_matches!(err.0, RequestError::Auth(_));
}

#[tokio::test]
async fn rejected_credentials_fail_collection() {
    let server = MockServer::start(xsky_backend).await;
    let client = client(&server, "wrong");
    let registry = collectors().unwrap();

    let err = collect_named(&registry, "disk_info", &client)
        .await
        .unwrap_err();
    assert_matches!(err, CollectError::Request(RequestError::Auth(_)));
    assert!(server.requests_to(DISKS_PATH).is_empty());
}

#[tokio::test]
async fn pinging_backend() {
    let server = MockServer::start(xsky_backend).await;
    let client = client(&server, "admin");
    assert!(client.ping().await.unwrap());
    assert_eq!(server.requests_to(HEALTH_PATH).len(), 1);
}

//! Tests for the Gdas backend.

use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use serde_json::json;
use storex::testonly::{MockResponse, MockServer, RecordedRequest};

use super::*;
use crate::testonly::collect_named;

const TOKEN: &str = "gdas-token";

fn is_signed(request: &RecordedRequest) -> bool {
    let (Some(token), Some(stime), Some(nonce), Some(signature)) = (
        request.header("token"),
        request.header("stime"),
        request.header("nonce"),
        request.header("signature"),
    ) else {
        return false;
    };
    token == TOKEN && signature == GdasAuth::signature(stime, nonce, token)
}

fn gdas_backend(request: &RecordedRequest) -> MockResponse {
    match request.path.as_str() {
        LOGIN_PATH => {
            let body = request.json();
            if body["userName"] == "system" && body["passWord"] == "secret" {
                MockResponse::json(&json!({ "result": "0", "token": TOKEN }))
            } else {
                MockResponse::json_with_status(StatusCode::BAD_REQUEST, &json!({ "result": "1" }))
            }
        }
        _ if !is_signed(request) => {
            MockResponse::json_with_status(StatusCode::UNAUTHORIZED, &json!({ "result": "401" }))
        }
        NODE_LIST_PATH => MockResponse::json(&json!({
            "result": "0",
            "nodeList": [
                { "ip": "172.38.30.191", "status": 0, "damName": "dam-1" },
                { "ip": "172.38.30.192", "status": 1, "damName": "dam-2" },
            ],
        })),
        MAGAZINES_PATH => MockResponse::json(&json!({
            "result": "0",
            "rfid": [
                { "rfid": "R1", "rfidSts": 1, "daName": "da-1" },
                { "rfid": "R2", "rfidSts": 0, "daName": "da-1" },
                { "rfid": "R3", "rfidSts": 1, "daName": "da-2" },
            ],
        })),
        _ => MockResponse::not_found(),
    }
}

fn client(server: &MockServer, password: &str) -> GdasClient {
    let config = ClientConfig::new(&server.url()).unwrap();
    GdasClient::new(&config, "system", password).unwrap()
}

#[test]
fn computing_signature() {
    let signature = GdasAuth::signature("1700000000000", "12345", "token");
    let expected = sha256_signature(&["1700000000000", "12345", "token", "54321"]);
    assert_eq!(signature, expected);
    assert_eq!(signature.len(), 64);
}

#[tokio::test]
async fn login_sends_referer_and_timestamp() {
    let server = MockServer::start(gdas_backend).await;
    let client = client(&server, "secret");
    assert!(client.ping().await.unwrap());

    let logins = server.requests_to(LOGIN_PATH);
    assert_eq!(logins.len(), 1);
    let login = &logins[0];
    assert_eq!(login.method, Method::POST);
    let expected_referer = format!("{}/gdas", server.url());
    assert_eq!(login.header("referer"), Some(expected_referer.as_str()));
    assert!(login.header("stime").unwrap().parse::<u64>().is_ok());

    let probes = server.requests_to(NODE_LIST_PATH);
    assert_eq!(probes.len(), 1);
    let nonce: u32 = probes[0].header("nonce").unwrap().parse().unwrap();
    assert!(nonce < GdasAuth::MAX_NONCE);
    assert_eq!(probes[0].header("referer"), Some(expected_referer.as_str()));
}

#[tokio::test]
async fn collecting_magazines() {
    let server = MockServer::start(gdas_backend).await;
    let client = client(&server, "secret");
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "magazines_info", &client)
        .await
        .unwrap();
    assert_eq!(
        lines,
        [r#"gdas_magazines_info{comments="undistributedCount"} 2"#]
    );
}

#[tokio::test]
async fn collecting_nodes() {
    let server = MockServer::start(gdas_backend).await;
    let client = client(&server, "secret");
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "nodelist_info", &client)
        .await
        .unwrap();
    assert_eq!(
        lines,
        [
            r#"gdas_nodelist_info{node_ip="172.38.30.191",node_name="dam-1"} 0"#,
            r#"gdas_nodelist_info{node_ip="172.38.30.192",node_name="dam-2"} 1"#,
        ]
    );
}

#[tokio::test]
async fn expired_token_is_refreshed() {
    let login_count = Arc::new(AtomicUsize::new(0));
    let login_count_ = Arc::clone(&login_count);
    let server = MockServer::start(move |request| {
        if request.path == LOGIN_PATH {
            let login_idx = login_count_.fetch_add(1, Ordering::SeqCst);
            let token = if login_idx == 0 { "expired" } else { TOKEN };
            return MockResponse::json(&json!({ "token": token }));
        }
        gdas_backend(request)
    })
    .await;
    let client = client(&server, "secret");
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "nodelist_info", &client)
        .await
        .unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(login_count.load(Ordering::SeqCst), 2);
    assert_eq!(client.inner.tokens().get().as_deref().map(String::as_str), Some(TOKEN));
}

#[tokio::test]
async fn rejected_credentials() {
    let server = MockServer::start(gdas_backend).await;
    let client = client(&server, "wrong");

    let err = client.ping().await.unwrap_err();
    assert_matches!(err.0, RequestError::Auth(message) if message.contains("400"));

    let registry = collectors().unwrap();
    let err = collect_named(&registry, "magazines_info", &client)
        .await
        .unwrap_err();
    assert_matches!(err, CollectError::Request(RequestError::Auth(_)));
}

#[tokio::test]
async fn probe_reports_unhealthy_backend() {
    let server = MockServer::start(|request| match request.path.as_str() {
        NODE_LIST_PATH => MockResponse::text(StatusCode::SERVICE_UNAVAILABLE, "maintenance"),
        _ => gdas_backend(request),
    })
    .await;
    let client = client(&server, "secret");
    assert!(!client.ping().await.unwrap());
}

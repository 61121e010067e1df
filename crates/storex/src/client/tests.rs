//! Tests for backend client building blocks.

use std::{
    net::Ipv4Addr,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use assert_matches::assert_matches;
use serde_json::json;

use super::*;
use crate::testonly::{MockResponse, MockServer, RecordedRequest};

fn transport(server: &MockServer) -> HttpTransport {
    let config = ClientConfig::new(&server.url()).unwrap();
    HttpTransport::new(&config).unwrap()
}

fn session_login() -> TokenLogin {
    TokenLogin::new(
        "/api/v2/aa/sessions",
        json!({ "user_name": "admin", "password": "secret" }),
        "/data/x_auth_token",
        TokenHeader::Named(reqwest::header::HeaderName::from_static("x-auth-token")),
    )
}

#[test]
fn normalizing_base_urls() {
    let cases = [
        ("10.0.0.1:8080", "http://10.0.0.1:8080"),
        ("http://gdas.local/", "http://gdas.local"),
        ("https://xsky.local:8056/", "https://xsky.local:8056"),
        ("https://harbor.local/api/v2.0", "https://harbor.local/api/v2.0"),
        ("  obs.local  ", "http://obs.local"),
    ];
    for (raw, expected) in cases {
        assert_eq!(normalize_base_url(raw).unwrap(), expected, "{raw}");
    }

    for raw in ["ftp://gdas.local", "http://", "http://[::1"] {
        let err = normalize_base_url(raw).unwrap_err();
        assert_matches!(err, ClientBuildError::InvalidUrl { .. }, "{raw}");
    }
}

#[test]
fn config_defaults() {
    let config = ClientConfig::new("gdas.local").unwrap();
    assert_eq!(config.base_url(), "http://gdas.local");
    assert_eq!(config.timeout(), ClientConfig::DEFAULT_TIMEOUT);
    assert!(!config.insecure());
    assert_eq!(config.concurrency(), DEFAULT_CONCURRENCY);

    let config = config.with_concurrency(0).with_insecure(true);
    assert_eq!(config.concurrency(), 1);
    assert!(config.insecure());
}

#[test]
fn unwrapping_envelopes() {
    let payload = br#"{"code":0,"msg":"success","data":{"res_count":3}}"#;
    let data = unwrap_data_envelope("/api/gdas/user/list", payload).unwrap();
    let data: serde_json::Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(data, json!({ "res_count": 3 }));

    let payload = br#"{"code":500,"msg":"internal error","data":null}"#;
    let err = unwrap_data_envelope("/api/gdas/user/list", payload).unwrap_err();
    assert_matches!(
        &err,
        RequestError::Decode { path, message }
            if path == "/api/gdas/user/list" && message.contains("500") && message.contains("internal error")
    );

    let err = unwrap_data_envelope("/api/gdas/user/list", b"[1, 2").unwrap_err();
    assert_matches!(err, RequestError::Decode { .. });
}

#[test]
fn quoting_bodies() {
    assert_eq!(transport::quote_body(b"Mistake!"), "Mistake!");

    let long_body = "\u{44b}".repeat(400);
    let quoted = transport::quote_body(long_body.as_bytes());
    assert!(quoted.ends_with("... (800B total)"), "{quoted}");

    let quoted = transport::quote_body(&[0xff, 0xfe]);
    assert!(quoted.starts_with("(Non UTF-8 body with length 2B"), "{quoted}");
}

#[test]
fn signing_requests() {
    let scheme = SignedRequest::new("wo-obs", "obs123456");
    let signature = scheme.signature("abc", "1700000000000");
    assert_eq!(
        signature,
        sha256_signature(&["obs123456", "abc", "1700000000000", "cba"])
    );
    assert_eq!(signature.len(), 64);
    assert_eq!(reversed("a1b2"), "2b1a");

    let nonce = alphanumeric_nonce(20);
    assert_eq!(nonce.len(), 20);
    assert!(nonce.chars().all(|ch| ch.is_ascii_alphanumeric()));
}

#[tokio::test]
async fn token_is_obtained_lazily_and_reused() {
    let server = MockServer::start(|request| match request.path.as_str() {
        "/api/v2/aa/sessions" => MockResponse::json(&json!({
            "data": { "x_auth_token": "token-1" },
            "result": { "code": 0 }
        })),
        "/api/v2/cluster/servers" if request.header("x-auth-token") == Some("token-1") => {
            MockResponse::json(&json!({ "data": [] }))
        }
        _ => MockResponse::text(StatusCode::UNAUTHORIZED, "unauthorized"),
    })
    .await;
    let client = AuthenticatedClient::new(transport(&server), session_login());
    assert!(server.requests().is_empty());

    for _ in 0..2 {
        let body = client
            .request(Method::GET, "/api/v2/cluster/servers", None)
            .await
            .unwrap();
        assert_eq!(body, br#"{"data":[]}"#);
    }

    let logins = server.requests_to("/api/v2/aa/sessions");
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].method, Method::POST);
    assert_eq!(
        logins[0].json(),
        json!({ "user_name": "admin", "password": "secret" })
    );
    assert_eq!(client.tokens().get().as_deref().map(String::as_str), Some("token-1"));
}

#[tokio::test]
async fn token_is_refreshed_on_unauthorized_response() {
    let login_count = AtomicUsize::new(0);
    let server = MockServer::start(move |request| match request.path.as_str() {
        "/api/v2/aa/sessions" => {
            let idx = login_count.fetch_add(1, Ordering::SeqCst) + 1;
            MockResponse::json(&json!({ "data": { "x_auth_token": format!("token-{idx}") } }))
        }
        // Only the token obtained by the second login is accepted.
        "/api/status" if request.header("x-auth-token") == Some("token-2") => {
            MockResponse::json(&json!({ "status": "normal" }))
        }
        _ => MockResponse::text(StatusCode::UNAUTHORIZED, "token expired"),
    })
    .await;
    let client = AuthenticatedClient::new(transport(&server), session_login());

    let body = client.request(Method::GET, "/api/status", None).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({ "status": "normal" }));

    assert_eq!(server.requests_to("/api/v2/aa/sessions").len(), 2);
    let attempts = server.requests_to("/api/status");
    let tokens: Vec<_> = attempts
        .iter()
        .map(|request| request.header("x-auth-token"))
        .collect();
    assert_eq!(tokens, [Some("token-1"), Some("token-2")]);
}

#[tokio::test]
async fn request_is_retried_only_once() {
    let server = MockServer::start(|request| match request.path.as_str() {
        "/api/v2/aa/sessions" => {
            MockResponse::json(&json!({ "data": { "x_auth_token": "rejected" } }))
        }
        _ => MockResponse::text(StatusCode::UNAUTHORIZED, "go away"),
    })
    .await;
    let client = AuthenticatedClient::new(transport(&server), session_login());

    let err = client
        .request(Method::GET, "/api/status", None)
        .await
        .unwrap_err();
    assert_matches!(&err, RequestError::Auth(message) if message.contains("go away"));
    assert_eq!(server.requests_to("/api/status").len(), 2);
}

#[tokio::test]
async fn login_errors() {
    let server = MockServer::start(|request| match request.path.as_str() {
        "/api/v1/auth/tokens:login" => {
            MockResponse::json(&json!({ "token": { "uuid": "token-1" } }))
        }
        "/api/v2/aa/sessions" => MockResponse::json(&json!({ "data": {} })),
        _ => MockResponse::not_found(),
    })
    .await;

    // Login answers 200 instead of the expected 201.
    let scheme = TokenLogin::new(
        "/api/v1/auth/tokens:login",
        json!({ "auth": { "name": "admin", "password": "secret" } }),
        "/token/uuid",
        TokenHeader::Named(reqwest::header::HeaderName::from_static("xms-auth-token")),
    )
    .with_expected_status(StatusCode::CREATED);
    let client = AuthenticatedClient::new(transport(&server), scheme);
    let err = client.request(Method::GET, "/health", None).await.unwrap_err();
    assert_matches!(&err, RequestError::Auth(message) if message.contains("200 OK"));
    assert!(client.tokens().get().is_none());

    // Login response carries no token.
    let client = AuthenticatedClient::new(transport(&server), session_login());
    let err = client.request(Method::GET, "/health", None).await.unwrap_err();
    assert_matches!(
        &err,
        RequestError::Auth(message) if message.contains("/data/x_auth_token")
    );
}

#[tokio::test]
async fn concurrent_refreshes_store_a_complete_token() {
    let login_count = AtomicUsize::new(0);
    let server = MockServer::start(move |request| match request.path.as_str() {
        "/api/auth" => {
            let idx = login_count.fetch_add(1, Ordering::SeqCst) + 1;
            MockResponse::json_with_status(StatusCode::CREATED, &json!({ "token": format!("token-{idx}") }))
                .with_delay(Duration::from_millis(20))
        }
        _ if request.header("authorization") == Some("Bearer stale") => {
            MockResponse::text(StatusCode::UNAUTHORIZED, "expired")
        }
        _ => MockResponse::json(&json!([])),
    })
    .await;
    let scheme = TokenLogin::new(
        "/api/auth",
        json!({ "username": "admin", "password": "secret" }),
        "/token",
        TokenHeader::Bearer,
    )
    .with_expected_status(StatusCode::CREATED);
    let client = AuthenticatedClient::new(transport(&server), scheme);
    client.tokens().replace("stale".to_owned());

    let (first, second) = tokio::join!(
        client.request(Method::GET, "/api/rgw/bucket", None),
        client.request(Method::GET, "/api/rgw/user", None)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(server.requests_to("/api/auth").len(), 2);
    let token = client.tokens().get().unwrap();
    assert!(
        ["token-1", "token-2"].contains(&token.as_str()),
        "unexpected token: {token}"
    );
}

#[tokio::test]
async fn signed_requests_carry_valid_signatures() {
    let server = MockServer::start(|_| MockResponse::json(&json!({ "code": 0, "data": {} }))).await;
    let client = AuthenticatedClient::new(
        transport(&server),
        SignedRequest::new("wo-obs", "obs123456"),
    );
    let body = json!({ "poolFlag": false });
    client
        .request(Method::POST, "/api/gdas/pool/list", Some(&body))
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request: &RecordedRequest = &requests[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.json(), body);
    assert_eq!(request.header("appkey"), Some("wo-obs"));

    let nonce = request.header("nonce").unwrap();
    let stime = request.header("stime").unwrap();
    assert_eq!(nonce.len(), 20);
    stime.parse::<u64>().unwrap();
    let expected_signature = sha256_signature(&["obs123456", nonce, stime, &reversed(nonce)]);
    assert_eq!(request.header("signature"), Some(expected_signature.as_str()));
}

#[tokio::test]
async fn stateless_schemes_are_not_retried() {
    let server = MockServer::start(|_| MockResponse::text(StatusCode::UNAUTHORIZED, "bad signature")).await;
    let client = AuthenticatedClient::new(transport(&server), BasicAuth::new("admin", "Harbor12345"));

    let err = client.request(Method::GET, "/health", None).await.unwrap_err();
    assert_matches!(err, RequestError::Auth(_));
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let authorization = requests[0].header("authorization").unwrap();
    assert!(authorization.starts_with("Basic "), "{authorization}");
}

#[tokio::test]
async fn protocol_errors_carry_status_and_body() {
    let server = MockServer::start(|_| {
        MockResponse::text(StatusCode::SERVICE_UNAVAILABLE, "Mistake!")
    })
    .await;
    let client = AuthenticatedClient::new(transport(&server), BasicAuth::new("admin", "admin"));

    let err = client.request(Method::GET, "/health", None).await.unwrap_err();
    assert_matches!(
        err,
        RequestError::Protocol { path, status, body }
            if path == "/health" && status == StatusCode::SERVICE_UNAVAILABLE && body == "Mistake!"
    );
}

#[tokio::test]
async fn connection_errors() {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let local_addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::new(&format!("http://{local_addr}"))
        .unwrap()
        .with_timeout(Duration::from_secs(1));
    let client = AuthenticatedClient::new(
        HttpTransport::new(&config).unwrap(),
        BasicAuth::new("admin", "admin"),
    );
    let err = client.request(Method::GET, "/health", None).await.unwrap_err();
    assert_matches!(err, RequestError::Connection { url, .. } if url.ends_with("/health"));
}

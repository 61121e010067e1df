//! Tests for the Huawei OBS backend.

use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use serde_json::json;
use storex::{
    client::StatusCode,
    testonly::{MockResponse, MockServer, RecordedRequest},
};

use super::*;
use crate::testonly::collect_named;

const TOKEN: &str = "obs-session";

fn login_response() -> MockResponse {
    MockResponse::json(&json!({
        "data": { "x_auth_token": TOKEN, "user_id": "1" },
        "result": { "code": 0, "description": "" },
    }))
}

fn obs_backend(request: &RecordedRequest) -> MockResponse {
    if request.path == LOGIN_PATH {
        let body = request.json();
        return if body == json!({ "user_name": "admin", "password": "secret" }) {
            login_response()
        } else {
            MockResponse::json_with_status(
                StatusCode::BAD_REQUEST,
                &json!({ "result": { "code": 1_077_949_061, "description": "bad credentials" } }),
            )
        };
    }
    if request.header("x-auth-token") != Some(TOKEN) {
        return MockResponse::json_with_status(StatusCode::UNAUTHORIZED, &json!({}));
    }

    match request.path.as_str() {
        MANAGER_STATUS_PATH => MockResponse::json(&json!({ "result": 0 })),
        STORAGE_POOLS_PATH => MockResponse::json(&json!({
            "result": 0,
            "storagePools": [
                { "poolId": 0, "poolStatus": 0, "totalCapacity": 4096, "usedCapacity": 1024.5 },
                { "poolId": 1, "poolStatus": 3, "totalCapacity": 2048, "usedCapacity": 0 },
            ],
        })),
        CLUSTER_SERVERS_PATH => MockResponse::json(&json!({
            "data": [{
                "id": 1,
                "name": "node-1",
                "status": 0,
                "serial_number": "SN001",
                "management_ip": "192.168.1.10",
            }],
            "result": { "code": 0 },
        })),
        NODES_PATH => MockResponse::json(&json!({
            "result": 0,
            "NodeInfo": [
                { "NodeName": "node-1", "NodeType": 0, "NodeIP": "192.168.1.10" },
                { "NodeName": "node-2", "NodeType": 0, "NodeIP": "192.168.1.11" },
            ],
        })),
        "/dsware/service/resource/queryDiskInfo?ip=192.168.1.10" => MockResponse::json(&json!({
            "result": 0,
            "disks": [
                { "diskRole": "main_storage", "diskSlot": 1, "diskType": "SAS_DISK", "diskStatus": 0 },
                { "diskRole": "osd_cache", "diskSlot": 2, "diskType": "SSD_CARD", "diskStatus": 1 },
            ],
        })),
        "/dsware/service/resource/queryDiskInfo?ip=192.168.1.11" => MockResponse::json(&json!({
            "result": 0,
            "disks": [
                { "diskRole": "main_storage", "diskSlot": 1, "diskType": "SAS_DISK", "diskStatus": 0 },
            ],
        })),
        PERFORMANCE_PATH => MockResponse::json(&json!({
            "data": [
                { "indicator": "540", "indicator_values": ["1.5"], "object_type": "57347" },
                { "indicator": "543", "indicator_values": ["20"] },
                { "indicator": "546", "indicator_values": ["7"] },
                { "indicator": "1064", "indicator_values": ["--"] },
                { "indicator": "50001", "indicator_values": ["1024"] },
                { "indicator": "50002", "indicator_values": [] },
                { "indicator": "50003", "indicator_values": ["2048.25"] },
            ],
            "result": { "code": 0 },
        })),
        _ => MockResponse::not_found(),
    }
}

fn client(server: &MockServer) -> HwObsClient {
    let config = ClientConfig::new(&server.url()).unwrap();
    HwObsClient::new(&config, "admin", "secret").unwrap()
}

#[tokio::test]
async fn collecting_storage_pools() {
    let server = MockServer::start(obs_backend).await;
    let client = client(&server);
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "storage_pool_info", &client)
        .await
        .unwrap();
    assert_eq!(
        lines,
        [
            r#"hw_obs_storage_pool_status{pool_id="0"} 0"#,
            r#"hw_obs_storage_pool_total_capacity{pool_id="0"} 4096"#,
            r#"hw_obs_storage_pool_used_capacity{pool_id="0"} 1024.5"#,
            r#"hw_obs_storage_pool_status{pool_id="1"} 3"#,
            r#"hw_obs_storage_pool_total_capacity{pool_id="1"} 2048"#,
            r#"hw_obs_storage_pool_used_capacity{pool_id="1"} 0"#,
        ]
    );
}

#[tokio::test]
async fn collecting_cluster_servers() {
    let server = MockServer::start(obs_backend).await;
    let client = client(&server);
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "cluster_server_info", &client)
        .await
        .unwrap();
    assert_eq!(
        lines,
        [
            "hw_obs_cluster_server_count 1",
            r#"hw_obs_cluster_server_status{name="node-1",serial_number="SN001",management_ip="192.168.1.10"} 0"#,
        ]
    );
}

#[tokio::test]
async fn failed_api_result_fails_collector() {
    let server = MockServer::start(|request| match request.path.as_str() {
        CLUSTER_SERVERS_PATH => MockResponse::json(&json!({
            "data": [],
            "result": { "code": 50_331_651, "description": "internal error" },
        })),
        _ => obs_backend(request),
    })
    .await;
    let client = client(&server);
    let registry = collectors().unwrap();

    let err = collect_named(&registry, "cluster_server_info", &client)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        CollectError::UnexpectedResponse { message, .. } if message.contains("50331651")
    );
}

#[tokio::test]
async fn collecting_disks_per_node() {
    let server = MockServer::start(obs_backend).await;
    let client = client(&server);
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "disk_info", &client)
        .await
        .unwrap();
    assert_eq!(
        lines,
        [
            r#"hw_obs_disk_status{disk_role="main_storage",disk_slot="1",disk_type="SAS_DISK",node_ip="192.168.1.10"} 0"#,
            r#"hw_obs_disk_status{disk_role="osd_cache",disk_slot="2",disk_type="SSD_CARD",node_ip="192.168.1.10"} 1"#,
            r#"hw_obs_disk_status{disk_role="main_storage",disk_slot="1",disk_type="SAS_DISK",node_ip="192.168.1.11"} 0"#,
            "hw_obs_disk_count 3",
        ]
    );
    let disk_requests = server
        .requests()
        .into_iter()
        .filter(|request| request.path.starts_with(DISKS_PATH))
        .count();
    assert_eq!(disk_requests, 2);
}

#[tokio::test]
async fn collecting_performance_data() {
    let server = MockServer::start(obs_backend).await;
    let client = client(&server);
    let registry = collectors().unwrap();

    let lines = collect_named(&registry, "performance_data", &client)
        .await
        .unwrap();
    assert_eq!(
        lines,
        [
            "hw_obs_cluster_delete_request_per_second 1.5",
            "hw_obs_cluster_get_request_per_second 20",
            "hw_obs_cluster_put_request_per_second 7",
            "hw_obs_cluster_read_bandwidth 1024",
            "hw_obs_cluster_total_bandwidth 2048.25",
        ]
    );

    let requests = server.requests_to(PERFORMANCE_PATH);
    assert_eq!(requests.len(), 1);
    let body = requests[0].json();
    assert_eq!(
        body["objects"],
        json!([{ "object_type": 57347, "indicators": [540, 543, 546, 1064, 50001, 50002, 50003] }])
    );
    let begin_time = body["begin_time"].as_u64().unwrap();
    let end_time = body["end_time"].as_u64().unwrap();
    assert_eq!(end_time - begin_time, 10);
}

#[tokio::test]
async fn empty_performance_data_fails_collector() {
    let server = MockServer::start(|request| match request.path.as_str() {
        PERFORMANCE_PATH => MockResponse::json(&json!({ "data": [], "result": { "code": 0 } })),
        _ => obs_backend(request),
    })
    .await;
    let client = client(&server);
    let registry = collectors().unwrap();

    let err = collect_named(&registry, "performance_data", &client)
        .await
        .unwrap_err();
    assert_matches!(err, CollectError::UnexpectedResponse { .. });
}

#[tokio::test]
async fn pinging_healthy_manager() {
    let server = MockServer::start(obs_backend).await;
    let client = client(&server);

    assert!(client.ping().await.unwrap());
    assert_eq!(server.requests_to(LOGIN_PATH).len(), 1);
}

#[tokio::test]
async fn failed_manager_status_refreshes_token() {
    let server = MockServer::start(|request| match request.path.as_str() {
        MANAGER_STATUS_PATH => MockResponse::json(&json!({
            "result": 1,
            "description": "session expired",
        })),
        _ => obs_backend(request),
    })
    .await;
    let client = client(&server);

    assert!(client.ping().await.unwrap());
    assert_eq!(server.requests_to(LOGIN_PATH).len(), 2);
}

#[tokio::test]
async fn failed_refresh_fails_ping() {
    let login_count = Arc::new(AtomicUsize::new(0));
    let login_count_ = Arc::clone(&login_count);
    let server = MockServer::start(move |request| match request.path.as_str() {
        LOGIN_PATH => {
            if login_count_.fetch_add(1, Ordering::SeqCst) == 0 {
                login_response()
            } else {
                MockResponse::text(StatusCode::SERVICE_UNAVAILABLE, "maintenance")
            }
        }
        MANAGER_STATUS_PATH => MockResponse::json(&json!({ "result": 1 })),
        _ => obs_backend(request),
    })
    .await;
    let client = client(&server);

    let err = client.ping().await.unwrap_err();
    assert_matches!(err.0, RequestError::Auth(_));
    assert_eq!(login_count.load(Ordering::SeqCst), 2);
}

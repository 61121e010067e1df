//! Mock Xsky backend driven by integration tests.
//!
//! Usage: `storex-e2e-tests [--fail-disks] <bind address>`. With `--fail-disks`, the disk listing
//! answers with `500 Internal Server Error`.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use serde_json::json;
use storex::{
    client::StatusCode,
    testonly::{MockResponse, MockServer, RecordedRequest},
};
use tokio::net::TcpListener;

const TOKEN: &str = "e2e-session-token";

fn xsky_backend(request: &RecordedRequest, fail_disks: bool) -> MockResponse {
    if request.path == "/api/v1/auth/tokens:login" {
        return MockResponse::json_with_status(
            StatusCode::CREATED,
            &json!({ "token": { "uuid": TOKEN } }),
        );
    }
    if request.header("xms-auth-token") != Some(TOKEN) {
        return MockResponse::json_with_status(StatusCode::UNAUTHORIZED, &json!({}));
    }

    match request.path.as_str() {
        "/health" => MockResponse::json(&json!({ "status": "ok" })),
        "/api/v1/cluster" => MockResponse::json(&json!({
            "cluster": {
                "samples": [{ "used_kbyte": 1024, "actual_kbyte": 8192 }],
            },
        })),
        "/api/v1/disks" if fail_disks => {
            MockResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "disk service unavailable")
        }
        "/api/v1/disks" => MockResponse::json(&json!({
            "disks": [
                { "id": 1, "action_status": "active", "host": { "name": "node-1" } },
                { "id": 2, "action_status": "active", "host": { "name": "node-1" } },
                { "id": 3, "action_status": "rebuilding", "host": { "name": "node-2" } },
            ],
            "paging": { "total_count": 3 },
        })),
        _ => MockResponse::not_found(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut args: Vec<_> = env::args().skip(1).collect();
    let fail_disks = if args.first().is_some_and(|arg| arg == "--fail-disks") {
        args.remove(0);
        true
    } else {
        false
    };

    let bind_address: SocketAddr = args
        .first()
        .context("Bind address must be provided as the last command-line arg")?
        .parse()
        .context("Bind address is invalid")?;
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed binding to `{bind_address}`"))?;
    let server = MockServer::serve(
        listener,
        Arc::new(move |request: &RecordedRequest| xsky_backend(request, fail_disks)),
    );
    println!("local_addr={}", server.local_addr());
    // ^ Print the local server address so that it can be used in integration tests

    tokio::signal::ctrl_c().await.ok();
    Ok(())
}

//! Xsky distributed storage backend.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderName;
use serde::Deserialize;
use storex::{
    client::{
        fetch_json, AuthenticatedClient, BackendClient, ClientBuildError, ClientConfig,
        HttpTransport, Method, PingError, RequestError, StatusCode, TokenHeader, TokenLogin,
    },
    CollectError, Collector, CollectorRegistry, Descriptor, RegistryError, Sink,
};

use crate::status_value;

#[cfg(test)]
mod tests;

/// Metric namespace of the Xsky exporter.
pub const NAMESPACE: &str = "xsky";

const LOGIN_PATH: &str = "/api/v1/auth/tokens:login";
const HEALTH_PATH: &str = "/health";
const CLUSTER_PATH: &str = "/api/v1/cluster";
const DISKS_PATH: &str = "/api/v1/disks";

/// Client of the Xsky REST API. Sessions are obtained by login and passed in the `Xms-Auth-Token` header.
#[derive(Debug)]
pub struct XskyClient {
    inner: AuthenticatedClient<TokenLogin>,
    concurrency: usize,
}

impl XskyClient {
    /// Creates a client. The client logs in lazily on the first request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP transport cannot be built.
    pub fn new(
        config: &ClientConfig,
        username: &str,
        password: &str,
    ) -> Result<Self, ClientBuildError> {
        let login_body = serde_json::json!({
            "auth": { "name": username, "password": password },
        });
        let scheme = TokenLogin::new(
            LOGIN_PATH,
            login_body,
            "/token/uuid",
            TokenHeader::Named(HeaderName::from_static("xms-auth-token")),
        )
        .with_expected_status(StatusCode::CREATED);

        Ok(Self {
            inner: AuthenticatedClient::new(HttpTransport::new(config)?, scheme),
            concurrency: config.concurrency(),
        })
    }
}

#[async_trait]
impl BackendClient for XskyClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, RequestError> {
        self.inner.request(method, path, body).await
    }

    async fn ping(&self) -> Result<bool, PingError> {
        crate::probe(&self.inner, Method::GET, HEALTH_PATH).await
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }
}

#[derive(Debug, Deserialize)]
struct ClusterResponse {
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
struct Cluster {
    #[serde(default)]
    samples: Vec<ClusterSample>,
}

#[derive(Debug, Deserialize)]
struct ClusterSample {
    used_kbyte: f64,
    actual_kbyte: f64,
}

/// Reports cluster capacity from the latest cluster sample.
#[derive(Debug)]
struct ClusterCollector {
    info: Arc<Descriptor>,
}

impl ClusterCollector {
    fn new() -> Self {
        Self {
            info: Descriptor::gauge(
                NAMESPACE,
                "",
                "cluster_info",
                "Xsky cluster capacity, KiB",
                &["comments"],
            ),
        }
    }
}

#[async_trait]
impl Collector for ClusterCollector {
    fn name(&self) -> &'static str {
        "cluster_info"
    }

    fn help(&self) -> &'static str {
        "Xsky Cluster Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: ClusterResponse = fetch_json(client, Method::GET, CLUSTER_PATH, None).await?;
        let sample = response
            .cluster
            .samples
            .first()
            .ok_or_else(|| CollectError::unexpected(CLUSTER_PATH, "cluster has no samples"))?;
        sink.emit(&self.info, sample.used_kbyte, ["used_kbyte"])?;
        sink.emit(&self.info, sample.actual_kbyte, ["actual_kbyte"])?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DisksResponse {
    #[serde(default)]
    disks: Vec<Disk>,
    paging: Paging,
}

#[derive(Debug, Deserialize)]
struct Disk {
    id: u64,
    #[serde(default)]
    action_status: String,
    host: DiskHost,
}

#[derive(Debug, Deserialize)]
struct DiskHost {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Paging {
    total_count: u64,
}

/// Reports the number of disks and the status of each disk.
#[derive(Debug)]
struct DiskCollector {
    count: Arc<Descriptor>,
    status: Arc<Descriptor>,
}

impl DiskCollector {
    fn new() -> Self {
        Self {
            count: Descriptor::gauge(NAMESPACE, "", "disk_count", "Total number of disks", &[]),
            status: Descriptor::gauge(
                NAMESPACE,
                "",
                "disk_status",
                "Disk status: 1 if the disk is active, 0 otherwise",
                &["disk_id", "host_name"],
            ),
        }
    }
}

#[async_trait]
impl Collector for DiskCollector {
    fn name(&self) -> &'static str {
        "disk_info"
    }

    fn help(&self) -> &'static str {
        "Xsky Disk Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: DisksResponse = fetch_json(client, Method::GET, DISKS_PATH, None).await?;
        sink.emit_value(&self.count, response.paging.total_count as f64)?;
        for disk in response.disks {
            let status = status_value(&disk.action_status);
            sink.emit(&self.status, status, [disk.id.to_string(), disk.host.name])?;
        }
        Ok(())
    }
}

/// Creates the registry of all Xsky collectors.
///
/// # Errors
///
/// Propagates registration errors.
pub fn collectors() -> Result<CollectorRegistry, RegistryError> {
    let mut registry = CollectorRegistry::new();
    registry
        .register(ClusterCollector::new(), true)?
        .register(DiskCollector::new(), true)?;
    Ok(registry)
}

//! Huawei OBS (OceanStor Pacific) object storage backend.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use futures::{stream, FutureExt as _, StreamExt as _, TryStreamExt as _};
use reqwest::header::HeaderName;
use serde::Deserialize;
use storex::{
    client::{
        fetch_json, AuthenticatedClient, BackendClient, ClientBuildError, ClientConfig,
        HttpTransport, Method, PingError, RequestError, TokenHeader, TokenLogin,
    },
    CollectError, Collector, CollectorRegistry, Descriptor, RegistryError, Sink,
};

#[cfg(test)]
mod tests;

/// Metric namespace of the Huawei OBS exporter.
pub const NAMESPACE: &str = "hw_obs";

const LOGIN_PATH: &str = "/api/v2/aa/sessions";
const MANAGER_STATUS_PATH: &str = "/dsware/service/managerstatus";
const STORAGE_POOLS_PATH: &str = "/dsware/service/resource/queryStoragePool";
const CLUSTER_SERVERS_PATH: &str = "/api/v2/cluster/servers";
const NODES_PATH: &str = "/dsware/service/getNodeInfoForHealthCheckTool";
const DISKS_PATH: &str = "/dsware/service/resource/queryDiskInfo";
const PERFORMANCE_PATH: &str = "/api/v2/pms/performance_data";

fn gauge(name: &str, help: &str, labels: &[&str]) -> Arc<Descriptor> {
    Descriptor::gauge(NAMESPACE, "", name, help, labels)
}

/// Client of the Huawei OBS management API. Sessions are obtained by login and passed
/// in the `X-Auth-Token` header.
#[derive(Debug)]
pub struct HwObsClient {
    inner: AuthenticatedClient<TokenLogin>,
    concurrency: usize,
}

impl HwObsClient {
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
        let login_body = serde_json::json!({ "user_name": username, "password": password });
        let scheme = TokenLogin::new(
            LOGIN_PATH,
            login_body,
            "/data/x_auth_token",
            TokenHeader::Named(HeaderName::from_static("x-auth-token")),
        );
        Ok(Self {
            inner: AuthenticatedClient::new(HttpTransport::new(config)?, scheme),
            concurrency: config.concurrency(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ManagerStatus {
    result: i64,
    #[serde(default)]
    description: String,
}

#[async_trait]
impl BackendClient for HwObsClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, RequestError> {
        self.inner.request(method, path, body).await
    }

    /// The manager reports failures in the `result` field rather than in the HTTP status.
    /// A non-zero result usually means an expired session that was not answered with 401,
    /// so the token is refreshed. The backend counts as reachable if the refresh succeeds.
    async fn ping(&self) -> Result<bool, PingError> {
        let response = self.inner.send(Method::GET, MANAGER_STATUS_PATH, None).await?;
        match response.json::<ManagerStatus>() {
            Ok(status) if response.status.is_success() && status.result == 0 => return Ok(true),
            Ok(status) => tracing::warn!(
                result = status.result,
                description = %status.description,
                "Manager status check failed, refreshing session token"
            ),
            Err(err) => tracing::warn!(
                status = %response.status,
                %err,
                "Manager status check returned unexpected response, refreshing session token"
            ),
        }
        self.inner.refresh().await?;
        Ok(true)
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// `result` object returned by the v2 API.
#[derive(Debug, Default, Deserialize)]
struct ApiResult {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    description: String,
}

impl ApiResult {
    fn check(&self, path: &str) -> Result<(), CollectError> {
        if self.code == 0 {
            Ok(())
        } else {
            let message = format!("result code {}: {}", self.code, self.description);
            Err(CollectError::unexpected(path, message))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoragePoolsResponse {
    #[serde(default)]
    storage_pools: Vec<StoragePool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoragePool {
    pool_id: i64,
    #[serde(default)]
    pool_status: i64,
    #[serde(default)]
    total_capacity: f64,
    #[serde(default)]
    used_capacity: f64,
}

/// Reports the status and capacity of every storage pool.
#[derive(Debug)]
struct StoragePoolCollector {
    status: Arc<Descriptor>,
    total_capacity: Arc<Descriptor>,
    used_capacity: Arc<Descriptor>,
}

impl StoragePoolCollector {
    fn new() -> Self {
        Self {
            status: gauge("storage_pool_status", "Storage pool status", &["pool_id"]),
            total_capacity: gauge(
                "storage_pool_total_capacity",
                "Total capacity of the storage pool, MiB",
                &["pool_id"],
            ),
            used_capacity: gauge(
                "storage_pool_used_capacity",
                "Used capacity of the storage pool, MiB",
                &["pool_id"],
            ),
        }
    }
}

#[async_trait]
impl Collector for StoragePoolCollector {
    fn name(&self) -> &'static str {
        "storage_pool_info"
    }

    fn help(&self) -> &'static str {
        "HWObs Storage Pool info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: StoragePoolsResponse =
            fetch_json(client, Method::GET, STORAGE_POOLS_PATH, None).await?;
        for pool in response.storage_pools {
            let pool_id = [pool.pool_id.to_string()];
            sink.emit(&self.status, pool.pool_status as f64, pool_id.clone())?;
            sink.emit(&self.total_capacity, pool.total_capacity, pool_id.clone())?;
            sink.emit(&self.used_capacity, pool.used_capacity, pool_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ClusterServersResponse {
    #[serde(default)]
    data: Vec<ClusterServer>,
    #[serde(default)]
    result: ApiResult,
}

#[derive(Debug, Deserialize)]
struct ClusterServer {
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    serial_number: String,
    #[serde(default)]
    management_ip: String,
}

/// Reports cluster servers.
#[derive(Debug)]
struct ClusterServerCollector {
    count: Arc<Descriptor>,
    status: Arc<Descriptor>,
}

impl ClusterServerCollector {
    fn new() -> Self {
        Self {
            count: gauge("cluster_server_count", "Number of servers in the cluster", &[]),
            status: gauge(
                "cluster_server_status",
                "Server status",
                &["name", "serial_number", "management_ip"],
            ),
        }
    }
}

#[async_trait]
impl Collector for ClusterServerCollector {
    fn name(&self) -> &'static str {
        "cluster_server_info"
    }

    fn help(&self) -> &'static str {
        "HWObs Cluster Server Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: ClusterServersResponse =
            fetch_json(client, Method::GET, CLUSTER_SERVERS_PATH, None).await?;
        response.result.check(CLUSTER_SERVERS_PATH)?;

        sink.emit_value(&self.count, response.data.len() as f64)?;
        for server in response.data {
            let labels = [server.name, server.serial_number, server.management_ip];
            sink.emit(&self.status, server.status as f64, labels)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct NodesResponse {
    #[serde(rename = "NodeInfo", default)]
    nodes: Vec<NodeInfo>,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(rename = "NodeIP")]
    ip: String,
}

#[derive(Debug, Deserialize)]
struct DisksResponse {
    #[serde(default)]
    disks: Vec<Disk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Disk {
    #[serde(default)]
    disk_role: String,
    #[serde(default)]
    disk_slot: i64,
    #[serde(default)]
    disk_type: String,
    #[serde(default)]
    disk_status: i64,
}

/// Reports disks of every storage node. Listings are requested per node with bounded concurrency.
#[derive(Debug)]
struct DiskCollector {
    count: Arc<Descriptor>,
    status: Arc<Descriptor>,
}

impl DiskCollector {
    fn new() -> Self {
        Self {
            count: gauge("disk_count", "Number of disks in the cluster", &[]),
            status: gauge(
                "disk_status",
                "Disk status",
                &["disk_role", "disk_slot", "disk_type", "node_ip"],
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
        "HWObs Disk Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: NodesResponse = fetch_json(client, Method::GET, NODES_PATH, None).await?;
        let requests: Vec<_> = response
            .nodes
            .iter()
            .map(|node| {
                let path = format!("{DISKS_PATH}?ip={}", node.ip);
                async move { fetch_json::<DisksResponse>(client, Method::GET, &path, None).await }
                    .boxed()
            })
            .collect();
        let listings: Vec<DisksResponse> = stream::iter(requests)
            .buffered(client.concurrency().max(1))
            .try_collect()
            .await?;

        let mut disk_count = 0_usize;
        for (node, listing) in response.nodes.iter().zip(listings) {
            disk_count += listing.disks.len();
            for disk in listing.disks {
                let labels = [
                    disk.disk_role,
                    disk.disk_slot.to_string(),
                    disk.disk_type,
                    node.ip.clone(),
                ];
                sink.emit(&self.status, disk.disk_status as f64, labels)?;
            }
        }
        sink.emit_value(&self.count, disk_count as f64)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PerformanceResponse {
    #[serde(default)]
    data: Vec<PerformanceData>,
    #[serde(default)]
    result: ApiResult,
}

#[derive(Debug, Deserialize)]
struct PerformanceData {
    indicator: String,
    #[serde(default)]
    indicator_values: Vec<String>,
}

/// Reports cluster-wide request rates and bandwidth.
#[derive(Debug)]
struct PerformanceCollector {
    indicators: Vec<(u32, Arc<Descriptor>)>,
}

impl PerformanceCollector {
    /// Object type of the whole cluster in performance queries.
    const CLUSTER_OBJECT_TYPE: u32 = 57_347;
    /// Start of the queried window relative to now. The manager aggregates samples with a delay,
    /// so recent windows are empty.
    const WINDOW_START_LAG_SECS: u64 = 1_000;
    const WINDOW_END_LAG_SECS: u64 = 990;

    fn new() -> Self {
        let indicators = [
            (540, "cluster_delete_request_per_second", "Cluster DELETE requests per second"),
            (543, "cluster_get_request_per_second", "Cluster GET requests per second"),
            (546, "cluster_put_request_per_second", "Cluster PUT requests per second"),
            (1064, "cluster_post_request_per_second", "Cluster POST requests per second"),
            (50001, "cluster_read_bandwidth", "Cluster read bandwidth, KiB/s"),
            (50002, "cluster_write_bandwidth", "Cluster write bandwidth, KiB/s"),
            (50003, "cluster_total_bandwidth", "Cluster total bandwidth, KiB/s"),
        ];
        Self {
            indicators: indicators
                .into_iter()
                .map(|(id, name, help)| (id, gauge(name, help, &[])))
                .collect(),
        }
    }

    fn request_body(&self) -> serde_json::Value {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        let indicators: Vec<_> = self.indicators.iter().map(|(id, _)| *id).collect();
        serde_json::json!({
            "objects": [{
                "object_type": Self::CLUSTER_OBJECT_TYPE,
                "indicators": indicators,
            }],
            "begin_time": now.saturating_sub(Self::WINDOW_START_LAG_SECS),
            "end_time": now.saturating_sub(Self::WINDOW_END_LAG_SECS),
        })
    }
}

#[async_trait]
impl Collector for PerformanceCollector {
    fn name(&self) -> &'static str {
        "performance_data"
    }

    fn help(&self) -> &'static str {
        "HWObs Performance Data"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let body = self.request_body();
        let response: PerformanceResponse =
            fetch_json(client, Method::POST, PERFORMANCE_PATH, Some(&body)).await?;
        response.result.check(PERFORMANCE_PATH)?;
        if response.data.is_empty() {
            return Err(CollectError::unexpected(
                PERFORMANCE_PATH,
                "no performance data in the queried window",
            ));
        }

        let values: HashMap<&str, &[String]> = response
            .data
            .iter()
            .map(|data| (data.indicator.as_str(), data.indicator_values.as_slice()))
            .collect();
        for (id, descriptor) in &self.indicators {
            let id = id.to_string();
            let value = values
                .get(id.as_str())
                .and_then(|values| values.first())
                .and_then(|value| value.parse::<f64>().ok());
            if let Some(value) = value {
                sink.emit_value(descriptor, value)?;
            } else {
                tracing::debug!(indicator = %id, "Performance indicator is missing or malformed");
            }
        }
        Ok(())
    }
}

/// Creates the registry of all Huawei OBS collectors.
///
/// # Errors
///
/// Propagates registration errors.
pub fn collectors() -> Result<CollectorRegistry, RegistryError> {
    let mut registry = CollectorRegistry::new();
    registry
        .register(StoragePoolCollector::new(), true)?
        .register(ClusterServerCollector::new(), true)?
        .register(DiskCollector::new(), true)?
        .register(PerformanceCollector::new(), true)?;
    Ok(registry)
}

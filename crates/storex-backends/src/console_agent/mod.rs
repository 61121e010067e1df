//! Console agent backend: the management agent in front of a Gdas optical storage cluster.
//!
//! Requests are signed with a shared secret key ([`SignedRequest`]); there is no session.
//! Every response is wrapped into a `{"code": .., "msg": .., "data": ..}` envelope, which
//! the client unwraps before handing the payload to collectors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use storex::{
    client::{
        fetch_json, unwrap_data_envelope, AuthenticatedClient, BackendClient, ClientBuildError,
        ClientConfig, HttpTransport, Method, PingError, RequestError, SignedRequest,
    },
    CollectError, Collector, CollectorRegistry, Descriptor, RegistryError, Sink,
};

use self::nodes::NodesCollector;

mod nodes;

/// Metric namespace of the console agent exporter.
pub const NAMESPACE: &str = "console_agent";
/// Application key the agent expects in the `appkey` header.
pub const APPKEY: &str = "wo-obs";

const HEALTH_PATH: &str = "/api/actuator/health";
const DAS_PATH: &str = "/api/gdas/das";
const POOLS_PATH: &str = "/api/gdas/pool/list";
const USERS_PATH: &str = "/api/gdas/user/list";
const TOTAL_SPACE_PATH: &str = "/api/gdas/totalspace";
const MAGAZINES_PATH: &str = "/api/gdas/magazine/list";

fn gauge(name: &str, help: &str, labels: &[&str]) -> Arc<Descriptor> {
    Descriptor::gauge(NAMESPACE, "", name, help, labels)
}

/// Client of the console agent REST API.
#[derive(Debug)]
pub struct ConsoleAgentClient {
    inner: AuthenticatedClient<SignedRequest>,
    concurrency: usize,
}

impl ConsoleAgentClient {
    /// Creates a client signing requests with `secret_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP transport cannot be built.
    pub fn new(
        config: &ClientConfig,
        secret_key: impl Into<String>,
    ) -> Result<Self, ClientBuildError> {
        let scheme = SignedRequest::new(APPKEY, secret_key);
        Ok(Self {
            inner: AuthenticatedClient::new(HttpTransport::new(config)?, scheme),
            concurrency: config.concurrency(),
        })
    }
}

#[async_trait]
impl BackendClient for ConsoleAgentClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, RequestError> {
        let payload = self.inner.request(method, path, body).await?;
        unwrap_data_envelope(path, &payload)
    }

    async fn ping(&self) -> Result<bool, PingError> {
        crate::probe(&self.inner, Method::GET, HEALTH_PATH).await
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DasResponse {
    #[serde(default)]
    da_info: Vec<DaInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DaInfo {
    #[serde(default)]
    dam_name: String,
    #[serde(default)]
    ip: String,
    #[serde(default)]
    da_name: String,
    #[serde(default)]
    da_status: i64,
    #[serde(default)]
    da_no: i64,
    #[serde(default)]
    da_vendor: String,
    #[serde(default)]
    offline: i64,
    #[serde(default)]
    slot_count: i64,
}

/// Reports every disc array (DA) known to the cluster.
#[derive(Debug)]
struct DasCollector {
    total_count: Arc<Descriptor>,
    status: Arc<Descriptor>,
    offline: Arc<Descriptor>,
    slot_count: Arc<Descriptor>,
}

impl DasCollector {
    const LABELS: &'static [&'static str] = &["dam_name", "ip", "da_name", "da_no", "da_vendor"];

    fn new() -> Self {
        Self {
            total_count: gauge("gdas_das_total_count", "Number of disc arrays in the cluster", &[]),
            status: gauge(
                "gdas_das_status",
                "Disc array status: 0 connected, -203 ejecting magazine, -210 unlocking rack, \
                 -202 busy, -102 disconnected, -100 or -103 identifying",
                Self::LABELS,
            ),
            offline: gauge(
                "gdas_das_offline",
                "Disc array registration: 0 disconnected, 1 registered",
                Self::LABELS,
            ),
            slot_count: gauge(
                "gdas_das_slot_count",
                "Number of magazine slots in the disc array",
                Self::LABELS,
            ),
        }
    }
}

#[async_trait]
impl Collector for DasCollector {
    fn name(&self) -> &'static str {
        "gdas_das_info"
    }

    fn help(&self) -> &'static str {
        "Gdas Das Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: DasResponse = fetch_json(client, Method::POST, DAS_PATH, None).await?;
        sink.emit_value(&self.total_count, response.da_info.len() as f64)?;
        for da in &response.da_info {
            let da_no = da.da_no.to_string();
            let labels: [&str; 5] = [&da.dam_name, &da.ip, &da.da_name, &da_no, &da.da_vendor];
            sink.emit(&self.status, da.da_status as f64, labels)?;
            sink.emit(&self.offline, da.offline as f64, labels)?;
            sink.emit(&self.slot_count, da.slot_count as f64, labels)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PoolsResponse {
    #[serde(default)]
    res_count: i64,
    #[serde(default)]
    pools: Vec<Pool>,
}

#[derive(Debug, Deserialize)]
struct Pool {
    #[serde(rename = "poolCanDel_flag", default)]
    can_delete_flag: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "defaultMgz", default)]
    default_magazine: bool,
    #[serde(default)]
    pool_total_space: i64,
    #[serde(default)]
    pool_name: String,
    #[serde(default)]
    pool_sts: i64,
    #[serde(default)]
    rfid_count: i64,
    #[serde(default)]
    pool_available_space: i64,
    #[serde(default)]
    user: String,
    #[serde(rename = "pool_raidLvl", default)]
    raid_level: i64,
    #[serde(rename = "autoAddMgz", default)]
    auto_add_magazines: bool,
}

/// Reports magazine pools with their capacity.
#[derive(Debug)]
struct PoolCollector {
    total_count: Arc<Descriptor>,
    status: Arc<Descriptor>,
    total_space: Arc<Descriptor>,
    available_space: Arc<Descriptor>,
    rfid_count: Arc<Descriptor>,
}

impl PoolCollector {
    const CAPACITY_LABELS: &'static [&'static str] = &["pool_name", "pool_raidLvl"];

    fn new() -> Self {
        Self {
            total_count: gauge("gdas_pool_total_count", "Number of magazine pools", &[]),
            status: gauge(
                "gdas_pool_status",
                "Magazine pool status: 0 idle, 1 burning",
                &[
                    "pool_can_del_flag",
                    "type",
                    "default_mgz",
                    "pool_name",
                    "user",
                    "pool_raidLvl",
                    "auto_add_mgz",
                ],
            ),
            total_space: gauge(
                "gdas_pool_total_space",
                "Total space of the magazine pool, bytes",
                Self::CAPACITY_LABELS,
            ),
            available_space: gauge(
                "gdas_pool_available_space",
                "Available space of the magazine pool, bytes",
                Self::CAPACITY_LABELS,
            ),
            rfid_count: gauge(
                "gdas_pool_rfid_count",
                "Number of magazines in the pool",
                Self::CAPACITY_LABELS,
            ),
        }
    }
}

#[async_trait]
impl Collector for PoolCollector {
    fn name(&self) -> &'static str {
        "gdas_pool_info"
    }

    fn help(&self) -> &'static str {
        "Gdas Pool Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let body = serde_json::json!({ "poolFlag": false, "poolName": "", "poolType": "" });
        let response: PoolsResponse =
            fetch_json(client, Method::POST, POOLS_PATH, Some(&body)).await?;
        sink.emit_value(&self.total_count, response.res_count as f64)?;

        for pool in response.pools {
            let raid_level = pool.raid_level.to_string();
            let status_labels = [
                pool.can_delete_flag,
                pool.kind,
                pool.default_magazine.to_string(),
                pool.pool_name.clone(),
                pool.user,
                raid_level.clone(),
                pool.auto_add_magazines.to_string(),
            ];
            sink.emit(&self.status, pool.pool_sts as f64, status_labels)?;

            let labels: [&str; 2] = [&pool.pool_name, &raid_level];
            sink.emit(&self.total_space, pool.pool_total_space as f64, labels)?;
            sink.emit(&self.available_space, pool.pool_available_space as f64, labels)?;
            sink.emit(&self.rfid_count, pool.rfid_count as f64, labels)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    res_count: i64,
}

/// Reports the number of Gdas users.
#[derive(Debug)]
struct UserCountCollector {
    count: Arc<Descriptor>,
}

impl UserCountCollector {
    fn new() -> Self {
        Self {
            count: gauge("gdas_user_count", "Number of Gdas users", &[]),
        }
    }
}

#[async_trait]
impl Collector for UserCountCollector {
    fn name(&self) -> &'static str {
        "gdas_user_count"
    }

    fn help(&self) -> &'static str {
        "Gdas User Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let body = serde_json::json!({ "pages": "1-1", "userName": "" });
        let response: UsersResponse =
            fetch_json(client, Method::POST, USERS_PATH, Some(&body)).await?;
        sink.emit_value(&self.count, response.res_count as f64)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TotalSpaceResponse {
    #[serde(default)]
    total_space_raid0: i64,
    #[serde(default)]
    total_space: i64,
    #[serde(default)]
    total_available_space: i64,
    #[serde(default)]
    total_slot_count: i64,
    #[serde(default)]
    total_mgz_count: i64,
    #[serde(default)]
    used_mgz_count: i64,
    #[serde(default)]
    free_mgz_count: i64,
    #[serde(default)]
    exception_mgz_count: i64,
}

/// Reports cluster-wide magazine capacity and counts.
#[derive(Debug)]
struct TotalSpaceCollector {
    total_space_raid0: Arc<Descriptor>,
    total_space: Arc<Descriptor>,
    total_available_space: Arc<Descriptor>,
    total_slot_count: Arc<Descriptor>,
    total_count: Arc<Descriptor>,
    used_count: Arc<Descriptor>,
    free_count: Arc<Descriptor>,
    exception_count: Arc<Descriptor>,
}

impl TotalSpaceCollector {
    fn new() -> Self {
        Self {
            total_space_raid0: gauge(
                "gdas_magazines_total_space_raid0",
                "Total magazine space as if all magazines were RAID0, bytes",
                &[],
            ),
            total_space: gauge("gdas_magazines_total_space", "Total magazine space, bytes", &[]),
            total_available_space: gauge(
                "gdas_magazines_total_available_space",
                "Available magazine space, bytes",
                &[],
            ),
            total_slot_count: gauge(
                "gdas_magazines_total_slot_count",
                "Total number of slots",
                &[],
            ),
            total_count: gauge("gdas_magazines_total_count", "Total number of magazines", &[]),
            used_count: gauge("gdas_magazines_used_count", "Number of used magazines", &[]),
            free_count: gauge("gdas_magazines_free_count", "Number of free magazines", &[]),
            exception_count: gauge(
                "gdas_magazines_exception_count",
                "Number of magazines in an abnormal state",
                &[],
            ),
        }
    }
}

#[async_trait]
impl Collector for TotalSpaceCollector {
    fn name(&self) -> &'static str {
        "gdas_magazines_info"
    }

    fn help(&self) -> &'static str {
        "Gdas Magazines Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: TotalSpaceResponse =
            fetch_json(client, Method::POST, TOTAL_SPACE_PATH, None).await?;
        let values = [
            (&self.total_space_raid0, response.total_space_raid0),
            (&self.total_space, response.total_space),
            (&self.total_available_space, response.total_available_space),
            (&self.total_slot_count, response.total_slot_count),
            (&self.total_count, response.total_mgz_count),
            (&self.used_count, response.used_mgz_count),
            (&self.free_count, response.free_mgz_count),
            (&self.exception_count, response.exception_mgz_count),
        ];
        for (descriptor, value) in values {
            sink.emit_value(descriptor, value as f64)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MagazinesResponse {
    #[serde(default)]
    rfid: Vec<Magazine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Magazine {
    #[serde(default)]
    dam_name: String,
    #[serde(default)]
    server_ip: String,
    #[serde(default)]
    da_name: String,
    #[serde(default)]
    da_no: i64,
    #[serde(default)]
    rfid: String,
    #[serde(default)]
    slot_no: i64,
    #[serde(default)]
    pool_name: String,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    full: i64,
    #[serde(default)]
    rfid_sts: i64,
}

/// Reports the state of every magazine.
#[derive(Debug)]
struct MagazinesStatusCollector {
    status: Arc<Descriptor>,
    full: Arc<Descriptor>,
    rfid_status: Arc<Descriptor>,
}

impl MagazinesStatusCollector {
    const LABELS: &'static [&'static str] =
        &["dam_name", "ip", "da_name", "da_no", "rfid", "slot_no", "pool_name"];

    fn new() -> Self {
        Self {
            status: gauge(
                "gdas_magazines_status",
                "Magazine status: 0 normal, 3 copying, 4 non-system, 9 abnormal",
                Self::LABELS,
            ),
            full: gauge("gdas_magazines_full", "Whether the magazine is full", Self::LABELS),
            rfid_status: gauge(
                "gdas_magazines_rfid_sts",
                "Magazine distribution: 1 if not assigned to a pool",
                Self::LABELS,
            ),
        }
    }
}

#[async_trait]
impl Collector for MagazinesStatusCollector {
    fn name(&self) -> &'static str {
        "gdas_magazines_status"
    }

    fn help(&self) -> &'static str {
        "Gdas Magazines Status.0-normal,3-copying,4-non-system,9-anormal"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: MagazinesResponse =
            fetch_json(client, Method::POST, MAGAZINES_PATH, None).await?;
        for magazine in &response.rfid {
            let da_no = magazine.da_no.to_string();
            let slot_no = magazine.slot_no.to_string();
            let labels: [&str; 7] = [
                &magazine.dam_name,
                &magazine.server_ip,
                &magazine.da_name,
                &da_no,
                &magazine.rfid,
                &slot_no,
                &magazine.pool_name,
            ];
            sink.emit(&self.status, magazine.status as f64, labels)?;
            sink.emit(&self.full, magazine.full as f64, labels)?;
            sink.emit(&self.rfid_status, magazine.rfid_sts as f64, labels)?;
        }
        Ok(())
    }
}

/// Creates the registry of all console agent collectors.
///
/// # Errors
///
/// Propagates registration errors.
pub fn collectors() -> Result<CollectorRegistry, RegistryError> {
    let mut registry = CollectorRegistry::new();
    registry
        .register(DasCollector::new(), true)?
        .register(PoolCollector::new(), true)?
        .register(UserCountCollector::new(), true)?
        .register(TotalSpaceCollector::new(), true)?
        .register(NodesCollector::new(), true)?
        .register(MagazinesStatusCollector::new(), true)?;
    Ok(registry)
}

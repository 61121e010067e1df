//! E37 object storage backend (RADOS gateway behind a management dashboard).
//!
//! Bucket and user details are fetched one request per item. A failing item is logged and
//! skipped, so that a single broken bucket or user does not hide the metrics of all others.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, FutureExt as _, StreamExt as _};
use serde::{de::DeserializeOwned, Deserialize};
use storex::{
    client::{
        fetch_json, AuthScheme as _, AuthenticatedClient, BackendClient, ClientBuildError,
        ClientConfig, HttpTransport, Method, PingError, RequestError, StatusCode, TokenHeader,
        TokenLogin,
    },
    CollectError, Collector, CollectorRegistry, Descriptor, RegistryError, Sink,
};

#[cfg(test)]
mod tests;

/// Metric namespace of the E37 exporter.
pub const NAMESPACE: &str = "e37";

const SUBSYSTEM: &str = "object_storage";
const LOGIN_PATH: &str = "/api/auth";
const TOKEN_CHECK_PATH: &str = "/api/auth/check";
const BUCKETS_PATH: &str = "/api/rgw/bucket";
const USERS_PATH: &str = "/api/rgw/user";

fn gauge(name: &str, help: &str, labels: &[&str]) -> Arc<Descriptor> {
    Descriptor::gauge(NAMESPACE, SUBSYSTEM, name, help, labels)
}

/// Client of the E37 dashboard API, authenticating with a bearer token.
#[derive(Debug)]
pub struct E37Client {
    inner: AuthenticatedClient<TokenLogin>,
    concurrency: usize,
}

impl E37Client {
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
        let login_body = serde_json::json!({ "username": username, "password": password });
        let scheme = TokenLogin::new(LOGIN_PATH, login_body, "/token", TokenHeader::Bearer)
            .with_expected_status(StatusCode::CREATED);
        Ok(Self {
            inner: AuthenticatedClient::new(HttpTransport::new(config)?, scheme),
            concurrency: config.concurrency(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenCheck {
    username: Option<String>,
}

#[async_trait]
impl BackendClient for E37Client {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, RequestError> {
        self.inner.request(method, path, body).await
    }

    async fn ping(&self) -> Result<bool, PingError> {
        let Some(token) = self.inner.tokens().get() else {
            self.inner.refresh().await?;
            return Ok(true);
        };

        let transport = self.inner.transport();
        let body = serde_json::json!({ "token": token.as_str() });
        let request = transport.request(Method::POST, TOKEN_CHECK_PATH).json(&body);
        let request = self.inner.scheme().authorize(request, Some(token.as_str()));
        let response = transport.execute(TOKEN_CHECK_PATH, request).await?;
        let username = response
            .json::<TokenCheck>()
            .ok()
            .and_then(|check| check.username);
        if username.is_some() {
            return Ok(true);
        }

        tracing::warn!(status = %response.status, "Token check failed, refreshing token");
        self.inner.refresh().await?;
        Ok(true)
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Fetches details of a single listed item, logging and swallowing failures.
async fn fetch_item<T: DeserializeOwned>(client: &dyn BackendClient, path: String) -> Option<T> {
    match fetch_json(client, Method::GET, &path, None).await {
        Ok(item) => Some(item),
        Err(err) => {
            tracing::warn!(%path, %err, "Failed fetching item details, skipping");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct Bucket {
    #[serde(default)]
    bid: String,
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    usage: BucketUsage,
}

#[derive(Debug, Default, Deserialize)]
struct BucketUsage {
    #[serde(rename = "rgw.main", default)]
    main: RgwMainUsage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RgwMainUsage {
    num_objects: i64,
    size: i64,
    local_allocated_objects: i64,
    local_allocated_size: i64,
    external_tape_objects: i64,
    external_tape_size: i64,
    external_glacier_objects: i64,
    external_glacier_size: i64,
    restore_glacier_objects: i64,
    restore_glacier_size: i64,
    restore_tape_objects: i64,
    restore_tape_size: i64,
}

impl RgwMainUsage {
    fn values(&self) -> [i64; 12] {
        [
            self.num_objects,
            self.size,
            self.local_allocated_objects,
            self.local_allocated_size,
            self.external_tape_objects,
            self.external_tape_size,
            self.external_glacier_objects,
            self.external_glacier_size,
            self.restore_glacier_objects,
            self.restore_glacier_size,
            self.restore_tape_objects,
            self.restore_tape_size,
        ]
    }
}

/// Reports usage of every bucket.
#[derive(Debug)]
struct BucketsCollector {
    total_count: Arc<Descriptor>,
    usage: Vec<Arc<Descriptor>>,
}

impl BucketsCollector {
    /// Per-bucket families in the order of [`RgwMainUsage::values()`].
    const USAGE_FAMILIES: [(&'static str, &'static str); 12] = [
        ("bucket_num_objects", "Number of objects in the bucket"),
        ("bucket_size", "Size of the bucket, bytes"),
        ("bucket_local_allocated_objects", "Number of objects stored locally"),
        ("bucket_local_allocated_size", "Size of objects stored locally, bytes"),
        ("bucket_external_tape_objects", "Number of objects moved to tape"),
        ("bucket_external_tape_size", "Size of objects moved to tape, bytes"),
        ("bucket_external_glacier_objects", "Number of objects moved to glacier"),
        ("bucket_external_glacier_size", "Size of objects moved to glacier, bytes"),
        ("bucket_restore_glacier_objects", "Number of objects restored from glacier"),
        ("bucket_restore_glacier_size", "Size of objects restored from glacier, bytes"),
        ("bucket_restore_tape_objects", "Number of objects restored from tape"),
        ("bucket_restore_tape_size", "Size of objects restored from tape, bytes"),
    ];

    fn new() -> Self {
        let labels = ["e37_bid", "e37_bucket_name", "e37_uid"];
        Self {
            total_count: gauge("bucket_total_count", "Number of buckets", &[]),
            usage: Self::USAGE_FAMILIES
                .iter()
                .map(|(name, help)| gauge(name, help, &labels))
                .collect(),
        }
    }
}

#[async_trait]
impl Collector for BucketsCollector {
    fn name(&self) -> &'static str {
        "buckets_info"
    }

    fn help(&self) -> &'static str {
        "E37 Buckets Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let names: Vec<String> = fetch_json(client, Method::GET, BUCKETS_PATH, None).await?;
        tracing::debug!(bucket_count = names.len(), "Fetched E37 buckets");
        sink.emit_value(&self.total_count, names.len() as f64)?;

        let requests: Vec<_> = names
            .iter()
            .map(|name| fetch_item::<Bucket>(client, format!("{BUCKETS_PATH}/{name}")).boxed())
            .collect();
        let buckets: Vec<Option<Bucket>> = stream::iter(requests)
            .buffered(client.concurrency().max(1))
            .collect()
            .await;
        for bucket in buckets.into_iter().flatten() {
            let labels: [&str; 3] = [&bucket.bid, &bucket.bucket, &bucket.owner];
            for (descriptor, value) in self.usage.iter().zip(bucket.usage.main.values()) {
                sink.emit(descriptor, value as f64, labels)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct UsersList {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    count: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    keys: Vec<UserKey>,
    #[serde(default)]
    summary: Vec<UserSummary>,
}

#[derive(Debug, Deserialize)]
struct UserKey {
    user: String,
}

#[derive(Debug, Deserialize)]
struct UserSummary {
    #[serde(default)]
    total: UserTotals,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserTotals {
    ops: i64,
    successful_ops: i64,
    total_entries: i64,
    total_bytes: i64,
}

/// Reports per-user request and storage totals.
#[derive(Debug)]
struct UsersCollector {
    total_count: Arc<Descriptor>,
    ops: Arc<Descriptor>,
    successful_ops: Arc<Descriptor>,
    entries: Arc<Descriptor>,
    bytes: Arc<Descriptor>,
}

impl UsersCollector {
    fn new() -> Self {
        Self {
            total_count: gauge("user_total_count", "Number of users", &[]),
            ops: gauge("user_total_ops", "Total number of requests by the user", &["e37_uid"]),
            successful_ops: gauge(
                "user_total_successful_ops",
                "Total number of successful requests by the user",
                &["e37_uid"],
            ),
            entries: gauge(
                "user_total_entries",
                "Total number of objects owned by the user",
                &["e37_uid"],
            ),
            bytes: gauge(
                "user_total_bytes",
                "Total size of objects owned by the user, bytes",
                &["e37_uid"],
            ),
        }
    }

    fn emit_user(&self, sink: &Sink, user: &User) -> Result<(), CollectError> {
        let (Some(key), Some(summary)) = (user.keys.first(), user.summary.first()) else {
            return Ok(());
        };
        let uid = [key.user.as_str()];
        let totals = &summary.total;
        sink.emit(&self.ops, totals.ops as f64, uid)?;
        sink.emit(&self.successful_ops, totals.successful_ops as f64, uid)?;
        sink.emit(&self.entries, totals.total_entries as f64, uid)?;
        sink.emit(&self.bytes, totals.total_bytes as f64, uid)?;
        Ok(())
    }
}

#[async_trait]
impl Collector for UsersCollector {
    fn name(&self) -> &'static str {
        "UsersList_info"
    }

    fn help(&self) -> &'static str {
        "E37 UsersList Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let list: UsersList = fetch_json(client, Method::GET, USERS_PATH, None).await?;
        tracing::debug!(user_count = list.keys.len(), "Fetched E37 users");
        sink.emit_value(&self.total_count, list.count as f64)?;

        let requests: Vec<_> = list
            .keys
            .iter()
            .map(|uid| fetch_item::<User>(client, format!("{USERS_PATH}/{uid}")).boxed())
            .collect();
        let users: Vec<Option<User>> = stream::iter(requests)
            .buffered(client.concurrency().max(1))
            .collect()
            .await;
        for user in users.iter().flatten() {
            self.emit_user(sink, user)?;
        }
        Ok(())
    }
}

/// Creates the registry of all E37 collectors.
///
/// # Errors
///
/// Propagates registration errors.
pub fn collectors() -> Result<CollectorRegistry, RegistryError> {
    let mut registry = CollectorRegistry::new();
    registry
        .register(BucketsCollector::new(), true)?
        .register(UsersCollector::new(), true)?;
    Ok(registry)
}

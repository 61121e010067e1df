//! Harbor container registry backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use storex::{
    client::{
        fetch_json, AuthenticatedClient, BackendClient, BasicAuth, ClientBuildError,
        ClientConfig, HttpTransport, Method, PingError, RequestError,
    },
    CollectError, Collector, CollectorRegistry, Descriptor, RegistryError, Sink,
};

use crate::status_value;


/// Metric namespace of the Harbor exporter.
pub const NAMESPACE: &str = "harbor";

const PING_PATH: &str = "/ping";
const HEALTH_PATH: &str = "/health";

/// Client of the Harbor v2 API. The base URL is expected to include the `/api/v2.0` prefix.
#[derive(Debug)]
pub struct HarborClient {
    inner: AuthenticatedClient<BasicAuth>,
    concurrency: usize,
}

impl HarborClient {
    /// Creates a client authenticating every request with HTTP basic auth.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP transport cannot be built.
    pub fn new(
        config: &ClientConfig,
        username: &str,
        password: &str,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self {
            inner: AuthenticatedClient::new(
                HttpTransport::new(config)?,
                BasicAuth::new(username, password),
            ),
            concurrency: config.concurrency(),
        })
    }
}

#[async_trait]
impl BackendClient for HarborClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, RequestError> {
        self.inner.request(method, path, body).await
    }

    async fn ping(&self) -> Result<bool, PingError> {
        crate::probe(&self.inner, Method::GET, PING_PATH).await
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }
}

#[derive(Debug, Deserialize)]
struct OverallHealth {
    status: String,
    #[serde(default)]
    components: Vec<ComponentHealth>,
}

#[derive(Debug, Deserialize)]
struct ComponentHealth {
    name: String,
    status: String,
}

/// Reports health of Harbor as a whole (`component="all"`) and of each of its components.
#[derive(Debug)]
struct HealthCollector {
    status: Arc<Descriptor>,
}

impl HealthCollector {
    fn new() -> Self {
        Self {
            status: Descriptor::gauge(
                NAMESPACE,
                "components",
                "health_status",
                "Harbor overall health of all components",
                &["component"],
            ),
        }
    }
}

#[async_trait]
impl Collector for HealthCollector {
    fn name(&self) -> &'static str {
        "health_info"
    }

    fn help(&self) -> &'static str {
        "Harbor Health Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let health: OverallHealth = fetch_json(client, Method::GET, HEALTH_PATH, None).await?;
        sink.emit(&self.status, status_value(&health.status), ["all"])?;
        for component in &health.components {
            sink.emit(
                &self.status,
                status_value(&component.status),
                [component.name.as_str()],
            )?;
        }
        Ok(())
    }
}

/// Creates the registry of all Harbor collectors.
///
/// # Errors
///
/// Propagates registration errors.
pub fn collectors() -> Result<CollectorRegistry, RegistryError> {
    let mut registry = CollectorRegistry::new();
    registry.register(HealthCollector::new(), true)?;
    Ok(registry)
}

//! Gdas optical storage backend.
//!
//! Gdas issues a session token on login. Every request carries the token together with a signature
//! computed from the token, a millisecond timestamp and a numeric nonce.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use rand::Rng as _;
use reqwest::RequestBuilder;
use serde::Deserialize;
use storex::{
    client::{
        fetch_json, reversed, sha256_signature, unix_millis, AuthScheme, AuthenticatedClient,
        BackendClient, ClientBuildError, ClientConfig, HttpTransport, Method, PingError,
        RequestError, StatusCode, TokenLogin,
    },
    CollectError, Collector, CollectorRegistry, Descriptor, RegistryError, Sink,
};

#[cfg(test)]
mod tests;

/// Metric namespace of the Gdas exporter.
pub const NAMESPACE: &str = "gdas";

const LOGIN_PATH: &str = "/v1/login";
const NODE_LIST_PATH: &str = "/v1/nodeList";
const MAGAZINES_PATH: &str = "/v1/magazines";

/// Gdas authentication: login with credentials, then sign every request with the session token.
///
/// Signed requests carry `token`, `stime` (Unix timestamp in milliseconds), `nonce` (random number below 100000)
/// and `signature` headers, where the signature is the hex-encoded SHA-256 digest
/// of `stime + nonce + token + reverse(nonce)`.
#[derive(Clone)]
pub struct GdasAuth {
    username: String,
    password: String,
    referer: String,
}

impl fmt::Debug for GdasAuth {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("GdasAuth")
            .field("username", &self.username)
            .field("referer", &self.referer)
            .finish_non_exhaustive()
    }
}

impl GdasAuth {
    const MAX_NONCE: u32 = 100_000;

    /// Creates a scheme for the backend at `base_url`.
    pub fn new(base_url: &str, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            referer: format!("{base_url}/gdas"),
        }
    }

    /// Computes the signature for the provided timestamp, nonce and session token.
    pub fn signature(stime: &str, nonce: &str, token: &str) -> String {
        sha256_signature(&[stime, nonce, token, &reversed(nonce)])
    }
}

#[async_trait]
impl AuthScheme for GdasAuth {
    async fn login(&self, transport: &HttpTransport) -> Result<Option<String>, RequestError> {
        let body = serde_json::json!({
            "userName": self.username,
            "passWord": self.password,
        });
        let request = transport
            .request(Method::POST, LOGIN_PATH)
            .header("Referer", &self.referer)
            .header("stime", unix_millis())
            .json(&body);
        let response = transport.execute(LOGIN_PATH, request).await?;
        let token = TokenLogin::extract_token(&response, "/token", Some(StatusCode::OK))?;
        tracing::debug!(user = %self.username, "Obtained Gdas session token");
        Ok(Some(token))
    }

    fn authorize(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let request = request.header("Referer", &self.referer);
        let Some(token) = token else {
            return request;
        };

        let stime = unix_millis();
        let nonce = rand::rng().random_range(0..Self::MAX_NONCE).to_string();
        let signature = Self::signature(&stime, &nonce, token);
        request
            .header("token", token)
            .header("stime", stime)
            .header("nonce", nonce)
            .header("signature", signature)
    }
}

/// Client of the Gdas REST API.
#[derive(Debug)]
pub struct GdasClient {
    inner: AuthenticatedClient<GdasAuth>,
    concurrency: usize,
}

impl GdasClient {
    /// Creates a client. The client logs in lazily on the first request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP transport cannot be built.
    pub fn new(
        config: &ClientConfig,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ClientBuildError> {
        let transport = HttpTransport::new(config)?;
        let scheme = GdasAuth::new(config.base_url(), username, password);
        Ok(Self {
            inner: AuthenticatedClient::new(transport, scheme),
            concurrency: config.concurrency(),
        })
    }
}

#[async_trait]
impl BackendClient for GdasClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, RequestError> {
        self.inner.request(method, path, body).await
    }

    async fn ping(&self) -> Result<bool, PingError> {
        crate::probe(&self.inner, Method::GET, NODE_LIST_PATH).await
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }
}

#[derive(Debug, Deserialize)]
struct MagazinesResponse {
    #[serde(default)]
    rfid: Vec<Rfid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Rfid {
    #[serde(default)]
    rfid_sts: i64,
}

/// Counts magazines that are not yet distributed to a pool.
#[derive(Debug)]
struct MagazinesCollector {
    magazines: Arc<Descriptor>,
}

impl MagazinesCollector {
    fn new() -> Self {
        Self {
            magazines: Descriptor::gauge(
                NAMESPACE,
                "",
                "magazines_info",
                "Gdas magazines info",
                &["comments"],
            ),
        }
    }
}

#[async_trait]
impl Collector for MagazinesCollector {
    fn name(&self) -> &'static str {
        "magazines_info"
    }

    fn help(&self) -> &'static str {
        "Gdas Magazines Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: MagazinesResponse =
            fetch_json(client, Method::GET, MAGAZINES_PATH, None).await?;
        let undistributed_count = response.rfid.iter().filter(|rfid| rfid.rfid_sts == 1).count();
        tracing::debug!(undistributed_count, "Counted undistributed magazines");
        sink.emit(
            &self.magazines,
            undistributed_count as f64,
            ["undistributedCount"],
        )?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeListResponse {
    #[serde(default)]
    node_list: Vec<Node>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    ip: String,
    status: f64,
    #[serde(default)]
    dam_name: String,
}

/// Reports the status of every Gdas node.
#[derive(Debug)]
struct NodeListCollector {
    status: Arc<Descriptor>,
}

impl NodeListCollector {
    fn new() -> Self {
        Self {
            status: Descriptor::gauge(
                NAMESPACE,
                "",
                "nodelist_info",
                "Gdas node info",
                &["node_ip", "node_name"],
            ),
        }
    }
}

#[async_trait]
impl Collector for NodeListCollector {
    fn name(&self) -> &'static str {
        "nodelist_info"
    }

    fn help(&self) -> &'static str {
        "Gdas Node Info"
    }

    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
        let response: NodeListResponse =
            fetch_json(client, Method::GET, NODE_LIST_PATH, None).await?;
        tracing::debug!(node_count = response.node_list.len(), "Fetched Gdas nodes");
        for node in response.node_list {
            sink.emit(&self.status, node.status, [node.ip, node.dam_name])?;
        }
        Ok(())
    }
}

/// Creates the registry of all Gdas collectors.
///
/// # Errors
///
/// Propagates registration errors.
pub fn collectors() -> Result<CollectorRegistry, RegistryError> {
    let mut registry = CollectorRegistry::new();
    registry
        .register(MagazinesCollector::new(), true)?
        .register(NodeListCollector::new(), true)?;
    Ok(registry)
}

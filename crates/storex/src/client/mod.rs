//! Backend client skeleton: uniform request interface, transport, authentication and envelope handling.
//!
//! Concrete backends combine an [`HttpTransport`] with an [`AuthScheme`] in an [`AuthenticatedClient`],
//! and implement [`BackendClient`] on top of it, adding the backend-specific health probe and response
//! envelope handling.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

pub use self::{
    auth::{
        alphanumeric_nonce, reversed, sha256_signature, unix_millis, AuthScheme,
        AuthenticatedClient, BasicAuth, SignedRequest, TokenHeader, TokenLogin, TokenStore,
    },
    transport::{HttpTransport, RawResponse},
};
pub use reqwest::{Method, StatusCode};

mod auth;
#[cfg(test)]
mod tests;
mod transport;

/// Default number of concurrent requests a collector may issue for per-item listings.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Errors returned by [`BackendClient::request()`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RequestError {
    /// Network failure or timeout. Not retried internally; the next scrape will try again.
    #[error("failed sending request to `{url}`: {source}")]
    Connection {
        /// Requested URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// Token is invalid or cannot be obtained.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Backend responded with a non-success status.
    #[error("`{path}` responded with {status}: {body}")]
    Protocol {
        /// Requested path.
        path: String,
        /// Response status.
        status: StatusCode,
        /// Response body (possibly truncated).
        body: String,
    },
    /// Response body is not valid JSON or is not shaped as expected.
    #[error("cannot decode response from `{path}`: {message}")]
    Decode {
        /// Requested path.
        path: String,
        /// Decoding error.
        message: String,
    },
}

impl RequestError {
    pub(crate) fn decode(path: &str, message: impl ToString) -> Self {
        Self::Decode {
            path: path.to_owned(),
            message: message.to_string(),
        }
    }
}

/// Error returned by [`BackendClient::ping()`].
#[derive(Debug, thiserror::Error)]
#[error("reachability probe failed: {0}")]
pub struct PingError(#[from] pub RequestError);

/// Errors building a client from configuration. These are fatal at startup.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientBuildError {
    /// Base URL cannot be used.
    #[error("invalid backend URL `{url}`: {reason}")]
    InvalidUrl {
        /// Provided URL.
        url: String,
        /// Violated rule.
        reason: String,
    },
    /// HTTP client cannot be constructed (e.g., TLS backend initialization failed).
    #[error("cannot build HTTP client: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Connection profile of a backend client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    base_url: String,
    timeout: Duration,
    insecure: bool,
    concurrency: usize,
}

impl ClientConfig {
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_600);

    /// Creates a config for the specified base URL. A URL without a scheme is assumed to use `http://`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed, doesn't use HTTP(S) or has no host.
    pub fn new(base_url: &str) -> Result<Self, ClientBuildError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            timeout: Self::DEFAULT_TIMEOUT,
            insecure: false,
            concurrency: DEFAULT_CONCURRENCY,
        })
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disables TLS certificate verification.
    #[must_use]
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Sets the concurrency limit for per-item requests. Zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the normalized base URL (without a trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Checks whether TLS verification is disabled.
    pub fn insecure(&self) -> bool {
        self.insecure
    }

    /// Returns the per-item concurrency limit.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Normalizes a backend base URL: prepends `http://` if the scheme is missing, checks that
/// the scheme is HTTP(S) and the host is present, and removes the trailing slash.
///
/// # Errors
///
/// Returns an error if any of the checks fails.
pub fn normalize_base_url(raw: &str) -> Result<String, ClientBuildError> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_owned()
    } else {
        format!("http://{raw}")
    };
    let invalid = |reason: String| ClientBuildError::InvalidUrl {
        url: raw.to_owned(),
        reason,
    };

    let url = reqwest::Url::parse(&with_scheme).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!(
            "unsupported scheme `{}`, expected `http` or `https`",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("no host specified".to_owned()));
    }
    Ok(url.as_str().trim_end_matches('/').to_owned())
}

/// Authenticated connection to a single backend.
///
/// Implementations must tolerate concurrent use: all collectors of an exporter share one client.
#[async_trait]
pub trait BackendClient: fmt::Debug + Send + Sync + 'static {
    /// Sends a request and returns the response payload, already unwrapped from any backend-specific
    /// envelope. `path` is relative to the backend base URL and may contain a query.
    ///
    /// # Errors
    ///
    /// Returns an error on network failures, authentication failures, non-success statuses
    /// and malformed envelopes.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, RequestError>;

    /// Lightweight health probe. Returns `Ok(false)` if the backend answered but reports itself as unhealthy.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or authentication cannot be restored.
    async fn ping(&self) -> Result<bool, PingError>;

    /// Maximum number of concurrent requests a collector should issue for per-item listings.
    fn concurrency(&self) -> usize {
        DEFAULT_CONCURRENCY
    }
}

/// Decodes a JSON payload returned for `path`.
///
/// # Errors
///
/// Returns [`RequestError::Decode`] if the payload is not valid JSON of the expected shape.
pub fn decode_json<T: DeserializeOwned>(path: &str, payload: &[u8]) -> Result<T, RequestError> {
    serde_json::from_slice(payload).map_err(|err| RequestError::decode(path, err))
}

/// Sends a request using `client` and decodes its JSON payload.
///
/// # Errors
///
/// Propagates request errors; returns [`RequestError::Decode`] if the payload has an unexpected shape.
pub async fn fetch_json<T: DeserializeOwned>(
    client: &dyn BackendClient,
    method: Method,
    path: &str,
    body: Option<&serde_json::Value>,
) -> Result<T, RequestError> {
    let payload = client.request(method, path, body).await?;
    decode_json(path, &payload)
}

#[derive(Debug, serde::Deserialize)]
struct DataEnvelope {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Unwraps a `{"code": .., "msg": .., "data": ..}` envelope and returns the serialized `data` value.
///
/// # Errors
///
/// Returns [`RequestError::Decode`] if the payload is not an envelope or if `data` is missing or `null`.
pub fn unwrap_data_envelope(path: &str, payload: &[u8]) -> Result<Vec<u8>, RequestError> {
    let envelope: DataEnvelope = decode_json(path, payload)?;
    match envelope.data {
        Some(data) if !data.is_null() => {
            serde_json::to_vec(&data).map_err(|err| RequestError::decode(path, err))
        }
        _ => {
            let code = envelope
                .code
                .map_or_else(|| "none".to_owned(), |code| code.to_string());
            let msg = envelope.msg.unwrap_or_default();
            Err(RequestError::decode(
                path,
                format_args!("envelope carries no data (code: {code}, msg: {msg:?})"),
            ))
        }
    }
}

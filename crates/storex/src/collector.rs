//! Pluggable unit of metric collection.

use async_trait::async_trait;

use crate::{
    client::{BackendClient, RequestError},
    sample::{SampleError, Sink},
};

/// Error returned by [`Collector::collect()`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CollectError {
    /// Backend request failed (including decoding of its response).
    #[error(transparent)]
    Request(#[from] RequestError),
    /// Emitted sample does not match its descriptor.
    #[error(transparent)]
    Sample(#[from] SampleError),
    /// Response was decoded, but its contents cannot be turned into samples.
    #[error("unexpected response from `{path}`: {message}")]
    UnexpectedResponse {
        /// Requested path.
        path: String,
        /// Human-readable description of the problem.
        message: String,
    },
    /// Collector task panicked.
    #[error("collector panicked: {0}")]
    Panicked(String),
}

impl CollectError {
    /// Creates an [`UnexpectedResponse`](Self::UnexpectedResponse) error.
    pub fn unexpected(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Self-contained unit knowing one group of metric families of a backend.
///
/// On each scrape, a collector fetches one or more backend endpoints using the provided client,
/// decodes the responses and emits zero or more samples into the sink. Collectors of the same
/// exporter run concurrently and share a single client.
///
/// # Contract
///
/// - [`Self::name()`] is a stable identifier. It is used as the `--collect.<name>` configuration flag
///   and as the `collector` label of self-observability metrics, so it must not change across releases.
/// - [`Self::collect()`] must not panic on malformed input; decoding failures are reported
///   as [`CollectError`]s. It is bounded by the client timeout and must not touch shared mutable state
///   other than the sink.
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Returns the unique, stable name of this collector.
    fn name(&self) -> &'static str;

    /// Returns a human-readable description shown in command-line help.
    fn help(&self) -> &'static str;

    /// Fetches backend data and emits samples.
    ///
    /// # Errors
    ///
    /// Returns an error if fetching or decoding data fails. The orchestrator discards
    /// all samples emitted in a failed run.
    async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError>;
}

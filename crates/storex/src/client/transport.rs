//! HTTP transport shared by all requests of a backend client.

use std::{fmt, str};

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use super::{decode_json, ClientBuildError, ClientConfig, RequestError};

/// Maximum length of a response body quoted in errors.
const MAX_QUOTED_BODY_LEN: usize = 512;

/// Connection-pooled HTTP client bound to a backend base URL.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    concurrency: usize,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Creates a transport from the provided config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientBuildError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.insecure())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url().to_owned(),
            concurrency: config.concurrency(),
        })
    }

    /// Returns the base URL of the backend.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the per-item concurrency limit from the config.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Resolves `path` relative to the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Starts building a request to `path`.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Sends a request and reads the entire response.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Connection`] if the request cannot be sent or its body cannot be read.
    pub async fn execute(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<RawResponse, RequestError> {
        let url = self.url(path);
        let connection_err = |source| RequestError::Connection {
            url: url.clone(),
            source,
        };

        let response = request.send().await.map_err(connection_err)?;
        let status = response.status();
        let body = response.bytes().await.map_err(connection_err)?;
        tracing::trace!(path, %status, body_len = body.len(), "Received backend response");
        Ok(RawResponse {
            path: path.to_owned(),
            status,
            body: body.to_vec(),
        })
    }
}

/// Fully read backend response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Requested path.
    pub path: String,
    /// Response status.
    pub status: StatusCode,
    /// Response body.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Returns the body if the status is successful.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Protocol`] for non-2xx statuses.
    pub fn into_body(self) -> Result<Vec<u8>, RequestError> {
        if self.status.is_success() {
            Ok(self.body)
        } else {
            Err(self.into_protocol_error())
        }
    }

    /// Converts this response into a [`RequestError::Protocol`].
    pub fn into_protocol_error(self) -> RequestError {
        RequestError::Protocol {
            body: quote_body(&self.body),
            path: self.path,
            status: self.status,
        }
    }

    /// Decodes the body as JSON regardless of the status.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Decode`] if the body has an unexpected shape.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        decode_json(&self.path, &self.body)
    }
}

/// Renders a body for diagnostics, truncating long bodies and describing non-UTF-8 ones.
pub(crate) fn quote_body(body: &[u8]) -> String {
    match str::from_utf8(body) {
        Ok(body) if body.len() <= MAX_QUOTED_BODY_LEN => body.to_owned(),
        Ok(body) => {
            let mut end = MAX_QUOTED_BODY_LEN;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... ({}B total)", &body[..end], body.len())
        }
        Err(err) => {
            let body_length = body.len();
            format!("(Non UTF-8 body with length {body_length}B: {err})")
        }
    }
}

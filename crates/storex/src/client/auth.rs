//! Authentication schemes, token storage and the refresh-and-retry request flow.

use std::{
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use rand::distr::{Alphanumeric, SampleString};
use reqwest::{header::HeaderName, Method, RequestBuilder, StatusCode};
use sha2::{Digest, Sha256};

use super::{
    transport::{quote_body, HttpTransport, RawResponse},
    RequestError,
};

/// Backend-specific way to authenticate requests.
#[async_trait]
pub trait AuthScheme: fmt::Debug + Send + Sync + 'static {
    /// Obtains a fresh session token. Stateless schemes (e.g., per-request signatures) return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Auth`] if credentials are rejected, or other errors if the login
    /// endpoint cannot be reached.
    async fn login(&self, transport: &HttpTransport) -> Result<Option<String>, RequestError>;

    /// Attaches credentials to an outgoing request. `token` is the latest stored session token.
    fn authorize(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder;
}

/// Current session token of a client.
///
/// The token is an atomically swapped reference: readers observe either the previous or the new token
/// in full. Concurrent refreshes are not mutually excluded; each simply overwrites the stored token
/// (last write wins), which costs at most a redundant login call.
#[derive(Default)]
pub struct TokenStore {
    token: ArcSwapOption<String>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenStore")
            .field("has_token", &self.token.load().is_some())
            .finish()
    }
}

impl TokenStore {
    /// Returns the current token, if any.
    pub fn get(&self) -> Option<Arc<String>> {
        self.token.load_full()
    }

    /// Replaces the current token.
    pub fn replace(&self, token: String) -> Arc<String> {
        let token = Arc::new(token);
        self.token.store(Some(Arc::clone(&token)));
        token
    }

    /// Removes the current token, forcing a login on the next request.
    pub fn clear(&self) {
        self.token.store(None);
    }
}

/// Where a session token is attached to requests.
#[derive(Debug, Clone)]
pub enum TokenHeader {
    /// Custom header carrying the raw token.
    Named(HeaderName),
    /// `Authorization: Bearer <token>`.
    Bearer,
}

/// Login with a JSON body, taking the token from the JSON response.
#[derive(Clone)]
pub struct TokenLogin {
    path: String,
    body: serde_json::Value,
    token_pointer: String,
    header: TokenHeader,
    expected_status: Option<StatusCode>,
}

impl fmt::Debug for TokenLogin {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenLogin")
            .field("path", &self.path)
            .field("token_pointer", &self.token_pointer)
            .field("header", &self.header)
            .field("expected_status", &self.expected_status)
            .finish_non_exhaustive()
    }
}

impl TokenLogin {
    /// Creates a scheme that POSTs `body` to `path` and reads the token at the JSON pointer
    /// `token_pointer` (e.g., `/data/x_auth_token`) of the response.
    pub fn new(
        path: impl Into<String>,
        body: serde_json::Value,
        token_pointer: impl Into<String>,
        header: TokenHeader,
    ) -> Self {
        Self {
            path: path.into(),
            body,
            token_pointer: token_pointer.into(),
            header,
            expected_status: None,
        }
    }

    /// Requires the login endpoint to answer with exactly this status (by default, any 2xx status is accepted).
    #[must_use]
    pub fn with_expected_status(mut self, status: StatusCode) -> Self {
        self.expected_status = Some(status);
        self
    }

    /// Extracts the token from a login response.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Auth`] if the status is unexpected or the response carries no token.
    pub fn extract_token(
        response: &RawResponse,
        token_pointer: &str,
        expected_status: Option<StatusCode>,
    ) -> Result<String, RequestError> {
        let status_matches = expected_status.map_or(response.status.is_success(), |expected| {
            response.status == expected
        });
        if !status_matches {
            return Err(RequestError::Auth(format!(
                "login at `{}` responded with {}: {}",
                response.path,
                response.status,
                quote_body(&response.body)
            )));
        }

        let value: serde_json::Value = response.json()?;
        let token = value
            .pointer(token_pointer)
            .and_then(serde_json::Value::as_str)
            .filter(|token| !token.is_empty());
        let token = token.ok_or_else(|| {
            RequestError::Auth(format!(
                "login response from `{}` carries no token at `{token_pointer}`",
                response.path
            ))
        })?;
        Ok(token.to_owned())
    }
}

#[async_trait]
impl AuthScheme for TokenLogin {
    async fn login(&self, transport: &HttpTransport) -> Result<Option<String>, RequestError> {
        let request = transport.request(Method::POST, &self.path).json(&self.body);
        let response = transport.execute(&self.path, request).await?;
        let token = Self::extract_token(&response, &self.token_pointer, self.expected_status)?;
        tracing::debug!(path = %self.path, "Obtained session token");
        Ok(Some(token))
    }

    fn authorize(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match (token, &self.header) {
            (Some(token), TokenHeader::Bearer) => request.bearer_auth(token),
            (Some(token), TokenHeader::Named(name)) => request.header(name.clone(), token),
            (None, _) => request,
        }
    }
}

/// HTTP basic authentication; no session.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl BasicAuth {
    /// Creates a scheme with the specified credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthScheme for BasicAuth {
    async fn login(&self, _transport: &HttpTransport) -> Result<Option<String>, RequestError> {
        Ok(None)
    }

    fn authorize(&self, request: RequestBuilder, _token: Option<&str>) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }
}

/// Stateless per-request signature over a shared secret.
///
/// Each request carries `appkey`, `stime` (Unix timestamp in milliseconds), `nonce` (20 random
/// alphanumeric chars) and `signature` headers, where the signature is the hex-encoded SHA-256 digest
/// of `secret + nonce + stime + reverse(nonce)`.
#[derive(Clone)]
pub struct SignedRequest {
    appkey: String,
    secret: String,
}

impl fmt::Debug for SignedRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SignedRequest")
            .field("appkey", &self.appkey)
            .finish_non_exhaustive()
    }
}

impl SignedRequest {
    const NONCE_LEN: usize = 20;

    /// Creates a scheme with the specified application key and secret.
    pub fn new(appkey: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            appkey: appkey.into(),
            secret: secret.into(),
        }
    }

    /// Computes the signature for the provided nonce and timestamp.
    pub fn signature(&self, nonce: &str, stime: &str) -> String {
        sha256_signature(&[&self.secret, nonce, stime, &reversed(nonce)])
    }
}

#[async_trait]
impl AuthScheme for SignedRequest {
    async fn login(&self, _transport: &HttpTransport) -> Result<Option<String>, RequestError> {
        Ok(None)
    }

    fn authorize(&self, request: RequestBuilder, _token: Option<&str>) -> RequestBuilder {
        let stime = unix_millis();
        let nonce = alphanumeric_nonce(Self::NONCE_LEN);
        let signature = self.signature(&nonce, &stime);
        request
            .header("appkey", &self.appkey)
            .header("stime", stime)
            .header("nonce", nonce)
            .header("signature", signature)
    }
}

/// Hex-encoded SHA-256 digest of the concatenated `parts`.
pub fn sha256_signature(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Returns `s` with its chars in reverse order.
pub fn reversed(s: &str) -> String {
    s.chars().rev().collect()
}

/// Current Unix timestamp in milliseconds, as a decimal string.
pub fn unix_millis() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    millis.to_string()
}

/// Random alphanumeric string of the specified length.
pub fn alphanumeric_nonce(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), len)
}

/// Client combining a transport, an authentication scheme and a token store.
///
/// The first request logs in lazily. If the backend answers `401 Unauthorized` to a request sent with
/// a session token, the token is refreshed and the request is retried once.
pub struct AuthenticatedClient<S> {
    transport: HttpTransport,
    scheme: S,
    tokens: TokenStore,
}

impl<S: fmt::Debug> fmt::Debug for AuthenticatedClient<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthenticatedClient")
            .field("transport", &self.transport)
            .field("scheme", &self.scheme)
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl<S: AuthScheme> AuthenticatedClient<S> {
    /// Creates a client. No requests are sent until the client is used.
    pub fn new(transport: HttpTransport, scheme: S) -> Self {
        Self {
            transport,
            scheme,
            tokens: TokenStore::default(),
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    /// Returns the authentication scheme.
    pub fn scheme(&self) -> &S {
        &self.scheme
    }

    /// Returns the token store.
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Logs in and stores the obtained token.
    ///
    /// # Errors
    ///
    /// Propagates login errors. The previously stored token is kept in this case.
    pub async fn refresh(&self) -> Result<Option<Arc<String>>, RequestError> {
        let token = self.scheme.login(&self.transport).await?;
        Ok(token.map(|token| self.tokens.replace(token)))
    }

    async fn current_token(&self) -> Result<Option<Arc<String>>, RequestError> {
        match self.tokens.get() {
            Some(token) => Ok(Some(token)),
            None => self.refresh().await,
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        token: Option<&str>,
    ) -> Result<RawResponse, RequestError> {
        let mut request = self.transport.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let request = self.scheme.authorize(request, token);
        self.transport.execute(path, request).await
    }

    /// Sends a request, refreshing the token and retrying once on `401 Unauthorized`.
    /// Returns the response whatever its status is.
    ///
    /// # Errors
    ///
    /// Returns connection errors, login errors, and [`RequestError::Auth`] if a freshly obtained
    /// token is rejected as well.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<RawResponse, RequestError> {
        let token = self.current_token().await?;
        let response = self
            .send_once(method.clone(), path, body, token.as_deref().map(String::as_str))
            .await?;
        if response.status != StatusCode::UNAUTHORIZED || token.is_none() {
            return Ok(response);
        }

        tracing::info!(path, "Backend rejected session token, logging in again");
        let token = self.refresh().await?;
        let response = self
            .send_once(method, path, body, token.as_deref().map(String::as_str))
            .await?;
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(RequestError::Auth(format!(
                "`{path}` rejected a freshly obtained token: {}",
                quote_body(&response.body)
            )));
        }
        Ok(response)
    }

    /// Same as [`Self::send()`], but requires a successful status.
    ///
    /// # Errors
    ///
    /// In addition to [`Self::send()`] errors, returns [`RequestError::Auth`] for `401 Unauthorized`
    /// and [`RequestError::Protocol`] for other non-success statuses.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, RequestError> {
        let response = self.send(method, path, body).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(RequestError::Auth(format!(
                "`{path}` rejected credentials: {}",
                quote_body(&response.body)
            )));
        }
        response.into_body()
    }
}

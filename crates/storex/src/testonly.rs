//! Test utilities: an in-process mock backend server.

use std::{
    convert::Infallible,
    fmt,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use http_body_util::BodyExt as _;
use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, HeaderMap, Method, Request,
    Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, task::JoinHandle};

type Handler = dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync;

/// Request received by a [`MockServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Path together with the query, e.g. `/api/v1/disks?limit=10`.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Vec<u8>,
}

impl RecordedRequest {
    async fn read(request: Request<Incoming>) -> Self {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(body) => body.to_bytes().to_vec(),
            Err(err) => {
                tracing::warn!(%err, "Failed reading mock request body");
                vec![]
            }
        };
        Self {
            method: parts.method,
            path: parts
                .uri
                .path_and_query()
                .map_or_else(|| parts.uri.path().to_owned(), ToString::to_string),
            headers: parts.headers,
            body,
        }
    }

    /// Returns the value of the specified header, if it is present and is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Parses the body as JSON; returns `Null` for an empty or malformed body.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or_default()
    }
}

/// Response returned by a [`MockServer`] handler.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    content_type: &'static str,
    body: String,
    delay: Option<Duration>,
}

impl MockResponse {
    /// `200 OK` with a JSON body.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::json_with_status(StatusCode::OK, value)
    }

    /// JSON body with the specified status.
    pub fn json_with_status(status: StatusCode, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string(),
            delay: None,
        }
    }

    /// Plain-text body with the specified status.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
            delay: None,
        }
    }

    /// `404 Not Found`.
    pub fn not_found() -> Self {
        Self::text(StatusCode::NOT_FOUND, "not found")
    }

    /// Delays the response.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn into_response(self) -> Response<String> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(self.content_type),
        );
        response
    }
}

/// Mock HTTP backend bound to a random local port. Stops serving when dropped.
pub struct MockServer {
    local_addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    server_task: JoinHandle<()>,
}

impl fmt::Debug for MockServer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MockServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

impl MockServer {
    /// Starts a server answering every request with `handler`.
    ///
    /// # Panics
    ///
    /// Panics if binding to a local port fails.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("failed binding mock server");
        Self::serve(listener, Arc::new(handler))
    }

    /// Same as [`Self::start()`], but uses an already bound listener.
    ///
    /// # Panics
    ///
    /// Panics if the local address of the listener cannot be determined.
    pub fn serve(listener: TcpListener, handler: Arc<Handler>) -> Self {
        let local_addr = listener
            .local_addr()
            .expect("failed getting mock server address");
        let requests = Arc::<Mutex<Vec<_>>>::default();

        let server_requests = Arc::clone(&requests);
        let server_task = tokio::spawn(async move {
            loop {
                let stream = match listener.accept().await {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        tracing::warn!(%err, "Mock server failed accepting connection");
                        continue;
                    }
                };
                let handler = Arc::clone(&handler);
                let requests = Arc::clone(&server_requests);
                tokio::spawn(async move {
                    let service = service_fn(move |request| {
                        let handler = Arc::clone(&handler);
                        let requests = Arc::clone(&requests);
                        async move {
                            let request = RecordedRequest::read(request).await;
                            let response = handler(&request);
                            requests
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(request);
                            if let Some(delay) = response.delay {
                                tokio::time::sleep(delay).await;
                            }
                            Ok::<_, Infallible>(response.into_response())
                        }
                    });
                    let io = TokioIo::new(stream);
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        tracing::debug!(%err, "Mock server connection terminated");
                    }
                });
            }
        });

        Self {
            local_addr,
            requests,
            server_task,
        }
    }

    /// Returns the local address of the server.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the base URL of the server, e.g. `http://127.0.0.1:34567`.
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns requests received so far for the specified path.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        let requests = self.requests();
        requests
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }
}

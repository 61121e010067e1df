//! `MetricsExporter` and closely related types.

use std::{
    convert::Infallible,
    fmt,
    future::{self, Future},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    time::Instant,
};

use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use storex::{Format, Orchestrator};
use tokio::{io, net::TcpListener, sync::watch};


/// Default path metrics are served on.
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
/// Path of the readiness endpoint.
pub const READY_PATH: &str = "/-/ready";

#[derive(Clone)]
struct MetricsExporterInner {
    orchestrator: Arc<Orchestrator>,
    telemetry_path: Arc<str>,
}

impl MetricsExporterInner {
    async fn render_body(&self, format: Format) -> String {
        let started_at = Instant::now();
        let body = self.orchestrator.render(format).await;

        let latency = started_at.elapsed();
        let scraped_size = body.len();
        tracing::debug!(
            latency_sec = latency.as_secs_f64(),
            scraped_size,
            "Scraped metrics in {latency:?} (scraped size: {scraped_size}B)"
        );
        body
    }

    fn landing_page(&self) -> String {
        let title = format!("{}_exporter", self.orchestrator.namespace());
        let path = &self.telemetry_path;
        format!(
            "<html>\n\
             <head><title>{title}</title></head>\n\
             <body>\n\
             <h1>{title}</h1>\n\
             <p><a href='{path}'>Metrics</a></p>\n\
             </body>\n\
             </html>\n"
        )
    }

    async fn handle(&self, request: Request<Incoming>) -> Response<String> {
        if !matches!(*request.method(), Method::GET | Method::HEAD) {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let path = request.uri().path();
        if path == &*self.telemetry_path {
            let accept = request
                .headers()
                .get(header::ACCEPT)
                .and_then(|value| value.to_str().ok());
            let format = Format::negotiate(accept);
            if *request.method() == Method::HEAD {
                // Headers only; a scrape cycle is only run for `GET` requests.
                return with_content_type(Response::new(String::new()), format.content_type());
            }
            let body = self.render_body(format).await;
            with_content_type(Response::new(body), format.content_type())
        } else if path == "/" {
            with_content_type(
                Response::new(self.landing_page()),
                "text/html; charset=utf-8",
            )
        } else if path == READY_PATH {
            text_response(StatusCode::OK, "ok")
        } else {
            text_response(StatusCode::NOT_FOUND, "not found")
        }
    }
}

fn with_content_type(mut response: Response<String>, content_type: &'static str) -> Response<String> {
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type),
    );
    response
}

fn text_response(status: StatusCode, body: &str) -> Response<String> {
    let mut response = Response::new(body.to_owned());
    *response.status_mut() = status;
    with_content_type(response, "text/plain; charset=utf-8")
}

/// Metrics exporter to Prometheus.
///
/// An exporter serves metrics produced by an [`Orchestrator`]; every `GET` request to the telemetry
/// path triggers a scrape cycle. `HEAD` requests are answered without contacting the backend. The exposition format is negotiated from the `Accept` header.
///
/// # Examples
///
/// See crate-level docs for the examples of usage.
pub struct MetricsExporter<'a> {
    inner: MetricsExporterInner,
    shutdown_future: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
}

impl fmt::Debug for MetricsExporter<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsExporter")
            .field("orchestrator", &self.inner.orchestrator)
            .field("telemetry_path", &self.inner.telemetry_path)
            .finish_non_exhaustive()
    }
}

impl<'a> MetricsExporter<'a> {
    /// Creates an exporter serving the provided orchestrator on [`DEFAULT_TELEMETRY_PATH`].
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            inner: MetricsExporterInner {
                orchestrator,
                telemetry_path: DEFAULT_TELEMETRY_PATH.into(),
            },
            shutdown_future: Box::pin(future::pending()),
        }
    }

    /// Sets the path metrics are served on. A missing leading `/` is added.
    #[must_use]
    pub fn with_telemetry_path(mut self, path: &str) -> Self {
        self.inner.telemetry_path = if path.starts_with('/') {
            path.into()
        } else {
            format!("/{path}").into()
        };
        self
    }

    /// Configures graceful shutdown for the exporter server.
    #[must_use]
    pub fn with_graceful_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        self.shutdown_future = Box::pin(shutdown);
        self
    }

    /// Starts the server on the specified address. This future resolves when the server is shut down.
    ///
    /// The server will expose the following endpoints:
    ///
    /// - `GET` on the telemetry path: runs a scrape and serves its results
    /// - `GET /`: landing page linking to the telemetry path
    /// - `GET /-/ready`: readiness probe answering `ok`
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn start(self, bind_address: SocketAddr) -> io::Result<()> {
        tracing::info!("Starting Prometheus exporter web server on {bind_address}");
        self.bind(bind_address).await?.start().await?;
        tracing::info!("Prometheus metrics exporter server shut down");
        Ok(())
    }

    /// Creates an HTTP exporter server and binds it to the specified address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(mut self, bind_address: SocketAddr) -> io::Result<MetricsServer<'a>> {
        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;
        let server = async move {
            let (started_shutdown_sender, started_shutdown) = watch::channel(());
            loop {
                let stream = tokio::select! {
                    res = listener.accept() => res?.0,
                    () = &mut self.shutdown_future => break,
                };

                let io = TokioIo::new(stream);
                let inner = self.inner.clone();
                let mut started_shutdown = started_shutdown.clone();
                tokio::spawn(async move {
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        service_fn(|request| {
                            let inner = inner.clone();
                            async move { Ok::<_, Infallible>(inner.handle(request).await) }
                        }),
                    );
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        _ = started_shutdown.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                        res = conn.as_mut() => res,
                    };
                    if let Err(err) = res {
                        tracing::warn!(%err, "Error serving connection");
                    }
                });
            }

            tracing::info!("Stop signal received, Prometheus metrics exporter is shutting down");
            // Send the graceful shutdown signal to all alive connections.
            drop(started_shutdown);
            started_shutdown_sender.send_replace(());
            // Wait until all connections are dropped.
            started_shutdown_sender.closed().await;

            Ok(())
        };

        Ok(MetricsServer {
            server: Box::pin(server),
            local_addr,
        })
    }
}

/// Metrics server bound to a certain local address returned by [`MetricsExporter::bind()`].
///
/// Useful e.g. if you need to find out which port the server was bound to if the 0th port was specified.
#[must_use = "Server should be `start()`ed"]
pub struct MetricsServer<'a> {
    server: Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>,
    local_addr: SocketAddr,
}

impl fmt::Debug for MetricsServer<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl MetricsServer<'_> {
    /// Returns the local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts this server. Resolves once the server is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if starting the server operation fails.
    pub async fn start(self) -> io::Result<()> {
        self.server.await
    }
}

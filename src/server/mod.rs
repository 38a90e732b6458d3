//! HTTP server module
//!
//! A `hyper` HTTP/1.1 accept loop with one task per connection.
//!
//! # Endpoints
//!
//! * `POST /upload` - relay the first file part of a multipart body
//! * `GET /` - service identity
//! * `GET /info` - service descriptor as JSON
//! * `GET /health` - health check (returns "ok")
//!
//! Every connection is bounded by the configured timeout, whatever the size of
//! the upload in flight.
//!
//! # Example
//!
//! ```no_run
//! use azure_upload_relay::config::ServerConfig;
//! use azure_upload_relay::server::Server;
//! use azure_upload_relay::storage::MemoryBackend;
//! use azure_upload_relay::upload::UploadRelay;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig {
//!     address: "127.0.0.1:0".to_string(),
//!     ..Default::default()
//! };
//! let relay = UploadRelay::new(Arc::new(MemoryBackend::default()), "uploads");
//! let server = Server::bind(&config, relay).await?;
//! println!("listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

mod upload;

use crate::config::ServerConfig;
use crate::router::{Route, RouterError};
use crate::upload::UploadRelay;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Instrument};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),
}

/// Pause after an accept error that is not tied to a single connection
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that only concern the connection being accepted
fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}

/// Identity reported by `GET /info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const SERVICE_INFO: ServiceInfo = ServiceInfo {
    id: "maana-azure-storage",
    name: "maana-azure-storage",
    description: "Maana Q Knowledge Service wrapper for Azure Storage",
};

/// Read-only state shared by every connection
struct AppState {
    relay: UploadRelay,
    service_id: String,
}

/// HTTP Server
pub struct Server {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
    timeout: Duration,
}

impl Server {
    /// Bind to the configured address
    ///
    /// Binding happens immediately; with port 0 the OS picks a free port,
    /// available through [`Server::local_addr`].
    pub async fn bind(config: &ServerConfig, relay: UploadRelay) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            state: Arc::new(AppState {
                relay,
                service_id: config.service_id.clone(),
            }),
            listener,
            local_addr,
            timeout: config.timeout(),
        })
    }

    /// The address the server is actually listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until ctrl-c
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received ctrl-c"),
                Err(e) => {
                    error!("Failed to listen for ctrl-c: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        self.run_until(shutdown).await
    }

    /// Serve until `shutdown` resolves
    ///
    /// Stops accepting new connections once `shutdown` completes; connections
    /// already accepted run on until they finish or time out.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting server on {} (connection timeout {}s)",
            self.local_addr,
            self.timeout.as_secs()
        );
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) if is_connection_error(&e) => {
                        debug!("Connection dropped before accept: {}", e);
                        continue;
                    }
                    Err(e) => {
                        // Process-wide failure such as EMFILE
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);
            let timeout = self.timeout;

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, state).await }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                match tokio::time::timeout(timeout, conn).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Error serving connection from {}: {}", peer_addr, e),
                    Err(_) => warn!(
                        peer = %peer_addr,
                        timeout_secs = timeout.as_secs(),
                        "Connection timed out"
                    ),
                }
            });
        }
    }
}

/// Build a plain-text response
pub(crate) fn text_response(status: StatusCode, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn json_response<T: Serialize>(value: &T) -> Response<String> {
    match serde_json::to_string(value) {
        Ok(body) => {
            let mut response = Response::new(body);
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
            )
        }
    }
}

/// Handle HTTP request
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<String>, hyper::Error> {
    let span = tracing::info_span!(
        "http.request",
        http.method = %req.method(),
        http.target = %req.uri().path(),
        http.status_code = tracing::field::Empty,
    );

    async move {
        let start = Instant::now();
        let route = Route::parse(req.method(), req.uri().path());
        debug!(route = ?route, "Handling {} {}", req.method(), req.uri().path());

        let response = match route {
            Ok(Route::Upload) => upload::handle_upload(req, &state.relay).await,
            Ok(Route::Index) => text_response(StatusCode::OK, format!("{}\n", state.service_id)),
            Ok(Route::Info) => json_response(&SERVICE_INFO),
            Ok(Route::Health) => text_response(StatusCode::OK, "ok".to_string()),
            Err(RouterError::NotFound(path)) => {
                debug!("No route for {}", path);
                text_response(StatusCode::NOT_FOUND, "Not Found".to_string())
            }
            Err(RouterError::MethodNotAllowed(reason)) => {
                warn!("Method not allowed: {}", reason);
                let mut response = text_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "Method Not Allowed".to_string(),
                );
                if let Some(allowed) = Route::allowed_method(req.uri().path()) {
                    if let Ok(value) = HeaderValue::from_str(allowed.as_str()) {
                        response.headers_mut().insert(ALLOW, value);
                    }
                }
                response
            }
        };

        tracing::Span::current().record("http.status_code", response.status().as_u16());
        info!(
            status = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis(),
            "Request completed"
        );
        Ok(response)
    }
    .instrument(span)
    .await
}

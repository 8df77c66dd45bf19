//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling, one task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ServerArgs;
use crate::relations::{Assignments, ResolverConfig, StaffResolver};
use crate::routes;
use crate::store::RelationStore;
use crate::types::{Result, TetherError};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared application state
pub struct AppState {
    pub args: ServerArgs,
    pub store: Arc<dyn RelationStore>,
    /// Staff resolver with fast-path/slow-path fallback
    pub resolver: Arc<StaffResolver>,
    /// Dual-write assignment service
    pub assignments: Assignments,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: ServerArgs, store: Arc<dyn RelationStore>) -> Self {
        let resolver = Arc::new(StaffResolver::new(
            Arc::clone(&store),
            ResolverConfig {
                fast_timeout: args.fast_timeout(),
                slow_timeout: args.slow_timeout(),
            },
        ));
        let assignments = Assignments::new(Arc::clone(&store));

        Self {
            args,
            store,
            resolver,
            assignments,
            started_at: Instant::now(),
        }
    }
}

/// Bind the configured address and serve until `shutdown` fires
pub async fn run(state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    serve(listener, state, shutdown).await
}

/// Serve connections from an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    info!(
        addr = %listener.local_addr()?,
        backend = state.store.backend(),
        transactions = state.store.supports_transactions(),
        "Tether listening"
    );

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(&state),

        (Method::GET, "/ready") | (Method::GET, "/readyz") => routes::readiness_check(&state).await,

        (Method::GET, "/version") => routes::version_info(),

        (Method::GET, "/stats") => routes::resolver_stats(&state),

        (Method::GET, "/staff-for-client") => routes::staff_for_client(&state, query.as_deref()).await,

        (Method::GET, "/legacy-staff-by-client") => {
            routes::legacy_staff_by_client(&state, query.as_deref()).await
        }

        (Method::POST, "/assign-staff-to-client") => match read_body(req).await {
            Ok(body) => routes::assign_staff_to_client(&state, &body).await,
            Err(e) => routes::error_response(e),
        },

        (Method::POST, "/unassign-staff-from-client") => match read_body(req).await {
            Ok(body) => routes::unassign_staff_from_client(&state, &body).await,
            Err(e) => routes::error_response(e),
        },

        // CORS preflight
        (Method::OPTIONS, _) => routes::preflight_response(),

        (_, p) => routes::not_found_response(p),
    };

    if response.status().is_server_error() {
        info!("[{}] {} -> {}", addr, path, response.status());
    }
    Ok(response)
}

/// Collect a request body, bounded by `MAX_BODY_BYTES`
async fn read_body(req: Request<Incoming>) -> Result<Bytes> {
    Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| TetherError::BadRequest(format!("Failed to read request body: {}", e)))
}

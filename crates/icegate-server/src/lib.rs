// icegate-server - S3-compatible gateway over log-structured tables
//
// Presents virtual buckets to standard S3 clients. ListObjectsV2 is answered
// synthetically by replaying the tenant's transaction log; GetObject is
// rewritten onto the physical backing layout and streamed through. Every
// request is authenticated with AWS SigV4.
//
// Collaborators (resolver cache, snapshot reader, upstream HTTP client) are
// constructed once and carried in AppState; there is no ambient state on the
// request path.

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use icegate_config::{GatewayConfig, LogFormat};
use icegate_core::SnapshotReader;
use icegate_resolver::{CacheOptions, Resolver, ResolverOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod context;
mod proxy;
pub mod s3_types;
pub mod sigv4;

use sigv4::{SecretStore, StaticSecretStore};

/// Application state shared across all requests
#[derive(Clone)]
pub(crate) struct AppState {
    pub config: Arc<GatewayConfig>,
    pub snapshots: SnapshotReader,
    pub resolver: Arc<Resolver>,
    pub secrets: Arc<dyn SecretStore>,
    pub upstream: reqwest::Client,
}

/// Error type handlers map component failures into. Cancellation logs at
/// warn; everything else at error with the underlying cause.
pub(crate) struct AppError {
    status: StatusCode,
    body: String,
    warn_only: bool,
    source: Option<anyhow::Error>,
}

impl AppError {
    pub(crate) fn internal(request_id: &str, source: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: format!("internal error, request id: {request_id}"),
            warn_only: false,
            source: Some(source),
        }
    }

    pub(crate) fn canceled(request_id: &str, source: anyhow::Error) -> Self {
        Self {
            status: StatusCode::from_u16(499).expect("499 is a valid status code"),
            body: format!("internal error, request id: {request_id}"),
            warn_only: true,
            source: Some(source),
        }
    }

    pub(crate) fn not_found(body: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body,
            warn_only: false,
            source: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(source) = &self.source {
            if self.warn_only {
                warn!("request aborted: {source:#}");
            } else {
                error!("request error: {source:?}");
            }
        }
        (self.status, self.body).into_response()
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", any(proxy::dispatch))
        .route("/*path", any(proxy::dispatch))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            sigv4::verify_sigv4,
        ))
        .layer(middleware::from_fn(context::assign_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the opendal operator for the backing store.
fn init_storage(config: &GatewayConfig) -> Result<opendal::Operator> {
    let s3 = &config.storage;
    info!(
        "Using backing store: bucket={}, region={}, path_style={}",
        s3.bucket, s3.region, s3.use_path_style
    );

    let mut builder = opendal::services::S3::default()
        .bucket(&s3.bucket)
        .region(&s3.region)
        .access_key_id(&s3.access_key_id)
        .secret_access_key(&s3.secret_access_key);

    if let Some(endpoint) = &s3.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if !s3.use_path_style {
        builder = builder.enable_virtual_host_style();
    }

    Ok(opendal::Operator::new(builder)?.finish())
}

/// Initialize tracing/logging from GatewayConfig
pub fn init_tracing(config: &GatewayConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.server.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

fn resolver_options(config: &GatewayConfig) -> ResolverOptions {
    ResolverOptions {
        lookup_url: config.lookup.url.clone(),
        auth_token: config.lookup.auth_token.clone(),
        dev_prefix: config.dev.lookup_prefix.clone(),
        dev_time_ms: config.dev.lookup_time_ms,
        cache: config.cache.enabled.then(|| CacheOptions {
            self_addr: config.cache.self_addr.clone(),
            peers: config.cache.peers.clone(),
            max_bytes: config.cache.max_bytes,
            ttl: Duration::from_secs(config.cache.ttl_secs),
        }),
    }
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Entry point: wire up collaborators and serve until shutdown.
pub async fn run_with_config(config: GatewayConfig) -> Result<()> {
    info!("icegate - S3-compatible gateway over log-structured tables");

    let operator = init_storage(&config)?;
    let snapshots = SnapshotReader::new(operator);

    let resolver = Arc::new(Resolver::new(resolver_options(&config))?);
    if let Some(group) = resolver.cache_group() {
        info!("Resolver cache enabled ({} peers)", config.cache.peers.len());
        tokio::spawn(async move {
            if let Err(e) = group.serve().await {
                error!("cache pool server error: {e:#}");
            }
        });
    }

    let secrets: Arc<dyn SecretStore> =
        Arc::new(StaticSecretStore::new(config.auth.secrets.clone()));
    let listen_addr = config.server.listen_addr.clone();

    let state = AppState {
        config: Arc::new(config),
        snapshots,
        resolver,
        secrets,
        upstream: reqwest::Client::new(),
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .context(format!("Failed to bind to {listen_addr}"))?;

    info!("S3 endpoint listening on http://{listen_addr}");
    info!("Press Ctrl+C or send SIGTERM to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

//! Server assembly: shared state, routes and lifecycle.

use crate::adapter::ClusterFanout;
use crate::api;
use crate::auth::HttpAuthenticator;
use crate::config::{Config, CorsConfig};
use crate::handlers;
use crate::metrics;
use crate::store;
use crate::subscribers;
use anyhow::{Context, Result};
use axum::{
    http::{HeaderName, HeaderValue, Method},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use herald_core::{
    Authenticator, ChannelManager, Dispatcher, Fanout, LocalFanout, MembershipStore,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Sockets connected to this instance.
    pub hub: Arc<LocalFanout>,
    /// Channel operations for sockets.
    pub channels: Arc<ChannelManager>,
    /// Broadcasts ingested events.
    pub dispatcher: Arc<Dispatcher>,
    started: Instant,
}

/// State handle passed to handlers.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the core components together.
    ///
    /// `fanout` is the hub itself on a single node, or a relay wrapping it.
    #[must_use]
    pub fn new(
        config: Config,
        hub: Arc<LocalFanout>,
        fanout: Arc<dyn Fanout>,
        store: Arc<dyn MembershipStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let channels = ChannelManager::new(
            config.channels.clone(),
            authenticator,
            store,
            Arc::clone(&fanout),
        );
        Self {
            config,
            hub,
            channels: Arc::new(channels),
            dispatcher: Arc::new(Dispatcher::new(fanout)),
            started: Instant::now(),
        }
    }

    /// Time since the server started.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Build the HTTP router.
pub fn build_router(state: SharedState) -> Router {
    let config = &state.config;

    let mut apps = api::routes();
    if config.subscribers.http {
        apps = apps.route(
            "/apps/:appId/events",
            post(subscribers::http::publish_event),
        );
    }
    let apps = apps.route_layer(middleware::from_fn_with_state(
        state.clone(),
        api::require_app_key,
    ));

    let mut app = Router::new()
        .route("/", get(api::root))
        .route("/health", get(health_handler))
        .route(&config.transport.websocket_path, get(handlers::ws_handler))
        .merge(apps)
        .layer(TraceLayer::new_for_http());

    if config.api_origin_allow.allow_cors {
        app = app.layer(build_cors_layer(&config.api_origin_allow));
    }

    app.with_state(state)
}

/// CORS layer from the configured header values.
fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new();

    if config.allow_origin.trim() == "*" {
        cors = cors.allow_origin(Any);
    } else if let Ok(origin) = config.allow_origin.parse::<HeaderValue>() {
        cors = cors.allow_origin(origin);
    }

    let methods: Vec<Method> = config
        .allow_methods
        .split(',')
        .filter_map(|m| m.trim().parse().ok())
        .collect();
    cors = cors.allow_methods(methods);

    if config.allow_headers.trim() == "*" {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Vec<HeaderName> = config
            .allow_headers
            .split(',')
            .filter_map(|h| h.trim().parse().ok())
            .collect();
        cors = cors.allow_headers(headers);
    }

    cors
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let store = store::build_store(&config.database).await;
    let authenticator = Arc::new(
        HttpAuthenticator::new(&config.auth).context("Failed to build auth HTTP client")?,
    );
    info!(url = %authenticator.url(), "Authorizing private channels");

    let hub = Arc::new(LocalFanout::new());
    let mut background: Vec<JoinHandle<()>> = Vec::new();

    let fanout: Arc<dyn Fanout> = if config.adapter.enabled {
        let relay = ClusterFanout::connect(Arc::clone(&hub), &config.adapter)
            .await
            .context("Failed to connect cluster relay")?;
        background.push(relay.spawn_listener());
        relay
    } else {
        hub.clone()
    };

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&hub),
        fanout,
        store,
        authenticator,
    ));

    if config.subscribers.redis {
        // Every instance receives each published event, so deliver locally.
        let dispatcher = if config.adapter.enabled {
            Arc::new(Dispatcher::new(hub.clone()))
        } else {
            Arc::clone(&state.dispatcher)
        };
        let relay_prefix = config
            .adapter
            .enabled
            .then(|| config.adapter.key_prefix.clone());
        background.push(subscribers::redis::spawn(
            config.database.redis.clone(),
            relay_prefix,
            dispatcher,
        ));
    }
    if config.subscribers.http {
        info!("Listening for http events");
    }

    let app = build_router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Herald server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in background {
        task.abort();
    }
    info!("Herald server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

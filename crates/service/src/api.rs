use std::{
    net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs},
    sync::Arc,
};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::get,
    },
    futures::{FutureExt, future::BoxFuture},
    tokio_util::sync::CancellationToken,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, info},
};

use pipedeck_config::ApiConfig;

use crate::{hub::SocketHub, ws::handle_connection};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    hub: Arc<SocketHub>,
    /// Cancelled on shutdown so open WebSocket sessions close too.
    shutdown: CancellationToken,
}

// ── Server ───────────────────────────────────────────────────────────────────

/// Build the API router (shared between production startup and tests).
pub fn build_api_app(hub: Arc<SocketHub>, shutdown: CancellationToken) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v0/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { hub, shutdown })
}

/// Request/response side of the service. Binds at construction so address
/// problems surface before anything starts serving.
pub struct ApiServer {
    hub: Arc<SocketHub>,
    listener: StdTcpListener,
    local_addr: SocketAddr,
}

impl ApiServer {
    pub fn bind(hub: Arc<SocketHub>, config: &ApiConfig) -> anyhow::Result<Self> {
        let address = config.address();
        let addr = address
            .to_socket_addrs()
            .with_context(|| format!("invalid API listen address '{address}'"))?
            .next()
            .with_context(|| format!("API listen address '{address}' did not resolve"))?;

        let listener = StdTcpListener::bind(addr)
            .with_context(|| format!("failed to bind API server to {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("failed to configure API listener")?;
        let local_addr = listener.local_addr().context("failed to read bound address")?;

        debug!(addr = %local_addr, "api server bound");
        Ok(Self {
            hub,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `cancel` fires. Returns an error if the listener fails.
    pub fn serve(self, cancel: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> {
        async move {
            let listener = tokio::net::TcpListener::from_std(self.listener)
                .context("failed to register API listener with the runtime")?;
            let app = build_api_app(self.hub, cancel.clone());

            info!(addr = %self.local_addr, "api server listening");
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .context("api server failed")?;
            info!("api server stopped");
            Ok(())
        }
        .boxed()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.session_count().await,
        "dashboard_attached": state.hub.has_handler().await,
        "seq": state.hub.current_seq(),
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.hub, addr, state.shutdown))
}

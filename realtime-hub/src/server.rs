//! HTTP surface around the hub: the WebSocket upgrade endpoint, a health
//! check, and optional static files.

use std::{future::Future, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::{net::TcpListener, task::JoinHandle};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, warn};

use crate::{
    config::{ConnectionSettings, HubSettings},
    connection::Connection,
    hub::{Hub, HubHandle},
    transport,
};

#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    connection: ConnectionSettings,
}

pub struct Server {
    listener: TcpListener,
    hub: HubHandle,
    hub_task: JoinHandle<()>,
    connection: ConnectionSettings,
    static_dir: Option<PathBuf>,
}

impl Server {
    /// Binds `settings.listen` and starts a fresh hub.
    pub async fn bind(settings: HubSettings) -> Result<Self> {
        let listener = TcpListener::bind(settings.listen)
            .await
            .with_context(|| format!("failed to bind {}", settings.listen))?;
        Ok(Self::new(listener, settings))
    }

    pub fn new(listener: TcpListener, settings: HubSettings) -> Self {
        let (hub, hub_task) = Hub::spawn(settings.command_capacity);
        Self {
            listener,
            hub,
            hub_task,
            connection: settings.connection,
            static_dir: settings.static_dir,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Serves until `shutdown` resolves, then shuts the hub down so every
    /// connection drains and closes. Upgraded sockets outlive `serve`, so
    /// they still receive the hub's shutdown notice.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            hub,
            hub_task,
            connection,
            static_dir,
        } = self;

        let app = router(
            AppState {
                hub: hub.clone(),
                connection,
            },
            static_dir,
        );

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        hub.shutdown().await;
        if let Err(err) = hub_task.await {
            warn!(error = ?err, "hub task panicked");
        }

        served.context("server exited with error")
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/api/ws", get(upgrade))
        .route("/api/health", get(health))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };

    app.layer(TraceLayer::new_for_http())
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = transport::websocket(socket);
    let handle = Connection::new(sink, stream, state.connection)
        .start(&state.hub)
        .await;
    let id = handle.id();

    match handle.closed().await {
        Ok(()) => debug!(connection = %id, "socket finished"),
        Err(err) => warn!(connection = %id, error = ?err, "socket finished with error"),
    }
}

#[derive(Debug, Serialize)]
struct Health {
    connections: usize,
}

async fn health(State(state): State<AppState>) -> Result<Json<Health>, StatusCode> {
    let members = state.hub.members().await.map_err(|err| {
        warn!(error = ?err, "health check could not reach the hub");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(Health {
        connections: members.len(),
    }))
}

pub mod api;
pub mod media;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::network::{Registry, Scanner};
use crate::relay::{MediaStore, RelayBridge};
use crate::session::SessionManager;
use crate::CastError;

// Uploads are whole media files; the axum default of 2 MB is far too small.
const MAX_UPLOAD_BYTES: usize = 4 * 1024 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub scanner: Arc<Scanner>,
    pub manager: Arc<SessionManager>,
    pub store: Arc<MediaStore>,
    pub bridge: Arc<RelayBridge>,
}

/// The media/relay server. Binds all interfaces on purpose so the phone and
/// the receiver can both reach it over the LAN.
pub struct HttpServer {
    state: AppState,
    port: u16,
}

impl HttpServer {
    pub fn new(
        registry: Arc<Registry>,
        scanner: Arc<Scanner>,
        manager: Arc<SessionManager>,
        config: &Config,
    ) -> Self {
        let store = MediaStore::new();
        let bridge = Arc::new(RelayBridge::new(
            Arc::clone(&store),
            Arc::clone(&manager),
            config.upload_dir(),
            config.server.port,
        ));
        Self {
            state: AppState {
                registry,
                scanner,
                manager,
                store,
                bridge,
            },
            port: config.server.port,
        }
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/events", get(sse::sse_handler))
            // Range-aware delivery to the receiver.
            .route("/media/:token", get(media::serve_media))
            // Secondary-client (phone) surface.
            .route("/remote", get(remote_page))
            .route("/remote/upload", post(api::remote_upload))
            .route("/remote/url", post(api::remote_url))
            // Consumer API: device list, session lifecycle, playback.
            .route("/api/devices", get(api::list_devices))
            .route("/api/scan", post(api::trigger_scan))
            .route("/api/bind", post(api::bind_device))
            .route("/api/unbind", post(api::unbind_device))
            .route("/api/state", get(api::session_state))
            .route("/api/cast", post(api::cast_path))
            .route("/api/play-pause", post(api::play_pause))
            .route("/api/stop", post(api::stop_playback))
            .route("/api/seek", post(api::seek))
            .route("/api/volume", post(api::set_volume))
            .route("/api/mute", post(api::toggle_mute))
            .with_state(state)
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> crate::Result<()> {
        let app = Self::router(self.state);
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Media/relay server listening on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| CastError::Connection(format!("server error: {e}")))?;
        Ok(())
    }
}

async fn remote_page() -> Html<&'static str> {
    Html(include_str!("../../static/remote.html"))
}

async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "lancast",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// HTTP mapping of the error taxonomy. Handlers return CastError with `?`
/// and every failure becomes a status + JSON body instead of a dropped
/// connection.
impl IntoResponse for CastError {
    fn into_response(self) -> Response {
        let status = match &self {
            CastError::NotFound(_) => StatusCode::NOT_FOUND,
            CastError::NoActiveSession => StatusCode::SERVICE_UNAVAILABLE,
            CastError::Busy => StatusCode::CONFLICT,
            CastError::Unsupported(_) => StatusCode::BAD_REQUEST,
            CastError::Range(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            CastError::Json(_) => StatusCode::BAD_REQUEST,
            CastError::Load(_)
            | CastError::Command(_)
            | CastError::Status(_)
            | CastError::Connection(_)
            | CastError::Http(_) => StatusCode::BAD_GATEWAY,
            CastError::Discovery(_) | CastError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

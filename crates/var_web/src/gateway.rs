//! HTTP and websocket surface for operator browsers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::bus::Bus;

/// Settings for the web server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Directory containing the built operator UI.
    pub static_dir: PathBuf,
    pub admin_username: String,
    pub admin_password: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            static_dir: PathBuf::from("frontend/dist"),
            admin_username: "admin".to_string(),
            admin_password: "password".to_string(),
        }
    }
}

#[derive(Clone)]
struct GatewayState {
    bus: Arc<Bus>,
    settings: ServerSettings,
}

/// Build the operator gateway router.
pub fn router(bus: Arc<Bus>, settings: ServerSettings) -> Router {
    let assets = ServeDir::new(settings.static_dir.join("assets"));
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(status))
        .route("/api/reload_clients", post(reload_clients))
        .route("/api/websocket", get(websocket))
        .nest_service("/assets", assets)
        .with_state(GatewayState { bus, settings })
}

/// Run the gateway server until it fails.
pub async fn run(bus: Arc<Bus>, settings: ServerSettings) -> std::io::Result<()> {
    if !settings.static_dir.exists() {
        warn!(
            static_dir = %settings.static_dir.display(),
            "static directory does not exist, operator UI will not be served"
        );
    }

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "operator gateway listening");

    let app = router(bus, settings);
    axum::serve(listener, app).await
}

async fn index(State(state): State<GatewayState>) -> Response {
    let path = state.settings.static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => Html(contents).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "operator UI is not built").into_response(),
    }
}

async fn status(
    State(state): State<GatewayState>,
    headers: axum::http::HeaderMap,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    match authenticated_user(
        authorization,
        &state.settings.admin_username,
        &state.settings.admin_password,
    ) {
        Some(user) => Json(json!({"status": "running", "user": user})).into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic")],
            "invalid credentials",
        )
            .into_response(),
    }
}

async fn reload_clients(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    state.bus.reload_clients();
    Json(json!({"status": "reload requested"}))
}

async fn websocket(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| state.bus.serve_client(socket))
}

/// Validate an HTTP basic-auth header, returning the username on success.
fn authenticated_user(header: Option<&str>, username: &str, password: &str) -> Option<String> {
    let encoded = header?.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (user, pass) = credentials.split_once(':')?;
    if user == username && pass == password {
        Some(user.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, pass: &str) -> String {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        format!("Basic {encoded}")
    }

    #[test]
    fn basic_auth_accepts_valid_credentials() {
        let header = basic("admin", "hunter2");
        assert_eq!(
            authenticated_user(Some(&header), "admin", "hunter2"),
            Some("admin".to_string())
        );
    }

    #[test]
    fn basic_auth_rejects_bad_input() {
        let wrong_pass = basic("admin", "wrong");
        assert_eq!(authenticated_user(Some(&wrong_pass), "admin", "hunter2"), None);

        let wrong_user = basic("root", "hunter2");
        assert_eq!(authenticated_user(Some(&wrong_user), "admin", "hunter2"), None);

        assert_eq!(authenticated_user(None, "admin", "hunter2"), None);
        assert_eq!(
            authenticated_user(Some("Bearer abc"), "admin", "hunter2"),
            None
        );
        assert_eq!(
            authenticated_user(Some("Basic not-base64!!"), "admin", "hunter2"),
            None
        );
    }
}

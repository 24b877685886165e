//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{AdmissionError, LobbyStatus, LobbySummary, RegistryError, StartError};
use crate::util::time::{started_at, uptime_secs};
use crate::ws::handler::ws_handler;
use crate::ws::protocol::EntityType;

/// Longest lobby name accepted by `POST /lobbies`
pub const MAX_LOBBY_NAME_CHARS: usize = 64;

/// Longest tick period a created lobby may ask for
pub const MAX_TICK_LENGTH_MS: u64 = 60_000;

/// Upper bound for plain HTTP requests; websocket sessions are not affected
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    // Plain HTTP API
    let api_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/lobbies", get(list_lobbies_handler).post(create_lobby_handler))
        .route("/lobbies/:lobby_id/start", post(start_lobby_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CompressionLayer::new()),
        );

    // WebSocket upgrades, kept out of compression and timeouts
    let ws_routes = Router::new().route("/lobby/:lobby_id", get(ws_handler));

    Router::new()
        .merge(api_routes)
        .merge(ws_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// CORS configuration - `*` allows any origin, otherwise a comma-separated list
fn cors_layer(client_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let allowed_origins: Vec<header::HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();
    cors.allow_origin(allowed_origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    uptime_secs: u64,
    active_lobbies: usize,
    connected_clients: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        started_at: started_at(),
        uptime_secs: uptime_secs(),
        active_lobbies: state.lobbies.len(),
        connected_clients: state.lobbies.connected_clients(),
    })
}

// ============================================================================
// Lobby endpoints
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct LobbyListResponse {
    pub lobbies: Vec<LobbyEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LobbyEntry {
    pub id: Uuid,
    pub name: String,
    pub status: LobbyStatus,
    pub clients: Vec<ClientEntry>,
    pub spectators: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientEntry {
    pub name: String,
    pub color: String,
    #[serde(rename = "entityType")]
    pub entity_type: EntityType,
}

impl From<LobbySummary> for LobbyEntry {
    fn from(summary: LobbySummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            status: summary.status,
            clients: summary
                .clients
                .into_iter()
                .map(|c| ClientEntry {
                    name: c.name,
                    color: c.color,
                    entity_type: EntityType::Player,
                })
                .collect(),
            spectators: summary.spectators,
        }
    }
}

async fn list_lobbies_handler(State(state): State<AppState>) -> Json<LobbyListResponse> {
    let lobbies = state
        .lobbies
        .list()
        .into_iter()
        .map(LobbyEntry::from)
        .collect();
    Json(LobbyListResponse { lobbies })
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateLobbyRequest {
    pub name: Option<String>,
    pub tick_length_milli_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateLobbyResponse {
    pub id: Uuid,
}

async fn create_lobby_handler(
    State(state): State<AppState>,
    body: Option<Json<CreateLobbyRequest>>,
) -> Result<(StatusCode, Json<CreateLobbyResponse>), AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let mut settings = state.lobbies.settings().clone();
    if let Some(ms) = req.tick_length_milli_seconds {
        if ms == 0 || ms > MAX_TICK_LENGTH_MS {
            return Err(AppError::BadRequest(format!(
                "tick_length_milli_seconds must be between 1 and {MAX_TICK_LENGTH_MS}"
            )));
        }
        settings.rules.tick_length = Duration::from_millis(ms);
    }

    let name = req
        .name
        .map(|n| n.trim().chars().take(MAX_LOBBY_NAME_CHARS).collect::<String>())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Lobby {}", state.lobbies.len() + 1));

    let handle = state.lobbies.create(None, name, settings)?;
    info!(lobby_id = %handle.id(), "lobby created over HTTP");

    Ok((
        StatusCode::CREATED,
        Json(CreateLobbyResponse { id: handle.id() }),
    ))
}

async fn start_lobby_handler(
    State(state): State<AppState>,
    Path(lobby_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let lobby = Uuid::parse_str(&lobby_id)
        .ok()
        .and_then(|id| state.lobbies.get(&id))
        .ok_or_else(|| AppError::NotFound("lobby not found".to_string()))?;

    lobby.start().await?;
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Gone(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Gone(_) => StatusCode::GONE,
        };
        debug!(status = status.as_u16(), error = %self, "request refused");

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AdmissionError> for AppError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::Full | AdmissionError::NotPending => AppError::Conflict(e.to_string()),
            AdmissionError::Closed => AppError::Gone(e.to_string()),
        }
    }
}

impl From<StartError> for AppError {
    fn from(e: StartError) -> Self {
        match e {
            StartError::NotPending | StartError::NoQuorum { .. } => {
                AppError::Conflict(e.to_string())
            }
            StartError::Closed => AppError::Gone(e.to_string()),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        AppError::Conflict(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::lobby::ClientSummary;

    #[test]
    fn lobby_entry_uses_camel_case_entity_type() {
        let summary = LobbySummary {
            id: Uuid::nil(),
            name: "Lobby 1".into(),
            status: LobbyStatus::Running,
            clients: vec![ClientSummary {
                name: "ann".into(),
                color: "red".into(),
            }],
            spectators: 3,
        };
        let value = serde_json::to_value(LobbyEntry::from(summary)).unwrap();
        assert_eq!(value["status"], "RUNNING");
        assert_eq!(value["clients"][0]["entityType"], "PLAYER");
        assert_eq!(value["clients"][0]["color"], "red");
        assert_eq!(value["spectators"], 3);
        assert!(value["clients"][0].get("entity_type").is_none());
    }

    #[test]
    fn admission_errors_map_to_statuses() {
        let status = |e: AdmissionError| AppError::from(e).into_response().status();
        assert_eq!(status(AdmissionError::Full), StatusCode::CONFLICT);
        assert_eq!(status(AdmissionError::NotPending), StatusCode::CONFLICT);
        assert_eq!(status(AdmissionError::Closed), StatusCode::GONE);
    }

    #[test]
    fn start_errors_map_to_statuses() {
        let resp = AppError::from(StartError::NoQuorum { needed: 2, have: 1 }).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}

//! HTTP route definitions

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::http::middleware::{verify_token, AuthError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/users", get(users_handler))
        .route("/match/win/:name", get(match_win_handler))
        .route("/match/stat/:name", get(match_stat_handler))
        .route("/user", get(user_handler))
        .route("/db/user/:id", get(db_user_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_tournaments: usize,
    quick_queue: usize,
    tournament_queue: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (quick_queue, tournament_queue) = state.matchmaking.queue_sizes();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.matches.active_matches(),
        active_tournaments: state.tournaments.active_tournaments(),
        quick_queue,
        tournament_queue,
    })
}

// ============================================================================
// Stats proxy endpoints
//
// These mirror the historical client contract: lookups respond 200 with
// `ok: false` on backend failure rather than surfacing an error status.
// ============================================================================

async fn users_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.stats.list_users().await {
        Ok(players) => Json(json!({ "ok": true, "players": players })),
        Err(e) => Json(json!({ "ok": false, "message": e.to_string() })),
    }
}

async fn match_win_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<serde_json::Value> {
    match state.stats.win_lose(&name).await {
        Ok(win_stat) => Json(json!({ "ok": true, "winStat": win_stat })),
        Err(e) => Json(json!({ "ok": false, "message": e.to_string() })),
    }
}

async fn match_stat_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<serde_json::Value> {
    match state.stats.match_history(&name).await {
        Ok(matches) => Json(json!({ "ok": true, "matches": matches })),
        Err(e) => Json(json!({ "ok": false, "message": e.to_string() })),
    }
}

// ============================================================================
// Token introspection
// ============================================================================

#[derive(Deserialize)]
struct UserQuery {
    token: Option<String>,
}

#[derive(Serialize)]
struct UserResponse {
    name: String,
    id: i64,
}

async fn user_handler(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<UserResponse>, AuthError> {
    let token = query.token.ok_or(AuthError::MissingToken)?;
    let claims = verify_token(&token, &state.config.auth_jwt_secret)?;

    Ok(Json(UserResponse {
        name: claims.username,
        id: claims.id,
    }))
}

// ============================================================================
// User lookup
// ============================================================================

async fn db_user_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .stats
        .user_by_id(id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Player not found".to_string()))?;

    Ok(Json(user))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use shelf_core::{client_origin, ClearOutcome, RatingSnapshot, RatingsService, RefreshStatus};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingsRequest {
    #[serde(default, alias = "asins")]
    pub item_ids: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RatingsService>,
    pub admin_token: Option<String>,
}

/// Build the router, reading `ADMIN_TOKEN` and `CORS_ALLOW_ORIGIN` from the environment.
pub fn build_app(service: Arc<RatingsService>) -> Router {
    let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
    router(AppState { service, admin_token })
}

pub fn router(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/books/ratings", post(ratings_handler))
        .route("/api/books/ratings/clear", post(clear_handler))
        .route("/api/books/ratings/status", get(status_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn ratings_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<RatingsRequest>,
) -> Json<Vec<RatingSnapshot>> {
    let forwarded = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    let origin = client_origin(forwarded, peer.map(|ConnectInfo(addr)| addr.ip().to_string()));
    Json(state.service.get_ratings(req.item_ids.as_slice(), origin.as_deref()).await)
}

pub async fn clear_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<ClearOutcome>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    Ok(Json(state.service.clear_cache().await))
}

pub async fn status_handler(State(state): State<AppState>) -> Json<RefreshStatus> {
    Json(state.service.status())
}

/// Clearing is open unless an admin token is configured.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let Some(required) = &state.admin_token else {
        return Ok(());
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}

pub mod cabinet;
pub mod webhooks;

use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/yookassa-webhook", post(webhooks::yookassa))
        .route("/cryptobot-webhook", post(webhooks::cryptobot))
        .route("/heleket-webhook", post(webhooks::heleket))
        .route("/ton-webhook", post(webhooks::ton))
        .route("/auth/{token}", get(cabinet::auth))
        .route("/", get(cabinet::cabinet))
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::error::ShopError;
use crate::services::orchestrator::SettleOutcome;
use crate::services::payment::PaymentMethod;
use crate::state::AppState;

/// Shared webhook path: authenticate the body with the method's
/// gateway, then reconcile through the orchestrator. A 2xx is only
/// returned once the event is fully consumed; transient settle
/// failures surface as 5xx so the provider retries.
async fn consume(
    state: &AppState,
    method: PaymentMethod,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<SettleOutcome, ShopError> {
    let gateway = state.orchestrator.gateway(method).await?;
    let event = gateway.verify_webhook(body, headers).await?;
    tracing::info!(method = %method, payment_id = %event.payment_id, status = ?event.status,
        "webhook verified");
    state.orchestrator.settle(&event).await
}

fn respond(result: Result<SettleOutcome, ShopError>) -> axum::response::Response {
    match result {
        Ok(outcome) => {
            tracing::debug!(outcome = ?outcome, "webhook consumed");
            (StatusCode::OK, "OK").into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn yookassa(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    respond(consume(&state, PaymentMethod::YooKassa, &headers, &body).await)
}

pub async fn cryptobot(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    respond(consume(&state, PaymentMethod::CryptoBot, &headers, &body).await)
}

pub async fn heleket(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    respond(consume(&state, PaymentMethod::Heleket, &headers, &body).await)
}

pub async fn ton(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    respond(consume(&state, PaymentMethod::Ton, &headers, &body).await)
}

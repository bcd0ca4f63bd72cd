use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::json;

use crate::services::pricing::fmt_rub;
use crate::state::AppState;

const SESSION_COOKIE: &str = "korsar_cabinet";

/// Token login: `/auth/{token}` validates the token against a live
/// key, drops the session cookie and bounces to the cabinet. An
/// unknown token gets 403, a token whose key is gone gets 404; no
/// cookie is set in either case.
pub async fn auth(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(token): Path<String>,
) -> Response {
    let row = match state.store.tokens.get(&token).await {
        Ok(Some(row)) => row,
        Ok(None) => return (StatusCode::FORBIDDEN, "unknown token").into_response(),
        Err(err) => return crate::error::ShopError::from(err).into_response(),
    };
    match state.store.keys.get(row.key_id).await {
        Ok(Some(_)) => {
            let cookie = Cookie::build((SESSION_COOKIE, token))
                .path("/")
                .http_only(true)
                .secure(true)
                .same_site(SameSite::Lax)
                .build();
            (jar.add(cookie), Redirect::to("/")).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "key no longer exists").into_response(),
        Err(err) => crate::error::ShopError::from(err).into_response(),
    }
}

/// Cabinet view for the cookie's key.
pub async fn cabinet(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        return (StatusCode::UNAUTHORIZED, "no session").into_response();
    };
    match state.store.tokens.resolve_key(&token).await {
        Ok(Some(key)) => {
            let body = json!({
                "email": key.key_email,
                "host": key.host_name,
                "plan": key.plan_name,
                "price": key.price.map(fmt_rub),
                "status": key.status,
                "expiry_date": key.expiry_date,
                "connection_string": key.connection_string,
                "subscription_link": key.subscription_link,
                "traffic": {
                    "quota_total_gb": key.quota_total_gb,
                    "down_bytes": key.traffic_down_bytes,
                    "remaining_bytes": key.quota_remaining_bytes,
                },
            });
            Json(body).into_response()
        }
        Ok(None) => (StatusCode::UNAUTHORIZED, "session expired").into_response(),
        Err(err) => crate::error::ShopError::from(err).into_response(),
    }
}

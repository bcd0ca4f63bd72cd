use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application error taxonomy. Webhook handlers lean on the
/// `IntoResponse` mapping: signature problems turn into 401/400 so the
/// provider stops retrying, transient failures turn into 502 so it
/// retries later.
#[derive(Debug, Error)]
pub enum ShopError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("webhook signature rejected: {0}")]
    Signature(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("panel error: {0}")]
    Panel(String),

    #[error("payment provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Db(#[from] korsar_db::DbError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ShopResult<T> = Result<T, ShopError>;

impl ShopError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Signature(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            Self::Panel(_) | Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::Db(e) => match e {
                korsar_db::DbError::NotFound => StatusCode::NOT_FOUND,
                korsar_db::DbError::Conflict(_) => StatusCode::CONFLICT,
                korsar_db::DbError::Integrity(_) => StatusCode::UNPROCESSABLE_ENTITY,
                korsar_db::DbError::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ShopError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque cabinet login token. One token per (user, key); the row is
/// dropped with the key via ON DELETE CASCADE.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CabinetToken {
    pub token: String,
    pub user_id: i64,
    pub key_id: i64,
    pub created_date: DateTime<Utc>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit record for an outbound message. Pre-expiry reminders also
/// carry `(key_id, marker_hours)`, which a partial unique index uses
/// for send-once deduplication.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub notification_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub status: String,
    pub meta: serde_json::Value,
    pub key_id: Option<i64>,
    pub marker_hours: Option<i32>,
    pub created_date: DateTime<Utc>,
}

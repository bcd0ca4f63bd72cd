use sqlx::PgPool;

use crate::error::DbResult;
use crate::models::Notification;

#[derive(Clone)]
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Plain audit log entry, no deduplication.
    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        user_id: i64,
        username: Option<&str>,
        kind: &str,
        title: &str,
        message: &str,
        status: &str,
        meta: serde_json::Value,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (user_id, username, type, title, message, status, meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user_id)
        .bind(username)
        .bind(kind)
        .bind(title)
        .bind(message)
        .bind(status)
        .bind(&meta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Send-once gate for per-key reminders. Returns `true` when this
    /// call claimed the (key, marker) slot; `false` means some earlier
    /// call already did and the message must not be sent again.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_once(
        &self,
        user_id: i64,
        username: Option<&str>,
        kind: &str,
        title: &str,
        message: &str,
        key_id: i64,
        marker_hours: i32,
    ) -> DbResult<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, username, type, title, message, key_id, marker_hours)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (key_id, marker_hours) WHERE key_id IS NOT NULL AND marker_hours IS NOT NULL
            DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(username)
        .bind(kind)
        .bind(title)
        .bind(message)
        .bind(key_id)
        .bind(marker_hours)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn was_sent(&self, key_id: i64, marker_hours: i32) -> DbResult<bool> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE key_id = $1 AND marker_hours = $2",
        )
        .bind(key_id)
        .bind(marker_hours)
        .fetch_one(&self.pool)
        .await?;
        Ok(n > 0)
    }

    pub async fn list_for_user(&self, user_id: i64, limit: i64) -> DbResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE user_id = $1
             ORDER BY created_date DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::error::DbResult;

/// Key-value settings with an in-process cache. The cache is loaded on
/// first read and kept in sync by `set`; a direct database edit needs
/// `reload` or a restart to become visible.
#[derive(Clone)]
pub struct SettingsRepository {
    pool: PgPool,
    cache: Arc<RwLock<Option<HashMap<String, String>>>>,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, cache: Arc::new(RwLock::new(None)) }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        {
            let cache = self.cache.read().await;
            if let Some(map) = cache.as_ref() {
                return Ok(map.get(key).cloned());
            }
        }
        let map = self.reload().await?;
        Ok(map.get(key).cloned())
    }

    pub async fn get_or(&self, key: &str, default: &str) -> DbResult<String> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.to_string()))
    }

    pub async fn get_i64(&self, key: &str, default: i64) -> DbResult<i64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default))
    }

    pub async fn get_f64(&self, key: &str, default: f64) -> DbResult<f64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default))
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> DbResult<bool> {
        Ok(self
            .get(key)
            .await?
            .map(|v| matches!(v.trim(), "1" | "true" | "on" | "yes"))
            .unwrap_or(default))
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO bot_settings (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        let mut cache = self.cache.write().await;
        if let Some(map) = cache.as_mut() {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    pub async fn reload(&self) -> DbResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM bot_settings")
                .fetch_all(&self.pool)
                .await?;
        let map: HashMap<String, String> = rows.into_iter().collect();
        *self.cache.write().await = Some(map.clone());
        Ok(map)
    }
}

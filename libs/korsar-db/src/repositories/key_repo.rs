use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{DbError, DbResult};
use crate::models::{Key, KeySpec};

#[derive(Clone)]
pub struct KeyRepository {
    pool: PgPool,
}

/// Key joined with the owner fields the scheduler needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KeyWithOwner {
    #[sqlx(flatten)]
    pub key: Key,
    pub owner_balance: i64,
    pub owner_auto_renewal: bool,
    pub owner_banned: bool,
}

impl KeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert-or-extend keyed by `key_email`. The panel call has
    /// already succeeded when this runs, so an existing row only picks
    /// up the new expiry and refreshed links. Returns the key id and
    /// whether the row was freshly inserted.
    pub async fn upsert(&self, spec: &KeySpec) -> DbResult<(i64, bool)> {
        self.upsert_on(&self.pool, spec).await
    }

    pub(crate) async fn upsert_on<'e, E>(&self, executor: E, spec: &KeySpec) -> DbResult<(i64, bool)>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let remaining = (spec.expiry_date - Utc::now()).num_seconds().max(0);
        let row: (i64, bool) = sqlx::query_as(
            r#"
            INSERT INTO vpn_keys (user_id, host_name, plan_name, price, xui_client_uuid,
                                  key_email, expiry_date, remaining_seconds, connection_string,
                                  subscription_link, is_trial, status, quota_total_gb)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    CASE WHEN $11 = 1 THEN 'trial-active' ELSE 'pay-active' END, $12)
            ON CONFLICT (key_email) DO UPDATE
            SET xui_client_uuid = EXCLUDED.xui_client_uuid,
                plan_name = COALESCE(EXCLUDED.plan_name, vpn_keys.plan_name),
                price = COALESCE(EXCLUDED.price, vpn_keys.price),
                expiry_date = EXCLUDED.expiry_date,
                remaining_seconds = EXCLUDED.remaining_seconds,
                connection_string = COALESCE(EXCLUDED.connection_string, vpn_keys.connection_string),
                subscription_link = COALESCE(EXCLUDED.subscription_link, vpn_keys.subscription_link),
                is_trial = EXCLUDED.is_trial,
                status = EXCLUDED.status,
                quota_total_gb = COALESCE(EXCLUDED.quota_total_gb, vpn_keys.quota_total_gb)
            RETURNING key_id, (xmax = 0) AS was_new
            "#,
        )
        .bind(spec.user_id)
        .bind(&spec.host_name)
        .bind(&spec.plan_name)
        .bind(spec.price)
        .bind(spec.xui_client_uuid)
        .bind(&spec.key_email)
        .bind(spec.expiry_date)
        .bind(remaining)
        .bind(&spec.connection_string)
        .bind(&spec.subscription_link)
        .bind(if spec.is_trial { 1i16 } else { 0i16 })
        .bind(spec.quota_total_gb)
        .fetch_one(executor)
        .await
        .map_err(|e| DbError::classify(e, "key upsert"))?;
        Ok(row)
    }

    pub async fn get(&self, key_id: i64) -> DbResult<Option<Key>> {
        let key = sqlx::query_as::<_, Key>("SELECT * FROM vpn_keys WHERE key_id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(key)
    }

    pub async fn get_by_email(&self, key_email: &str) -> DbResult<Option<Key>> {
        let key = sqlx::query_as::<_, Key>("SELECT * FROM vpn_keys WHERE key_email = $1")
            .bind(key_email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(key)
    }

    pub async fn get_for_user(&self, user_id: i64) -> DbResult<Vec<Key>> {
        let keys = sqlx::query_as::<_, Key>(
            "SELECT * FROM vpn_keys WHERE user_id = $1 ORDER BY created_date",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    pub async fn get_for_host(&self, host_name: &str) -> DbResult<Vec<Key>> {
        let keys = sqlx::query_as::<_, Key>("SELECT * FROM vpn_keys WHERE host_name = $1")
            .bind(host_name)
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    /// Whether the user already holds a live trial key.
    pub async fn has_active_trial(&self, user_id: i64, now: DateTime<Utc>) -> DbResult<bool> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM vpn_keys
             WHERE user_id = $1 AND is_trial = 1 AND expiry_date > $2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(n > 0)
    }

    pub async fn delete(&self, key_id: i64) -> DbResult<()> {
        let res = sqlx::query("DELETE FROM vpn_keys WHERE key_id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_by_email(&self, key_email: &str) -> DbResult<bool> {
        let res = sqlx::query("DELETE FROM vpn_keys WHERE key_email = $1")
            .bind(key_email)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn set_auto_renewal(&self, key_id: i64, enabled: bool) -> DbResult<()> {
        sqlx::query("UPDATE vpn_keys SET key_auto_renewal_enabled = $1 WHERE key_id = $2")
            .bind(enabled)
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_traffic(
        &self,
        key_id: i64,
        quota_total_gb: Option<f64>,
        traffic_down_bytes: Option<i64>,
        quota_remaining_bytes: Option<i64>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE vpn_keys
             SET quota_total_gb = $2, traffic_down_bytes = $3, quota_remaining_bytes = $4
             WHERE key_id = $1",
        )
        .bind(key_id)
        .bind(quota_total_gb)
        .bind(traffic_down_bytes)
        .bind(quota_remaining_bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flips expired keys into their terminal status. Returns the keys
    /// that changed so the caller can notify owners.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> DbResult<Vec<Key>> {
        let keys = sqlx::query_as::<_, Key>(
            r#"
            UPDATE vpn_keys
            SET status = CASE WHEN is_trial = 1 THEN 'trial-ended' ELSE 'pay-ended' END,
                remaining_seconds = 0
            WHERE expiry_date <= $1
              AND status IN ('trial-active', 'pay-active')
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    /// Live keys with the owner columns the renewal pass reads.
    pub async fn list_active_with_owner(&self, now: DateTime<Utc>) -> DbResult<Vec<KeyWithOwner>> {
        let keys = sqlx::query_as::<_, KeyWithOwner>(
            r#"
            SELECT k.*,
                   u.balance AS owner_balance,
                   u.auto_renewal_enabled AS owner_auto_renewal,
                   u.is_banned AS owner_banned
            FROM vpn_keys k
            JOIN users u ON u.telegram_id = k.user_id
            WHERE k.expiry_date > $1
              AND k.status <> 'deactivate'
            ORDER BY k.expiry_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    /// Lapsed non-trial keys, with owner columns, regardless of
    /// status: a key already swept to `pay-ended` must still be picked
    /// up once the balance allows a renewal. Flag checks happen in the
    /// caller.
    pub async fn list_renewal_candidates(&self, now: DateTime<Utc>) -> DbResult<Vec<KeyWithOwner>> {
        let keys = sqlx::query_as::<_, KeyWithOwner>(
            r#"
            SELECT k.*,
                   u.balance AS owner_balance,
                   u.auto_renewal_enabled AS owner_auto_renewal,
                   u.is_banned AS owner_banned
            FROM vpn_keys k
            JOIN users u ON u.telegram_id = k.user_id
            WHERE k.expiry_date <= $1
              AND k.is_trial = 0
              AND k.status <> 'deactivate'
            ORDER BY k.expiry_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    /// Refreshes cached lifetimes for keys still running.
    pub async fn refresh_remaining_seconds(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let res = sqlx::query(
            "UPDATE vpn_keys
             SET remaining_seconds = GREATEST(0, EXTRACT(EPOCH FROM (expiry_date - $1))::bigint)
             WHERE expiry_date > $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

use sqlx::PgPool;

use crate::error::{DbError, DbResult};
use crate::models::User;

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Registers a user on first contact, refreshing the display name
    /// on every later call. `referred_by` is only taken on the insert
    /// path; a self-referral is dropped before it reaches the check
    /// constraint.
    pub async fn register_if_absent(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        fullname: Option<&str>,
        referred_by: Option<i64>,
    ) -> DbResult<User> {
        let referrer = referred_by.filter(|r| *r != telegram_id);

        sqlx::query(
            r#"
            INSERT INTO users (telegram_id, username, fullname, referred_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (telegram_id) DO UPDATE
            SET username = COALESCE(EXCLUDED.username, users.username),
                fullname = COALESCE(EXCLUDED.fullname, users.fullname)
            "#,
        )
        .bind(telegram_id)
        .bind(username)
        .bind(fullname)
        .bind(referrer)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::classify(e, "user registration"))?;

        self.get(telegram_id).await?.ok_or(DbError::NotFound)
    }

    pub async fn get(&self, telegram_id: i64) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE telegram_id = $1")
            .bind(telegram_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_all_ids(&self) -> DbResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT telegram_id FROM users WHERE NOT is_banned")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Allocates the next key number for a user, creating the user row
    /// if it does not exist yet. The counter only ever grows, so
    /// numbers are never reused after a key is deleted.
    pub async fn next_key_number(&self, telegram_id: i64) -> DbResult<i64> {
        let n = sqlx::query_scalar::<_, i32>(
            "INSERT INTO users (telegram_id, keys_count) VALUES ($1, 1)
             ON CONFLICT (telegram_id) DO UPDATE
             SET keys_count = users.keys_count + 1
             RETURNING keys_count",
        )
        .bind(telegram_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(n as i64)
    }

    /// Atomically takes `amount` kopecks off the balance. Returns
    /// `false` when the balance would go negative; nothing is changed
    /// in that case.
    pub async fn debit_balance(&self, telegram_id: i64, amount: i64) -> DbResult<bool> {
        if amount <= 0 {
            return Err(DbError::Integrity("debit amount must be positive".into()));
        }
        let res = sqlx::query(
            "UPDATE users SET balance = balance - $1
             WHERE telegram_id = $2 AND balance >= $1",
        )
        .bind(amount)
        .bind(telegram_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn credit_balance(&self, telegram_id: i64, amount: i64) -> DbResult<()> {
        if amount <= 0 {
            return Err(DbError::Integrity("credit amount must be positive".into()));
        }
        let res = sqlx::query("UPDATE users SET balance = balance + $1 WHERE telegram_id = $2")
            .bind(amount)
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Moves the withdrawable referral balance onto the main balance.
    pub async fn transfer_referral_balance(&self, telegram_id: i64) -> DbResult<i64> {
        let moved = sqlx::query_scalar::<_, i64>(
            "UPDATE users
             SET balance = balance + referral_balance,
                 referral_balance = 0
             WHERE telegram_id = $1 AND referral_balance > 0
             RETURNING balance",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        moved.ok_or(DbError::NotFound)
    }

    pub async fn set_banned(&self, telegram_id: i64, banned: bool) -> DbResult<()> {
        sqlx::query("UPDATE users SET is_banned = $1 WHERE telegram_id = $2")
            .bind(banned)
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_agreed_to_terms(&self, telegram_id: i64) -> DbResult<()> {
        sqlx::query("UPDATE users SET agreed_to_terms = TRUE WHERE telegram_id = $1")
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_auto_renewal(&self, telegram_id: i64, enabled: bool) -> DbResult<()> {
        sqlx::query("UPDATE users SET auto_renewal_enabled = $1 WHERE telegram_id = $2")
            .bind(enabled)
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Admin action: lets a user take the trial again.
    pub async fn reset_trial(&self, telegram_id: i64) -> DbResult<()> {
        let res = sqlx::query("UPDATE users SET trial_used = FALSE WHERE telegram_id = $1")
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

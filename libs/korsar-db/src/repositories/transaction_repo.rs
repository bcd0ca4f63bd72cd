use sqlx::PgPool;

use crate::error::{DbError, DbResult};
use crate::models::{PurchaseMeta, Transaction};

#[derive(Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persists a pending attempt. `payment_id` is unique; a duplicate
    /// surfaces as `Conflict` instead of a second row.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_pending(
        &self,
        meta: &PurchaseMeta,
        username: Option<&str>,
        amount_currency: Option<f64>,
        currency_name: Option<&str>,
        payment_link: Option<&str>,
    ) -> DbResult<i64> {
        let metadata = meta
            .to_value()
            .map_err(|e| DbError::Integrity(format!("metadata encode: {e}")))?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO transactions (payment_id, user_id, username, status, amount_rub,
                                      amount_currency, currency_name, payment_method,
                                      payment_link, metadata)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9)
            RETURNING transaction_id
            "#,
        )
        .bind(&meta.payment_id)
        .bind(meta.user_id)
        .bind(username)
        .bind(meta.price_kop)
        .bind(amount_currency)
        .bind(currency_name)
        .bind(&meta.payment_method)
        .bind(payment_link)
        .bind(&metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::classify(e, "duplicate payment_id"))?;
        Ok(id)
    }

    pub async fn get_by_payment_id(&self, payment_id: &str) -> DbResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE payment_id = $1",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tx)
    }

    /// pending -> failed, compare-and-swap on status. Returns `false`
    /// when the row had already left pending.
    pub async fn mark_failed(&self, payment_id: &str) -> DbResult<bool> {
        let res = sqlx::query(
            "UPDATE transactions SET status = 'failed'
             WHERE payment_id = $1 AND status = 'pending'",
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Rewrites a pending row's metadata, for settle-time enrichment
    /// that must survive a retry (reserved key numbers and the like).
    pub async fn update_pending_metadata(
        &self,
        payment_id: &str,
        meta: &PurchaseMeta,
    ) -> DbResult<bool> {
        let metadata = meta
            .to_value()
            .map_err(|e| DbError::Integrity(format!("metadata encode: {e}")))?;
        let res = sqlx::query(
            "UPDATE transactions SET metadata = $2
             WHERE payment_id = $1 AND status = 'pending'",
        )
        .bind(payment_id)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Newest pending TON transfer matching an on-chain amount, with a
    /// small tolerance for floating-point display rounding.
    pub async fn find_pending_ton_by_amount(&self, amount_ton: f64) -> DbResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE status = 'pending'
              AND currency_name = 'TON'
              AND amount_currency IS NOT NULL
              AND abs(amount_currency - $1) < 0.0000005
            ORDER BY created_date DESC
            LIMIT 1
            "#,
        )
        .bind(amount_ton)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tx)
    }

    pub async fn list_pending(&self, method: &str) -> DbResult<Vec<Transaction>> {
        let txs = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions
             WHERE status = 'pending' AND payment_method = $1
             ORDER BY created_date",
        )
        .bind(method)
        .fetch_all(&self.pool)
        .await?;
        Ok(txs)
    }

    pub async fn list_for_user(&self, user_id: i64, limit: i64) -> DbResult<Vec<Transaction>> {
        let txs = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE user_id = $1
             ORDER BY created_date DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(txs)
    }
}

use sqlx::PgPool;

use crate::error::{DbError, DbResult};
use crate::models::{KeySpec, Operation, PurchaseMeta};
use crate::repositories::KeyRepository;

/// Composed, transactional settle operations. Everything here runs the
/// pattern: lock the payment row, apply side effects, compare-and-swap
/// pending -> paid, commit. A replayed webhook takes the early-return
/// path and produces no second side effect.
#[derive(Clone)]
pub struct PurchaseRepository {
    pool: PgPool,
    keys: KeyRepository,
}

#[derive(Debug, Clone)]
pub struct PurchaseCommit {
    pub key_id: i64,
    pub was_new: bool,
    pub referral: Option<ReferralCredit>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReferralCredit {
    pub referrer_id: i64,
    pub reward_kop: i64,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed(PurchaseCommit),
    /// The row had already been settled; carries the key id recorded
    /// at the original settle when one exists.
    AlreadyPaid { key_id: Option<i64> },
    /// Balance payment raced a concurrent debit; nothing was changed.
    InsufficientBalance,
}

#[derive(Debug, Clone)]
pub enum TopupOutcome {
    Credited { amount_kop: i64 },
    AlreadyPaid,
}

impl PurchaseRepository {
    pub fn new(pool: PgPool) -> Self {
        let keys = KeyRepository::new(pool.clone());
        Self { pool, keys }
    }

    /// Settles a paid (or balance-funded) purchase: upserts the key,
    /// bumps buyer stats, credits the referrer and flips the payment
    /// row to paid, all in one database transaction.
    pub async fn commit_paid_purchase(
        &self,
        meta: &PurchaseMeta,
        spec: &KeySpec,
        months_purchased: i32,
        tx_hash: Option<&str>,
        debit_from_balance: bool,
        referral_percent: i64,
    ) -> DbResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, serde_json::Value)> = sqlx::query_as(
            "SELECT status, metadata FROM transactions WHERE payment_id = $1 FOR UPDATE",
        )
        .bind(&meta.payment_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, stored_meta)) = row else {
            return Err(DbError::NotFound);
        };
        match status.as_str() {
            "pending" => {}
            "paid" => {
                let key_id = PurchaseMeta::from_value(&stored_meta)
                    .ok()
                    .and_then(|m| match m.operation {
                        Operation::Buy { key_id, .. } => key_id,
                        _ => None,
                    });
                return Ok(CommitOutcome::AlreadyPaid { key_id });
            }
            other => {
                return Err(DbError::Conflict(format!(
                    "payment {} is {other}, cannot settle",
                    meta.payment_id
                )));
            }
        }

        if debit_from_balance {
            let res = sqlx::query(
                "UPDATE users SET balance = balance - $1
                 WHERE telegram_id = $2 AND balance >= $1",
            )
            .bind(meta.price_kop)
            .bind(meta.user_id)
            .execute(&mut *tx)
            .await?;
            if res.rows_affected() == 0 {
                // Rolls back via drop.
                return Ok(CommitOutcome::InsufficientBalance);
            }
        }

        let (key_id, was_new) = self.keys.upsert_on(&mut *tx, spec).await?;

        sqlx::query(
            "UPDATE users
             SET total_spent = total_spent + $1,
                 total_months_purchased = total_months_purchased + $2
             WHERE telegram_id = $3",
        )
        .bind(meta.price_kop)
        .bind(months_purchased)
        .bind(meta.user_id)
        .execute(&mut *tx)
        .await?;

        let mut referral = None;
        if meta.price_kop > 0 && referral_percent > 0 {
            let referrer: Option<Option<i64>> =
                sqlx::query_scalar("SELECT referred_by FROM users WHERE telegram_id = $1")
                    .bind(meta.user_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if let Some(Some(referrer_id)) = referrer {
                let reward_kop = (meta.price_kop * referral_percent + 50) / 100;
                if reward_kop > 0 {
                    sqlx::query(
                        "UPDATE users
                         SET referral_balance = referral_balance + $1,
                             referral_balance_all = referral_balance_all + $1
                         WHERE telegram_id = $2",
                    )
                    .bind(reward_kop)
                    .bind(referrer_id)
                    .execute(&mut *tx)
                    .await?;
                    referral = Some(ReferralCredit { referrer_id, reward_kop });
                }
            }
        }

        let mut enriched = meta.clone();
        enriched.connection_string = spec.connection_string.clone();
        if let Operation::Buy { key_id: slot, .. } = &mut enriched.operation {
            *slot = Some(key_id);
        }
        let metadata = enriched
            .to_value()
            .map_err(|e| DbError::Integrity(format!("metadata encode: {e}")))?;

        let res = sqlx::query(
            "UPDATE transactions
             SET status = 'paid', transaction_hash = $2, metadata = $3
             WHERE payment_id = $1 AND status = 'pending'",
        )
        .bind(&meta.payment_id)
        .bind(tx_hash)
        .bind(&metadata)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() != 1 {
            return Err(DbError::Conflict(format!(
                "payment {} left pending mid-settle",
                meta.payment_id
            )));
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed(PurchaseCommit { key_id, was_new, referral }))
    }

    /// Settles a balance top-up: credits the user and flips the row to
    /// paid in one transaction.
    pub async fn commit_paid_topup(
        &self,
        meta: &PurchaseMeta,
        tx_hash: Option<&str>,
    ) -> DbResult<TopupOutcome> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM transactions WHERE payment_id = $1 FOR UPDATE",
        )
        .bind(&meta.payment_id)
        .fetch_optional(&mut *tx)
        .await?;

        match status.as_deref() {
            Some("pending") => {}
            Some("paid") => return Ok(TopupOutcome::AlreadyPaid),
            Some(other) => {
                return Err(DbError::Conflict(format!(
                    "payment {} is {other}, cannot settle",
                    meta.payment_id
                )));
            }
            None => return Err(DbError::NotFound),
        }

        sqlx::query("UPDATE users SET balance = balance + $1 WHERE telegram_id = $2")
            .bind(meta.price_kop)
            .bind(meta.user_id)
            .execute(&mut *tx)
            .await?;

        let metadata = meta
            .to_value()
            .map_err(|e| DbError::Integrity(format!("metadata encode: {e}")))?;
        sqlx::query(
            "UPDATE transactions
             SET status = 'paid', transaction_hash = $2, metadata = $3
             WHERE payment_id = $1 AND status = 'pending'",
        )
        .bind(&meta.payment_id)
        .bind(tx_hash)
        .bind(&metadata)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(TopupOutcome::Credited { amount_kop: meta.price_kop })
    }

    /// Grants the one free trial. The user row is locked so two
    /// concurrent grants cannot both pass the `trial_used` check.
    pub async fn commit_trial(&self, spec: &KeySpec, trial_days: i32) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let trial_used: Option<bool> = sqlx::query_scalar(
            "SELECT trial_used FROM users WHERE telegram_id = $1 FOR UPDATE",
        )
        .bind(spec.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        match trial_used {
            None => return Err(DbError::NotFound),
            Some(true) => {
                return Err(DbError::Conflict("trial already used".into()));
            }
            Some(false) => {}
        }

        let active_trials: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vpn_keys
             WHERE user_id = $1 AND is_trial = 1 AND expiry_date > now()",
        )
        .bind(spec.user_id)
        .fetch_one(&mut *tx)
        .await?;
        if active_trials > 0 {
            return Err(DbError::Conflict("an active trial key already exists".into()));
        }

        let (key_id, _) = self.keys.upsert_on(&mut *tx, spec).await?;

        sqlx::query(
            "UPDATE users
             SET trial_used = TRUE,
                 trial_days_given = trial_days_given + $1,
                 trial_reuses_count = trial_reuses_count + 1
             WHERE telegram_id = $2",
        )
        .bind(trial_days)
        .bind(spec.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(key_id)
    }
}

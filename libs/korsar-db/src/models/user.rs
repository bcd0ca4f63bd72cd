use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shop customer keyed by Telegram chat id. All money fields are
/// kopecks.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub fullname: Option<String>,
    pub is_banned: bool,
    pub referred_by: Option<i64>,
    pub referral_balance: i64,
    pub referral_balance_all: i64,
    pub balance: i64,
    pub total_spent: i64,
    pub total_months_purchased: i32,
    pub trial_used: bool,
    pub trial_reuses_count: i32,
    pub trial_days_given: i32,
    pub agreed_to_terms: bool,
    pub user_group_id: Option<i64>,
    pub timezone: Option<String>,
    pub auto_renewal_enabled: bool,
    pub keys_count: i32,
    pub registration_date: DateTime<Utc>,
}

impl User {
    /// First paid purchase has not happened yet.
    pub fn is_first_purchase(&self) -> bool {
        self.total_spent == 0
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger row for one payment attempt. `payment_id` is the provider's
/// id where the provider assigns one, a locally generated UUID
/// otherwise. `amount_rub` is kopecks despite the legacy column name.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub transaction_id: i64,
    pub payment_id: String,
    pub user_id: i64,
    pub username: Option<String>,
    pub status: String,
    pub amount_rub: i64,
    pub amount_currency: Option<f64>,
    pub currency_name: Option<String>,
    pub payment_method: String,
    pub payment_link: Option<String>,
    pub transaction_hash: Option<String>,
    pub metadata: serde_json::Value,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Paid,
    Failed,
    /// Set by admin tooling after a manual refund; never produced by
    /// the settle pipeline.
    Refunded,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

impl Transaction {
    pub fn tx_status(&self) -> Option<TxStatus> {
        TxStatus::parse(&self.status)
    }
}

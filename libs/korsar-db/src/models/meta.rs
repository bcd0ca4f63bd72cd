use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Typed view of the metadata bag stored on pending transactions.
/// The stored copy is authoritative at settle time; webhook bodies are
/// only trusted for identity and signature. Unknown fields survive a
/// decode/encode round trip via `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseMeta {
    pub user_id: i64,
    /// Price the customer owes, kopecks, after discounts.
    pub price_kop: i64,
    pub payment_method: String,
    pub payment_id: String,
    #[serde(rename = "op")]
    pub operation: Operation,
    /// Filled in by the settle pipeline once the key exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    /// Stars-per-ruble rate pinned at invoice time, kopecks per star.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stars_rate_kop: Option<i64>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    Buy {
        plan_id: i64,
        plan_name: String,
        action: KeyAction,
        months: i32,
        days: i32,
        hours: i32,
        host_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_id: Option<i64>,
        /// Key number reserved on the first settle attempt so retries
        /// reuse the same email.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_number: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer_email: Option<String>,
    },
    Topup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    New,
    Extend,
}

impl PurchaseMeta {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn buy_meta_round_trips() {
        let meta = PurchaseMeta {
            user_id: 42,
            price_kop: 15000,
            payment_method: "yookassa".into(),
            payment_id: "abc-123".into(),
            operation: Operation::Buy {
                plan_id: 7,
                plan_name: "1 month".into(),
                action: KeyAction::New,
                months: 1,
                days: 0,
                hours: 0,
                host_name: "nl-1".into(),
                key_id: None,
                key_number: None,
                customer_email: Some("a@b.c".into()),
            },
            connection_string: None,
            stars_rate_kop: None,
            extra: Map::new(),
        };

        let value = meta.to_value().unwrap();
        assert_eq!(value["op"]["operation"], "buy");
        assert_eq!(value["op"]["plan_id"], 7);

        let back = PurchaseMeta::from_value(&value).unwrap();
        assert_eq!(back.user_id, 42);
        assert!(matches!(
            back.operation,
            Operation::Buy { action: KeyAction::New, .. }
        ));
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let value = json!({
            "user_id": 1,
            "price_kop": 9900,
            "payment_method": "cryptobot",
            "payment_id": "p-1",
            "op": { "operation": "topup" },
            "promo_code": "SPRING"
        });

        let meta = PurchaseMeta::from_value(&value).unwrap();
        assert_eq!(meta.extra["promo_code"], "SPRING");

        let out = meta.to_value().unwrap();
        assert_eq!(out["promo_code"], "SPRING");
    }

    #[test]
    fn bad_operation_tag_is_rejected() {
        let value = json!({
            "user_id": 1,
            "price_kop": 100,
            "payment_method": "balance",
            "payment_id": "p-2",
            "op": { "operation": "refund" }
        });
        assert!(PurchaseMeta::from_value(&value).is_err());
    }
}

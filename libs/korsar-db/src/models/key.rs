use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provisioned VPN key mirroring one 3x-ui client. `key_email` is the
/// panel-side identity and stays stable across extensions.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Key {
    pub key_id: i64,
    pub user_id: i64,
    pub host_name: String,
    pub plan_name: Option<String>,
    pub price: Option<i64>,
    pub xui_client_uuid: Uuid,
    pub key_email: String,
    pub created_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub connection_string: Option<String>,
    pub subscription_link: Option<String>,
    pub protocol: String,
    pub is_trial: i16,
    pub status: String,
    pub quota_total_gb: Option<f64>,
    pub traffic_down_bytes: Option<i64>,
    pub quota_remaining_bytes: Option<i64>,
    pub key_auto_renewal_enabled: bool,
}

impl Key {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date > now
    }

    /// Status the key should carry given its expiry and trial flag.
    pub fn computed_status(&self, now: DateTime<Utc>) -> KeyStatus {
        if self.status == KeyStatus::Deactivated.as_str() {
            return KeyStatus::Deactivated;
        }
        match (self.expiry_date > now, self.is_trial != 0) {
            (true, true) => KeyStatus::TrialActive,
            (true, false) => KeyStatus::PayActive,
            (false, true) => KeyStatus::TrialEnded,
            (false, false) => KeyStatus::PayEnded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    TrialActive,
    PayActive,
    TrialEnded,
    PayEnded,
    /// Revoked by an administrator; never recomputed back to active.
    Deactivated,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrialActive => "trial-active",
            Self::PayActive => "pay-active",
            Self::TrialEnded => "trial-ended",
            Self::PayEnded => "pay-ended",
            Self::Deactivated => "deactivate",
        }
    }
}

/// Write-side view used by the upsert: everything the settle pipeline
/// knows about a key after the panel call succeeded.
#[derive(Debug, Clone)]
pub struct KeySpec {
    pub user_id: i64,
    pub host_name: String,
    pub plan_name: Option<String>,
    pub price: Option<i64>,
    pub xui_client_uuid: Uuid,
    pub key_email: String,
    pub expiry_date: DateTime<Utc>,
    pub connection_string: Option<String>,
    pub subscription_link: Option<String>,
    pub is_trial: bool,
    pub quota_total_gb: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_follows_expiry_and_trial_flag() {
        let now = Utc::now();
        let mut key = Key {
            key_id: 1,
            user_id: 10,
            host_name: "nl-1".into(),
            plan_name: None,
            price: None,
            xui_client_uuid: Uuid::new_v4(),
            key_email: "user10-key1@nl1.bot".into(),
            created_date: now,
            expiry_date: now + Duration::days(3),
            remaining_seconds: 0,
            connection_string: None,
            subscription_link: None,
            protocol: "vless".into(),
            is_trial: 0,
            status: "pay-active".into(),
            quota_total_gb: None,
            traffic_down_bytes: None,
            quota_remaining_bytes: None,
            key_auto_renewal_enabled: true,
        };
        assert_eq!(key.computed_status(now), KeyStatus::PayActive);

        key.is_trial = 1;
        key.expiry_date = now - Duration::hours(1);
        assert_eq!(key.computed_status(now), KeyStatus::TrialEnded);

        key.status = "deactivate".into();
        assert_eq!(key.computed_status(now), KeyStatus::Deactivated);
    }
}

use serde::{Deserialize, Serialize};

use super::User;

/// Tariff attached to a host. Duration is months + days + hours,
/// `price` is kopecks, `traffic_gb == 0.0` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Plan {
    pub plan_id: i64,
    pub host_name: String,
    pub plan_name: String,
    pub months: i32,
    pub days: i32,
    pub hours: i32,
    pub price: i64,
    pub traffic_gb: f64,
    pub key_provision_mode: String,
    pub display_mode: String,
    pub display_mode_groups: serde_json::Value,
}

/// Who a plan is offered to in the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanDisplayMode {
    All,
    /// Hidden from users who never paid.
    HiddenNew,
    /// Hidden from users with at least one paid purchase.
    HiddenOld,
    /// Visible only to listed user groups.
    Groups,
    Hidden,
}

impl PlanDisplayMode {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "hidden_new" => Self::HiddenNew,
            "hidden_old" => Self::HiddenOld,
            "groups" => Self::Groups,
            "hidden" | "hidden_all" => Self::Hidden,
            _ => Self::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::HiddenNew => "hidden_new",
            Self::HiddenOld => "hidden_old",
            Self::Groups => "groups",
            Self::Hidden => "hidden",
        }
    }
}

impl Plan {
    /// Total plan duration in fractional days. Hours are clamped to a
    /// single day so a mistyped value cannot inflate the term.
    pub fn days_to_add(&self) -> f64 {
        let hours = self.hours.clamp(0, 24);
        self.months as f64 * 30.0 + self.days as f64 + hours as f64 / 24.0
    }

    pub fn is_visible_for(&self, user: &User) -> bool {
        match PlanDisplayMode::parse(&self.display_mode) {
            PlanDisplayMode::All => true,
            PlanDisplayMode::Hidden => false,
            PlanDisplayMode::HiddenNew => !user.is_first_purchase(),
            PlanDisplayMode::HiddenOld => user.is_first_purchase(),
            PlanDisplayMode::Groups => match (&user.user_group_id, self.display_mode_groups.as_array()) {
                (Some(group), Some(groups)) => {
                    groups.iter().any(|g| g.as_i64() == Some(*group))
                }
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(total_spent: i64, group: Option<i64>) -> User {
        User {
            telegram_id: 1,
            username: None,
            fullname: None,
            is_banned: false,
            referred_by: None,
            referral_balance: 0,
            referral_balance_all: 0,
            balance: 0,
            total_spent,
            total_months_purchased: 0,
            trial_used: false,
            trial_reuses_count: 0,
            trial_days_given: 0,
            agreed_to_terms: true,
            user_group_id: group,
            timezone: None,
            auto_renewal_enabled: true,
            keys_count: 0,
            registration_date: Utc::now(),
        }
    }

    fn plan(display_mode: &str, groups: serde_json::Value) -> Plan {
        Plan {
            plan_id: 1,
            host_name: "nl-1".into(),
            plan_name: "1 month".into(),
            months: 1,
            days: 0,
            hours: 0,
            price: 15000,
            traffic_gb: 0.0,
            key_provision_mode: "key".into(),
            display_mode: display_mode.into(),
            display_mode_groups: groups,
        }
    }

    #[test]
    fn duration_clamps_hours_to_one_day() {
        let mut p = plan("all", serde_json::json!([]));
        p.months = 1;
        p.days = 2;
        p.hours = 90;
        assert_eq!(p.days_to_add(), 33.0);

        p.hours = 12;
        assert_eq!(p.days_to_add(), 32.5);

        p.hours = -5;
        assert_eq!(p.days_to_add(), 32.0);
    }

    #[test]
    fn display_modes_filter_by_purchase_history() {
        let newcomer = user(0, None);
        let veteran = user(50000, None);

        let p = plan("hidden_new", serde_json::json!([]));
        assert!(!p.is_visible_for(&newcomer));
        assert!(p.is_visible_for(&veteran));

        let p = plan("hidden_old", serde_json::json!([]));
        assert!(p.is_visible_for(&newcomer));
        assert!(!p.is_visible_for(&veteran));
    }

    #[test]
    fn hidden_all_spelling_hides_from_everyone() {
        // Admin UIs wrote both spellings over time; neither may leak
        // a hidden plan into the storefront.
        for mode in ["hidden", "hidden_all"] {
            let p = plan(mode, serde_json::json!([]));
            assert_eq!(PlanDisplayMode::parse(mode), PlanDisplayMode::Hidden);
            assert!(!p.is_visible_for(&user(0, None)));
            assert!(!p.is_visible_for(&user(50000, Some(3))));
        }
    }

    #[test]
    fn group_plans_require_membership() {
        let p = plan("groups", serde_json::json!([3, 7]));
        assert!(p.is_visible_for(&user(0, Some(7))));
        assert!(!p.is_visible_for(&user(0, Some(4))));
        assert!(!p.is_visible_for(&user(0, None)));
    }
}

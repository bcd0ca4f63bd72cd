use chrono::{DateTime, Utc};
use korsar_db::models::Key;
use korsar_db::repositories::{NotificationRepository, SettingsRepository};
use teloxide::prelude::*;
use teloxide::types::ParseMode;

use crate::error::ShopResult;
use crate::services::pricing::fmt_rub;
use crate::services::template;

/// Outbound messages: Telegram delivery plus the audit log. Reminder
/// sends go through the (key, marker) dedup gate in the notifications
/// table, so a second scheduler pass cannot repeat them.
pub struct Notifier {
    bot: Bot,
    log: NotificationRepository,
    settings: SettingsRepository,
    admin_id: i64,
}

impl Notifier {
    pub fn new(
        bot: Bot,
        log: NotificationRepository,
        settings: SettingsRepository,
        admin_id: i64,
    ) -> Self {
        Self { bot, log, settings, admin_id }
    }

    async fn template(&self, key: &str, default: &str) -> String {
        match self.settings.get(key).await {
            Ok(Some(tmpl)) => tmpl,
            Ok(None) => default.to_string(),
            Err(err) => {
                tracing::warn!(key, error = %err, "template lookup failed, using default");
                default.to_string()
            }
        }
    }

    /// Delivers and logs. Delivery failure is recorded, not raised;
    /// a blocked bot must not fail a settle. A message Telegram refuses
    /// to parse is retried as plain text with the tags stripped.
    pub async fn send(&self, user_id: i64, kind: &str, title: &str, text: &str) {
        let text = template::normalize_br(text);
        let status = match self
            .bot
            .send_message(ChatId(user_id), &text)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => "sent",
            Err(err) => {
                tracing::warn!(user_id, kind, error = %err, "html send failed, retrying plain");
                match self
                    .bot
                    .send_message(ChatId(user_id), template::strip_tags(&text))
                    .await
                {
                    Ok(_) => "sent",
                    Err(err) => {
                        tracing::warn!(user_id, kind, error = %err, "telegram send failed");
                        "failed"
                    }
                }
            }
        };
        if let Err(err) = self
            .log
            .log(user_id, None, kind, title, &text, status, serde_json::json!({}))
            .await
        {
            tracing::error!(user_id, kind, error = %err, "notification log failed");
        }
    }

    /// Send-once path for per-key reminders. Returns whether this call
    /// actually sent.
    pub async fn send_once(
        &self,
        user_id: i64,
        kind: &str,
        title: &str,
        text: &str,
        key_id: i64,
        marker_hours: i32,
    ) -> ShopResult<bool> {
        let text = template::normalize_br(text);
        let claimed = self
            .log
            .log_once(user_id, None, kind, title, &text, key_id, marker_hours)
            .await?;
        if !claimed {
            return Ok(false);
        }
        if let Err(err) = self
            .bot
            .send_message(ChatId(user_id), &text)
            .parse_mode(ParseMode::Html)
            .await
        {
            tracing::warn!(user_id, key_id, marker_hours, error = %err, "reminder send failed");
        }
        Ok(true)
    }

    pub async fn notify_admin(&self, text: &str) {
        if let Err(err) = self
            .bot
            .send_message(ChatId(self.admin_id), text)
            .parse_mode(ParseMode::Html)
            .await
        {
            tracing::warn!(error = %err, "admin notification failed");
        }
    }

    pub async fn purchase_success(
        &self,
        user_id: i64,
        key: &Key,
        cabinet_url: Option<&str>,
        docs_url: Option<&str>,
    ) {
        let tmpl = self
            .template(
                "tmpl_purchase_success",
                "✅ Your key is ready!\n\n<b>Key:</b> <code>{email}</code>\n<b>Works until:</b> {expiry}\n\n<code>{connection}</code>",
            )
            .await;
        let mut text = template::render(
            &tmpl,
            &[
                ("email", key.key_email.clone()),
                ("expiry", fmt_date(key.expiry_date)),
                ("connection", key.connection_string.clone().unwrap_or_default()),
            ],
        );
        if let Some(url) = cabinet_url {
            text.push_str(&format!("\n\nCabinet: {url}"));
        }
        if let Some(url) = docs_url {
            text.push_str(&format!("\nSetup guide: {url}"));
        }
        self.send(user_id, "purchase", "Key issued", &text).await;
    }

    pub async fn topup_success(&self, user_id: i64, amount_kop: i64, balance_kop: i64) {
        let tmpl = self
            .template(
                "tmpl_topup_success",
                "💰 Balance topped up by {amount}.\nCurrent balance: {balance}.",
            )
            .await;
        let text = template::render(
            &tmpl,
            &[("amount", fmt_rub(amount_kop)), ("balance", fmt_rub(balance_kop))],
        );
        self.send(user_id, "topup", "Balance top-up", &text).await;
    }

    pub async fn trial_granted(&self, user_id: i64, key: &Key, trial_days: i64) {
        let text = format!(
            "🎁 Your free {trial_days}-day trial key:\n\n<code>{}</code>\n\nWorks until {}.",
            key.connection_string.clone().unwrap_or_default(),
            fmt_date(key.expiry_date),
        );
        self.send(user_id, "trial", "Trial key", &text).await;
    }

    pub async fn referral_reward(&self, referrer_id: i64, reward_kop: i64) {
        let text = format!(
            "🤝 A user you invited made a purchase. {} landed on your referral balance.",
            fmt_rub(reward_kop)
        );
        self.send(referrer_id, "referral", "Referral reward", &text).await;
    }

    pub async fn expiry_warning(&self, key: &Key, marker_hours: i32) -> ShopResult<bool> {
        let tmpl = self
            .template(
                "tmpl_expiry_warning",
                "⏳ Key <code>{email}</code> expires in {hours} h ({expiry}). Renew it to stay online.",
            )
            .await;
        let text = template::render(
            &tmpl,
            &[
                ("email", key.key_email.clone()),
                ("hours", marker_hours.to_string()),
                ("expiry", fmt_date(key.expiry_date)),
            ],
        );
        self.send_once(key.user_id, "expiry_warning", "Key expires soon", &text, key.key_id, marker_hours)
            .await
    }

    pub async fn low_balance_for_renewal(
        &self,
        key: &Key,
        marker_hours: i32,
        price_kop: i64,
        balance_kop: i64,
    ) -> ShopResult<bool> {
        let text = format!(
            "⚠️ Auto-renewal of <code>{}</code> needs {} but your balance is {}. \
             Top up before {} or the key will expire.",
            key.key_email,
            fmt_rub(price_kop),
            fmt_rub(balance_kop),
            fmt_date(key.expiry_date),
        );
        self.send_once(key.user_id, "low_balance", "Not enough for renewal", &text, key.key_id, marker_hours)
            .await
    }

    pub async fn renewal_success(&self, key: &Key, charged_kop: i64) {
        let text = format!(
            "🔄 Key <code>{}</code> auto-renewed for {}. New expiry: {}.",
            key.key_email,
            fmt_rub(charged_kop),
            fmt_date(key.expiry_date),
        );
        self.send(key.user_id, "renewal", "Key renewed", &text).await;
    }

    pub async fn key_expired(&self, key: &Key) {
        let text = format!(
            "❌ Key <code>{}</code> has expired. You can buy a new term any time.",
            key.key_email
        );
        self.send(key.user_id, "expired", "Key expired", &text).await;
    }

    pub async fn admin_purchase_report(
        &self,
        user_id: i64,
        username: Option<&str>,
        amount_kop: i64,
        method: &str,
        plan_name: &str,
    ) {
        let who = username
            .map(|u| format!("@{u}"))
            .unwrap_or_else(|| user_id.to_string());
        let text = format!(
            "💸 Purchase: {who} paid {} via {method} for «{plan_name}».",
            fmt_rub(amount_kop)
        );
        self.notify_admin(&text).await;
    }
}

fn fmt_date(dt: DateTime<Utc>) -> String {
    dt.format("%d.%m.%Y %H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_rendering_is_stable() {
        let dt = Utc.with_ymd_and_hms(2026, 9, 1, 18, 30, 0).unwrap();
        assert_eq!(fmt_date(dt), "01.09.2026 18:30 UTC");
    }
}

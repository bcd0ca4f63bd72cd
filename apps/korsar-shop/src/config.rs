use anyhow::Context;

/// Process-level configuration read from the environment once at
/// startup. Everything an admin can change at runtime lives in
/// `bot_settings` instead and is read through `SettingsRepository`.
#[derive(Debug, Clone)]
pub struct ShopConfig {
    pub database_url: String,
    pub bot_token: String,
    pub bot_username: String,
    pub admin_id: i64,
    /// Public https domain webhooks and the cabinet are served under.
    pub public_domain: String,
    pub listen_addr: String,
}

impl ShopConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            bot_token: require("BOT_TOKEN")?,
            bot_username: require("BOT_USERNAME")?,
            admin_id: require("ADMIN_ID")?
                .parse()
                .context("ADMIN_ID must be a Telegram id")?,
            public_domain: require("PUBLIC_DOMAIN")?,
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
        })
    }

    pub fn webhook_url(&self, path: &str) -> String {
        format!("https://{}{}", self.public_domain, path)
    }
}

fn require(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} is not set"))
}

/// Runtime-tunable settings keys, with their defaults where one makes
/// sense. Kept in one place so the admin surface and the services
/// agree on spelling.
pub mod keys {
    pub const REFERRAL_PERCENT: &str = "referral_percentage";
    pub const REFERRAL_DISCOUNT_PERCENT: &str = "referral_discount";
    pub const TRIAL_ENABLED: &str = "trial_enabled";
    pub const TRIAL_DAYS: &str = "trial_duration_days";
    /// Kopecks per one Telegram Star.
    pub const STARS_RATE_KOP: &str = "stars_conversion_rate";
    pub const USD_RUB_RATE: &str = "usd_rub_rate";
    pub const FX_MARGIN_PERCENT: &str = "fx_margin_percent";
    pub const MIN_TOPUP_KOP: &str = "minimum_topup";
    pub const MIN_WITHDRAWAL_KOP: &str = "minimum_withdrawal";
    /// Comma-separated hours-before-expiry reminder markers.
    pub const NOTIFY_MARKERS: &str = "notify_hours_before";
    /// `production` emits cabinet links in messages, anything else
    /// suppresses them.
    pub const SERVER_ENVIRONMENT: &str = "server_environment";
    pub const USER_CABINET_DOMAIN: &str = "user_cabinet_domain";
    pub const CODEX_DOCS_DOMAIN: &str = "codex_docs_domain";
    pub const PROMO_CODE: &str = "promo_code";
    pub const PROMO_DISCOUNT_PERCENT: &str = "promo_discount";

    pub const YOOKASSA_SHOP_ID: &str = "yookassa_shop_id";
    pub const YOOKASSA_SECRET: &str = "yookassa_secret_key";
    pub const CRYPTOBOT_TOKEN: &str = "cryptobot_token";
    pub const HELEKET_MERCHANT_ID: &str = "heleket_merchant_id";
    pub const HELEKET_API_KEY: &str = "heleket_api_key";
    pub const TON_WALLET_ADDRESS: &str = "ton_wallet_address";
    pub const TONAPI_KEY: &str = "tonapi_key";
}

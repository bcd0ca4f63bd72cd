use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use korsar_db::Store;
use korsar_db::models::{Host, Key, KeyAction, KeySpec, Operation, Plan, PurchaseMeta, TxStatus, User};
use korsar_db::repositories::{CommitOutcome, TopupOutcome};
use serde_json::Map;
use uuid::Uuid;

use crate::config::{ShopConfig, keys as setting};
use crate::error::{ShopError, ShopResult};
use crate::services::notify::Notifier;
use crate::services::payment::{
    EventStatus, Intent, Invoice, PaymentGateway, PaymentMethod, VerifiedEvent,
    cryptobot::CryptoBotGateway, heleket::HeleketGateway, stars::StarsGateway,
    tonconnect::TonGateway, yookassa::YooKassaGateway,
};
use crate::services::pricing;
use crate::xui::{self, PanelRegistry};

/// What checkout hands back to the UI layer.
#[derive(Debug, Clone)]
pub enum PurchaseStart {
    /// The customer must pay externally first.
    Invoice(Invoice),
    /// Balance, free or trial path: the key exists already.
    Provisioned { key_id: i64 },
}

#[derive(Debug, Clone)]
pub enum SettleOutcome {
    Settled { key_id: Option<i64> },
    AlreadyPaid,
    MarkedFailed,
    Ignored,
}

/// Drives the purchase state machine end to end: price -> pending
/// transaction -> external payment -> panel provisioning -> paid
/// commit -> notifications. Webhook handlers and the scheduler both
/// funnel into `settle`, so every paid transition shares one code
/// path.
pub struct PurchaseOrchestrator {
    store: Store,
    panels: Arc<PanelRegistry>,
    notifier: Arc<Notifier>,
    config: ShopConfig,
}

impl PurchaseOrchestrator {
    pub fn new(
        store: Store,
        panels: Arc<PanelRegistry>,
        notifier: Arc<Notifier>,
        config: ShopConfig,
    ) -> Self {
        Self { store, panels, notifier, config }
    }

    /// Gateways are rebuilt from settings on demand so credential
    /// edits apply without a restart.
    pub async fn gateway(&self, method: PaymentMethod) -> ShopResult<Arc<dyn PaymentGateway>> {
        let settings = &self.store.settings;
        let return_url = format!("https://t.me/{}", self.config.bot_username);
        match method {
            PaymentMethod::YooKassa => {
                let shop_id = settings.get(setting::YOOKASSA_SHOP_ID).await?;
                let secret = settings.get(setting::YOOKASSA_SECRET).await?;
                match (shop_id, secret) {
                    (Some(shop_id), Some(secret)) => {
                        Ok(Arc::new(YooKassaGateway::new(shop_id, secret, return_url)))
                    }
                    _ => Err(ShopError::Validation("yookassa is not configured".into())),
                }
            }
            PaymentMethod::CryptoBot => {
                let token = settings
                    .get(setting::CRYPTOBOT_TOKEN)
                    .await?
                    .ok_or_else(|| ShopError::Validation("cryptobot is not configured".into()))?;
                Ok(Arc::new(CryptoBotGateway::new(token, return_url)))
            }
            PaymentMethod::Heleket => {
                let merchant = settings.get(setting::HELEKET_MERCHANT_ID).await?;
                let api_key = settings.get(setting::HELEKET_API_KEY).await?;
                match (merchant, api_key) {
                    (Some(merchant), Some(api_key)) => Ok(Arc::new(HeleketGateway::new(
                        merchant,
                        api_key,
                        self.config.webhook_url("/heleket-webhook"),
                        return_url,
                        settings.get_f64(setting::USD_RUB_RATE, 90.0).await?,
                        settings.get_f64(setting::FX_MARGIN_PERCENT, 2.0).await?,
                    ))),
                    _ => Err(ShopError::Validation("heleket is not configured".into())),
                }
            }
            PaymentMethod::Ton => {
                let wallet = settings
                    .get(setting::TON_WALLET_ADDRESS)
                    .await?
                    .ok_or_else(|| ShopError::Validation("ton wallet is not configured".into()))?;
                let api_key = settings
                    .get(setting::TONAPI_KEY)
                    .await?
                    .ok_or_else(|| ShopError::Validation("tonapi key is not configured".into()))?;
                Ok(Arc::new(TonGateway::new(
                    wallet,
                    api_key,
                    settings.get_f64(setting::FX_MARGIN_PERCENT, 2.0).await?,
                    self.store.transactions.clone(),
                )))
            }
            PaymentMethod::Stars => {
                let rate = settings.get_i64(setting::STARS_RATE_KOP, 0).await?;
                if rate <= 0 {
                    return Err(ShopError::Validation("stars rate is not configured".into()));
                }
                Ok(Arc::new(StarsGateway::new(rate)))
            }
            PaymentMethod::Balance | PaymentMethod::Free => Err(ShopError::Validation(format!(
                "{method} settles internally, no gateway exists"
            ))),
        }
    }

    /// Price the user actually pays for a plan: the referral discount
    /// applies to the first paid purchase of an invited user, a valid
    /// promo code stacks on top of it.
    pub async fn effective_price(
        &self,
        user: &User,
        plan: &Plan,
        promo_code: Option<&str>,
    ) -> ShopResult<i64> {
        let mut price = plan.price;
        if user.referred_by.is_some() && user.is_first_purchase() {
            let percent = self
                .store
                .settings
                .get_i64(setting::REFERRAL_DISCOUNT_PERCENT, 0)
                .await?;
            price = pricing::discounted_price(price, percent);
        }
        if let Some(code) = promo_code {
            let configured = self.store.settings.get(setting::PROMO_CODE).await?;
            match configured {
                Some(expected) if expected.eq_ignore_ascii_case(code.trim()) => {
                    let percent = self
                        .store
                        .settings
                        .get_i64(setting::PROMO_DISCOUNT_PERCENT, 0)
                        .await?;
                    price = pricing::discounted_price(price, percent);
                }
                _ => return Err(ShopError::Validation("unknown promo code".into())),
            }
        }
        Ok(price)
    }

    /// Moves the accumulated referral balance onto the spendable
    /// balance once it clears the configured minimum.
    pub async fn withdraw_referral_to_balance(&self, user_id: i64) -> ShopResult<i64> {
        let user = self.fetch_active_user(user_id).await?;
        let min = self
            .store
            .settings
            .get_i64(setting::MIN_WITHDRAWAL_KOP, 10_000)
            .await?;
        if user.referral_balance < min.max(1) {
            return Err(ShopError::Validation(format!(
                "minimum withdrawal is {}",
                pricing::fmt_rub(min)
            )));
        }
        Ok(self.store.users.transfer_referral_balance(user_id).await?)
    }

    /// Checkout entry point for buying or extending a key.
    pub async fn start_purchase(
        &self,
        user_id: i64,
        plan_id: i64,
        action: KeyAction,
        key_id: Option<i64>,
        method: PaymentMethod,
        customer_email: Option<String>,
        promo_code: Option<&str>,
    ) -> ShopResult<PurchaseStart> {
        let user = self.fetch_active_user(user_id).await?;
        let plan = self
            .store
            .plans
            .get(plan_id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("plan {plan_id}")))?;
        if action == KeyAction::Extend {
            let key_id = key_id
                .ok_or_else(|| ShopError::Validation("extension needs a key id".into()))?;
            let key = self
                .store
                .keys
                .get(key_id)
                .await?
                .ok_or_else(|| ShopError::NotFound(format!("key {key_id}")))?;
            if key.user_id != user_id {
                return Err(ShopError::Validation("key belongs to another user".into()));
            }
            if key.host_name != plan.host_name {
                return Err(ShopError::Validation("plan is for a different host".into()));
            }
        }

        let price_kop = self.effective_price(&user, &plan, promo_code).await?;
        let effective_method = if price_kop == 0 { PaymentMethod::Free } else { method };

        let mut meta = PurchaseMeta {
            user_id,
            price_kop,
            payment_method: effective_method.as_str().into(),
            payment_id: Uuid::new_v4().to_string(),
            operation: Operation::Buy {
                plan_id: plan.plan_id,
                plan_name: plan.plan_name.clone(),
                action,
                months: plan.months,
                days: plan.days,
                hours: plan.hours,
                host_name: plan.host_name.clone(),
                key_id: if action == KeyAction::Extend { key_id } else { None },
                key_number: None,
                customer_email: customer_email.clone(),
            },
            connection_string: None,
            stars_rate_kop: None,
            extra: Map::new(),
        };

        match effective_method {
            PaymentMethod::Free => {
                self.store
                    .transactions
                    .create_pending(&meta, user.username.as_deref(), None, None, None)
                    .await?;
                self.settle_as_paid(&meta, None).await
            }
            PaymentMethod::Balance => {
                if user.balance < price_kop {
                    return Err(ShopError::InsufficientFunds);
                }
                self.store
                    .transactions
                    .create_pending(&meta, user.username.as_deref(), None, None, None)
                    .await?;
                self.settle_as_paid(&meta, None).await
            }
            external => {
                let gateway = self.gateway(external).await?;
                if let PaymentMethod::Stars = external {
                    let rate = self
                        .store
                        .settings
                        .get_i64(setting::STARS_RATE_KOP, 0)
                        .await?;
                    meta.stars_rate_kop = Some(rate);
                }
                let intent = Intent {
                    meta: meta.clone(),
                    description: format!("{} — {}", plan.host_name, plan.plan_name),
                    customer_email,
                };
                let invoice = gateway.create_invoice(&intent).await?;
                meta.payment_id = invoice.payment_id.clone();

                self.store
                    .transactions
                    .create_pending(
                        &meta,
                        user.username.as_deref(),
                        invoice.amount_currency,
                        invoice.currency_name.as_deref(),
                        invoice.handle.pay_url(),
                    )
                    .await?;
                Ok(PurchaseStart::Invoice(invoice))
            }
        }
    }

    /// Checkout entry point for topping up the internal balance.
    pub async fn start_topup(
        &self,
        user_id: i64,
        amount_kop: i64,
        method: PaymentMethod,
    ) -> ShopResult<PurchaseStart> {
        let user = self.fetch_active_user(user_id).await?;
        let min = self.store.settings.get_i64(setting::MIN_TOPUP_KOP, 5000).await?;
        if amount_kop < min {
            return Err(ShopError::Validation(format!(
                "minimum top-up is {}",
                pricing::fmt_rub(min)
            )));
        }
        if matches!(method, PaymentMethod::Balance | PaymentMethod::Free) {
            return Err(ShopError::Validation("top-up needs an external method".into()));
        }

        let mut meta = PurchaseMeta {
            user_id,
            price_kop: amount_kop,
            payment_method: method.as_str().into(),
            payment_id: Uuid::new_v4().to_string(),
            operation: Operation::Topup,
            connection_string: None,
            stars_rate_kop: None,
            extra: Map::new(),
        };

        let gateway = self.gateway(method).await?;
        if let PaymentMethod::Stars = method {
            let rate = self.store.settings.get_i64(setting::STARS_RATE_KOP, 0).await?;
            meta.stars_rate_kop = Some(rate);
        }
        let intent = Intent {
            meta: meta.clone(),
            description: format!("Balance top-up {}", pricing::fmt_rub(amount_kop)),
            customer_email: None,
        };
        let invoice = gateway.create_invoice(&intent).await?;
        meta.payment_id = invoice.payment_id.clone();

        self.store
            .transactions
            .create_pending(
                &meta,
                user.username.as_deref(),
                invoice.amount_currency,
                invoice.currency_name.as_deref(),
                invoice.handle.pay_url(),
            )
            .await?;
        Ok(PurchaseStart::Invoice(invoice))
    }

    /// One verified provider event in, one ledger transition out.
    pub async fn settle(&self, event: &VerifiedEvent) -> ShopResult<SettleOutcome> {
        let tx = self
            .store
            .transactions
            .get_by_payment_id(&event.payment_id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("payment {}", event.payment_id)))?;

        match event.status {
            EventStatus::Ignored => return Ok(SettleOutcome::Ignored),
            EventStatus::Failed => {
                let flipped = self.store.transactions.mark_failed(&event.payment_id).await?;
                return Ok(if flipped {
                    SettleOutcome::MarkedFailed
                } else {
                    SettleOutcome::AlreadyPaid
                });
            }
            EventStatus::Paid => {
                // Terminal rows never re-enter the pipeline: a replayed
                // webhook must not reach the panel a second time.
                if let Some(outcome) = paid_replay_shortcut(&tx.status) {
                    tracing::info!(payment_id = %event.payment_id, status = %tx.status,
                        "paid event for a settled payment, nothing to do");
                    return Ok(outcome);
                }
            }
        }

        // The stored metadata is authoritative; the webhook body only
        // proved that this payment_id was paid.
        let meta = PurchaseMeta::from_value(&tx.metadata)
            .map_err(|e| ShopError::Validation(format!("stored metadata unreadable: {e}")))?;
        self.settle_as_paid(&meta, event.tx_hash.as_deref())
            .await
            .map(|start| match start {
                PurchaseStart::Provisioned { key_id } => {
                    SettleOutcome::Settled { key_id: Some(key_id) }
                }
                PurchaseStart::Invoice(_) => SettleOutcome::Settled { key_id: None },
            })
            .or_else(|err| match err {
                ShopError::Conflict(_) => Ok(SettleOutcome::AlreadyPaid),
                other => Err(other),
            })
    }

    /// Telegram Stars settle path, driven by `successful_payment`.
    pub async fn settle_stars_payment(
        &self,
        payload: &str,
        charge_id: &str,
    ) -> ShopResult<SettleOutcome> {
        let event = VerifiedEvent {
            payment_id: payload.to_string(),
            status: EventStatus::Paid,
            tx_hash: Some(charge_id.to_string()),
            native_amount: None,
            raw: serde_json::json!({ "source": "telegram_successful_payment" }),
        };
        self.settle(&event).await
    }

    /// Pre-checkout gate for Stars invoices.
    pub async fn approve_pre_checkout(&self, payload: &str, total_stars: i64) -> ShopResult<()> {
        let tx = self
            .store
            .transactions
            .get_by_payment_id(payload)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("payment {payload}")))?;
        if tx.status != "pending" {
            return Err(ShopError::Conflict(format!("payment {payload} is {}", tx.status)));
        }
        let meta = PurchaseMeta::from_value(&tx.metadata)
            .map_err(|e| ShopError::Validation(format!("stored metadata unreadable: {e}")))?;
        StarsGateway::check_pre_checkout(&meta, total_stars)
    }

    /// Grants the one free trial key.
    pub async fn grant_trial(&self, user_id: i64, host_name: &str) -> ShopResult<Key> {
        let settings = &self.store.settings;
        if !settings.get_bool(setting::TRIAL_ENABLED, true).await? {
            return Err(ShopError::Validation("trial is disabled".into()));
        }
        let trial_days = settings.get_i64(setting::TRIAL_DAYS, 3).await?;

        let user = self.fetch_active_user(user_id).await?;
        if user.trial_used {
            return Err(ShopError::Conflict("trial already used".into()));
        }
        if self.store.keys.has_active_trial(user_id, Utc::now()).await? {
            return Err(ShopError::Conflict("an active trial key already exists".into()));
        }

        let host = self.fetch_host(host_name).await?;
        let number = self.store.users.next_key_number(user_id).await?;
        let email = xui::key_email(user_id, number, &host.host_code, true);

        let panel = self.panels.for_host(&host).await?;
        let provisioned = panel
            .create_or_extend_client(&email, trial_days as f64, 0.0, user_id)
            .await?;

        let spec = KeySpec {
            user_id,
            host_name: host.host_name.clone(),
            plan_name: Some("trial".into()),
            price: Some(0),
            xui_client_uuid: provisioned.client_uuid,
            key_email: email,
            expiry_date: ms_to_datetime(provisioned.expiry_time_ms)?,
            connection_string: provisioned.connection_string,
            subscription_link: None,
            is_trial: true,
            quota_total_gb: None,
        };
        let key_id = self.store.purchases.commit_trial(&spec, trial_days as i32).await?;
        let key = self
            .store
            .keys
            .get(key_id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("key {key_id}")))?;

        self.notifier.trial_granted(user_id, &key, trial_days).await;
        Ok(key)
    }

    /// Auto-renewal: one extension paid from the internal balance.
    /// Reuses the settle pipeline so idempotency and referral rules
    /// hold here too.
    pub async fn auto_renew(&self, key: &Key, plan: &Plan) -> ShopResult<SettleOutcome> {
        let user = self.fetch_active_user(key.user_id).await?;
        if user.balance < plan.price {
            return Err(ShopError::InsufficientFunds);
        }

        let mut extra = Map::new();
        extra.insert("renewal".into(), serde_json::Value::Bool(true));
        let meta = PurchaseMeta {
            user_id: key.user_id,
            price_kop: plan.price,
            payment_method: PaymentMethod::Balance.as_str().into(),
            payment_id: format!("renew-{}", Uuid::new_v4()),
            operation: Operation::Buy {
                plan_id: plan.plan_id,
                plan_name: plan.plan_name.clone(),
                action: KeyAction::Extend,
                months: plan.months,
                days: plan.days,
                hours: plan.hours,
                host_name: key.host_name.clone(),
                key_id: Some(key.key_id),
                key_number: None,
                customer_email: None,
            },
            connection_string: None,
            stars_rate_kop: None,
            extra,
        };
        self.store
            .transactions
            .create_pending(&meta, user.username.as_deref(), None, None, None)
            .await?;

        match self.settle_as_paid(&meta, None).await {
            Ok(PurchaseStart::Provisioned { key_id }) => {
                Ok(SettleOutcome::Settled { key_id: Some(key_id) })
            }
            Ok(PurchaseStart::Invoice(_)) => Ok(SettleOutcome::Ignored),
            Err(err) => {
                // A renewal that cannot settle must not linger pending.
                if let Err(mark_err) = self.store.transactions.mark_failed(&meta.payment_id).await {
                    tracing::error!(payment_id = %meta.payment_id, error = %mark_err,
                        "failed to mark dead renewal attempt");
                }
                Err(err)
            }
        }
    }

    /// Shared paid transition: provision on the panel, commit in the
    /// database, notify. Safe to call twice with the same payment; the
    /// second call lands on the already-paid row.
    async fn settle_as_paid(
        &self,
        meta: &PurchaseMeta,
        tx_hash: Option<&str>,
    ) -> ShopResult<PurchaseStart> {
        match &meta.operation {
            Operation::Topup => self.settle_topup(meta, tx_hash).await,
            Operation::Buy { .. } => self.settle_buy(meta, tx_hash).await,
        }
    }

    async fn settle_topup(
        &self,
        meta: &PurchaseMeta,
        tx_hash: Option<&str>,
    ) -> ShopResult<PurchaseStart> {
        match self.store.purchases.commit_paid_topup(meta, tx_hash).await? {
            TopupOutcome::AlreadyPaid => {
                Err(ShopError::Conflict(format!("payment {} already settled", meta.payment_id)))
            }
            TopupOutcome::Credited { amount_kop } => {
                let balance = self
                    .store
                    .users
                    .get(meta.user_id)
                    .await?
                    .map(|u| u.balance)
                    .unwrap_or(amount_kop);
                self.notifier.topup_success(meta.user_id, amount_kop, balance).await;
                Ok(PurchaseStart::Provisioned { key_id: 0 })
            }
        }
    }

    async fn settle_buy(
        &self,
        meta: &PurchaseMeta,
        tx_hash: Option<&str>,
    ) -> ShopResult<PurchaseStart> {
        let Operation::Buy {
            plan_id,
            plan_name,
            action,
            months,
            days,
            hours,
            host_name,
            key_id,
            key_number,
            ..
        } = &meta.operation
        else {
            return Err(ShopError::Validation("settle_buy on non-buy metadata".into()));
        };

        let host = self.fetch_host(host_name).await?;

        // The plan may have been edited or deleted since checkout; the
        // term was snapshotted into the metadata, only traffic comes
        // from the live plan.
        let traffic_gb = match self.store.plans.get(*plan_id).await? {
            Some(plan) => plan.traffic_gb,
            None => 0.0,
        };
        let days_to_add = {
            let hours = (*hours).clamp(0, 24);
            *months as f64 * 30.0 + *days as f64 + hours as f64 / 24.0
        };

        let (email, mut meta) = match action {
            KeyAction::Extend => {
                let key_id = (*key_id)
                    .ok_or_else(|| ShopError::Validation("extension metadata has no key id".into()))?;
                let key = self
                    .store
                    .keys
                    .get(key_id)
                    .await?
                    .ok_or_else(|| ShopError::NotFound(format!("key {key_id}")))?;
                (key.key_email, meta.clone())
            }
            KeyAction::New => {
                // Reserve the number once and persist it, so a settle
                // retry keeps the same email.
                let mut meta = meta.clone();
                let number = match key_number {
                    Some(n) => *n,
                    None => {
                        let n = self.store.users.next_key_number(meta.user_id).await?;
                        if let Operation::Buy { key_number, .. } = &mut meta.operation {
                            *key_number = Some(n);
                        }
                        self.store
                            .transactions
                            .update_pending_metadata(&meta.payment_id, &meta)
                            .await?;
                        n
                    }
                };
                (xui::key_email(meta.user_id, number, &host.host_code, false), meta)
            }
        };

        let panel = self.panels.for_host(&host).await?;
        let provisioned = panel
            .create_or_extend_client(&email, days_to_add, traffic_gb, meta.user_id)
            .await?;

        let spec = KeySpec {
            user_id: meta.user_id,
            host_name: host.host_name.clone(),
            plan_name: Some(plan_name.clone()),
            price: Some(meta.price_kop),
            xui_client_uuid: provisioned.client_uuid,
            key_email: email,
            expiry_date: ms_to_datetime(provisioned.expiry_time_ms)?,
            connection_string: provisioned.connection_string,
            subscription_link: None,
            is_trial: false,
            quota_total_gb: if traffic_gb > 0.0 { Some(traffic_gb) } else { None },
        };

        meta.connection_string = spec.connection_string.clone();
        let referral_percent = self
            .store
            .settings
            .get_i64(setting::REFERRAL_PERCENT, 0)
            .await?;
        let debit = meta.payment_method == PaymentMethod::Balance.as_str();

        let outcome = self
            .store
            .purchases
            .commit_paid_purchase(&meta, &spec, *months, tx_hash, debit, referral_percent)
            .await?;

        match outcome {
            CommitOutcome::AlreadyPaid { key_id } => {
                tracing::info!(payment_id = %meta.payment_id, "replayed settle, no-op");
                Ok(PurchaseStart::Provisioned { key_id: key_id.unwrap_or_default() })
            }
            CommitOutcome::InsufficientBalance => Err(ShopError::InsufficientFunds),
            CommitOutcome::Committed(commit) => {
                let key = self
                    .store
                    .keys
                    .get(commit.key_id)
                    .await?
                    .ok_or_else(|| ShopError::NotFound(format!("key {}", commit.key_id)))?;

                let is_renewal = meta
                    .extra
                    .get("renewal")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if is_renewal {
                    self.notifier.renewal_success(&key, meta.price_kop).await;
                } else {
                    // Cabinet links only leave a production deployment.
                    let environment = self
                        .store
                        .settings
                        .get_or(setting::SERVER_ENVIRONMENT, "production")
                        .await?;
                    let cabinet = if environment == "production" {
                        match self.store.tokens.get_or_create(meta.user_id, key.key_id).await {
                            Ok(token) => {
                                let domain = self
                                    .store
                                    .settings
                                    .get_or(setting::USER_CABINET_DOMAIN, &self.config.public_domain)
                                    .await?;
                                Some(format!("https://{domain}/auth/{token}"))
                            }
                            Err(err) => {
                                tracing::warn!(key_id = key.key_id, error = %err, "cabinet token failed");
                                None
                            }
                        }
                    } else {
                        None
                    };
                    let docs = self
                        .store
                        .settings
                        .get(setting::CODEX_DOCS_DOMAIN)
                        .await?
                        .map(|d| format!("https://{d}"));
                    self.notifier
                        .purchase_success(meta.user_id, &key, cabinet.as_deref(), docs.as_deref())
                        .await;
                }
                if let Some(referral) = commit.referral {
                    self.notifier
                        .referral_reward(referral.referrer_id, referral.reward_kop)
                        .await;
                }
                if meta.price_kop > 0 {
                    let username = self
                        .store
                        .users
                        .get(meta.user_id)
                        .await?
                        .and_then(|u| u.username);
                    self.notifier
                        .admin_purchase_report(
                            meta.user_id,
                            username.as_deref(),
                            meta.price_kop,
                            &meta.payment_method,
                            plan_name,
                        )
                        .await;
                }
                Ok(PurchaseStart::Provisioned { key_id: key.key_id })
            }
        }
    }

    async fn fetch_active_user(&self, user_id: i64) -> ShopResult<User> {
        let user = self
            .store
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("user {user_id}")))?;
        if user.is_banned {
            return Err(ShopError::Validation("user is banned".into()));
        }
        Ok(user)
    }

    async fn fetch_host(&self, host_name: &str) -> ShopResult<Host> {
        self.store
            .hosts
            .get(host_name)
            .await?
            .ok_or_else(|| ShopError::NotFound(format!("host {host_name}")))
    }
}

/// Fast path for a Paid event against a row that already left
/// `pending`. Only a pending row may proceed to the panel call; a paid
/// row is a replay, a failed or refunded row needs an admin, not a
/// silent re-settle.
fn paid_replay_shortcut(tx_status: &str) -> Option<SettleOutcome> {
    match TxStatus::parse(tx_status) {
        Some(TxStatus::Pending) | None => None,
        Some(TxStatus::Paid) => Some(SettleOutcome::AlreadyPaid),
        Some(TxStatus::Failed) | Some(TxStatus::Refunded) => Some(SettleOutcome::Ignored),
    }
}

fn ms_to_datetime(ms: i64) -> ShopResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ShopError::Panel(format!("panel returned bad expiry {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_expiry_converts_from_epoch_ms() {
        let dt = ms_to_datetime(1_756_700_000_000).unwrap();
        assert_eq!(dt.timestamp_millis(), 1_756_700_000_000);
        assert!(ms_to_datetime(i64::MAX).is_err());
    }

    #[test]
    fn replayed_paid_webhook_stops_before_the_panel() {
        // First delivery: the row is pending, settle proceeds and the
        // panel is extended exactly once.
        assert!(paid_replay_shortcut("pending").is_none());
        // Replay of the same body: the row is paid, the shortcut fires
        // before any panel interaction.
        assert!(matches!(
            paid_replay_shortcut("paid"),
            Some(SettleOutcome::AlreadyPaid)
        ));
        // Rows an admin closed stay closed.
        assert!(matches!(
            paid_replay_shortcut("failed"),
            Some(SettleOutcome::Ignored)
        ));
        assert!(matches!(
            paid_replay_shortcut("refunded"),
            Some(SettleOutcome::Ignored)
        ));
    }
}

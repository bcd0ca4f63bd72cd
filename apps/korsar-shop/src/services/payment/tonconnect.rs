use async_trait::async_trait;
use axum::http::HeaderMap;
use korsar_db::repositories::TransactionRepository;
use rand::Rng;

use crate::error::{ShopError, ShopResult};
use crate::services::payment::{
    EventStatus, Intent, Invoice, InvoiceHandle, PaymentGateway, PaymentMethod, VerifiedEvent,
};
use crate::services::pricing;

const NANOTON: f64 = 1_000_000_000.0;
const RATES_URL: &str = "https://tonapi.io/v2/rates?tokens=ton&currencies=rub";

/// Direct TON transfers to the shop wallet. The invoice is a
/// `ton://transfer` deep link carrying the payment id as the transfer
/// comment. Confirmations arrive on the webhook from the chain
/// watcher; wallets that drop the comment are matched back to their
/// pending row by the nano-jittered amount.
pub struct TonGateway {
    http: reqwest::Client,
    wallet_address: String,
    webhook_key: String,
    fx_margin_percent: f64,
    transactions: TransactionRepository,
}

impl TonGateway {
    pub fn new(
        wallet_address: String,
        webhook_key: String,
        fx_margin_percent: f64,
        transactions: TransactionRepository,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            wallet_address,
            webhook_key,
            fx_margin_percent,
            transactions,
        }
    }

    async fn rub_per_ton(&self) -> ShopResult<f64> {
        let reply: serde_json::Value = self
            .http
            .get(RATES_URL)
            .send()
            .await
            .map_err(|e| ShopError::Provider(format!("tonapi rates: {e}")))?
            .json()
            .await
            .map_err(|e| ShopError::Provider(format!("tonapi rates body: {e}")))?;
        reply["rates"]["TON"]["prices"]["RUB"]
            .as_f64()
            .filter(|r| *r > 0.0)
            .ok_or_else(|| ShopError::Provider("tonapi returned no TON/RUB rate".into()))
    }

    /// A random nanoton-scale bump keeps concurrent invoices at
    /// distinct amounts, so amount matching stays unambiguous.
    fn jitter_ton() -> f64 {
        rand::rng().random_range(1..1000) as f64 / NANOTON * 1000.0
    }
}

#[async_trait]
impl PaymentGateway for TonGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Ton
    }

    async fn create_invoice(&self, intent: &Intent) -> ShopResult<Invoice> {
        let rate = self.rub_per_ton().await?;
        let base = pricing::rub_to_foreign(intent.meta.price_kop, rate, self.fx_margin_percent, 6);
        if base <= 0.0 {
            return Err(ShopError::Validation("ton amount must be positive".into()));
        }
        let amount_ton = base + Self::jitter_ton();
        let nanotons = (amount_ton * NANOTON).round() as i64;

        let link = format!(
            "ton://transfer/{}?amount={}&text={}",
            self.wallet_address,
            nanotons,
            urlencoding::encode(&intent.meta.payment_id),
        );

        Ok(Invoice {
            payment_id: intent.meta.payment_id.clone(),
            handle: InvoiceHandle::TransferLink(link),
            amount_currency: Some(amount_ton),
            currency_name: Some("TON".into()),
        })
    }

    /// The chain watcher is the caller here, authenticated by a shared
    /// key. The body reports one incoming transfer.
    async fn verify_webhook(&self, body: &[u8], headers: &HeaderMap) -> ShopResult<VerifiedEvent> {
        let presented = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ShopError::Signature("missing ton webhook key".into()))?;
        if presented != self.webhook_key {
            return Err(ShopError::Signature("ton webhook key mismatch".into()));
        }

        let event: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ShopError::Validation(format!("ton webhook body: {e}")))?;
        let tx_hash = event["tx_hash"]
            .as_str()
            .ok_or_else(|| ShopError::Validation("ton webhook has no tx_hash".into()))?
            .to_string();
        let amount_ton = event["amount_ton"]
            .as_f64()
            .ok_or_else(|| ShopError::Validation("ton webhook has no amount".into()))?;
        let comment = event["comment"].as_str().unwrap_or_default().trim().to_string();

        // Prefer the comment; fall back to amount matching when the
        // sender's wallet stripped it.
        let payment_id = if !comment.is_empty()
            && self.transactions.get_by_payment_id(&comment).await?.is_some()
        {
            comment
        } else {
            self.transactions
                .find_pending_ton_by_amount(amount_ton)
                .await?
                .map(|tx| tx.payment_id)
                .ok_or_else(|| {
                    ShopError::NotFound(format!("no pending ton payment for {amount_ton} TON"))
                })?
        };

        Ok(VerifiedEvent {
            payment_id,
            status: EventStatus::Paid,
            tx_hash: Some(tx_hash),
            native_amount: Some(amount_ton),
            raw: event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_nanoton_band() {
        for _ in 0..100 {
            let j = TonGateway::jitter_ton();
            assert!(j > 0.0 && j < 0.000001 * 1000.0);
        }
    }
}

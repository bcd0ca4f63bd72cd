use async_trait::async_trait;
use axum::http::HeaderMap;
use korsar_db::models::PurchaseMeta;

use crate::error::{ShopError, ShopResult};
use crate::services::payment::{
    Intent, Invoice, InvoiceHandle, PaymentGateway, PaymentMethod, VerifiedEvent,
};
use crate::services::pricing;

/// Telegram Stars. The star amount is fixed when the invoice is
/// issued: the kopecks-per-star rate is pinned into the transaction
/// metadata, so a later rate edit cannot reprice an open invoice. No
/// webhook exists; settlement rides the bot's `successful_payment`
/// update and pre-checkout approval goes through `check_pre_checkout`.
pub struct StarsGateway {
    rate_kop_per_star: i64,
}

impl StarsGateway {
    pub fn new(rate_kop_per_star: i64) -> Self {
        Self { rate_kop_per_star }
    }

    pub fn rate_kop_per_star(&self) -> i64 {
        self.rate_kop_per_star
    }

    pub fn stars_for(&self, amount_kop: i64) -> i64 {
        pricing::rub_to_stars(amount_kop, self.rate_kop_per_star)
    }

    /// Pre-checkout gate: the star total Telegram is about to charge
    /// must match the pinned rate exactly.
    pub fn check_pre_checkout(meta: &PurchaseMeta, total_stars: i64) -> ShopResult<()> {
        let rate = meta
            .stars_rate_kop
            .ok_or_else(|| ShopError::Validation("stars invoice has no pinned rate".into()))?;
        let expected = pricing::rub_to_stars(meta.price_kop, rate);
        if expected != total_stars {
            return Err(ShopError::Validation(format!(
                "stars total {total_stars} does not match expected {expected}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for StarsGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stars
    }

    async fn create_invoice(&self, intent: &Intent) -> ShopResult<Invoice> {
        if self.rate_kop_per_star <= 0 {
            return Err(ShopError::Validation("stars rate is not configured".into()));
        }
        let stars = self.stars_for(intent.meta.price_kop);
        if stars <= 0 {
            return Err(ShopError::Validation("stars amount must be positive".into()));
        }
        Ok(Invoice {
            payment_id: intent.meta.payment_id.clone(),
            handle: InvoiceHandle::StarsInvoice { payload: intent.meta.payment_id.clone(), stars },
            amount_currency: Some(stars as f64),
            currency_name: Some("XTR".into()),
        })
    }

    async fn verify_webhook(&self, _body: &[u8], _headers: &HeaderMap) -> ShopResult<VerifiedEvent> {
        Err(ShopError::Validation(
            "stars payments settle through telegram updates, not webhooks".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use korsar_db::models::Operation;
    use serde_json::Map;

    fn meta(price_kop: i64, rate: Option<i64>) -> PurchaseMeta {
        PurchaseMeta {
            user_id: 1,
            price_kop,
            payment_method: "stars".into(),
            payment_id: "p-1".into(),
            operation: Operation::Topup,
            connection_string: None,
            stars_rate_kop: rate,
            extra: Map::new(),
        }
    }

    #[test]
    fn pre_checkout_uses_pinned_rate() {
        // 150 RUB at pinned 2.50 RUB/star -> 60 stars
        assert!(StarsGateway::check_pre_checkout(&meta(15000, Some(250)), 60).is_ok());
        // Current gateway rate is irrelevant once pinned.
        assert!(StarsGateway::check_pre_checkout(&meta(15000, Some(300)), 60).is_err());
        assert!(StarsGateway::check_pre_checkout(&meta(15000, None), 60).is_err());
    }

    #[tokio::test]
    async fn invoice_rounds_stars_up() {
        let gw = StarsGateway::new(250);
        let intent = Intent {
            meta: meta(15001, None),
            description: "topup".into(),
            customer_email: None,
        };
        let invoice = gw.create_invoice(&intent).await.unwrap();
        match invoice.handle {
            InvoiceHandle::StarsInvoice { stars, .. } => assert_eq!(stars, 61),
            other => panic!("unexpected handle {other:?}"),
        }
    }
}

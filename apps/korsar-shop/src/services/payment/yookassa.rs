use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::json;
use uuid::Uuid;

use crate::error::{ShopError, ShopResult};
use crate::services::payment::{
    EventStatus, Intent, Invoice, InvoiceHandle, PaymentGateway, PaymentMethod, VerifiedEvent,
};
use crate::services::pricing;

const API_BASE: &str = "https://api.yookassa.ru/v3";

/// YooKassa card payments. Invoices are created over the REST API and
/// the provider assigns the payment id. Webhook bodies are not signed,
/// so confirmation is pulled back from the API before anything is
/// trusted.
pub struct YooKassaGateway {
    http: reqwest::Client,
    shop_id: String,
    secret_key: String,
    return_url: String,
}

impl YooKassaGateway {
    pub fn new(shop_id: String, secret_key: String, return_url: String) -> Self {
        Self { http: reqwest::Client::new(), shop_id, secret_key, return_url }
    }

    async fn fetch_payment(&self, payment_id: &str) -> ShopResult<serde_json::Value> {
        let resp = self
            .http
            .get(format!("{API_BASE}/payments/{payment_id}"))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .send()
            .await
            .map_err(|e| ShopError::Provider(format!("yookassa lookup: {e}")))?;
        if !resp.status().is_success() {
            return Err(ShopError::Provider(format!(
                "yookassa lookup status {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| ShopError::Provider(format!("yookassa lookup body: {e}")))
    }
}

#[async_trait]
impl PaymentGateway for YooKassaGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::YooKassa
    }

    async fn create_invoice(&self, intent: &Intent) -> ShopResult<Invoice> {
        let amount = format!("{:.2}", pricing::kop_to_decimal(intent.meta.price_kop));
        let mut body = json!({
            "amount": { "value": amount, "currency": "RUB" },
            "capture": true,
            "confirmation": { "type": "redirect", "return_url": self.return_url },
            "description": intent.description,
            "metadata": { "local_id": intent.meta.payment_id, "user_id": intent.meta.user_id },
        });
        if let Some(email) = &intent.customer_email {
            body["receipt"] = json!({
                "customer": { "email": email },
                "items": [{
                    "description": intent.description,
                    "quantity": "1",
                    "amount": { "value": amount, "currency": "RUB" },
                    "vat_code": 1,
                }],
            });
        }

        let resp = self
            .http
            .post(format!("{API_BASE}/payments"))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| ShopError::Provider(format!("yookassa create: {e}")))?;
        let payment: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ShopError::Provider(format!("yookassa create body: {e}")))?;

        let payment_id = payment["id"]
            .as_str()
            .ok_or_else(|| ShopError::Provider(format!("yookassa refused invoice: {payment}")))?
            .to_string();
        let url = payment["confirmation"]["confirmation_url"]
            .as_str()
            .ok_or_else(|| ShopError::Provider("yookassa invoice has no checkout url".into()))?
            .to_string();

        Ok(Invoice {
            payment_id,
            handle: InvoiceHandle::PayUrl(url),
            amount_currency: None,
            currency_name: Some("RUB".into()),
        })
    }

    async fn verify_webhook(&self, body: &[u8], _headers: &HeaderMap) -> ShopResult<VerifiedEvent> {
        let notification: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ShopError::Validation(format!("yookassa webhook body: {e}")))?;
        let payment_id = notification["object"]["id"]
            .as_str()
            .ok_or_else(|| ShopError::Validation("yookassa webhook has no payment id".into()))?
            .to_string();

        // The notification itself is unauthenticated; the API is the
        // source of truth.
        let payment = self.fetch_payment(&payment_id).await?;
        let status = match payment["status"].as_str() {
            Some("succeeded") => EventStatus::Paid,
            Some("canceled") => EventStatus::Failed,
            _ => EventStatus::Ignored,
        };

        Ok(VerifiedEvent {
            payment_id,
            status,
            tx_hash: None,
            native_amount: None,
            raw: notification,
        })
    }
}

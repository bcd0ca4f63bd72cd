use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::{ShopError, ShopResult};
use crate::services::payment::{
    EventStatus, Intent, Invoice, InvoiceHandle, PaymentGateway, PaymentMethod, VerifiedEvent,
};
use crate::services::pricing;

const API_BASE: &str = "https://pay.crypt.bot/api";
const SIGNATURE_HEADER: &str = "crypto-pay-api-signature";

type HmacSha256 = Hmac<Sha256>;

/// Crypto Bot (@CryptoBot) invoices in fiat mode: the invoice is
/// denominated in rubles and the provider handles the crypto side.
/// Webhooks carry an HMAC-SHA256 of the body keyed with SHA256 of the
/// API token.
pub struct CryptoBotGateway {
    http: reqwest::Client,
    token: String,
    paid_url: String,
}

impl CryptoBotGateway {
    pub fn new(token: String, paid_url: String) -> Self {
        Self { http: reqwest::Client::new(), token, paid_url }
    }

    fn body_signature(&self, body: &[u8]) -> ShopResult<String> {
        let secret = Sha256::digest(self.token.as_bytes());
        let mut mac = HmacSha256::new_from_slice(&secret)
            .map_err(|e| ShopError::Signature(format!("hmac key: {e}")))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl PaymentGateway for CryptoBotGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CryptoBot
    }

    async fn create_invoice(&self, intent: &Intent) -> ShopResult<Invoice> {
        let body = json!({
            "currency_type": "fiat",
            "fiat": "RUB",
            "amount": format!("{:.2}", pricing::kop_to_decimal(intent.meta.price_kop)),
            "description": intent.description,
            "payload": intent.meta.payment_id,
            "paid_btn_name": "callback",
            "paid_btn_url": self.paid_url,
        });

        let resp = self
            .http
            .post(format!("{API_BASE}/createInvoice"))
            .header("Crypto-Pay-API-Token", &self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ShopError::Provider(format!("cryptobot create: {e}")))?;
        let reply: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ShopError::Provider(format!("cryptobot create body: {e}")))?;

        let url = reply["result"]["bot_invoice_url"]
            .as_str()
            .or_else(|| reply["result"]["pay_url"].as_str())
            .ok_or_else(|| ShopError::Provider(format!("cryptobot refused invoice: {reply}")))?
            .to_string();

        Ok(Invoice {
            payment_id: intent.meta.payment_id.clone(),
            handle: InvoiceHandle::PayUrl(url),
            amount_currency: None,
            currency_name: Some("RUB".into()),
        })
    }

    async fn verify_webhook(&self, body: &[u8], headers: &HeaderMap) -> ShopResult<VerifiedEvent> {
        let presented = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ShopError::Signature("missing cryptobot signature".into()))?;
        let expected = self.body_signature(body)?;
        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            return Err(ShopError::Signature("cryptobot signature mismatch".into()));
        }

        let update: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ShopError::Validation(format!("cryptobot webhook body: {e}")))?;
        let status = match update["update_type"].as_str() {
            Some("invoice_paid") => EventStatus::Paid,
            _ => EventStatus::Ignored,
        };
        let payment_id = update["payload"]["payload"]
            .as_str()
            .ok_or_else(|| ShopError::Validation("cryptobot webhook has no payload".into()))?
            .to_string();
        let native_amount = update["payload"]["paid_amount"]
            .as_str()
            .and_then(|v| v.parse::<f64>().ok());

        Ok(VerifiedEvent { payment_id, status, tx_hash: None, native_amount, raw: update })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hmac_over_body_with_hashed_token() {
        let gw = CryptoBotGateway::new("12345:TESTTOKEN".into(), "https://t.me/shop".into());
        let body = br#"{"update_type":"invoice_paid"}"#;

        let secret = Sha256::digest(b"12345:TESTTOKEN");
        let mut mac = HmacSha256::new_from_slice(&secret).unwrap();
        mac.update(body);
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(gw.body_signature(body).unwrap(), expected);
    }

    #[tokio::test]
    async fn unsigned_webhook_is_rejected() {
        let gw = CryptoBotGateway::new("t".into(), "https://t.me/shop".into());
        let err = gw
            .verify_webhook(b"{}", &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::Signature(_)));
    }

    #[tokio::test]
    async fn signed_paid_update_verifies() {
        let gw = CryptoBotGateway::new("tok".into(), "https://t.me/shop".into());
        let body = serde_json::to_vec(&json!({
            "update_type": "invoice_paid",
            "payload": { "payload": "local-42", "paid_amount": "3.21" }
        }))
        .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            gw.body_signature(&body).unwrap().parse().unwrap(),
        );

        let event = gw.verify_webhook(&body, &headers).await.unwrap();
        assert_eq!(event.payment_id, "local-42");
        assert_eq!(event.status, EventStatus::Paid);
        assert_eq!(event.native_amount, Some(3.21));
    }
}

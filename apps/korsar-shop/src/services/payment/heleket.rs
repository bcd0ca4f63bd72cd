use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use crate::error::{ShopError, ShopResult};
use crate::services::payment::{
    EventStatus, Intent, Invoice, InvoiceHandle, PaymentGateway, PaymentMethod, VerifiedEvent,
};
use crate::services::pricing;

const API_BASE: &str = "https://api.heleket.com/v1";

/// Heleket crypto payments, Cryptomus-compatible API. Requests and
/// webhooks share one signature scheme: MD5 over base64 of the JSON
/// payload concatenated with the API key. Webhook payloads carry the
/// signature inside the body under `sign`.
pub struct HeleketGateway {
    http: reqwest::Client,
    merchant_id: String,
    api_key: String,
    callback_url: String,
    return_url: String,
    usd_rub_rate: f64,
    fx_margin_percent: f64,
}

impl HeleketGateway {
    pub fn new(
        merchant_id: String,
        api_key: String,
        callback_url: String,
        return_url: String,
        usd_rub_rate: f64,
        fx_margin_percent: f64,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            merchant_id,
            api_key,
            callback_url,
            return_url,
            usd_rub_rate,
            fx_margin_percent,
        }
    }

    fn sign(&self, payload: &str) -> String {
        let encoded = STANDARD.encode(payload);
        format!("{:x}", md5::compute(format!("{encoded}{}", self.api_key).as_bytes()))
    }

    /// Webhook signature: `sign` is removed from the body and the rest
    /// is re-encoded with sorted keys before hashing.
    fn verify_body(&self, body: &[u8]) -> ShopResult<serde_json::Value> {
        let mut payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ShopError::Validation(format!("heleket webhook body: {e}")))?;
        let presented = payload
            .as_object_mut()
            .and_then(|map| map.remove("sign"))
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| ShopError::Signature("missing heleket sign".into()))?;

        // serde_json orders map keys, giving a canonical encoding.
        let canonical = serde_json::to_string(&payload)
            .map_err(|e| ShopError::Validation(format!("heleket canonicalize: {e}")))?;
        let expected = self.sign(&canonical);
        if presented != expected {
            return Err(ShopError::Signature("heleket signature mismatch".into()));
        }
        Ok(payload)
    }
}

#[async_trait]
impl PaymentGateway for HeleketGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Heleket
    }

    async fn create_invoice(&self, intent: &Intent) -> ShopResult<Invoice> {
        let amount_usd = pricing::rub_to_foreign(
            intent.meta.price_kop,
            self.usd_rub_rate,
            self.fx_margin_percent,
            2,
        );
        if amount_usd <= 0.0 {
            return Err(ShopError::Validation("heleket amount must be positive".into()));
        }

        let body = json!({
            "amount": format!("{amount_usd:.2}"),
            "currency": "USD",
            "order_id": intent.meta.payment_id,
            "url_callback": self.callback_url,
            "url_return": self.return_url,
        });
        let body_str = serde_json::to_string(&body)
            .map_err(|e| ShopError::Provider(format!("heleket encode: {e}")))?;

        let resp = self
            .http
            .post(format!("{API_BASE}/payment"))
            .header("merchant", &self.merchant_id)
            .header("sign", self.sign(&body_str))
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await
            .map_err(|e| ShopError::Provider(format!("heleket create: {e}")))?;
        let reply: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ShopError::Provider(format!("heleket create body: {e}")))?;

        let url = reply["result"]["url"]
            .as_str()
            .ok_or_else(|| ShopError::Provider(format!("heleket refused invoice: {reply}")))?
            .to_string();

        Ok(Invoice {
            payment_id: intent.meta.payment_id.clone(),
            handle: InvoiceHandle::PayUrl(url),
            amount_currency: Some(amount_usd),
            currency_name: Some("USD".into()),
        })
    }

    async fn verify_webhook(&self, body: &[u8], _headers: &HeaderMap) -> ShopResult<VerifiedEvent> {
        let payload = self.verify_body(body)?;

        let payment_id = payload["order_id"]
            .as_str()
            .ok_or_else(|| ShopError::Validation("heleket webhook has no order_id".into()))?
            .to_string();
        let status = match payload["status"].as_str() {
            Some("paid") | Some("paid_over") => EventStatus::Paid,
            Some("cancel") | Some("fail") | Some("system_fail") => EventStatus::Failed,
            _ => EventStatus::Ignored,
        };
        let tx_hash = payload["txid"].as_str().map(str::to_string);
        let native_amount = payload["payment_amount"]
            .as_str()
            .and_then(|v| v.parse::<f64>().ok());

        Ok(VerifiedEvent { payment_id, status, tx_hash, native_amount, raw: payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> HeleketGateway {
        HeleketGateway::new(
            "merchant-1".into(),
            "apikey".into(),
            "https://shop.example.org/heleket-webhook".into(),
            "https://t.me/shop".into(),
            80.0,
            2.0,
        )
    }

    fn signed_body(gw: &HeleketGateway, mut payload: serde_json::Value) -> Vec<u8> {
        let canonical = serde_json::to_string(&payload).unwrap();
        let sign = gw.sign(&canonical);
        payload["sign"] = json!(sign);
        serde_json::to_vec(&payload).unwrap()
    }

    #[test]
    fn sign_is_md5_of_base64_plus_key() {
        let gw = gateway();
        let payload = r#"{"a":"b"}"#;
        let expected = format!(
            "{:x}",
            md5::compute(format!("{}apikey", STANDARD.encode(payload)).as_bytes())
        );
        assert_eq!(gw.sign(payload), expected);
    }

    #[tokio::test]
    async fn paid_webhook_round_trips() {
        let gw = gateway();
        let body = signed_body(
            &gw,
            json!({
                "order_id": "local-7",
                "status": "paid",
                "txid": "0xabc",
                "payment_amount": "10.20"
            }),
        );

        let event = gw.verify_webhook(&body, &HeaderMap::new()).await.unwrap();
        assert_eq!(event.payment_id, "local-7");
        assert_eq!(event.status, EventStatus::Paid);
        assert_eq!(event.tx_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn tampered_body_fails_verification() {
        let gw = gateway();
        let mut body = signed_body(&gw, json!({ "order_id": "local-7", "status": "paid" }));
        let idx = body.windows(7).position(|w| w == b"local-7").unwrap();
        body[idx + 6] = b'8';

        let err = gw.verify_webhook(&body, &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, ShopError::Signature(_)));
    }
}

use async_trait::async_trait;
use axum::http::HeaderMap;
use korsar_db::models::PurchaseMeta;

use crate::error::ShopResult;

pub mod cryptobot;
pub mod heleket;
pub mod stars;
pub mod tonconnect;
pub mod yookassa;

/// Funding source for one payment attempt. `Balance` never leaves the
/// process and `Free` marks zero-price checkouts; neither has a
/// gateway behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentMethod {
    YooKassa,
    CryptoBot,
    Heleket,
    Ton,
    Stars,
    Balance,
    Free,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YooKassa => "yookassa",
            Self::CryptoBot => "cryptobot",
            Self::Heleket => "heleket",
            Self::Ton => "ton",
            Self::Stars => "stars",
            Self::Balance => "balance",
            Self::Free => "free",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "yookassa" => Some(Self::YooKassa),
            "cryptobot" => Some(Self::CryptoBot),
            "heleket" => Some(Self::Heleket),
            "ton" => Some(Self::Ton),
            "stars" => Some(Self::Stars),
            "balance" => Some(Self::Balance),
            "free" => Some(Self::Free),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator hands a gateway when asking for an invoice.
/// `meta.payment_id` holds a locally generated id; providers that
/// assign their own id return it in `Invoice::payment_id` and the
/// orchestrator persists that one.
#[derive(Debug, Clone)]
pub struct Intent {
    pub meta: PurchaseMeta,
    pub description: String,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Invoice {
    pub payment_id: String,
    pub handle: InvoiceHandle,
    /// Amount in the provider's currency, when not rubles.
    pub amount_currency: Option<f64>,
    pub currency_name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum InvoiceHandle {
    /// Browser checkout page.
    PayUrl(String),
    /// `ton://transfer/...` deep link.
    TransferLink(String),
    /// Native Telegram invoice the UI layer sends itself.
    StarsInvoice { payload: String, stars: i64 },
}

impl InvoiceHandle {
    pub fn pay_url(&self) -> Option<&str> {
        match self {
            Self::PayUrl(url) | Self::TransferLink(url) => Some(url),
            Self::StarsInvoice { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Paid,
    Failed,
    /// Anything the shop should acknowledge but not act on.
    Ignored,
}

/// Outcome of webhook verification: the provider's word, authenticated
/// but not yet reconciled against the ledger.
#[derive(Debug, Clone)]
pub struct VerifiedEvent {
    pub payment_id: String,
    pub status: EventStatus,
    pub tx_hash: Option<String>,
    pub native_amount: Option<f64>,
    /// Full provider payload, kept verbatim for the audit trail.
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn create_invoice(&self, intent: &Intent) -> ShopResult<Invoice>;

    /// Authenticates a raw webhook body. Implementations must reject
    /// anything unsigned or mis-signed before touching the payload.
    async fn verify_webhook(&self, body: &[u8], headers: &HeaderMap) -> ShopResult<VerifiedEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip() {
        for m in [
            PaymentMethod::YooKassa,
            PaymentMethod::CryptoBot,
            PaymentMethod::Heleket,
            PaymentMethod::Ton,
            PaymentMethod::Stars,
            PaymentMethod::Balance,
            PaymentMethod::Free,
        ] {
            assert_eq!(PaymentMethod::parse(m.as_str()), Some(m));
        }
        assert_eq!(PaymentMethod::parse("paypal"), None);
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generic 3x-ui API envelope.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    pub obj: Option<T>,
}

/// Inbound as returned by `/panel/api/inbounds/get/{id}`. The settings
/// and stream settings arrive as JSON-encoded strings.
#[derive(Debug, Deserialize)]
pub struct Inbound {
    pub id: i64,
    pub port: u16,
    #[serde(default)]
    pub remark: String,
    pub protocol: String,
    pub settings: String,
    #[serde(rename = "streamSettings")]
    pub stream_settings: String,
}

#[derive(Debug, Deserialize)]
pub struct InboundSettings {
    #[serde(default)]
    pub clients: Vec<InboundClient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundClient {
    pub id: Uuid,
    pub email: String,
    #[serde(default, rename = "expiryTime")]
    pub expiry_time: i64,
    #[serde(default)]
    pub enable: bool,
    #[serde(default, rename = "totalGB")]
    pub total_gb: i64,
    #[serde(default)]
    pub flow: String,
    #[serde(default, rename = "tgId")]
    pub tg_id: serde_json::Value,
    #[serde(default, rename = "subId")]
    pub sub_id: String,
}

/// Stream settings, Reality transport only.
#[derive(Debug, Deserialize)]
pub struct StreamSettings {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub security: String,
    #[serde(default, rename = "realitySettings")]
    pub reality_settings: Option<RealitySettings>,
}

#[derive(Debug, Deserialize)]
pub struct RealitySettings {
    #[serde(default, rename = "serverNames")]
    pub server_names: Vec<String>,
    #[serde(default, rename = "shortIds")]
    pub short_ids: Vec<String>,
    #[serde(default)]
    pub settings: Option<RealityInnerSettings>,
}

#[derive(Debug, Deserialize)]
pub struct RealityInnerSettings {
    #[serde(default, rename = "publicKey")]
    pub public_key: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default, rename = "spiderX")]
    pub spider_x: String,
}

/// Per-client traffic counters from `getClientTraffics`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientTraffic {
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default, rename = "expiryTime")]
    pub expiry_time: i64,
    #[serde(default)]
    pub enable: bool,
}

/// Result of a create-or-extend call: what the settle pipeline needs
/// to persist the key.
#[derive(Debug, Clone)]
pub struct ProvisionedClient {
    pub client_uuid: Uuid,
    pub email: String,
    /// Epoch milliseconds, panel convention.
    pub expiry_time_ms: i64,
    pub connection_string: Option<String>,
}

/// Read-only view of a client as the panel sees it.
#[derive(Debug, Clone)]
pub struct PanelClientView {
    pub client_uuid: Uuid,
    pub email: String,
    pub expiry_time_ms: i64,
    pub enable: bool,
    pub total_gb: i64,
}

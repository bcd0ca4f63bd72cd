use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::error::{ShopError, ShopResult};
use crate::xui::types::{
    ApiEnvelope, ClientTraffic, Inbound, InboundClient, InboundSettings, PanelClientView,
    ProvisionedClient, StreamSettings,
};

const MS_PER_DAY: f64 = 86_400_000.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Session-holding client for one 3x-ui panel. Login is lazy and the
/// cookie is kept in the reqwest jar; any API call that comes back as
/// the login page triggers a single re-login and retry.
pub struct XuiClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    inbound_id: i64,
    logged_in: Mutex<bool>,
}

impl XuiClient {
    pub fn new(base_url: &str, username: &str, password: &str, inbound_id: i64) -> ShopResult<Arc<Self>> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(20))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ShopError::Panel(format!("http client: {e}")))?;
        Ok(Arc::new(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            inbound_id,
            logged_in: Mutex::new(false),
        }))
    }

    async fn login(&self) -> ShopResult<()> {
        let resp = self
            .http
            .post(format!("{}/login", self.base_url))
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(|e| ShopError::Panel(format!("panel login: {e}")))?;
        let env: ApiEnvelope<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| ShopError::Panel(format!("panel login response: {e}")))?;
        if !env.success {
            return Err(ShopError::Panel(format!("panel login rejected: {}", env.msg)));
        }
        *self.logged_in.lock().await = true;
        Ok(())
    }

    async fn ensure_login(&self) -> ShopResult<()> {
        if *self.logged_in.lock().await {
            return Ok(());
        }
        self.login().await
    }

    /// Runs one API request, re-authenticating once when the session
    /// cookie has expired (the panel answers with HTML in that case).
    async fn api<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ShopResult<ApiEnvelope<T>> {
        self.ensure_login().await?;
        for attempt in 0..2 {
            let text = self.request_text(&method, path, body.as_ref()).await?;
            match serde_json::from_str::<ApiEnvelope<T>>(&text) {
                Ok(env) => return Ok(env),
                Err(_) if attempt == 0 => {
                    // Session likely expired.
                    self.login().await?;
                }
                Err(e) => {
                    return Err(ShopError::Panel(format!("panel response {path}: {e}")));
                }
            }
        }
        unreachable!("login retry loop always returns")
    }

    /// One request with two retries on transport errors, doubling the
    /// delay between attempts.
    async fn request_text(
        &self,
        method: &reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ShopResult<String> {
        let mut delay = Duration::from_millis(500);
        for attempt in 0..3 {
            let mut req = self
                .http
                .request(method.clone(), format!("{}{}", self.base_url, path));
            if let Some(body) = body {
                req = req.json(body);
            }
            match req.send().await {
                Ok(resp) => {
                    return resp
                        .text()
                        .await
                        .map_err(|e| ShopError::Panel(format!("panel response {path}: {e}")));
                }
                Err(err) if attempt < 2 => {
                    tracing::debug!(path, attempt, error = %err, "panel request retried");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    return Err(ShopError::Panel(format!("panel request {path}: {err}")));
                }
            }
        }
        unreachable!("transport retry loop always returns")
    }

    async fn get_inbound(&self) -> ShopResult<Inbound> {
        let env: ApiEnvelope<Inbound> = self
            .api(
                reqwest::Method::GET,
                &format!("/panel/api/inbounds/get/{}", self.inbound_id),
                None,
            )
            .await?;
        match (env.success, env.obj) {
            (true, Some(inbound)) => Ok(inbound),
            _ => Err(ShopError::Panel(format!(
                "inbound {} not readable: {}",
                self.inbound_id, env.msg
            ))),
        }
    }

    fn parse_clients(inbound: &Inbound) -> ShopResult<Vec<InboundClient>> {
        let settings: InboundSettings = serde_json::from_str(&inbound.settings)
            .map_err(|e| ShopError::Panel(format!("inbound settings: {e}")))?;
        Ok(settings.clients)
    }

    pub async fn find_client(&self, email: &str) -> ShopResult<Option<PanelClientView>> {
        let inbound = self.get_inbound().await?;
        let client = Self::parse_clients(&inbound)?
            .into_iter()
            .find(|c| c.email == email)
            .map(|c| PanelClientView {
                client_uuid: c.id,
                email: c.email,
                expiry_time_ms: c.expiry_time,
                enable: c.enable,
                total_gb: c.total_gb,
            });
        Ok(client)
    }

    pub async fn list_clients(&self) -> ShopResult<Vec<PanelClientView>> {
        let inbound = self.get_inbound().await?;
        Ok(Self::parse_clients(&inbound)?
            .into_iter()
            .map(|c| PanelClientView {
                client_uuid: c.id,
                email: c.email,
                expiry_time_ms: c.expiry_time,
                enable: c.enable,
                total_gb: c.total_gb,
            })
            .collect())
    }

    /// Create-or-extend, keyed by email. A new client starts counting
    /// from now; an existing one extends from whichever is later, now
    /// or its current expiry, so remaining paid time is never lost.
    pub async fn create_or_extend_client(
        &self,
        email: &str,
        days_to_add: f64,
        traffic_gb: f64,
        tg_chat_id: i64,
    ) -> ShopResult<ProvisionedClient> {
        let inbound = self.get_inbound().await?;
        let existing = Self::parse_clients(&inbound)?
            .into_iter()
            .find(|c| c.email == email);

        let now_ms = Utc::now().timestamp_millis();
        let add_ms = (days_to_add * MS_PER_DAY) as i64;
        let total_bytes = if traffic_gb > 0.0 {
            (traffic_gb * BYTES_PER_GB) as i64
        } else {
            0
        };

        let (client_uuid, expiry_ms) = match &existing {
            Some(client) => (client.id, client.expiry_time.max(now_ms) + add_ms),
            None => (Uuid::new_v4(), now_ms + add_ms),
        };

        let client_json = json!({
            "id": client_uuid,
            "email": email,
            "enable": true,
            "flow": "xtls-rprx-vision",
            "expiryTime": expiry_ms,
            "totalGB": total_bytes,
            "tgId": tg_chat_id.to_string(),
            "subId": "",
            "limitIp": 0,
        });
        let settings = json!({ "clients": [client_json] }).to_string();

        let env: ApiEnvelope<serde_json::Value> = if existing.is_some() {
            self.api(
                reqwest::Method::POST,
                &format!("/panel/api/inbounds/updateClient/{client_uuid}"),
                Some(json!({ "id": self.inbound_id, "settings": settings })),
            )
            .await?
        } else {
            self.api(
                reqwest::Method::POST,
                "/panel/api/inbounds/addClient",
                Some(json!({ "id": self.inbound_id, "settings": settings })),
            )
            .await?
        };
        if !env.success {
            return Err(ShopError::Panel(format!("client upsert rejected: {}", env.msg)));
        }

        let connection_string = self.build_connection_string(&inbound, client_uuid, email).ok();
        Ok(ProvisionedClient {
            client_uuid,
            email: email.to_string(),
            expiry_time_ms: expiry_ms,
            connection_string,
        })
    }

    pub async fn delete_client(&self, client_uuid: Uuid) -> ShopResult<bool> {
        let env: ApiEnvelope<serde_json::Value> = self
            .api(
                reqwest::Method::POST,
                &format!("/panel/api/inbounds/{}/delClient/{client_uuid}", self.inbound_id),
                Some(json!({})),
            )
            .await?;
        Ok(env.success)
    }

    pub async fn client_traffic(&self, email: &str) -> ShopResult<Option<ClientTraffic>> {
        let env: ApiEnvelope<ClientTraffic> = self
            .api(
                reqwest::Method::GET,
                &format!("/panel/api/inbounds/getClientTraffics/{email}"),
                None,
            )
            .await?;
        if !env.success {
            return Err(ShopError::Panel(format!("traffic lookup: {}", env.msg)));
        }
        Ok(env.obj)
    }

    /// VLESS Reality URI assembled from the inbound's stream settings.
    fn build_connection_string(
        &self,
        inbound: &Inbound,
        client_uuid: Uuid,
        email: &str,
    ) -> ShopResult<String> {
        let stream: StreamSettings = serde_json::from_str(&inbound.stream_settings)
            .map_err(|e| ShopError::Panel(format!("stream settings: {e}")))?;
        if stream.security != "reality" {
            return Err(ShopError::Panel(format!(
                "unsupported security mode {:?}",
                stream.security
            )));
        }
        let reality = stream
            .reality_settings
            .as_ref()
            .ok_or_else(|| ShopError::Panel("missing reality settings".into()))?;
        let inner = reality
            .settings
            .as_ref()
            .ok_or_else(|| ShopError::Panel("missing reality key settings".into()))?;

        let server = Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| ShopError::Panel("panel url has no host".into()))?;
        let sni = reality.server_names.first().cloned().unwrap_or_default();
        let sid = reality.short_ids.first().cloned().unwrap_or_default();
        let spx = if inner.spider_x.is_empty() { "/" } else { &inner.spider_x };
        let fp = if inner.fingerprint.is_empty() { "chrome" } else { &inner.fingerprint };

        let remark = if inbound.remark.is_empty() {
            email.to_string()
        } else {
            format!("{}-{}", inbound.remark, email)
        };

        Ok(format!(
            "vless://{client_uuid}@{server}:{port}?type={net}&security=reality&pbk={pbk}&fp={fp}&sni={sni}&sid={sid}&spx={spx}&flow=xtls-rprx-vision#{remark}",
            port = inbound.port,
            net = if stream.network.is_empty() { "tcp" } else { &stream.network },
            pbk = inner.public_key,
            spx = urlencoding::encode(spx),
            remark = urlencoding::encode(&remark),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reality_inbound() -> Inbound {
        Inbound {
            id: 1,
            port: 443,
            remark: "korsar".into(),
            protocol: "vless".into(),
            settings: r#"{"clients":[]}"#.into(),
            stream_settings: serde_json::json!({
                "network": "tcp",
                "security": "reality",
                "realitySettings": {
                    "serverNames": ["cdn.example.org"],
                    "shortIds": ["ab12"],
                    "settings": {
                        "publicKey": "PBK",
                        "fingerprint": "chrome",
                        "spiderX": "/"
                    }
                }
            })
            .to_string(),
        }
    }

    #[test]
    fn reality_uri_contains_transport_params() {
        let client = XuiClient::new("https://panel.example.org:2053/path", "u", "p", 1).unwrap();
        let uuid = Uuid::new_v4();
        let uri = client
            .build_connection_string(&reality_inbound(), uuid, "user1-key1@nl1.bot")
            .unwrap();

        assert!(uri.starts_with(&format!("vless://{uuid}@panel.example.org:443?")));
        assert!(uri.contains("security=reality"));
        assert!(uri.contains("pbk=PBK"));
        assert!(uri.contains("sni=cdn.example.org"));
        assert!(uri.contains("sid=ab12"));
        assert!(uri.contains("spx=%2F"));
        assert!(uri.contains("flow=xtls-rprx-vision"));
        assert!(uri.ends_with(&format!("#{}", urlencoding::encode("korsar-user1-key1@nl1.bot"))));
    }

    #[test]
    fn extension_keeps_remaining_time() {
        let now_ms = Utc::now().timestamp_millis();
        let future = now_ms + 5 * 86_400_000;
        let past = now_ms - 3 * 86_400_000;
        // Existing expiry in the future extends from it.
        assert_eq!(future.max(now_ms), future);
        // Lapsed keys extend from now instead of the past.
        assert_eq!(past.max(now_ms), now_ms);
    }
}

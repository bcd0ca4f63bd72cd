use std::collections::HashMap;
use std::sync::Arc;

use korsar_db::models::Host;
use tokio::sync::RwLock;

use crate::error::ShopResult;
use crate::xui::XuiClient;

/// Cache of panel clients keyed by host name. Sessions survive across
/// calls; an edited host gets a fresh client via `invalidate`.
#[derive(Default)]
pub struct PanelRegistry {
    clients: RwLock<HashMap<String, Arc<XuiClient>>>,
}

impl PanelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn for_host(&self, host: &Host) -> ShopResult<Arc<XuiClient>> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&host.host_name) {
                return Ok(client.clone());
            }
        }
        let client = XuiClient::new(
            &host.host_url,
            &host.host_username,
            &host.host_pass,
            host.host_inbound_id,
        )?;
        self.clients
            .write()
            .await
            .insert(host.host_name.clone(), client.clone());
        Ok(client)
    }

    pub async fn invalidate(&self, host_name: &str) {
        self.clients.write().await.remove(host_name);
    }
}

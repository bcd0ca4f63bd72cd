use std::sync::Arc;

use chrono::{Duration, Utc};
use korsar_db::Store;

use crate::error::ShopResult;
use crate::xui::PanelRegistry;

/// How long an unknown client may sit expired on a panel before the
/// sync pass removes it.
const ORPHAN_GRACE_DAYS: i64 = 5;

/// Reconciles panels against the database. Clients that carry the
/// shop's email format but have no key row are leftovers from manual
/// deletions; they are removed once they are both expired and older
/// than the grace window, so a half-finished settle never loses a
/// freshly provisioned client.
pub struct PanelSync {
    store: Store,
    panels: Arc<PanelRegistry>,
}

impl PanelSync {
    pub fn new(store: Store, panels: Arc<PanelRegistry>) -> Self {
        Self { store, panels }
    }

    pub async fn run_once(&self) -> ShopResult<u64> {
        let mut removed = 0;
        for host in self.store.hosts.get_all().await? {
            match self.sync_host(&host.host_name, &host.host_code).await {
                Ok(n) => removed += n,
                Err(err) => {
                    tracing::warn!(host = %host.host_name, error = %err, "panel sync failed");
                }
            }
        }
        Ok(removed)
    }

    async fn sync_host(&self, host_name: &str, host_code: &str) -> ShopResult<u64> {
        let Some(host) = self.store.hosts.get(host_name).await? else {
            return Ok(0);
        };
        let panel = self.panels.for_host(&host).await?;
        let clients = panel.list_clients().await?;
        let known: std::collections::HashSet<String> = self
            .store
            .keys
            .get_for_host(host_name)
            .await?
            .into_iter()
            .map(|k| k.key_email)
            .collect();

        let cutoff_ms = (Utc::now() - Duration::days(ORPHAN_GRACE_DAYS)).timestamp_millis();
        let mut removed = 0;
        for client in clients {
            if known.contains(&client.email) || !is_shop_email(&client.email, host_code) {
                continue;
            }
            if client.expiry_time_ms == 0 || client.expiry_time_ms > cutoff_ms {
                continue;
            }
            tracing::info!(host = host_name, email = %client.email, "removing orphaned panel client");
            if panel.delete_client(client.client_uuid).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Matches `user{digits}-key{digits}[-trial]@{host_code}.bot`.
fn is_shop_email(email: &str, host_code: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if domain != format!("{host_code}.bot") {
        return false;
    }
    let local = local.strip_suffix("-trial").unwrap_or(local);
    let Some(rest) = local.strip_prefix("user") else {
        return false;
    };
    let Some((chat, key)) = rest.split_once("-key") else {
        return false;
    };
    !chat.is_empty()
        && !key.is_empty()
        && chat.bytes().all(|b| b.is_ascii_digit())
        && key.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shop_email_detection() {
        assert!(is_shop_email("user123-key4@nl1.bot", "nl1"));
        assert!(is_shop_email("user123-key1-trial@nl1.bot", "nl1"));
        assert!(!is_shop_email("user123-key4@nl2.bot", "nl1"));
        assert!(!is_shop_email("admin@nl1.bot", "nl1"));
        assert!(!is_shop_email("userX-keyY@nl1.bot", "nl1"));
        assert!(!is_shop_email("user123-key4", "nl1"));
    }
}

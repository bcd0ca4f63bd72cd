use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use korsar_db::Store;
use korsar_db::repositories::KeyWithOwner;
use tokio::sync::watch;

use crate::config::keys as setting;
use crate::error::ShopError;
use crate::services::notify::Notifier;
use crate::services::orchestrator::PurchaseOrchestrator;
use crate::services::sync::PanelSync;
use crate::xui::PanelRegistry;

/// Reminder markers, hours before expiry, used when the admin has not
/// configured a list. A key that slips past a marker between ticks
/// still gets exactly one message: the smallest marker not yet passed
/// is picked and deduplicated per (key, marker).
const DEFAULT_MARKERS: [i32; 4] = [1, 24, 48, 72];

const TRAFFIC_EVERY_N_TICKS: u64 = 5;
const SYNC_EVERY_N_TICKS: u64 = 30;

pub struct LifecycleScheduler {
    store: Store,
    panels: Arc<PanelRegistry>,
    notifier: Arc<Notifier>,
    orchestrator: Arc<PurchaseOrchestrator>,
    sync: PanelSync,
    tick: Duration,
}

impl LifecycleScheduler {
    pub fn new(
        store: Store,
        panels: Arc<PanelRegistry>,
        notifier: Arc<Notifier>,
        orchestrator: Arc<PurchaseOrchestrator>,
        tick: Duration,
    ) -> Self {
        let sync = PanelSync::new(store.clone(), panels.clone());
        Self { store, panels, notifier, orchestrator, sync, tick }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(tick_secs = self.tick.as_secs(), "lifecycle scheduler started");
        let mut tick_no: u64 = 0;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = shutdown.changed() => {
                    tracing::info!("lifecycle scheduler stopping");
                    return;
                }
            }
            tick_no += 1;
            if let Err(err) = self.tick_once(tick_no).await {
                tracing::error!(error = %err, "scheduler tick failed");
            }
        }
    }

    async fn tick_once(&self, tick_no: u64) -> crate::error::ShopResult<()> {
        // Renewals first: a lapsed key whose owner can pay is extended
        // before the sweep would flip it and before anyone is told it
        // died. Retried every tick, so a top-up after expiry still
        // rescues the key.
        self.auto_renewals().await;

        // Pre-expiry reminders for keys still running.
        self.reminders().await;

        // Then the remaining expiries flip to their terminal status.
        let expired = self.store.keys.sweep_expired(Utc::now()).await?;
        for key in &expired {
            self.notifier.key_expired(key).await;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "keys expired this tick");
        }

        self.store.keys.refresh_remaining_seconds(Utc::now()).await?;

        if tick_no % TRAFFIC_EVERY_N_TICKS == 0 {
            self.refresh_traffic().await;
        }
        if tick_no % SYNC_EVERY_N_TICKS == 0 {
            match self.sync.run_once().await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "orphaned panel clients deleted");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "panel sync pass failed"),
            }
        }
        Ok(())
    }

    /// One renewal attempt per lapsed key per tick. Not gated by the
    /// reminder markers: those dedup messages, never money movement.
    async fn auto_renewals(&self) {
        let candidates = match self.store.keys.list_renewal_candidates(Utc::now()).await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::error!(error = %err, "renewal candidate listing failed");
                return;
            }
        };

        for entry in candidates {
            if !eligible_for_renewal(&entry) {
                continue;
            }
            let key = &entry.key;
            let plan = match self.renewal_plan(key).await {
                Ok(Some(plan)) => plan,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(key_id = key.key_id, error = %err, "renewal plan lookup failed");
                    continue;
                }
            };
            if entry.owner_balance < plan.price {
                // Marker 0 is the post-expiry slot: one notice per key.
                if let Err(err) = self
                    .notifier
                    .low_balance_for_renewal(key, 0, plan.price, entry.owner_balance)
                    .await
                {
                    tracing::warn!(key_id = key.key_id, error = %err, "low-balance notice failed");
                }
                continue;
            }
            match self.orchestrator.auto_renew(key, &plan).await {
                Ok(_) => {
                    tracing::info!(key_id = key.key_id, "key auto-renewed from balance");
                }
                // Lost a race against a spend; next tick retries.
                Err(ShopError::InsufficientFunds) => {}
                Err(err) => {
                    tracing::warn!(key_id = key.key_id, error = %err, "auto-renew failed");
                }
            }
        }
    }

    async fn reminders(&self) {
        let keys = match self.store.keys.list_active_with_owner(Utc::now()).await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::error!(error = %err, "active key listing failed");
                return;
            }
        };
        let markers = self.reminder_markers().await;

        for entry in keys {
            if entry.owner_banned {
                continue;
            }
            if let Err(err) = self.process_key(&entry, &markers).await {
                tracing::warn!(key_id = entry.key.key_id, error = %err, "key lifecycle step failed");
            }
        }
    }

    /// Admin-configured reminder hours, e.g. "72,24,2".
    async fn reminder_markers(&self) -> Vec<i32> {
        match self.store.settings.get(setting::NOTIFY_MARKERS).await {
            Ok(Some(raw)) => {
                let markers = parse_markers(&raw);
                if markers.is_empty() { DEFAULT_MARKERS.to_vec() } else { markers }
            }
            Ok(None) => DEFAULT_MARKERS.to_vec(),
            Err(err) => {
                tracing::warn!(error = %err, "marker setting unreadable, using defaults");
                DEFAULT_MARKERS.to_vec()
            }
        }
    }

    async fn process_key(&self, entry: &KeyWithOwner, markers: &[i32]) -> crate::error::ShopResult<()> {
        let key = &entry.key;
        let hours_left = hours_until(key.expiry_date.timestamp(), Utc::now().timestamp());
        let Some(marker) = pick_marker(hours_left, markers) else {
            return Ok(());
        };
        if self.store.notifications.was_sent(key.key_id, marker).await? {
            return Ok(());
        }

        if eligible_for_renewal(entry) {
            if let Some(plan) = self.renewal_plan(key).await? {
                if entry.owner_balance >= plan.price {
                    // The renewal pass will extend this key at expiry;
                    // warning about it now would only confuse.
                    return Ok(());
                }
                self.notifier
                    .low_balance_for_renewal(key, marker, plan.price, entry.owner_balance)
                    .await?;
                return Ok(());
            }
        }

        self.notifier.expiry_warning(key, marker).await?;
        Ok(())
    }

    /// Plan used for an automatic extension: the plan the key was
    /// bought with if it still exists, the cheapest one on the host
    /// otherwise.
    async fn renewal_plan(&self, key: &korsar_db::models::Key) -> crate::error::ShopResult<Option<korsar_db::models::Plan>> {
        let plans = self.store.plans.get_for_host(&key.host_name).await?;
        if let Some(name) = &key.plan_name {
            if let Some(plan) = plans.iter().find(|p| &p.plan_name == name && p.price > 0) {
                return Ok(Some(plan.clone()));
            }
        }
        Ok(self.store.plans.cheapest_for_host(&key.host_name).await?)
    }

    async fn refresh_traffic(&self) {
        let hosts = match self.store.hosts.get_all().await {
            Ok(hosts) => hosts,
            Err(err) => {
                tracing::error!(error = %err, "host listing failed");
                return;
            }
        };
        for host in hosts {
            let panel = match self.panels.for_host(&host).await {
                Ok(panel) => panel,
                Err(err) => {
                    tracing::warn!(host = %host.host_name, error = %err, "panel unreachable");
                    continue;
                }
            };
            let keys = match self.store.keys.get_for_host(&host.host_name).await {
                Ok(keys) => keys,
                Err(err) => {
                    tracing::error!(host = %host.host_name, error = %err, "key listing failed");
                    continue;
                }
            };
            for key in keys {
                match panel.client_traffic(&key.key_email).await {
                    Ok(Some(traffic)) => {
                        let quota_total_gb = if traffic.total > 0 {
                            Some(traffic.total as f64 / (1024.0 * 1024.0 * 1024.0))
                        } else {
                            None
                        };
                        let remaining = if traffic.total > 0 {
                            Some((traffic.total - traffic.down - traffic.up).max(0))
                        } else {
                            None
                        };
                        if let Err(err) = self
                            .store
                            .keys
                            .update_traffic(key.key_id, quota_total_gb, Some(traffic.down), remaining)
                            .await
                        {
                            tracing::warn!(key_id = key.key_id, error = %err, "traffic update failed");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::debug!(key_id = key.key_id, error = %err, "traffic lookup failed");
                    }
                }
            }
        }
    }
}

/// Both the key flag and the account flag must be on, and the owner
/// must not be banned. Balance is checked later against the concrete
/// plan price.
fn eligible_for_renewal(entry: &KeyWithOwner) -> bool {
    entry.key.key_auto_renewal_enabled && entry.owner_auto_renewal && !entry.owner_banned
}

/// Hours until a timestamp, rounded up so "59 minutes left" still
/// counts as the 1-hour marker, not zero.
fn hours_until(expiry_ts: i64, now_ts: i64) -> i64 {
    let secs = expiry_ts - now_ts;
    if secs <= 0 { 0 } else { (secs + 3599) / 3600 }
}

/// Smallest marker that covers the remaining time. Keys with more
/// than the largest marker left get nothing yet. `markers` must be
/// sorted ascending.
fn pick_marker(hours_left: i64, markers: &[i32]) -> Option<i32> {
    if hours_left <= 0 {
        return None;
    }
    markers.iter().copied().find(|m| hours_left <= *m as i64)
}

/// "72, 24,2" -> [2, 24, 72]. Junk entries are dropped.
fn parse_markers(raw: &str) -> Vec<i32> {
    let mut markers: Vec<i32> = raw
        .split(',')
        .filter_map(|part| part.trim().parse::<i32>().ok())
        .filter(|m| *m > 0)
        .collect();
    markers.sort_unstable();
    markers.dedup();
    markers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use korsar_db::models::Key;
    use uuid::Uuid;

    fn lapsed_entry() -> KeyWithOwner {
        let now = Utc::now();
        KeyWithOwner {
            key: Key {
                key_id: 1,
                user_id: 10,
                host_name: "nl-1".into(),
                plan_name: Some("1 month".into()),
                price: Some(15000),
                xui_client_uuid: Uuid::new_v4(),
                key_email: "user10-key1@nl1.bot".into(),
                created_date: now - Duration::days(31),
                expiry_date: now - Duration::hours(6),
                remaining_seconds: 0,
                connection_string: None,
                subscription_link: None,
                protocol: "vless".into(),
                is_trial: 0,
                status: "pay-ended".into(),
                quota_total_gb: None,
                traffic_down_bytes: None,
                quota_remaining_bytes: None,
                key_auto_renewal_enabled: true,
            },
            owner_balance: 20000,
            owner_auto_renewal: true,
            owner_banned: false,
        }
    }

    #[test]
    fn renewal_needs_both_flags_and_an_unbanned_owner() {
        // A key that already flipped to pay-ended still qualifies:
        // eligibility reads the flags, never the status or a marker.
        let entry = lapsed_entry();
        assert!(eligible_for_renewal(&entry));

        let mut off = lapsed_entry();
        off.key.key_auto_renewal_enabled = false;
        assert!(!eligible_for_renewal(&off));

        let mut account_off = lapsed_entry();
        account_off.owner_auto_renewal = false;
        assert!(!eligible_for_renewal(&account_off));

        let mut banned = lapsed_entry();
        banned.owner_banned = true;
        assert!(!eligible_for_renewal(&banned));

        // Empty balance does not disqualify here: the pass sends the
        // low-balance notice instead and retries next tick.
        let mut broke = lapsed_entry();
        broke.owner_balance = 0;
        assert!(eligible_for_renewal(&broke));
    }

    #[test]
    fn marker_selection_picks_smallest_cover() {
        let m = &DEFAULT_MARKERS;
        assert_eq!(pick_marker(80, m), None);
        assert_eq!(pick_marker(72, m), Some(72));
        assert_eq!(pick_marker(50, m), Some(72));
        assert_eq!(pick_marker(48, m), Some(48));
        assert_eq!(pick_marker(30, m), Some(48));
        assert_eq!(pick_marker(24, m), Some(24));
        assert_eq!(pick_marker(2, m), Some(24));
        assert_eq!(pick_marker(1, m), Some(1));
        assert_eq!(pick_marker(0, m), None);
    }

    #[test]
    fn downtime_catch_up_lands_on_one_marker() {
        // Scheduler was down from 70h out to 20h out: exactly one
        // message goes out, at the 24h marker.
        assert_eq!(pick_marker(20, &DEFAULT_MARKERS), Some(24));
    }

    #[test]
    fn marker_list_parses_loosely() {
        assert_eq!(parse_markers("72,24,2"), vec![2, 24, 72]);
        assert_eq!(parse_markers(" 24, 24 , oops, -3"), vec![24]);
        assert!(parse_markers("").is_empty());
    }

    #[test]
    fn partial_hours_round_up() {
        assert_eq!(hours_until(3600, 0), 1);
        assert_eq!(hours_until(3601, 0), 2);
        assert_eq!(hours_until(59 * 60, 0), 1);
        assert_eq!(hours_until(0, 0), 0);
        assert_eq!(hours_until(-10, 0), 0);
    }
}

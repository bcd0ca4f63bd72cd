use std::sync::Arc;

use korsar_db::Store;

use crate::config::ShopConfig;
use crate::services::notify::Notifier;
use crate::services::orchestrator::PurchaseOrchestrator;
use crate::xui::PanelRegistry;

/// Shared handler state. Everything inside is cheap to clone or
/// already behind an Arc.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: ShopConfig,
    pub panels: Arc<PanelRegistry>,
    pub notifier: Arc<Notifier>,
    pub orchestrator: Arc<PurchaseOrchestrator>,
}

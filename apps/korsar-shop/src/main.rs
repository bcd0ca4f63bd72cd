use std::sync::Arc;
use std::time::Duration;

use teloxide::Bot;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use korsar_db::Store;
use korsar_shop::config::ShopConfig;
use korsar_shop::handlers;
use korsar_shop::services::notify::Notifier;
use korsar_shop::services::orchestrator::PurchaseOrchestrator;
use korsar_shop::services::scheduler::LifecycleScheduler;
use korsar_shop::state::AppState;
use korsar_shop::xui::PanelRegistry;

const SCHEDULER_TICK: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "korsar_shop=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = ShopConfig::from_env()?;

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider was already installed");
    }

    let pool = korsar_db::connect(&config.database_url).await?;
    let store = Store::new(pool);

    let bot = Bot::new(&config.bot_token);
    let panels = Arc::new(PanelRegistry::new());
    let notifier = Arc::new(Notifier::new(
        bot,
        store.notifications.clone(),
        store.settings.clone(),
        config.admin_id,
    ));
    let orchestrator = Arc::new(PurchaseOrchestrator::new(
        store.clone(),
        panels.clone(),
        notifier.clone(),
        config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = LifecycleScheduler::new(
        store.clone(),
        panels.clone(),
        notifier.clone(),
        orchestrator.clone(),
        SCHEDULER_TICK,
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let state = AppState {
        store,
        config: config.clone(),
        panels,
        notifier,
        orchestrator,
    };
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "korsar shop listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    Ok(())
}

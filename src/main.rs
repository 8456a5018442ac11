//! whatsapp-dashboard: headless driver for the dashboard session core
//!
//! Loads the config, connects to the backend and its realtime socket and
//! logs what happens until interrupted.

#![warn(clippy::all, rust_2018_idioms)]

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use whatsapp_dashboard::app::DashboardApp;
use whatsapp_dashboard::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = AppConfig::default_path()?;
    let config = AppConfig::load_or_init(&config_path)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting whatsapp-dashboard v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Config loaded from {:?}", config_path);

    let (mut app, mut notices) = DashboardApp::start(config)?;

    loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Some(notice) => app.handle_notice(&notice),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    app.shutdown().await;
    Ok(())
}

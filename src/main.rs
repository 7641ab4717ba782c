//! PortalWatch - Web Portal Uptime Monitor
//!
//! Polls registered portals over HTTP, records every outcome, and sends
//! throttled email alerts on failures.

mod config;
mod db;
mod monitor;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use monitor::Monitor;
use notify::{Notifier, SendGridMailer};
use scheduler::Poller;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("portalwatch=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting PortalWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Store::new(&cfg.db_path)?;
    tracing::info!("Database initialized successfully");

    // Shared HTTP client for probes
    let client = probe::build_client(cfg.probe_timeout())?;

    // Notification pipeline
    let mailer = Arc::new(SendGridMailer::new(
        reqwest::Client::new(),
        cfg.sendgrid_api_key.clone(),
        cfg.mail_from.clone(),
        cfg.mail_reply_to.clone(),
    ));
    let notifier = Arc::new(Notifier::new(
        store.clone(),
        mailer,
        cfg.notify_ignore_hours,
    ));
    let monitor = Arc::new(Monitor::new(store.clone(), client, notifier));

    // Start the background poller
    let poller = Poller::new(store.clone(), monitor.clone(), cfg.sweep_period());
    let poller_handle = poller.start();

    // Serve the API until shutdown
    let server = Server::new(cfg, store, monitor);
    server.start(shutdown_signal()).await?;

    // Stop the poller promptly; its sleep is abortable.
    poller.stop();
    let _ = poller_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
    tracing::info!("shutdown signal received");
}

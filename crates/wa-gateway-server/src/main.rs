// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WhatsApp Gateway - multi-tenant HTTP gateway
//!
//! Serves the REST API, runs one session bridge per active instance, and
//! mirrors instance status into the CMS database.

use std::sync::Arc;

use sqlx::mysql::MySqlPoolOptions;
use tokio::net::TcpListener;
use tracing::{info, warn};

use wa_gateway_core::session::BridgeSessionFactory;
use wa_gateway_core::store::{MySqlStore, SessionStore};
use wa_gateway_core::{InstanceManager, ManagerConfig};
use wa_gateway_server::{AppState, Config, build_router, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wa_gateway_server=info,wa_gateway_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        addr = %config.bind_addr,
        sessions_path = %config.sessions_path.display(),
        bridge = %config.bridge.command.display(),
        "Starting WhatsApp gateway"
    );

    tokio::fs::create_dir_all(&config.sessions_path).await?;

    // Connect to the CMS database
    let pool = MySqlPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect_with(config.database.connect_options()?)
        .await?;

    let store = Arc::new(MySqlStore::new(pool, &config.db_prefix)?);
    store.health_check().await?;

    info!(prefix = %config.db_prefix, "Connected to database");

    let factory = Arc::new(BridgeSessionFactory::new(config.bridge.clone()));
    let manager = Arc::new(InstanceManager::new(
        factory,
        store.clone(),
        ManagerConfig {
            sessions_root: config.sessions_path.clone(),
            qr_timeout: config.qr_wait_timeout,
        },
    ));

    let router = build_router(AppState::new(manager.clone()), config.body_limit);
    let listener = TcpListener::bind(config.bind_addr).await?;

    info!(addr = %config.bind_addr, "WhatsApp gateway ready");

    serve(listener, router, shutdown_signal()).await?;

    // Graceful shutdown
    manager.shutdown().await;
    store.pool().close().await;

    info!("WhatsApp gateway shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use starling_core::{config::ServerConfig, runtime};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    runtime::init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "starling.json".to_string());
    let cfg = ServerConfig::load(&config_path)?;
    info!("config: {config_path}");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
        let _ = shutdown_tx.send(true);
    });

    runtime::run(cfg, shutdown_rx).await
}

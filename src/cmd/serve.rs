//! Panel server command: `ra-panel serve`.

use std::sync::Arc;

use anyhow::Result;
use ra_panel::config::PanelConfig;
use ra_panel::orchestrator::PanelContext;
use ra_panel::panel::{ServerConfig, start_server};

pub async fn cmd_serve(config: PanelConfig, port: Option<u16>, open: bool, dev: bool) -> Result<()> {
    let server = ServerConfig {
        host: config.panel().host.clone(),
        port: port.unwrap_or(config.panel().port),
        dev_mode: dev,
    };

    if !config.catalog_path().is_file() {
        tracing::warn!(path = %config.catalog_path().display(), "Command catalog not found");
    }

    // Spawn browser open before starting the server (which blocks)
    if open && !dev {
        let url = format!("http://localhost:{}", server.port);
        tokio::spawn(async move {
            // Small delay to let the server start binding
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                tracing::warn!(error = %e, "Failed to open browser");
            }
        });
    }

    let ctx = Arc::new(PanelContext::new(config));
    start_server(ctx, server).await
}

//! Wires the content manager, session table and WebSocket server together.

use std::sync::Arc;

use pigeon_content::{ContentManager, NoThumbnails};
use pigeon_server::ContentServer;

use crate::config::Config;
use crate::handler::ContentHandler;
use crate::session::SessionTable;

/// Runs the content server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let manager = ContentManager::new(
        config.transfer_config(),
        config.policy(),
        Arc::new(NoThumbnails),
    );
    for name in manager.policy().names() {
        if let Some(rule) = manager.policy().rule(name) {
            tracing::info!(
                category = name,
                dir = %manager.policy().dir_of(rule).display(),
                max_size = rule.max_size,
                "content category"
            );
        }
    }
    if config.access_token.is_empty() {
        tracing::warn!("no access token configured, every client is trusted");
    }

    let handler = ContentHandler::new(Arc::clone(&manager), SessionTable::new(&config.access_token));
    let server = ContentServer::new(config.server_config(), handler);

    let runner = Arc::clone(&server);
    let mut serve = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut serve => {
            // The listener stopped on its own, usually a bind failure.
            result??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutdown requested");
        }
    }

    server.shutdown();
    serve.await??;

    let (uploads, downloads) = manager.cancel_all().await;
    tracing::info!(uploads, downloads, "jobs abandoned at shutdown");
    Ok(())
}

//! 回显服务器：`echo-server [config.toml]`，Ctrl-C 触发优雅停机。

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use spark_relay_core::{Dispatcher, Engine};
use spark_relay_examples::{EchoBot, load_server_config, telemetry};
use spark_relay_tcp::RelayServer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::install()?;
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = load_server_config(path.as_deref()).await?;

    let server = RelayServer::bind(&config, |_peer: SocketAddr| -> Arc<dyn Engine> {
        Arc::new(Dispatcher::new(EchoBot))
    })
    .await
    .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %server.local_addr(), "echo server listening");

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received; shutting down"),
            Err(err) => warn!(error = %err, "cannot listen for interrupt; shutting down"),
        }
        shutdown.cancel();
    });

    let report = server.serve().await;
    info!(
        accepted = report.accepted,
        failed = report.failed,
        "echo server exited"
    );
    Ok(())
}

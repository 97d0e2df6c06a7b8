//! Startup plumbing shared by the `encore-broker` and `encore-publisher`
//! daemons.

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use encore_core::config::EncoreConfig;
use encore_core::NodeInfo;

/// The node index from the command line (program name excluded).
///
/// Exactly one non-negative integer is accepted; anything else is `None`
/// and the daemon exits without a word.
pub fn node_index<I>(args: I) -> Option<usize>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let index = args.next()?.parse().ok()?;
    args.next().is_none().then_some(index)
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Load configuration. A broken config file is reported and defaults are used.
pub fn load_config() -> EncoreConfig {
    EncoreConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        EncoreConfig::default()
    })
}

pub async fn bind(node: &NodeInfo) -> Result<TcpListener> {
    TcpListener::bind(node.endpoint())
        .await
        .with_context(|| format!("failed to bind {}", node.endpoint()))
}

/// A shutdown channel fired by Ctrl-C.
pub fn shutdown_on_ctrl_c() -> broadcast::Sender<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = shutdown.send(());
    });
    shutdown_tx
}

//! encore-broker <index>
//!
//! Runs broker `index` of the configured roster until Ctrl-C.

use std::sync::Arc;

use anyhow::Result;

use encore_core::ring::HashRing;
use encore_services::{serve, BrokerService};

#[tokio::main]
async fn main() -> Result<()> {
    let Some(index) = encored::node_index(std::env::args().skip(1)) else {
        return Ok(());
    };

    encored::init_tracing();
    let config = encored::load_config();

    let brokers = config.roster.broker_nodes();
    let Some(node) = brokers.get(index).cloned() else {
        return Ok(());
    };
    let is_leader = index == config.roster.metadata_leader;
    tracing::info!(node = %node, is_leader, ring = config.ring.size, "encore-broker starting");

    let listener = encored::bind(&node).await?;

    let service = BrokerService::new(node, brokers)
        .with_metadata_leader(is_leader)
        .with_ring(HashRing::new(config.ring.size))
        .with_timeouts(config.rpc.connect_timeout(), config.rpc.proxy_timeout());

    let shutdown = encored::shutdown_on_ctrl_c();
    serve(
        listener,
        Arc::new(service),
        config.rpc.request_read_timeout(),
        config.rpc.max_connections,
        shutdown.subscribe(),
    )
    .await;

    Ok(())
}

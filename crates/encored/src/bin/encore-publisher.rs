//! encore-publisher <index>
//!
//! Loads the media catalog, starts serving, and registers its artist
//! assignment with the bootstrap broker in the background.

use std::sync::Arc;

use anyhow::Result;

use encore_services::{
    serve, Catalog, ChunkStore, EmbeddedTags, FallbackTags, PublisherService, RetryPolicy,
    RpcClient, SidecarTags,
};

#[tokio::main]
async fn main() -> Result<()> {
    let Some(index) = encored::node_index(std::env::args().skip(1)) else {
        return Ok(());
    };

    encored::init_tracing();
    let config = encored::load_config();

    let publishers = config.roster.publisher_nodes();
    let Some(node) = publishers.get(index).cloned() else {
        return Ok(());
    };
    tracing::info!(node = %node, media_dir = %config.publisher.media_dir.display(), "encore-publisher starting");

    let media_dir = config.publisher.media_dir.clone();
    let chunk_size = config.publisher.chunk_size;
    let tags = FallbackTags::new(EmbeddedTags, SidecarTags);
    let catalog = tokio::task::spawn_blocking(move || Catalog::load(&media_dir, chunk_size, &tags))
        .await?
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "cannot load catalog, serving nothing");
            Catalog::default()
        });

    let listener = encored::bind(&node).await?;

    let service = Arc::new(PublisherService::new(
        node,
        catalog,
        ChunkStore::new(chunk_size, config.publisher.precompute_chunks),
    ));

    match config.roster.bootstrap() {
        Some(bootstrap) => {
            let service = service.clone();
            // The bootstrap broker may fan out before it answers, and each
            // of its outbound calls is bounded by the proxy timeout.
            let rpc = RpcClient::new(config.rpc.connect_timeout())
                .with_call_timeout(config.rpc.proxy_timeout() * 2);
            let retry = RetryPolicy::from(&config.retry);
            tokio::spawn(async move {
                if let Err(e) = service.register(&bootstrap, &publishers, &rpc, &retry).await {
                    tracing::error!(error = %e, "registration failed");
                }
            });
        }
        None => tracing::error!(
            bootstrap = config.roster.bootstrap_broker,
            "bootstrap broker not in roster, not registering"
        ),
    }

    let shutdown = encored::shutdown_on_ctrl_c();
    serve(
        listener,
        service,
        config.rpc.request_read_timeout(),
        config.rpc.max_connections,
        shutdown.subscribe(),
    )
    .await;

    Ok(())
}

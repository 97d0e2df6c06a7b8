//! Encore integration test harness.
//!
//! Every test starts its own cluster in-process: three brokers and two
//! publishers, each behind a real loopback TCP listener on an ephemeral
//! port. Binding happens first so the roster can be built from the ports
//! the OS handed out.
//!
//!   cargo test --test integration

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use encore_core::{ArtistName, NodeInfo, SongInfo};
use encore_services::{
    serve, BrokerService, Catalog, ChunkStore, ConsumerClient, PublisherService, RetryPolicy,
    RpcClient, SidecarTags,
};

mod failures;
mod scenario;

/// Small so a few kilobytes make several parts.
pub const CHUNK_SIZE: usize = 1_000;

pub const READ_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_CONNECTIONS: usize = 64;

static COUNTER: AtomicU64 = AtomicU64::new(0);

// ── Media fixtures ────────────────────────────────────────────────────────────

/// Temp media directory holding one song for Artist1 (3 parts) and one for
/// Artist2 (1 part). Removed on drop.
pub struct Media {
    pub dir: PathBuf,
}

impl Media {
    pub fn create() -> Result<Self> {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("encore-it-{}-{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).context("failed to create media dir")?;

        write_song(&dir, "first", "Artist1", "Opening", 2 * CHUNK_SIZE + 500)?;
        write_song(&dir, "second", "Artist2", "Closing", CHUNK_SIZE - 300)?;
        Ok(Self { dir })
    }
}

impl Drop for Media {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn write_song(dir: &std::path::Path, stem: &str, artist: &str, title: &str, len: usize) -> Result<()> {
    let bytes: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    std::fs::write(dir.join(format!("{stem}.mp3")), bytes)?;
    std::fs::write(
        dir.join(format!("{stem}.json")),
        format!(r#"{{"title":"{title}","artist":"{artist}","album":"Live","genre":"Rock"}}"#),
    )?;
    Ok(())
}

// ── Cluster ───────────────────────────────────────────────────────────────────

pub struct Cluster {
    pub broker_nodes: Vec<NodeInfo>,
    pub brokers: Vec<Arc<BrokerService>>,
    pub publisher_nodes: Vec<NodeInfo>,
    pub publishers: Vec<Arc<PublisherService>>,
    pub media: Media,
    shutdown: broadcast::Sender<()>,
}

async fn bind_all(n: usize) -> Result<(Vec<TcpListener>, Vec<NodeInfo>)> {
    let mut listeners = Vec::with_capacity(n);
    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        nodes.push(NodeInfo::new("127.0.0.1", port, i as u32));
        listeners.push(listener);
    }
    Ok((listeners, nodes))
}

impl Cluster {
    /// Three brokers (index 0 is metadata leader) and two publishers, all
    /// serving. Nothing is registered yet.
    pub async fn start() -> Result<Self> {
        let media = Media::create()?;
        let catalog = Catalog::load(&media.dir, CHUNK_SIZE, &SidecarTags)?;
        let (shutdown, _) = broadcast::channel(1);

        let (broker_listeners, broker_nodes) = bind_all(3).await?;
        let (publisher_listeners, publisher_nodes) = bind_all(2).await?;

        let mut brokers = Vec::new();
        for (i, listener) in broker_listeners.into_iter().enumerate() {
            let service = Arc::new(
                BrokerService::new(broker_nodes[i].clone(), broker_nodes.clone())
                    .with_metadata_leader(i == 0)
                    .with_timeouts(Duration::from_millis(500), Duration::from_secs(2)),
            );
            tokio::spawn(serve(
                listener,
                service.clone(),
                READ_TIMEOUT,
                MAX_CONNECTIONS,
                shutdown.subscribe(),
            ));
            brokers.push(service);
        }

        let mut publishers = Vec::new();
        for (i, listener) in publisher_listeners.into_iter().enumerate() {
            let service = Arc::new(PublisherService::new(
                publisher_nodes[i].clone(),
                catalog.clone(),
                ChunkStore::new(CHUNK_SIZE, i == 1),
            ));
            tokio::spawn(serve(
                listener,
                service.clone(),
                READ_TIMEOUT,
                MAX_CONNECTIONS,
                shutdown.subscribe(),
            ));
            publishers.push(service);
        }

        Ok(Self {
            broker_nodes,
            brokers,
            publisher_nodes,
            publishers,
            media,
            shutdown,
        })
    }

    /// Register publisher `publisher` through broker `broker`.
    pub async fn register(&self, publisher: usize, broker: usize) -> Result<()> {
        self.publishers[publisher]
            .register(
                &self.broker_nodes[broker],
                &self.publisher_nodes,
                &RpcClient::default(),
                &fast_retry(Some(20)),
            )
            .await?;
        Ok(())
    }

    pub fn consumer(&self, max_attempts: Option<u32>) -> ConsumerClient {
        ConsumerClient::new(
            self.broker_nodes[0].clone(),
            RpcClient::new(Duration::from_millis(500)),
            fast_retry(max_attempts),
        )
    }

    pub fn song(&self, artist: &str) -> SongInfo {
        self.publishers[0]
            .catalog()
            .songs_of(&ArtistName::from(artist))
            .and_then(|songs| songs.first().cloned())
            .unwrap_or_else(|| panic!("no song for {artist}"))
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

pub fn fast_retry(max_attempts: Option<u32>) -> RetryPolicy {
    RetryPolicy {
        initial: Duration::from_millis(5),
        max: Duration::from_millis(50),
        max_attempts,
    }
}

/// A loopback port with nothing listening on it.
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

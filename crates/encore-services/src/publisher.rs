//! Publisher node.
//!
//! Every publisher scans the same media directory, so every publisher can
//! compute the same artist assignment. It registers that assignment with the
//! bootstrap broker once and then answers song-list and chunk requests that
//! brokers proxy to it.

use std::sync::Arc;

use tokio::sync::Mutex;

use encore_core::message::WireMessage;
use encore_core::{ArtistName, ChunkRequest, NodeInfo, PartitionTable, Request, Response, SongInfo};

use crate::catalog::Catalog;
use crate::chunker::ChunkStore;
use crate::retry::{RetryError, RetryPolicy};
use crate::rpc::RpcClient;
use crate::service::RequestHandler;

/// Split `artists` across `publishers`.
///
/// Artists are sorted and deduplicated, then cut into one contiguous group
/// per publisher. Group sizes differ by at most one and the earlier groups
/// take the remainder. Every publisher gets an entry, possibly empty.
pub fn assign_artists(publishers: &[NodeInfo], artists: &[ArtistName]) -> PartitionTable {
    let mut sorted = artists.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut table = PartitionTable::new();
    if publishers.is_empty() {
        return table;
    }

    let base = sorted.len() / publishers.len();
    let extra = sorted.len() % publishers.len();
    let mut rest = sorted.into_iter();
    for (i, publisher) in publishers.iter().enumerate() {
        let size = base + usize::from(i < extra);
        table.insert(publisher.clone(), rest.by_ref().take(size).collect());
    }
    table
}

pub struct PublisherService {
    node: NodeInfo,
    catalog: Catalog,
    chunks: Arc<ChunkStore>,
    /// Broker roster learned from the registration reply.
    brokers: Mutex<Vec<NodeInfo>>,
}

impl PublisherService {
    pub fn new(node: NodeInfo, catalog: Catalog, chunks: ChunkStore) -> Self {
        Self {
            node,
            catalog,
            chunks: Arc::new(chunks),
            brokers: Mutex::new(Vec::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn known_brokers(&self) -> Vec<NodeInfo> {
        self.brokers.lock().await.clone()
    }

    /// Register the artist assignment with `bootstrap`, retrying until a
    /// non-empty responsibility table comes back.
    pub async fn register(
        &self,
        bootstrap: &NodeInfo,
        publishers: &[NodeInfo],
        rpc: &RpcClient,
        retry: &RetryPolicy,
    ) -> Result<PartitionTable, RetryError> {
        let request = Request::Register(assign_artists(publishers, &self.catalog.artists()));
        tracing::info!(node = %self.node, broker = %bootstrap, "registering artists");

        let table = retry
            .run("registration", |attempt| {
                let request = &request;
                async move {
                    match rpc.call(bootstrap, request).await {
                        Ok(Response::Partition(table)) if !table.is_empty() => Some(table),
                        Ok(other) => {
                            tracing::debug!(attempt, reply = ?other.kind(), "broker not ready");
                            None
                        }
                        Err(e) => {
                            tracing::debug!(attempt, error = %e, "registration call failed");
                            None
                        }
                    }
                }
            })
            .await?;

        let brokers: Vec<NodeInfo> = table.nodes().cloned().collect();
        tracing::info!(node = %self.node, brokers = brokers.len(), "registered");
        *self.brokers.lock().await = brokers;
        Ok(table)
    }

    fn process_artist_lookup(&self, artist: &ArtistName) -> Response {
        match self.catalog.songs_of(artist) {
            Some(songs) => Response::Songs(songs.to_vec()),
            None => {
                tracing::debug!(%artist, "unknown artist");
                Response::Empty
            }
        }
    }

    /// Only files listed in the catalog are served; the request's path is
    /// never opened as given.
    fn catalog_song(&self, song: &SongInfo) -> Option<SongInfo> {
        self.catalog
            .songs_of(&song.artist)?
            .iter()
            .find(|s| s.path == song.path)
            .cloned()
    }

    async fn process_chunk_request(&self, request: ChunkRequest) -> Response {
        let Some(song) = self.catalog_song(&request.song) else {
            tracing::debug!(path = %request.song.path, "chunk requested for unknown song");
            return Response::Empty;
        };

        let part = request.part;
        let store = self.chunks.clone();
        match tokio::task::spawn_blocking(move || store.get(&song, part)).await {
            Ok(Ok(chunk)) => Response::Chunk(chunk),
            Ok(Err(e)) => {
                tracing::warn!(path = %request.song.path, part, error = %e, "cannot serve chunk");
                Response::Empty
            }
            Err(e) => {
                tracing::error!(error = %e, "chunk read task failed");
                Response::Empty
            }
        }
    }
}

impl RequestHandler for PublisherService {
    fn role(&self) -> &'static str {
        "publisher"
    }

    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::LookupArtist(artist) => self.process_artist_lookup(&artist),
            Request::FetchChunk(req) => self.process_chunk_request(req).await,
            Request::Register(_) | Request::Bootstrap(_) => Response::Empty,
        }
    }
}

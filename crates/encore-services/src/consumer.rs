//! Consumer side: find the responsible broker, list songs, download chunks.

use encore_core::message::WireMessage;
use encore_core::{
    ArtistName, ChunkRequest, Mp3Chunk, NodeInfo, PartitionTable, Request, Response, SongInfo,
    BOOTSTRAP_QUERY,
};

use crate::retry::{RetryError, RetryPolicy};
use crate::rpc::RpcClient;

/// `total_chunks` comes from the network, so at most this many part slots
/// are reserved up front. The vector grows past it as parts arrive.
const PREALLOCATED_PARTS: usize = 1024;

fn part_slots(total_chunks: u32) -> Vec<Option<Mp3Chunk>> {
    Vec::with_capacity((total_chunks as usize).min(PREALLOCATED_PARTS))
}

pub struct ConsumerClient {
    bootstrap: NodeInfo,
    rpc: RpcClient,
    retry: RetryPolicy,
    responsibility: PartitionTable,
}

impl ConsumerClient {
    pub fn new(bootstrap: NodeInfo, rpc: RpcClient, retry: RetryPolicy) -> Self {
        Self {
            bootstrap,
            rpc,
            retry,
            responsibility: PartitionTable::new(),
        }
    }

    /// Ask the bootstrap broker for its responsibility table until it has one.
    pub async fn bootstrap(&mut self) -> Result<&PartitionTable, RetryError> {
        let request = Request::Bootstrap(BOOTSTRAP_QUERY.to_string());
        let (rpc, broker) = (&self.rpc, &self.bootstrap);

        let table = self
            .retry
            .run("bootstrap", |attempt| {
                let request = &request;
                async move {
                    match rpc.call(broker, request).await {
                        Ok(Response::Partition(table)) if !table.is_empty() => Some(table),
                        Ok(other) => {
                            tracing::debug!(attempt, reply = ?other.kind(), "no table yet");
                            None
                        }
                        Err(e) => {
                            tracing::debug!(attempt, error = %e, "bootstrap call failed");
                            None
                        }
                    }
                }
            })
            .await?;

        tracing::info!(brokers = table.len(), artists = table.artists().len(), "bootstrapped");
        self.responsibility = table;
        Ok(&self.responsibility)
    }

    pub fn responsibility(&self) -> &PartitionTable {
        &self.responsibility
    }

    /// Brokers learned from the responsibility table, in roster order.
    pub fn brokers(&self) -> Vec<NodeInfo> {
        self.responsibility.nodes().cloned().collect()
    }

    /// Broker responsible for `name`. Exact, case-sensitive match.
    pub fn resolve(&self, name: &str) -> Option<(NodeInfo, ArtistName)> {
        self.responsibility
            .owner_of(name)
            .map(|(broker, artist)| (broker.clone(), artist.clone()))
    }

    /// Ask `broker` for the songs of `artist` until it answers with a list.
    pub async fn request_songs(
        &self,
        broker: &NodeInfo,
        artist: &ArtistName,
    ) -> Result<Vec<SongInfo>, RetryError> {
        let request = Request::LookupArtist(artist.clone());
        let rpc = &self.rpc;
        self.retry
            .run("song list", |attempt| {
                let request = &request;
                async move {
                    match rpc.call(broker, request).await {
                        Ok(Response::Songs(songs)) => Some(songs),
                        Ok(other) => {
                            tracing::debug!(attempt, reply = ?other.kind(), "no song list");
                            None
                        }
                        Err(e) => {
                            tracing::debug!(attempt, error = %e, "song list call failed");
                            None
                        }
                    }
                }
            })
            .await
    }

    /// One attempt at one part. `None` when the broker has nothing to give.
    pub async fn fetch_chunk(&self, broker: &NodeInfo, song: &SongInfo, part: u32) -> Option<Mp3Chunk> {
        let request = Request::FetchChunk(ChunkRequest {
            song: song.clone(),
            part,
        });
        match self.rpc.call(broker, &request).await {
            Ok(Response::Chunk(chunk)) if chunk.part == part => Some(chunk),
            Ok(Response::Chunk(chunk)) => {
                tracing::warn!(asked = part, got = chunk.part, "broker returned the wrong part");
                None
            }
            Ok(other) => {
                tracing::warn!(part, reply = ?other.kind(), "chunk missing");
                None
            }
            Err(e) => {
                tracing::warn!(part, error = %e, "chunk call failed");
                None
            }
        }
    }

    /// Fetch every part of `song` in order, once each. Missing parts are
    /// recorded, not retried.
    pub async fn download(&self, broker: &NodeInfo, song: &SongInfo) -> Download {
        let mut chunks = part_slots(song.total_chunks);
        for part in 0..song.total_chunks {
            chunks.push(self.fetch_chunk(broker, song, part).await);
        }

        let download = Download {
            song: song.clone(),
            chunks,
        };
        let missing = download.missing_parts();
        if missing.is_empty() {
            tracing::info!(song = %song.title, parts = song.total_chunks, "download complete");
        } else {
            tracing::warn!(song = %song.title, ?missing, "download incomplete");
        }
        download
    }
}

/// Result of [`ConsumerClient::download`]: one slot per part.
#[derive(Debug, Clone)]
pub struct Download {
    pub song: SongInfo,
    pub chunks: Vec<Option<Mp3Chunk>>,
}

impl Download {
    pub fn missing_parts(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(Option::is_some)
    }

    /// The file bytes, in part order. `None` if any part is missing.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        for chunk in &self.chunks {
            bytes.extend_from_slice(&chunk.as_ref()?.data);
        }
        Some(bytes)
    }
}

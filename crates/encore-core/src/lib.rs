//! encore-core: shared types, wire format, hash ring, and configuration.
//! All other Encore crates depend on this one.

pub mod config;
pub mod message;
pub mod ring;
pub mod wire;

pub use message::{
    ArtistName, ChunkRequest, Mp3Chunk, NodeInfo, PartitionTable, Request, Response, SongInfo,
    BOOTSTRAP_QUERY,
};

//! encore-services: node logic and transport for Encore.
//!
//! The transport ([`rpc`], [`listener`]) moves framed requests between
//! nodes. [`broker`], [`publisher`] and [`consumer`] implement the three
//! roles on top of it.

pub mod broker;
pub mod catalog;
pub mod chunker;
pub mod consumer;
pub mod error;
pub mod listener;
pub mod publisher;
pub mod retry;
pub mod rpc;
pub mod service;

pub use broker::BrokerService;
pub use catalog::{
    Catalog, CatalogError, EmbeddedTags, FallbackTags, SidecarTags, TagReader, TrackTags,
};
pub use chunker::{split_into_chunks, ChunkError, ChunkStore};
pub use consumer::{ConsumerClient, Download};
pub use error::{HandlerError, RpcError};
pub use listener::serve;
pub use publisher::{assign_artists, PublisherService};
pub use retry::{RetryError, RetryPolicy};
pub use rpc::RpcClient;
pub use service::RequestHandler;

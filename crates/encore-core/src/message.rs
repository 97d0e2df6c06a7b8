//! Domain types and the request/response messages exchanged between nodes.
//!
//! Everything here is plain data. How a message is framed on a socket lives
//! in [`crate::wire`]; this module only decides which payload each message
//! kind carries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::wire::{MessageKind, WireError};

/// The literal a consumer sends to ask a broker for its responsibility table.
pub const BOOTSTRAP_QUERY: &str = "Show me the money";

// ── Node identity ─────────────────────────────────────────────────────────────

/// Address, port and roster index of a broker, publisher or consumer.
///
/// Equality and hashing cover every field. Ordering is by index first so
/// tables iterate in roster order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    pub address: String,
    pub port: u16,
    pub index: u32,
}

impl NodeInfo {
    pub fn new(address: impl Into<String>, port: u16, index: u32) -> Self {
        Self {
            address: address.into(),
            port,
            index,
        }
    }

    /// `address:port`, used both to connect and as the node's ring key.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Ord for NodeInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, &self.address, self.port).cmp(&(other.index, &other.address, other.port))
    }
}

impl PartialOrd for NodeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}:{}", self.index, self.address, self.port)
    }
}

// ── Catalog types ─────────────────────────────────────────────────────────────

/// An artist name. Compared by value, case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtistName(String);

impl ArtistName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ArtistName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for ArtistName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One song as described by the catalog of the publisher that hosts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongInfo {
    pub title: String,
    pub artist: ArtistName,
    pub album: String,
    pub genre: String,
    /// Path of the media file on the hosting publisher.
    pub path: String,
    /// Number of chunks the file splits into at the publisher's chunk size.
    pub total_chunks: u32,
}

impl fmt::Display for SongInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} ({}, {}) [{} chunks]",
            self.artist, self.title, self.album, self.genre, self.total_chunks
        )
    }
}

/// A request for one chunk of one song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub song: SongInfo,
    pub part: u32,
}

/// One slice of a media file. At most `chunk_size` bytes; the last part of a
/// song may be shorter.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mp3Chunk {
    pub song: SongInfo,
    pub part: u32,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

impl fmt::Debug for Mp3Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mp3Chunk")
            .field("song", &self.song.title)
            .field("part", &self.part)
            .field("len", &self.data.len())
            .finish()
    }
}

// ── Partition table ───────────────────────────────────────────────────────────

/// Node → artists map. Brokers keep two of these: *ownership* (which
/// publisher hosts an artist) and *responsibility* (which broker a consumer
/// asks about an artist).
///
/// On the wire it is a list of `{node, artists}` entries because JSON object
/// keys must be strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PartitionEntry>", into = "Vec<PartitionEntry>")]
pub struct PartitionTable {
    entries: BTreeMap<NodeInfo, Vec<ArtistName>>,
}

/// Wire form of one row of a [`PartitionTable`].
#[derive(Serialize, Deserialize)]
pub struct PartitionEntry {
    pub node: NodeInfo,
    pub artists: Vec<ArtistName>,
}

impl From<Vec<PartitionEntry>> for PartitionTable {
    fn from(list: Vec<PartitionEntry>) -> Self {
        let mut table = PartitionTable::new();
        for entry in list {
            table.entries.entry(entry.node).or_default().extend(entry.artists);
        }
        table
    }
}

impl From<PartitionTable> for Vec<PartitionEntry> {
    fn from(table: PartitionTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|(node, artists)| PartitionEntry { node, artists })
            .collect()
    }
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the artist list of a node, replacing any previous list.
    pub fn insert(&mut self, node: NodeInfo, artists: Vec<ArtistName>) {
        self.entries.insert(node, artists);
    }

    pub fn get(&self, node: &NodeInfo) -> Option<&[ArtistName]> {
        self.entries.get(node).map(Vec::as_slice)
    }

    /// A table with no nodes. A table whose nodes all have empty lists is
    /// *not* empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of nodes in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeInfo, &[ArtistName])> {
        self.entries.iter().map(|(n, a)| (n, a.as_slice()))
    }

    /// Every artist of every node, in table order.
    pub fn artists(&self) -> Vec<ArtistName> {
        self.entries.values().flatten().cloned().collect()
    }

    /// Find the node listing `name`. Exact, case-sensitive match.
    pub fn owner_of(&self, name: &str) -> Option<(&NodeInfo, &ArtistName)> {
        self.entries.iter().find_map(|(node, artists)| {
            artists
                .iter()
                .find(|a| a.as_str() == name)
                .map(|artist| (node, artist))
        })
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Everything a node can be asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Artist partition sent by a publisher, or forwarded by the metadata
    /// leader. Both look the same on purpose.
    Register(PartitionTable),
    LookupArtist(ArtistName),
    FetchChunk(ChunkRequest),
    /// Consumer bootstrap. Only [`BOOTSTRAP_QUERY`] gets an answer.
    Bootstrap(String),
}

/// Everything a node can answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Partition(PartitionTable),
    Songs(Vec<SongInfo>),
    Chunk(Mp3Chunk),
    /// Not found, not ready, or upstream unreachable. Callers retry or
    /// give up; they cannot tell which.
    Empty,
}

impl Response {
    pub fn is_empty(&self) -> bool {
        matches!(self, Response::Empty)
    }
}

/// A message that can travel inside a frame.
pub trait WireMessage: Sized {
    fn kind(&self) -> MessageKind;
    fn encode_payload(&self) -> Result<Vec<u8>, WireError>;
    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Result<Self, WireError>;
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(value).map_err(|e| WireError::Malformed(e.to_string()))
}

fn from_json<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, WireError> {
    serde_json::from_slice(payload).map_err(|e| WireError::Malformed(e.to_string()))
}

impl WireMessage for Request {
    fn kind(&self) -> MessageKind {
        match self {
            Request::Register(_) => MessageKind::Register,
            Request::LookupArtist(_) => MessageKind::LookupArtist,
            Request::FetchChunk(_) => MessageKind::FetchChunk,
            Request::Bootstrap(_) => MessageKind::Bootstrap,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, WireError> {
        match self {
            Request::Register(table) => to_json(table),
            Request::LookupArtist(artist) => to_json(artist),
            Request::FetchChunk(req) => to_json(req),
            Request::Bootstrap(query) => to_json(query),
        }
    }

    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Result<Self, WireError> {
        match kind {
            MessageKind::Register => Ok(Request::Register(from_json(payload)?)),
            MessageKind::LookupArtist => Ok(Request::LookupArtist(from_json(payload)?)),
            MessageKind::FetchChunk => Ok(Request::FetchChunk(from_json(payload)?)),
            MessageKind::Bootstrap => Ok(Request::Bootstrap(from_json(payload)?)),
            other => Err(WireError::UnexpectedKind(other as u8)),
        }
    }
}

impl WireMessage for Response {
    fn kind(&self) -> MessageKind {
        match self {
            Response::Partition(_) => MessageKind::Partition,
            Response::Songs(_) => MessageKind::Songs,
            Response::Chunk(_) => MessageKind::Chunk,
            Response::Empty => MessageKind::Empty,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, WireError> {
        match self {
            Response::Partition(table) => to_json(table),
            Response::Songs(songs) => to_json(songs),
            Response::Chunk(chunk) => to_json(chunk),
            Response::Empty => Ok(Vec::new()),
        }
    }

    fn decode_payload(kind: MessageKind, payload: &[u8]) -> Result<Self, WireError> {
        match kind {
            MessageKind::Partition => Ok(Response::Partition(from_json(payload)?)),
            MessageKind::Songs => Ok(Response::Songs(from_json(payload)?)),
            MessageKind::Chunk => Ok(Response::Chunk(from_json(payload)?)),
            MessageKind::Empty if payload.is_empty() => Ok(Response::Empty),
            MessageKind::Empty => Err(WireError::Malformed(format!(
                "empty response carries {} payload bytes",
                payload.len()
            ))),
            other => Err(WireError::UnexpectedKind(other as u8)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

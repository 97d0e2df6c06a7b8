//! Encore wire format.
//!
//! One RPC is one TCP connection carrying exactly one request frame followed
//! by exactly one response frame. A frame is a fixed 6-byte [`FrameHeader`]
//! followed by `length` bytes of JSON payload. Changing the header layout or
//! a kind tag is a breaking change for every node in the roster.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::message::WireMessage;

// ── Frame Header ──────────────────────────────────────────────────────────────

/// Precedes every payload. The receiver knows the message kind and exact
/// payload size before reading a single payload byte.
///
/// Wire size: 6 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// [`MessageKind`] tag.
    pub kind: u8,

    /// Payload length in bytes, big-endian, not including this header.
    pub length: U32<NetworkEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 6]);

/// Header size in bytes.
pub const HEADER_LEN: usize = std::mem::size_of::<FrameHeader>();

impl FrameHeader {
    pub fn new(kind: MessageKind, length: usize) -> Result<Self, WireError> {
        if length > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(length));
        }
        Ok(Self {
            version: FRAME_VERSION,
            kind: kind.into(),
            length: U32::new(length as u32),
        })
    }

    /// Parse and validate a header. Checks version, kind and length bound.
    pub fn parse(bytes: &[u8]) -> Result<(MessageKind, usize), WireError> {
        let header = FrameHeader::read_from(bytes).ok_or(WireError::ShortHeader(bytes.len()))?;
        if header.version != FRAME_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        let kind = MessageKind::try_from(header.kind)?;
        let length = header.length.get() as usize;
        if length > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(length));
        }
        Ok((kind, length))
    }
}

// ── Message kinds ─────────────────────────────────────────────────────────────

/// Tag identifying the payload of a frame. Requests live below 0x80,
/// responses at 0x80 and above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Register = 0x01,
    LookupArtist = 0x02,
    FetchChunk = 0x03,
    Bootstrap = 0x04,

    Empty = 0x80,
    Partition = 0x81,
    Songs = 0x82,
    Chunk = 0x83,
}

impl TryFrom<u8> for MessageKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageKind::Register),
            0x02 => Ok(MessageKind::LookupArtist),
            0x03 => Ok(MessageKind::FetchChunk),
            0x04 => Ok(MessageKind::Bootstrap),
            0x80 => Ok(MessageKind::Empty),
            0x81 => Ok(MessageKind::Partition),
            0x82 => Ok(MessageKind::Songs),
            0x83 => Ok(MessageKind::Chunk),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(k: MessageKind) -> u8 {
        k as u8
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current frame format version.
pub const FRAME_VERSION: u8 = 0x01;

/// Maximum payload size in bytes. A hex-encoded 512 000-byte chunk plus its
/// song metadata fits comfortably.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Largest chunk whose `Chunk` reply still fits in one frame. Chunk bytes
/// travel hex-encoded (two characters per byte) and share the payload with
/// the song's metadata, which gets 64 KiB of headroom.
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD / 2 - 64 * 1024;

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Serialize a message into a complete frame (header + payload).
pub fn encode_frame<M: WireMessage>(message: &M) -> Result<Bytes, WireError> {
    let payload = message.encode_payload()?;
    let header = FrameHeader::new(message.kind(), payload.len())?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a complete frame held in memory.
pub fn decode_frame<M: WireMessage>(frame: &[u8]) -> Result<M, WireError> {
    if frame.len() < HEADER_LEN {
        return Err(WireError::ShortHeader(frame.len()));
    }
    let (kind, length) = FrameHeader::parse(&frame[..HEADER_LEN])?;
    let payload = &frame[HEADER_LEN..];
    if payload.len() != length {
        return Err(WireError::LengthMismatch {
            declared: length,
            actual: payload.len(),
        });
    }
    M::decode_payload(kind, payload)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data. Any of these
/// means the peer speaks something other than this protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("message kind 0x{0:02x} not valid in this direction")]
    UnexpectedKind(u8),

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("frame header needs {} bytes, got {0}", HEADER_LEN)]
    ShortHeader(usize),

    #[error("header declares {declared} payload bytes, frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

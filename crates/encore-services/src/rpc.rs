//! One-shot RPC over TCP.
//!
//! Every call opens a fresh connection, writes one request frame, reads one
//! response frame and closes. There is no connection reuse: the roster is
//! tiny and calls are rare compared to the size of what they carry.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use encore_core::message::WireMessage;
use encore_core::wire::{encode_frame, FrameHeader, HEADER_LEN};
use encore_core::{NodeInfo, Request, Response};

use crate::error::RpcError;

// ── Frame I/O ─────────────────────────────────────────────────────────────────

/// Write one complete frame and flush.
pub async fn write_frame<W, M>(writer: &mut W, addr: &str, message: &M) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    M: WireMessage,
{
    let frame = encode_frame(message)?;
    let io = |source| RpcError::Transport {
        addr: addr.to_string(),
        source,
    };
    writer.write_all(&frame).await.map_err(io)?;
    writer.flush().await.map_err(io)
}

/// Read one complete frame. The header is validated before the payload is
/// read, so a bogus length never causes a large allocation.
pub async fn read_frame<R, M>(reader: &mut R, addr: &str) -> Result<M, RpcError>
where
    R: AsyncRead + Unpin,
    M: WireMessage,
{
    let io = |source| RpcError::Transport {
        addr: addr.to_string(),
        source,
    };

    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(io)?;
    let (kind, length) = FrameHeader::parse(&header)?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(io)?;
    Ok(M::decode_payload(kind, &payload)?)
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Outbound side of the transport.
///
/// `connect_timeout` bounds connection establishment only. `call_timeout`,
/// when set, bounds the whole exchange; brokers set it for the proxy hop so
/// a stuck publisher cannot pin the broker's handler forever.
#[derive(Debug, Clone)]
pub struct RpcClient {
    connect_timeout: Duration,
    call_timeout: Option<Duration>,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl RpcClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Send `request` to `node` and wait for its response.
    pub async fn call(&self, node: &NodeInfo, request: &Request) -> Result<Response, RpcError> {
        let addr = node.endpoint();
        match self.call_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(&addr, request))
                .await
                .map_err(|_| RpcError::CallTimeout {
                    addr: addr.clone(),
                    timeout,
                })?,
            None => self.exchange(&addr, request).await,
        }
    }

    async fn exchange(&self, addr: &str, request: &Request) -> Result<Response, RpcError> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::ConnectTimeout {
                addr: addr.to_string(),
                timeout: self.connect_timeout,
            })?
            .map_err(|source| RpcError::Transport {
                addr: addr.to_string(),
                source,
            })?;

        tracing::trace!(addr, kind = ?request.kind(), "rpc send");
        write_frame(&mut stream, addr, request).await?;
        let response: Response = read_frame(&mut stream, addr).await?;
        tracing::trace!(addr, kind = ?response.kind(), "rpc reply");
        Ok(response)
    }
}

//! Error types shared by the transport and the node services.

use std::time::Duration;

use encore_core::wire::WireError;

/// Failure of one outbound call.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("call to {addr} timed out after {timeout:?}")]
    CallTimeout { addr: String, timeout: Duration },

    #[error("transport failure with {addr}: {source}")]
    Transport {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol mismatch: {0}")]
    Protocol(#[from] WireError),
}

/// Why a handler could not produce a real answer. The dispatcher logs these
/// and replies `Empty`; none of them reach the caller as a fault.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("artist {0:?} not found")]
    LookupMiss(String),

    #[error("no partition table yet")]
    NotReady,

    #[error("proxy hop failed: {0}")]
    Proxy(#[from] RpcError),
}

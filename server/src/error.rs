//! Error types for the session server.

use shared::{Identity, ProtocolError};
use std::io;
use thiserror::Error;

/// Per-frame and per-connection faults. None of these stop the server loop.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("all {0} player slots are taken")]
    CapacityExhausted(usize),

    #[error("unknown player {0}")]
    UnknownPlayer(Identity),

    #[error("malformed frame {frame:?}: {source}")]
    Malformed {
        frame: String,
        #[source]
        source: ProtocolError,
    },
}

/// Faults that prevent the server from running at all.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/*!
 * Error Types
 *
 * Typed errors for each seam of the server: wire decoding, command
 * decoding, and dispatch. Process-level failures (bind, thread spawn)
 * are reported through anyhow at the binary boundary.
 */

use crate::peer::PeerId;
use thiserror::Error;

/// Failure to decode a RESP value from the transport
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying transport failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended in the middle of a value
    #[error("connection closed mid-frame")]
    Incomplete,

    /// Malformed input
    #[error("protocol error: {0}")]
    Invalid(String),
}

/// A well-formed value that does not map to a known command
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("request is not an array")]
    NotAnArray,

    #[error("empty request")]
    EmptyRequest,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{command}': expected {expected}, got {got}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid argument for '{0}'")]
    InvalidArgument(&'static str),
}

/// Failure while the dispatcher serves one request
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("key not found")]
    KeyNotFound,

    #[error("failed to write reply to peer {peer}: {source}")]
    Write {
        peer: PeerId,
        #[source]
        source: std::io::Error,
    },
}

/// Reason a connection handler stopped abnormally
#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

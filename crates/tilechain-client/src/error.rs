//! Error taxonomy shared by every component of the client.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::B256;
use thiserror::Error;

/// Which of the two logical connections an error or log line refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Command path: transactions are submitted here.
    Write,
    /// Query path: static calls, nonces and the event stream.
    Read,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Write => f.write_str("write"),
            Direction::Read => f.write_str("read"),
        }
    }
}

/// Failures reported by a [`crate::transport::RpcSession`] or a dialer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("transport closed: {0}")]
    Closed(String),
    #[error("rpc error: {0}")]
    Rpc(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("{direction} connection to {endpoint} refused: {reason}")]
    Refused {
        direction: Direction,
        endpoint: String,
        reason: String,
    },
    #[error("{direction} connection to {endpoint} timed out after {timeout:?}")]
    Timeout {
        direction: Direction,
        endpoint: String,
        timeout: Duration,
    },
    #[error("{direction} connection to {endpoint} closed: {reason}")]
    Closed {
        direction: Direction,
        endpoint: String,
        reason: String,
    },
    #[error("{direction} connection to {endpoint} is not established")]
    NotConnected {
        direction: Direction,
        endpoint: String,
    },
}

impl ConnectionError {
    pub fn direction(&self) -> Direction {
        match self {
            ConnectionError::Refused { direction, .. }
            | ConnectionError::Timeout { direction, .. }
            | ConnectionError::Closed { direction, .. }
            | ConnectionError::NotConnected { direction, .. } => *direction,
        }
    }
}

/// Why a contract call did not produce a usable result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallFailure {
    /// The backend answered with an empty payload.
    #[error("smart contract didn't return anything")]
    NoResult,
    #[error("rejected by backend: {0}")]
    Rejected(String),
    #[error("reverted on-chain in transaction {0}")]
    Reverted(B256),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown method `{0}`")]
    UnknownMethod(String),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("`{name}` takes {expected} arguments, got {got}")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("argument {index} of `{name}` does not match ABI type `{expected}`")]
    ArgumentType {
        name: String,
        index: usize,
        expected: String,
    },
    #[error("unsupported ABI type in `{name}`: {reason}")]
    AbiType { name: String, reason: String },
    #[error("failed to ABI-decode `{name}`: {reason}")]
    Abi { name: String, reason: String },
    #[error("unexpected value in `{name}`: {reason}")]
    Shape { name: String, reason: String },
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read contract descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid contract descriptor: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("contract descriptor has no deployment for network `{0}`")]
    NoDeployment(String),
    #[error("contract address is ambiguous, deployed on networks {0:?}")]
    AmbiguousDeployment(Vec<String>),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("transaction middleware `{handler}` failed: {source}")]
    MiddlewareFailure {
        handler: &'static str,
        #[source]
        source: Box<ClientError>,
    },

    #[error("call to `{method}` failed: {reason}")]
    CallFailed { method: String, reason: CallFailure },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub(crate) fn call_failed(method: &str, reason: CallFailure) -> Self {
        ClientError::CallFailed {
            method: method.to_string(),
            reason,
        }
    }

    /// True for failures that a fresh `connect()` may cure.
    pub fn is_connection(&self) -> bool {
        match self {
            ClientError::Connection(_) => true,
            ClientError::MiddlewareFailure { source, .. } => source.is_connection(),
            _ => false,
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

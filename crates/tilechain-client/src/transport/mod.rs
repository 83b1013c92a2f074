//! The seam between a [`crate::connection::Connection`] and the wire.
//!
//! A [`Connector`] dials one endpoint and yields an [`RpcSession`]. The
//! WebSocket implementation lives in [`ws`]; [`crate::mock`] provides an
//! in-memory one.

use std::sync::Arc;

use alloy::primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::TransportError;
use crate::middleware::SignedTransaction;

pub mod ws;

/// A contract log as delivered by the backend, before any ABI decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
}

pub type LogStream = BoxStream<'static, RawLog>;

/// Read-only invocation against the query path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub input: Bytes,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub success: bool,
}

/// One live session with a backend endpoint.
#[async_trait]
pub trait RpcSession: Send + Sync {
    /// Submit a signed transaction and wait for its receipt.
    async fn send_raw_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<CallReceipt, TransportError>;

    /// Execute a call without creating a transaction. An empty answer is
    /// returned as empty bytes, not as an error.
    async fn call(&self, request: CallRequest) -> Result<Bytes, TransportError>;

    async fn transaction_count(&self, address: Address) -> Result<u64, TransportError>;

    async fn gas_price(&self) -> Result<u128, TransportError>;

    /// Standing subscription to every log emitted by `address`. The stream
    /// ends when the session does.
    async fn subscribe_logs(&self, address: Address) -> Result<LogStream, TransportError>;

    async fn close(&self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn RpcSession>, TransportError>;
}

/// Rewrite `http(s)://` URLs to their WebSocket counterparts.
pub fn to_ws_url(endpoint: &str) -> String {
    endpoint
        .replace("http://", "ws://")
        .replace("https://", "wss://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_endpoints_are_rewritten() {
        assert_eq!(to_ws_url("http://127.0.0.1:8545"), "ws://127.0.0.1:8545");
        assert_eq!(to_ws_url("https://rpc.example.org"), "wss://rpc.example.org");
        assert_eq!(
            to_ws_url("ws://127.0.0.1:46658/queryws"),
            "ws://127.0.0.1:46658/queryws"
        );
    }
}

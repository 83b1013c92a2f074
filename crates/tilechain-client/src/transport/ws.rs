use std::sync::Arc;

use alloy::primitives::{Address, Bytes, TxKind};
use alloy::providers::{
    DynProvider, PendingTransactionError, Provider, ProviderBuilder, WatchTxError, WsConnect,
};
use alloy::rpc::types::{Filter, TransactionInput, TransactionRequest};
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use futures_util::StreamExt;

use super::{CallReceipt, CallRequest, Connector, LogStream, RawLog, RpcSession, to_ws_url};
use crate::config::consts::DEFAULT_MAX_WS_RETRIES;
use crate::error::TransportError;
use crate::middleware::SignedTransaction;

/// Dials JSON-RPC nodes over WebSocket with alloy's pubsub transport.
#[derive(Debug, Clone)]
pub struct WsConnector {
    max_retries: u32,
}

impl WsConnector {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WS_RETRIES)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn RpcSession>, TransportError> {
        let ws = WsConnect::new(to_ws_url(endpoint)).with_max_retries(self.max_retries);

        // Nonce, gas and signing are handled by the middleware chain, so the
        // provider gets no fillers.
        let provider: DynProvider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_ws(ws)
            .await
            .map_err(rpc_error)?
            .erased();

        Ok(Arc::new(WsSession { provider }))
    }
}

struct WsSession {
    provider: DynProvider,
}

#[async_trait]
impl RpcSession for WsSession {
    async fn send_raw_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<CallReceipt, TransportError> {
        let pending = self
            .provider
            .send_raw_transaction(&tx.raw)
            .await
            .map_err(rpc_error)?;
        let receipt = pending.get_receipt().await.map_err(pending_error)?;

        Ok(CallReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            success: receipt.status(),
        })
    }

    async fn call(&self, request: CallRequest) -> Result<Bytes, TransportError> {
        let tx = TransactionRequest {
            from: Some(request.from),
            to: Some(TxKind::Call(request.to)),
            input: TransactionInput::new(request.input),
            ..Default::default()
        };
        self.provider.call(tx).await.map_err(rpc_error)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, TransportError> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(rpc_error)
    }

    async fn gas_price(&self) -> Result<u128, TransportError> {
        self.provider.get_gas_price().await.map_err(rpc_error)
    }

    async fn subscribe_logs(&self, address: Address) -> Result<LogStream, TransportError> {
        let filter = Filter::new().address(address);
        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(rpc_error)?;

        let stream = subscription
            .into_stream()
            .map(|log| RawLog {
                address: log.inner.address,
                topics: log.inner.data.topics().to_vec(),
                data: log.inner.data.data.clone(),
                block_number: log.block_number,
            })
            .boxed();
        Ok(stream)
    }

    async fn close(&self) {
        // The pubsub backend shuts down once the last provider handle is dropped.
    }
}

/// A dead backend task means the session is gone for good; everything else
/// is a per-request failure.
fn rpc_error(error: alloy::transports::TransportError) -> TransportError {
    match &error {
        RpcError::Transport(TransportErrorKind::BackendGone)
        | RpcError::Transport(TransportErrorKind::PubsubUnavailable) => {
            TransportError::Closed(error.to_string())
        }
        _ => TransportError::Rpc(error.to_string()),
    }
}

fn pending_error(error: PendingTransactionError) -> TransportError {
    match error {
        PendingTransactionError::TransportError(e) => rpc_error(e),
        PendingTransactionError::TxWatcher(WatchTxError::Timeout) => TransportError::Timeout,
        // The heartbeat task only drops its channel when the provider shuts down.
        PendingTransactionError::Recv(e) => TransportError::Closed(e.to_string()),
        other => TransportError::Rpc(other.to_string()),
    }
}

//! Contract proxy: one identity, one contract, one subscription.

use std::sync::Arc;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::Address;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{Instrument, Span, debug, info, warn};

use crate::bridge::{EventEnvelope, EventSink};
use crate::config::ClientOptions;
use crate::connection::{Connection, ConnectionManager};
use crate::descriptor::{ContractAbi, ContractDescriptor};
use crate::error::{CallFailure, ClientError, DecodeError, Result, TransportError};
use crate::identity::Identity;
use crate::middleware::{
    GasPriceTxMiddleware, NonceTxMiddleware, SignedTxMiddleware, Transaction, TxMiddleware,
};
use crate::transport::{CallReceipt, CallRequest, LogStream};

/// Binds an identity and a contract descriptor to a pair of connections.
pub struct ContractProxy {
    identity: Identity,
    descriptor: ContractDescriptor,
    connections: Arc<ConnectionManager>,
    middleware: TxMiddleware,
    sink: Arc<dyn EventSink>,
    options: ClientOptions,
    tx_lock: Mutex<()>,
    subscription: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl ContractProxy {
    /// Proxy with the default middleware chain: nonce, network gas price
    /// (unless disabled), signature.
    pub fn new(
        identity: Identity,
        descriptor: ContractDescriptor,
        connections: Arc<ConnectionManager>,
        sink: Arc<dyn EventSink>,
        options: ClientOptions,
        span: Span,
    ) -> Self {
        let mut middleware = TxMiddleware::new(span.clone())
            .with(NonceTxMiddleware::new(connections.read().clone()));
        if options.network_gas_price {
            middleware = middleware.with(GasPriceTxMiddleware::new(connections.read().clone()));
        }
        let middleware = middleware.with(SignedTxMiddleware::new(identity.signer().clone()));

        Self {
            identity,
            descriptor,
            connections,
            middleware,
            sink,
            options,
            tx_lock: Mutex::new(()),
            subscription: Mutex::new(None),
            span,
        }
    }

    /// Replace the middleware chain.
    pub fn with_middleware(mut self, middleware: TxMiddleware) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn address(&self) -> Address {
        self.descriptor.address()
    }

    pub fn sender(&self) -> Address {
        self.identity.address()
    }

    pub fn abi(&self) -> &Arc<ContractAbi> {
        self.descriptor.abi()
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// True when both connections are up and the event subscription is alive.
    pub async fn is_ready(&self) -> bool {
        self.connections.is_connected() && self.subscription_alive().await
    }

    async fn subscription_alive(&self) -> bool {
        self.subscription
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Connect both directions and arm the event subscription.
    pub async fn connect(&self) -> Result<()> {
        self.connections.connect().await?;
        self.ensure_subscription().await
    }

    async fn ensure_subscription(&self) -> Result<()> {
        let mut guard = self.subscription.lock().await;
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let read = self.connections.read();
        let stream = read
            .session()?
            .subscribe_logs(self.address())
            .await
            .map_err(|e| connection_or_transport(read, e))?;

        let handle = tokio::spawn(
            forward_events(stream, self.abi().clone(), self.sink.clone(), read.clone())
                .instrument(self.span.clone()),
        );
        *guard = Some(handle);
        info!(parent: &self.span, contract = %self.address(), "Subscribed to contract events");
        Ok(())
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.is_ready().await {
            return Ok(());
        }
        debug!(parent: &self.span, "Not connected, connecting before call");
        self.connect().await
    }

    /// Submit a state-changing call and wait for it to be mined.
    pub async fn call(&self, method: &str, args: &[DynSolValue]) -> Result<CallReceipt> {
        let input = self.abi().encode_call(method, args)?;
        self.ensure_connected().await?;

        let tx = Transaction::new(method, self.sender(), self.address(), input)
            .with_chain_id(self.options.chain_id)
            .with_gas_limit(self.options.gas_limit)
            .with_gas_price(self.options.gas_price);

        // Nonce lookup and submission must not interleave between calls.
        let _guard = self.tx_lock.lock().await;
        let signed = self.middleware.process(tx).await?;

        let write = self.connections.write();
        let session = write.session()?;
        let receipt = match timeout(self.options.call_timeout, session.send_raw_transaction(&signed)).await {
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                return Err(ClientError::call_failed(
                    method,
                    CallFailure::Timeout(self.options.call_timeout),
                ));
            }
            Ok(Err(e)) => {
                write.transport_failure(&e);
                return Err(ClientError::call_failed(method, CallFailure::Rejected(e.to_string())));
            }
            Ok(Ok(receipt)) => receipt,
        };

        if !receipt.success {
            warn!(parent: &self.span, method, tx_hash = ?receipt.tx_hash, "Transaction reverted");
            return Err(ClientError::call_failed(
                method,
                CallFailure::Reverted(receipt.tx_hash),
            ));
        }

        info!(
            parent: &self.span,
            method,
            nonce = signed.nonce,
            tx_hash = ?receipt.tx_hash,
            block = ?receipt.block_number,
            "Transaction mined"
        );
        Ok(receipt)
    }

    /// Read-only call on the query connection. Skips the middleware chain.
    pub async fn static_call(&self, method: &str, args: &[DynSolValue]) -> Result<Vec<DynSolValue>> {
        let input = self.abi().encode_call(method, args)?;
        self.ensure_connected().await?;

        let read = self.connections.read();
        let session = read.session()?;
        let request = CallRequest {
            from: self.sender(),
            to: self.address(),
            input,
        };

        let output = match timeout(self.options.call_timeout, session.call(request)).await {
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                return Err(ClientError::call_failed(
                    method,
                    CallFailure::Timeout(self.options.call_timeout),
                ));
            }
            Ok(Err(e)) => {
                read.transport_failure(&e);
                return Err(ClientError::call_failed(method, CallFailure::Rejected(e.to_string())));
            }
            Ok(Ok(output)) => output,
        };

        if output.is_empty() {
            return Err(ClientError::call_failed(method, CallFailure::NoResult));
        }
        let values = self.abi().decode_output(method, &output)?;
        debug!(parent: &self.span, method, values = values.len(), "Static call returned");
        Ok(values)
    }

    /// Static call returning a single string.
    pub async fn static_call_string(&self, method: &str, args: &[DynSolValue]) -> Result<String> {
        let mut values = self.static_call(method, args).await?.into_iter();
        match values.next() {
            Some(DynSolValue::String(value)) => Ok(value),
            other => Err(DecodeError::Shape {
                name: method.to_string(),
                reason: format!("expected a single string, got {other:?}"),
            }
            .into()),
        }
    }

    /// Stop the subscription and close both connections.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.subscription.lock().await.take() {
            handle.abort();
        }
        self.connections.disconnect().await;
    }
}

impl Drop for ContractProxy {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.get_mut().take() {
            handle.abort();
        }
    }
}

async fn forward_events(
    mut stream: LogStream,
    abi: Arc<ContractAbi>,
    sink: Arc<dyn EventSink>,
    read: Arc<Connection>,
) {
    while let Some(log) = stream.next().await {
        sink.deliver(EventEnvelope::from_log(&abi, log));
    }
    read.mark_failed("event stream ended");
}

fn connection_or_transport(connection: &Connection, error: TransportError) -> ClientError {
    match connection.transport_failure(&error) {
        Some(lost) => lost.into(),
        None => error.into(),
    }
}

//! In-memory backend for tests and offline runs.
//!
//! Emulates a contract holding one string slot behind a getter, a setter and
//! an update event, and the node answering for it: nonces, signature checks,
//! log subscriptions and fault injection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::dyn_abi::DynSolValue;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, address};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::StateBinding;
use crate::descriptor::{ContractAbi, ContractDescriptor};
use crate::error::TransportError;
use crate::middleware::SignedTransaction;
use crate::tilemap::TILES_CHAIN_ABI;
use crate::transport::{CallReceipt, CallRequest, Connector, LogStream, RawLog, RpcSession};

/// Where the in-memory contract lives.
pub const MOCK_CONTRACT_ADDRESS: Address = address!("0x5FbDB2315678afecb367f032d93F642f64180aa3");

#[derive(Default)]
struct MockState {
    dial_count: usize,
    failing_dials: usize,
    dial_delay: Option<Duration>,
    empty_calls: bool,
    rejection: Option<String>,
    gas_price: u128,
    nonces: HashMap<Address, u64>,
    transactions: Vec<SignedTransaction>,
    stored: String,
    block_number: u64,
    subscriptions_opened: usize,
    subscribers: Vec<(u64, mpsc::UnboundedSender<RawLog>)>,
}

impl MockState {
    fn broadcast(&mut self, log: RawLog) {
        self.subscribers
            .retain(|(_, tx)| tx.send(log.clone()).is_ok());
    }
}

/// Shared handle to the in-memory chain. Clones see the same state.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    descriptor: ContractDescriptor,
    binding: StateBinding,
    next_session: Arc<AtomicU64>,
}

impl MockBackend {
    pub fn new(descriptor: ContractDescriptor, binding: StateBinding) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            descriptor,
            binding,
            next_session: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Backend for the tile map contract at [`MOCK_CONTRACT_ADDRESS`].
    pub fn tiles_chain() -> Self {
        let abi = match ContractAbi::from_json(TILES_CHAIN_ABI) {
            Ok(abi) => abi,
            Err(e) => unreachable!("embedded ABI is valid: {e}"),
        };
        Self::new(
            ContractDescriptor::new(abi, MOCK_CONTRACT_ADDRESS),
            StateBinding::default(),
        )
    }

    pub fn descriptor(&self) -> ContractDescriptor {
        self.descriptor.clone()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            backend: self.clone(),
        })
    }

    pub fn dial_count(&self) -> usize {
        self.state.lock().dial_count
    }

    /// Make the next `n` dials fail with a refusal.
    pub fn fail_next_dials(&self, n: usize) {
        self.state.lock().failing_dials = n;
    }

    pub fn set_dial_delay(&self, delay: Duration) {
        self.state.lock().dial_delay = Some(delay);
    }

    /// Answer every static call with an empty payload.
    pub fn respond_empty(&self, empty: bool) {
        self.state.lock().empty_calls = empty;
    }

    /// Reject submitted transactions with `reason`.
    pub fn reject_transactions(&self, reason: Option<String>) {
        self.state.lock().rejection = reason;
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().nonces.insert(address, nonce);
    }

    pub fn set_gas_price(&self, gas_price: u128) {
        self.state.lock().gas_price = gas_price;
    }

    pub fn transactions(&self) -> Vec<SignedTransaction> {
        self.state.lock().transactions.clone()
    }

    pub fn stored_state(&self) -> String {
        self.state.lock().stored.clone()
    }

    pub fn set_stored_state(&self, state: impl Into<String>) {
        self.state.lock().stored = state.into();
    }

    /// Subscriptions opened over the backend's lifetime.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions_opened
    }

    pub fn live_subscriptions(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Push an arbitrary log to every subscriber.
    pub fn emit_raw(&self, log: RawLog) {
        self.state.lock().broadcast(log);
    }

    /// Emit `name(values...)` from the contract.
    pub fn emit_event(&self, name: &str, values: &[DynSolValue]) -> Result<(), TransportError> {
        let (topics, data) = self
            .descriptor
            .abi()
            .encode_event(name, values)
            .map_err(|e| TransportError::Rpc(e.to_string()))?;
        let mut state = self.state.lock();
        state.block_number += 1;
        let log = RawLog {
            address: self.descriptor.address(),
            topics,
            data,
            block_number: Some(state.block_number),
        };
        state.broadcast(log);
        Ok(())
    }

    /// End every open log stream, as a dropped transport would.
    pub fn drop_subscriptions(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Apply a transaction as a node would: everything is read back from the
    /// raw encoding, not from the convenience fields beside it.
    fn execute(&self, tx: &SignedTransaction) -> Result<CallReceipt, TransportError> {
        let envelope = TxEnvelope::decode_2718(&mut tx.raw.as_ref())
            .map_err(|e| TransportError::Rpc(format!("invalid transaction encoding: {e}")))?;
        let sender = envelope
            .recover_signer()
            .map_err(|e| TransportError::Rpc(format!("invalid signature: {e}")))?;
        if sender != tx.from {
            return Err(TransportError::Rpc("invalid signature: sender mismatch".into()));
        }
        let to = envelope
            .to()
            .ok_or_else(|| TransportError::Rpc("contract creation is not supported".into()))?;
        if to != self.descriptor.address() {
            return Err(TransportError::Rpc(format!("no contract at {to}")));
        }
        let (method, args) = self
            .descriptor
            .abi()
            .decode_call(envelope.input())
            .map_err(|e| TransportError::Rpc(e.to_string()))?;
        let nonce = envelope.nonce();
        let gas_price = envelope.gas_price().unwrap_or_default();
        let tx_hash = *envelope.tx_hash();

        let mut state = self.state.lock();
        if let Some(reason) = &state.rejection {
            return Err(TransportError::Rpc(reason.clone()));
        }
        if gas_price < state.gas_price {
            return Err(TransportError::Rpc(format!(
                "max fee per gas less than block base fee: {gas_price} < {}",
                state.gas_price
            )));
        }
        let expected = state.nonces.get(&sender).copied().unwrap_or_default();
        if nonce != expected {
            return Err(TransportError::Rpc(format!(
                "invalid nonce: expected {expected}, got {nonce}"
            )));
        }

        state.nonces.insert(sender, expected + 1);
        state.block_number += 1;
        state.transactions.push(tx.clone());
        let block_number = state.block_number;

        if method == self.binding.setter {
            if let Some(DynSolValue::String(value)) = args.first() {
                state.stored = value.clone();
                let (topics, data) = self
                    .descriptor
                    .abi()
                    .encode_event(&self.binding.event, &[DynSolValue::String(value.clone())])
                    .map_err(|e| TransportError::Rpc(e.to_string()))?;
                state.broadcast(RawLog {
                    address: self.descriptor.address(),
                    topics,
                    data,
                    block_number: Some(block_number),
                });
            }
        }

        Ok(CallReceipt {
            tx_hash,
            block_number: Some(block_number),
            success: true,
        })
    }

    fn query(&self, request: &CallRequest) -> Result<Bytes, TransportError> {
        let state = self.state.lock();
        if state.empty_calls {
            return Ok(Bytes::new());
        }
        if request.to != self.descriptor.address() {
            return Ok(Bytes::new());
        }
        let (method, _) = self
            .descriptor
            .abi()
            .decode_call(&request.input)
            .map_err(|e| TransportError::Rpc(e.to_string()))?;
        if method != self.binding.getter {
            return Err(TransportError::Rpc("execution reverted".into()));
        }
        self.descriptor
            .abi()
            .encode_output(&method, &[DynSolValue::String(state.stored.clone())])
            .map_err(|e| TransportError::Rpc(e.to_string()))
    }
}

struct MockConnector {
    backend: MockBackend,
}

#[async_trait]
impl Connector for MockConnector {
    async fn dial(&self, _endpoint: &str) -> Result<Arc<dyn RpcSession>, TransportError> {
        let delay = {
            let mut state = self.backend.state.lock();
            state.dial_count += 1;
            state.dial_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.backend.state.lock();
        if state.failing_dials > 0 {
            state.failing_dials -= 1;
            return Err(TransportError::Rpc("connection refused".into()));
        }
        Ok(Arc::new(MockSession {
            id: self.backend.next_session.fetch_add(1, Ordering::Relaxed),
            backend: self.backend.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockSession {
    id: u64,
    backend: MockBackend,
    closed: AtomicBool,
}

impl MockSession {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed("session closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RpcSession for MockSession {
    async fn send_raw_transaction(
        &self,
        tx: &SignedTransaction,
    ) -> Result<CallReceipt, TransportError> {
        self.ensure_open()?;
        self.backend.execute(tx)
    }

    async fn call(&self, request: CallRequest) -> Result<Bytes, TransportError> {
        self.ensure_open()?;
        self.backend.query(&request)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, TransportError> {
        self.ensure_open()?;
        Ok(self
            .backend
            .state
            .lock()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<u128, TransportError> {
        self.ensure_open()?;
        Ok(self.backend.state.lock().gas_price)
    }

    async fn subscribe_logs(&self, address: Address) -> Result<LogStream, TransportError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.backend.state.lock();
            state.subscriptions_opened += 1;
            state.subscribers.push((self.id, tx));
        }

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|log| (log, rx))
        })
        .filter(move |log: &RawLog| futures_util::future::ready(log.address == address))
        .boxed();
        Ok(stream)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.backend
            .state
            .lock()
            .subscribers
            .retain(|(id, _)| *id != self.id);
    }
}

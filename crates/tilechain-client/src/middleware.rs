//! Outgoing transaction assembly and the handler chain that completes it.
//!
//! A [`Transaction`] starts with calldata only. Handlers fill in the nonce,
//! optionally the gas price, and finally the signature. The chain refuses to
//! hand out anything unsigned.

use std::sync::Arc;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, B256, Bytes, Signature, TxKind, U256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::{Span, debug};

use crate::connection::Connection;
use crate::error::{ClientError, Result};

/// An outgoing contract call, filled in by the middleware chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub method: String,
    pub from: Address,
    pub to: Address,
    pub input: Bytes,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub gas_price: Option<u128>,
    pub nonce: Option<u64>,
    pub signature: Option<Signature>,
}

impl Transaction {
    pub fn new(method: impl Into<String>, from: Address, to: Address, input: Bytes) -> Self {
        Self {
            method: method.into(),
            from,
            to,
            input,
            chain_id: 0,
            gas_limit: 0,
            gas_price: None,
            nonce: None,
            signature: None,
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_gas_price(mut self, gas_price: Option<u128>) -> Self {
        self.gas_price = gas_price;
        self
    }

    /// EIP-155 legacy form of the call. `None` until a nonce is assigned.
    /// A missing gas price signs as zero.
    fn legacy(&self) -> Option<TxLegacy> {
        Some(TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce?,
            gas_price: self.gas_price.unwrap_or_default(),
            gas_limit: self.gas_limit,
            to: TxKind::Call(self.to),
            value: U256::ZERO,
            input: self.input.clone(),
        })
    }

    /// The hash a signer commits to. Requires a nonce.
    pub fn signing_hash(&self) -> Option<B256> {
        self.legacy().map(|tx| tx.signature_hash())
    }

    pub(crate) fn finalize(self) -> Result<SignedTransaction> {
        let (Some(tx), Some(signature)) = (self.legacy(), self.signature) else {
            return Err(ClientError::Signing(format!(
                "`{}` left the middleware chain unsigned",
                self.method
            )));
        };
        let signing_hash = tx.signature_hash();
        let nonce = tx.nonce;
        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        let raw = TxEnvelope::Legacy(signed).encoded_2718();

        Ok(SignedTransaction {
            method: self.method,
            from: self.from,
            to: self.to,
            input: self.input,
            nonce,
            hash,
            signing_hash,
            signature,
            raw: raw.into(),
        })
    }
}

/// A transaction ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub method: String,
    pub from: Address,
    pub to: Address,
    pub input: Bytes,
    pub nonce: u64,
    pub hash: B256,
    pub signing_hash: B256,
    pub signature: Signature,
    /// EIP-2718 encoding, as sent with `eth_sendRawTransaction`.
    pub raw: Bytes,
}

#[async_trait]
pub trait TxMiddlewareHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, tx: &mut Transaction) -> Result<()>;
}

/// Ordered handler chain, configured once and reused for every transaction.
#[derive(Clone)]
pub struct TxMiddleware {
    handlers: Vec<Arc<dyn TxMiddlewareHandler>>,
    span: Span,
}

impl TxMiddleware {
    pub fn new(span: Span) -> Self {
        Self {
            handlers: Vec::new(),
            span,
        }
    }

    pub fn with(mut self, handler: impl TxMiddlewareHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Run every handler in order. The first failure aborts the chain.
    pub async fn process(&self, mut tx: Transaction) -> Result<SignedTransaction> {
        for handler in &self.handlers {
            handler
                .handle(&mut tx)
                .await
                .map_err(|source| ClientError::MiddlewareFailure {
                    handler: handler.name(),
                    source: Box::new(source),
                })?;
            debug!(parent: &self.span, method = %tx.method, handler = handler.name(), "Middleware applied");
        }
        tx.finalize()
    }
}

/// Assigns the sender's next nonce, read from the query connection.
pub struct NonceTxMiddleware {
    connection: Arc<Connection>,
}

impl NonceTxMiddleware {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TxMiddlewareHandler for NonceTxMiddleware {
    fn name(&self) -> &'static str {
        "nonce"
    }

    async fn handle(&self, tx: &mut Transaction) -> Result<()> {
        let session = self.connection.session()?;
        let nonce = session.transaction_count(tx.from).await.map_err(|e| {
            match self.connection.transport_failure(&e) {
                Some(lost) => ClientError::Connection(lost),
                None => ClientError::Transport(e),
            }
        })?;
        tx.nonce = Some(nonce);
        Ok(())
    }
}

/// Fills in the network gas price when none was configured.
pub struct GasPriceTxMiddleware {
    connection: Arc<Connection>,
}

impl GasPriceTxMiddleware {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TxMiddlewareHandler for GasPriceTxMiddleware {
    fn name(&self) -> &'static str {
        "gas_price"
    }

    async fn handle(&self, tx: &mut Transaction) -> Result<()> {
        if tx.gas_price.is_none() {
            let session = self.connection.session()?;
            let gas_price = session.gas_price().await.map_err(|e| {
                match self.connection.transport_failure(&e) {
                    Some(lost) => ClientError::Connection(lost),
                    None => ClientError::Transport(e),
                }
            })?;
            tx.gas_price = Some(gas_price);
        }
        Ok(())
    }
}

/// Signs the assembled payload. Must run after the nonce is known.
pub struct SignedTxMiddleware {
    signer: PrivateKeySigner,
}

impl SignedTxMiddleware {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl TxMiddlewareHandler for SignedTxMiddleware {
    fn name(&self) -> &'static str {
        "signer"
    }

    async fn handle(&self, tx: &mut Transaction) -> Result<()> {
        if tx.from != self.signer.address() {
            return Err(ClientError::Signing(format!(
                "transaction sender {} is not the signer {}",
                tx.from,
                self.signer.address()
            )));
        }
        let hash = tx
            .signing_hash()
            .ok_or_else(|| ClientError::Signing("refusing to sign without a nonce".into()))?;
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| ClientError::Signing(e.to_string()))?;
        tx.signature = Some(signature);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::mock::MockBackend;
    use crate::Direction;
    use std::time::Duration;

    fn unsigned(identity: &Identity) -> Transaction {
        Transaction::new(
            "SetTileMapState",
            identity.address(),
            Address::repeat_byte(0x11),
            Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
        )
        .with_chain_id(31337)
        .with_gas_limit(3_000_000)
    }

    /// Stand-in for the nonce handler that needs no backend.
    struct FixedNonce(u64);

    #[async_trait]
    impl TxMiddlewareHandler for FixedNonce {
        fn name(&self) -> &'static str {
            "fixed_nonce"
        }

        async fn handle(&self, tx: &mut Transaction) -> Result<()> {
            tx.nonce = Some(self.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn signature_recovers_sender_only_with_assigned_nonce() {
        let identity = Identity::generate();
        for nonce in [0u64, 1, 7, 1_000] {
            let chain = TxMiddleware::new(Span::none())
                .with(FixedNonce(nonce))
                .with(SignedTxMiddleware::new(identity.signer().clone()));
            let signed = chain.process(unsigned(&identity)).await.unwrap();
            assert_eq!(signed.nonce, nonce);

            let recovered = signed
                .signature
                .recover_address_from_prehash(&signed.signing_hash)
                .unwrap();
            assert_eq!(recovered, identity.address());

            let mut other = unsigned(&identity);
            other.nonce = Some(nonce + 1);
            let other_hash = other.signing_hash().unwrap();
            let recovered = signed
                .signature
                .recover_address_from_prehash(&other_hash)
                .unwrap();
            assert_ne!(recovered, identity.address());
        }
    }

    #[tokio::test]
    async fn signing_before_nonce_fails_the_chain() {
        let identity = Identity::generate();
        let chain = TxMiddleware::new(Span::none())
            .with(SignedTxMiddleware::new(identity.signer().clone()))
            .with(FixedNonce(3));

        let err = chain.process(unsigned(&identity)).await.unwrap_err();
        match err {
            ClientError::MiddlewareFailure { handler, source } => {
                assert_eq!(handler, "signer");
                assert!(matches!(*source, ClientError::Signing(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn chain_without_signer_yields_nothing() {
        let identity = Identity::generate();
        let chain = TxMiddleware::new(Span::none()).with(FixedNonce(0));
        assert!(matches!(
            chain.process(unsigned(&identity)).await,
            Err(ClientError::Signing(_))
        ));
    }

    #[tokio::test]
    async fn signer_refuses_foreign_sender() {
        let identity = Identity::generate();
        let stranger = Identity::generate();
        let chain = TxMiddleware::new(Span::none())
            .with(FixedNonce(0))
            .with(SignedTxMiddleware::new(stranger.signer().clone()));
        assert!(chain.process(unsigned(&identity)).await.is_err());
    }

    #[tokio::test]
    async fn nonce_handler_reads_transaction_count() {
        let backend = MockBackend::tiles_chain();
        let identity = Identity::generate();
        backend.set_nonce(identity.address(), 5);

        let read = Arc::new(Connection::new(
            Direction::Read,
            "mock://read",
            backend.connector(),
            Duration::from_secs(1),
            Span::none(),
        ));
        read.connect().await.unwrap();

        let chain = TxMiddleware::new(Span::none())
            .with(NonceTxMiddleware::new(read.clone()))
            .with(GasPriceTxMiddleware::new(read))
            .with(SignedTxMiddleware::new(identity.signer().clone()));
        assert_eq!(chain.handler_names(), vec!["nonce", "gas_price", "signer"]);

        let signed = chain.process(unsigned(&identity)).await.unwrap();
        assert_eq!(signed.nonce, 5);
        assert!(!signed.raw.is_empty());
    }

    #[tokio::test]
    async fn nonce_failure_aborts_before_signing() {
        let backend = MockBackend::tiles_chain();
        let identity = Identity::generate();
        let read = Arc::new(Connection::new(
            Direction::Read,
            "mock://read",
            backend.connector(),
            Duration::from_secs(1),
            Span::none(),
        ));

        let chain = TxMiddleware::new(Span::none())
            .with(NonceTxMiddleware::new(read))
            .with(SignedTxMiddleware::new(identity.signer().clone()));
        let err = chain.process(unsigned(&identity)).await.unwrap_err();
        assert!(matches!(err, ClientError::MiddlewareFailure { handler: "nonce", .. }));
        assert!(err.is_connection());
    }
}

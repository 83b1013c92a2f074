//! Client-side bridge between a frame-driven application and a contract on an
//! EVM JSON-RPC node.
//!
//! [`StateSynchronizer`] is the entry point: it signs and submits state
//! updates, queries the current state, and turns contract events into
//! callbacks the host drains once per frame with
//! [`StateSynchronizer::pump`].

pub mod bridge;
pub mod config;
pub mod connection;
pub mod contract;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod mock;
pub mod notify;
pub mod queue;
pub mod retry;
pub mod sync;
pub mod tilemap;
pub mod transport;

pub use bridge::{EventBridge, EventEnvelope, EventSink};
pub use config::{BridgeConfig, ClientOptions, StateBinding, load_config_from_path};
pub use connection::{Connection, ConnectionManager, ConnectionState, EndpointPair};
pub use contract::ContractProxy;
pub use descriptor::{ContractAbi, ContractDescriptor};
pub use error::{
    CallFailure, ClientError, ConnectionError, DecodeError, DescriptorError, Direction, Result,
    TransportError,
};
pub use identity::{Identity, KeySource};
pub use middleware::{
    GasPriceTxMiddleware, NonceTxMiddleware, SignedTransaction, SignedTxMiddleware, Transaction,
    TxMiddleware, TxMiddlewareHandler,
};
pub use notify::ObserverHandle;
pub use sync::{StateSynchronizer, SynchronizerBuilder};
pub use tilemap::{TileChainClient, TileMapState};
pub use transport::{CallReceipt, Connector, RpcSession};

pub use alloy::dyn_abi::DynSolValue;
pub use alloy::primitives::Address;

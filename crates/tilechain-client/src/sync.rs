//! State synchronizer: the composition root a host application talks to.

use std::marker::PhantomData;
use std::sync::Arc;

use alloy::dyn_abi::DynSolValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{Span, debug, info_span};

use crate::bridge::{EventBridge, EventSink};
use crate::config::{ClientOptions, StateBinding};
use crate::connection::{ConnectionManager, ConnectionState, EndpointPair};
use crate::contract::ContractProxy;
use crate::descriptor::ContractDescriptor;
use crate::error::{ClientError, DecodeError, Result};
use crate::identity::Identity;
use crate::notify::{ObserverHandle, StateNotifier};
use crate::queue::{CallbackQueue, pending_queue};
use crate::transport::{CallReceipt, Connector};
use crate::transport::ws::WsConnector;

/// Keeps a JSON state blob held by a contract in sync with the host.
///
/// Network operations are async and may run on any worker thread. State
/// notifications are only raised from [`StateSynchronizer::pump`], which the
/// host calls once per frame.
pub struct StateSynchronizer<S> {
    identity: Identity,
    descriptor: ContractDescriptor,
    binding: StateBinding,
    options: ClientOptions,
    connections: Arc<ConnectionManager>,
    bridge: Arc<EventBridge<S>>,
    queue: CallbackQueue,
    notifier: StateNotifier<S>,
    proxy: OnceCell<ContractProxy>,
    span: Span,
}

impl<S> StateSynchronizer<S>
where
    S: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn builder(identity: Identity, descriptor: ContractDescriptor) -> SynchronizerBuilder<S> {
        SynchronizerBuilder {
            identity,
            descriptor,
            endpoints: None,
            connector: None,
            options: ClientOptions::default(),
            binding: StateBinding::default(),
            span: None,
            _state: PhantomData,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn descriptor(&self) -> &ContractDescriptor {
        &self.descriptor
    }

    pub fn binding(&self) -> &StateBinding {
        &self.binding
    }

    /// The memoized proxy, connecting it on first use. A failed connect is
    /// not memoized.
    async fn contract(&self) -> Result<&ContractProxy> {
        self.proxy
            .get_or_try_init(|| async {
                let sink: Arc<dyn EventSink> = self.bridge.clone();
                let proxy = ContractProxy::new(
                    self.identity.clone(),
                    self.descriptor.clone(),
                    self.connections.clone(),
                    sink,
                    self.options.clone(),
                    self.span.clone(),
                );
                proxy.connect().await?;
                Ok::<_, ClientError>(proxy)
            })
            .await
    }

    /// Connect eagerly instead of on the first call.
    pub async fn connect(&self) -> Result<()> {
        self.contract().await?.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connections.is_connected()
    }

    /// (write, read) connection states.
    pub fn connection_states(&self) -> (ConnectionState, ConnectionState) {
        self.connections.states()
    }

    pub async fn call(&self, method: &str, args: &[DynSolValue]) -> Result<CallReceipt> {
        self.contract().await?.call(method, args).await
    }

    pub async fn static_call(&self, method: &str, args: &[DynSolValue]) -> Result<Vec<DynSolValue>> {
        self.contract().await?.static_call(method, args).await
    }

    /// The state blob exactly as the contract stores it.
    pub async fn get_state_raw(&self) -> Result<String> {
        self.contract()
            .await?
            .static_call_string(&self.binding.getter, &[])
            .await
    }

    pub async fn set_state_raw(&self, state: String) -> Result<CallReceipt> {
        self.call(&self.binding.setter, &[DynSolValue::String(state)])
            .await
    }

    /// Fetch and decode the state. `None` when the contract holds an empty blob.
    pub async fn get_state(&self) -> Result<Option<S>> {
        let raw = self.get_state_raw().await?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let state = serde_json::from_str(&raw).map_err(DecodeError::from)?;
        Ok(Some(state))
    }

    pub async fn set_state(&self, state: &S) -> Result<CallReceipt> {
        let raw = serde_json::to_string(state).map_err(DecodeError::from)?;
        self.set_state_raw(raw).await
    }

    /// Run the state callbacks queued before this call, in arrival order.
    /// Returns how many ran.
    pub fn pump(&self) -> usize {
        let ran = self.queue.drain();
        if ran > 0 {
            debug!(parent: &self.span, callbacks = ran, "Pumped state callbacks");
        }
        ran
    }

    pub fn pending_callbacks(&self) -> usize {
        self.queue.len()
    }

    /// Register an observer of decoded state updates. Observers run inside
    /// [`StateSynchronizer::pump`].
    pub fn on_state_updated(&self, observer: impl FnMut(&S) + Send + 'static) -> ObserverHandle {
        self.notifier.subscribe(observer)
    }

    /// Events dropped because they could not be decoded.
    pub fn decode_failures(&self) -> u64 {
        self.bridge.decode_failures()
    }

    /// Stop the subscription and close both connections. A later call
    /// reconnects.
    pub async fn disconnect(&self) {
        match self.proxy.get() {
            Some(proxy) => proxy.disconnect().await,
            None => self.connections.disconnect().await,
        }
    }
}

pub struct SynchronizerBuilder<S> {
    identity: Identity,
    descriptor: ContractDescriptor,
    endpoints: Option<EndpointPair>,
    connector: Option<Arc<dyn Connector>>,
    options: ClientOptions,
    binding: StateBinding,
    span: Option<Span>,
    _state: PhantomData<fn() -> S>,
}

impl<S> SynchronizerBuilder<S>
where
    S: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn endpoints(mut self, endpoints: EndpointPair) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Defaults to the WebSocket connector.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn binding(mut self, binding: StateBinding) -> Self {
        self.binding = binding;
        self
    }

    /// Parent span for every log line the client emits.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Result<StateSynchronizer<S>> {
        let endpoints = self
            .endpoints
            .ok_or_else(|| ClientError::Config("no endpoints configured".into()))?;
        let abi = self.descriptor.abi().clone();
        for method in [&self.binding.getter, &self.binding.setter] {
            if !abi.has_function(method) {
                return Err(DecodeError::UnknownMethod(method.clone()).into());
            }
        }

        let span = self.span.unwrap_or_else(|| {
            info_span!(
                "tilechain",
                contract = %self.descriptor.address(),
                sender = %self.identity.address()
            )
        });
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::default()));
        let connections = Arc::new(ConnectionManager::new(
            &endpoints,
            connector,
            self.options.connect_timeout,
            span.clone(),
        ));

        let (sender, queue) = pending_queue();
        let notifier = StateNotifier::new();
        let mut bridge = EventBridge::new(sender, notifier.clone(), span.clone());
        bridge.register(&abi, &self.binding.event, |event| {
            Ok(serde_json::from_str::<S>(event.string(0)?)?)
        })?;

        Ok(StateSynchronizer {
            identity: self.identity,
            descriptor: self.descriptor,
            binding: self.binding,
            options: self.options,
            connections,
            bridge: Arc::new(bridge),
            queue,
            notifier,
            proxy: OnceCell::new(),
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::tilemap::{Color, Point, Tile, TileChainClient, TileMapState};
    use std::time::Duration;

    fn client(backend: &MockBackend) -> TileChainClient {
        TileChainClient::builder(Identity::generate(), backend.descriptor())
            .endpoints(EndpointPair::new("mock://write", "mock://read"))
            .connector(backend.connector())
            .span(Span::none())
            .build()
            .unwrap()
    }

    fn one_tile(x: i32) -> TileMapState {
        TileMapState {
            tiles: vec![Tile {
                point: Point { x, y: 1 },
                color: Color { r: 200, g: 10, b: 10 },
            }],
        }
    }

    #[test]
    fn build_requires_endpoints_and_known_members() {
        let backend = MockBackend::tiles_chain();
        let missing = TileChainClient::builder(Identity::generate(), backend.descriptor()).build();
        assert!(matches!(missing, Err(ClientError::Config(_))));

        let bad_binding = TileChainClient::builder(Identity::generate(), backend.descriptor())
            .endpoints(EndpointPair::new("a", "b"))
            .binding(StateBinding {
                getter: "GetBoard".into(),
                ..StateBinding::default()
            })
            .build();
        assert!(matches!(
            bad_binding,
            Err(ClientError::Decode(DecodeError::UnknownMethod(_)))
        ));
    }

    #[tokio::test]
    async fn empty_contract_state_is_none() {
        let backend = MockBackend::tiles_chain();
        let client = client(&backend);
        assert_eq!(client.get_state().await.unwrap(), None);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn malformed_stored_json_is_decode_error() {
        let backend = MockBackend::tiles_chain();
        backend.set_stored_state("{not json");
        let client = client(&backend);
        assert!(matches!(
            client.get_state().await,
            Err(ClientError::Decode(DecodeError::Json(_)))
        ));
        assert_eq!(client.get_state_raw().await.unwrap(), "{not json");
    }

    #[tokio::test]
    async fn one_proxy_per_synchronizer() {
        let backend = MockBackend::tiles_chain();
        let client = client(&backend);
        client.connect().await.unwrap();
        client.get_state_raw().await.unwrap();
        client.set_state(&one_tile(1)).await.unwrap();
        client.get_state().await.unwrap();

        assert_eq!(backend.dial_count(), 2);
        assert_eq!(backend.subscription_count(), 1);
    }

    #[tokio::test]
    async fn state_update_arrives_on_pump() {
        let backend = MockBackend::tiles_chain();
        let client = client(&backend);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _handle = client.on_state_updated(move |state: &TileMapState| sink.lock().push(state.clone()));

        client.set_state(&one_tile(4)).await.unwrap();

        let mut waited = 0;
        while client.pending_callbacks() == 0 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert!(seen.lock().is_empty());
        assert_eq!(client.pump(), 1);
        assert_eq!(*seen.lock(), vec![one_tile(4)]);
        assert_eq!(client.pump(), 0);
    }

    #[tokio::test]
    async fn disconnect_then_call_reconnects() {
        let backend = MockBackend::tiles_chain();
        let client = client(&backend);
        client.connect().await.unwrap();

        client.disconnect().await;
        assert!(!client.is_connected());
        assert_eq!(
            client.connection_states(),
            (ConnectionState::Disconnected, ConnectionState::Disconnected)
        );

        client.set_state(&one_tile(2)).await.unwrap();
        assert!(client.is_connected());
        assert_eq!(backend.dial_count(), 4);
        assert_eq!(backend.subscription_count(), 2);
    }
}

//! Write/read connection lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{Span, debug, info, warn};

pub use crate::error::Direction;
use crate::error::{ConnectionError, TransportError};
use crate::transport::{Connector, RpcSession};

/// The two endpoints the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPair {
    pub write_url: String,
    pub read_url: String,
}

impl EndpointPair {
    pub fn new(write_url: impl Into<String>, read_url: impl Into<String>) -> Self {
        Self {
            write_url: write_url.into(),
            read_url: read_url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// One logical connection to one endpoint.
///
/// State is readable from any thread without locking. Dials are serialized:
/// a caller arriving while another dial is in flight waits for it and shares
/// its outcome.
pub struct Connection {
    direction: Direction,
    endpoint: String,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    state: AtomicU8,
    attempts: AtomicU64,
    dial_gate: Mutex<Option<ConnectionError>>,
    session: RwLock<Option<Arc<dyn RpcSession>>>,
    span: Span,
}

impl Connection {
    pub fn new(
        direction: Direction,
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
        span: Span,
    ) -> Self {
        Self {
            direction,
            endpoint: endpoint.into(),
            connector,
            connect_timeout,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            attempts: AtomicU64::new(0),
            dial_gate: Mutex::new(None),
            session: RwLock::new(None),
            span,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn current_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.current_state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Establish the session. No-op while connected.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            return Ok(());
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut last_error = self.dial_gate.lock().await;

        if self.is_connected() {
            return Ok(());
        }
        // Someone else dialed while we were queued on the gate and failed.
        // A dial that succeeded but lost its session since is redone here.
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(err) = last_error.as_ref() {
                return Err(err.clone());
            }
        }

        self.set_state(ConnectionState::Connecting);
        info!(parent: &self.span, direction = %self.direction, endpoint = %self.endpoint, "Connecting");

        let outcome = tokio::time::timeout(self.connect_timeout, self.connector.dial(&self.endpoint)).await;
        self.attempts.fetch_add(1, Ordering::AcqRel);

        let result = match outcome {
            Ok(Ok(session)) => {
                *self.session.write() = Some(session);
                self.set_state(ConnectionState::Connected);
                info!(parent: &self.span, direction = %self.direction, "Connected");
                Ok(())
            }
            Ok(Err(e)) => Err(ConnectionError::Refused {
                direction: self.direction,
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ConnectionError::Timeout {
                direction: self.direction,
                endpoint: self.endpoint.clone(),
                timeout: self.connect_timeout,
            }),
        };

        if let Err(err) = &result {
            self.set_state(ConnectionState::Failed);
            warn!(parent: &self.span, direction = %self.direction, error = %err, "Connection attempt failed");
        }
        *last_error = result.as_ref().err().cloned();
        result
    }

    /// Tear the session down. Any event stream it fed ends.
    pub async fn disconnect(&self) {
        let _gate = self.dial_gate.lock().await;
        let session = self.session.write().take();
        self.set_state(ConnectionState::Disconnected);
        if let Some(session) = session {
            session.close().await;
            debug!(parent: &self.span, direction = %self.direction, "Disconnected");
        }
    }

    /// Transport-level failure notification. Only a live connection moves to
    /// `Failed`; an explicit disconnect stays `Disconnected`.
    pub fn mark_failed(&self, reason: &str) {
        if self
            .state
            .compare_exchange(
                ConnectionState::Connected as u8,
                ConnectionState::Failed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.session.write().take();
            warn!(parent: &self.span, direction = %self.direction, reason, "Connection lost");
        }
    }

    /// The live session, or `NotConnected`.
    pub fn session(&self) -> Result<Arc<dyn RpcSession>, ConnectionError> {
        if !self.is_connected() {
            return Err(self.not_connected());
        }
        self.session.read().clone().ok_or_else(|| self.not_connected())
    }

    /// Map a request-level transport failure into this connection's terms,
    /// marking the connection failed when the transport went away.
    pub fn transport_failure(&self, error: &TransportError) -> Option<ConnectionError> {
        match error {
            TransportError::Closed(reason) => {
                self.mark_failed(reason);
                Some(ConnectionError::Closed {
                    direction: self.direction,
                    endpoint: self.endpoint.clone(),
                    reason: reason.clone(),
                })
            }
            _ => None,
        }
    }

    fn not_connected(&self) -> ConnectionError {
        ConnectionError::NotConnected {
            direction: self.direction,
            endpoint: self.endpoint.clone(),
        }
    }
}

/// Owns the write and read connections for one client.
pub struct ConnectionManager {
    write: Arc<Connection>,
    read: Arc<Connection>,
}

impl ConnectionManager {
    pub fn new(
        endpoints: &EndpointPair,
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
        span: Span,
    ) -> Self {
        let write = Connection::new(
            Direction::Write,
            endpoints.write_url.clone(),
            connector.clone(),
            connect_timeout,
            span.clone(),
        );
        let read = Connection::new(
            Direction::Read,
            endpoints.read_url.clone(),
            connector,
            connect_timeout,
            span,
        );
        Self {
            write: Arc::new(write),
            read: Arc::new(read),
        }
    }

    /// Connect the read side, then the write side.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.read.connect().await?;
        self.write.connect().await
    }

    pub async fn disconnect(&self) {
        self.read.disconnect().await;
        self.write.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.read.is_connected() && self.write.is_connected()
    }

    pub fn write(&self) -> &Arc<Connection> {
        &self.write
    }

    pub fn read(&self) -> &Arc<Connection> {
        &self.read
    }

    pub fn states(&self) -> (ConnectionState, ConnectionState) {
        (self.write.current_state(), self.read.current_state())
    }
}

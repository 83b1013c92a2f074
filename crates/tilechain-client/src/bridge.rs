//! Event bridge: raw contract logs in, typed callbacks queued for the frame
//! loop out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy::dyn_abi::DynSolValue;
use alloy::json_abi::Event;
use alloy::primitives::{B256, Bytes};
use tracing::{Span, debug, warn};

use crate::descriptor::{ContractAbi, decode_log};
use crate::error::DecodeError;
use crate::notify::StateNotifier;
use crate::queue::CallbackSender;
use crate::transport::RawLog;

/// One contract event as received from the read connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// ABI name of the event, or the hex selector when the ABI does not know it.
    pub event_name: String,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_height: Option<u64>,
}

impl EventEnvelope {
    pub fn from_log(abi: &ContractAbi, log: RawLog) -> Self {
        let event_name = match log.topics.first() {
            Some(topic0) => abi
                .event_name(topic0)
                .map(str::to_string)
                .unwrap_or_else(|| topic0.to_string()),
            None => "<anonymous>".to_string(),
        };
        Self {
            event_name,
            topics: log.topics,
            data: log.data,
            block_height: log.block_number,
        }
    }
}

/// Receiver of raw envelopes. Called from the event delivery task.
pub trait EventSink: Send + Sync {
    fn deliver(&self, envelope: EventEnvelope);
}

/// ABI-decoded event handed to an application decoder.
#[derive(Debug)]
pub struct DecodedEvent<'a> {
    pub name: &'a str,
    pub block_height: Option<u64>,
    pub values: Vec<DynSolValue>,
}

impl DecodedEvent<'_> {
    /// The `index`-th value as a string.
    pub fn string(&self, index: usize) -> Result<&str, DecodeError> {
        match self.values.get(index) {
            Some(DynSolValue::String(s)) => Ok(s),
            Some(other) => Err(DecodeError::Shape {
                name: self.name.to_string(),
                reason: format!("value {index} is {other:?}, expected a string"),
            }),
            None => Err(DecodeError::Shape {
                name: self.name.to_string(),
                reason: format!("missing value {index}"),
            }),
        }
    }
}

type Decoder<E> = Box<dyn Fn(&DecodedEvent<'_>) -> Result<E, DecodeError> + Send + Sync>;

struct EventSchema<E> {
    event: Event,
    decode: Decoder<E>,
}

/// Decodes envelopes against an explicit name→schema map and queues one
/// notification callback per successfully decoded event.
pub struct EventBridge<E> {
    schemas: HashMap<String, EventSchema<E>>,
    queue: CallbackSender,
    notifier: StateNotifier<E>,
    delivered: AtomicU64,
    decode_failures: AtomicU64,
    ignored: AtomicU64,
    span: Span,
}

impl<E: Send + 'static> EventBridge<E> {
    pub fn new(queue: CallbackSender, notifier: StateNotifier<E>, span: Span) -> Self {
        Self {
            schemas: HashMap::new(),
            queue,
            notifier,
            delivered: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            span,
        }
    }

    /// Map event `name` of `abi` to an application decoder.
    pub fn register<F>(&mut self, abi: &ContractAbi, name: &str, decode: F) -> Result<(), DecodeError>
    where
        F: Fn(&DecodedEvent<'_>) -> Result<E, DecodeError> + Send + Sync + 'static,
    {
        let event = abi.event(name)?.clone();
        self.schemas.insert(
            name.to_string(),
            EventSchema {
                event,
                decode: Box::new(decode),
            },
        );
        Ok(())
    }

    pub fn knows(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Decode and enqueue. `Ok(false)` means the event is not registered.
    pub fn handle(&self, envelope: EventEnvelope) -> Result<bool, DecodeError> {
        let Some(schema) = self.schemas.get(&envelope.event_name) else {
            return Ok(false);
        };

        let values = decode_log(&schema.event, &envelope.topics, &envelope.data)?;
        let decoded = DecodedEvent {
            name: &envelope.event_name,
            block_height: envelope.block_height,
            values,
        };
        let value = (schema.decode)(&decoded)?;

        let notifier = self.notifier.clone();
        if !self.queue.enqueue(Box::new(move || notifier.notify(&value))) {
            debug!(parent: &self.span, event = %envelope.event_name, "Callback queue closed, dropping event");
        }
        Ok(true)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }
}

impl<E: Send + 'static> EventSink for EventBridge<E> {
    fn deliver(&self, envelope: EventEnvelope) {
        let name = envelope.event_name.clone();
        let block = envelope.block_height;
        match self.handle(envelope) {
            Ok(true) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(parent: &self.span, event = %name, block = ?block, "Event queued");
            }
            Ok(false) => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
                debug!(parent: &self.span, event = %name, "Ignoring unregistered event");
            }
            Err(error) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(parent: &self.span, event = %name, block = ?block, %error, "Dropping undecodable event");
            }
        }
    }
}

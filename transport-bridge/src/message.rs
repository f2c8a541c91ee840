//! Message model shared by the receive pipeline and the routers.

use crate::identity::TypeHandle;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One inbound message, owned by the receive pipeline for the duration of a
/// single forwarding operation.
pub struct MessageContext {
    pub message_id: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub transaction: TransportTransaction,
    pub cancellation: CancellationToken,
    pub extensions: ContextBag,
}

impl MessageContext {
    pub fn new(
        message_id: impl Into<String>,
        headers: HashMap<String, String>,
        body: Vec<u8>,
        transaction: TransportTransaction,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            headers,
            body,
            transaction,
            cancellation,
            extensions: ContextBag::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

impl Debug for MessageContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("message_id", &self.message_id)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Opaque transport-transaction handle threaded from receive to dispatch.
#[derive(Clone, Default)]
pub struct TransportTransaction {
    inner: Option<Arc<dyn Any + Send + Sync>>,
}

impl TransportTransaction {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(handle: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            inner: Some(handle),
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.as_deref().and_then(|h| h.downcast_ref())
    }
}

impl Debug for TransportTransaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportTransaction")
            .field("present", &self.inner.is_some())
            .finish()
    }
}

/// Extensible per-message context bag keyed by type.
#[derive(Default)]
pub struct ContextBag {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ContextBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }
}

/// An outgoing message built by a router.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub message_id: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(
        message_id: impl Into<String>,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            headers,
            body,
        }
    }
}

/// Destination of one transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressTag {
    /// Deliver to one concrete queue address.
    Unicast(String),
    /// Hand to the transport's multicast fabric, keyed by event type.
    Multicast(TypeHandle),
}

/// One outgoing operation: a message plus where it should go.
#[derive(Debug, Clone)]
pub struct TransportOperation {
    pub message: OutgoingMessage,
    pub destination: AddressTag,
}

impl TransportOperation {
    pub fn unicast(message: OutgoingMessage, address: impl Into<String>) -> Self {
        Self {
            message,
            destination: AddressTag::Unicast(address.into()),
        }
    }

    pub fn multicast(message: OutgoingMessage, event_type: TypeHandle) -> Self {
        Self {
            message,
            destination: AddressTag::Multicast(event_type),
        }
    }
}

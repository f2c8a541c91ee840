//! Transport contract consumed by ports.
//!
//! Concrete transports live outside this crate; the forwarding engine only
//! needs the narrow capability set below: connect, dispatch, address
//! resolution, a native-multicast capability flag, an optional subscription
//! manager and receive-loop start/stop with an async per-message handler.

use crate::addressing::EndpointInstance;
use crate::error::{BridgeError, TransportError};
use crate::identity::TypeHandle;
use crate::message::{MessageContext, TransportOperation, TransportTransaction};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Async per-message callback invoked by a transport's receive loop.
///
/// The transport owns the context for the duration of the call; the handler
/// result is the completion/failure signal for that delivery.
pub type MessageHandler =
    Arc<dyn for<'a> Fn(&'a MessageContext) -> BoxFuture<'a, Result<(), BridgeError>> + Send + Sync>;

/// Settings for one transport connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Input queue this connection receives from (and identifies as).
    pub input_queue: String,
    /// Queue that receives messages which exhausted all retries.
    pub poison_queue: String,
    /// Create missing queues on connect.
    pub auto_create_queues: bool,
    /// Identity to create queues with, when the transport supports one.
    pub auto_create_identity: Option<String>,
    /// Upper bound on concurrently handled messages; `None` = transport default.
    pub max_concurrency: Option<usize>,
    /// Dispatch-only connection; no receive loop may be started on it.
    pub send_only: bool,
}

impl ConnectionSettings {
    pub fn new(input_queue: impl Into<String>, poison_queue: impl Into<String>) -> Self {
        Self {
            input_queue: input_queue.into(),
            poison_queue: poison_queue.into(),
            auto_create_queues: false,
            auto_create_identity: None,
            max_concurrency: None,
            send_only: false,
        }
    }
}

/// Factory for transport connections.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Establishes a connection able to dispatch immediately. Receiving
    /// starts only once [`TransportConnection::start_receiving`] is called.
    async fn connect(
        &self,
        settings: ConnectionSettings,
    ) -> Result<Arc<dyn TransportConnection>, TransportError>;
}

/// Dispatch capability of a started connection.
///
/// Split out from [`TransportConnection`] so interception hooks can swap the
/// dispatcher a router uses without touching receive-side state.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Logical endpoint name of this connection (its input queue name).
    fn endpoint_name(&self) -> &str;

    /// Physical address of this connection's input queue.
    fn local_address(&self) -> &str;

    /// Translates a discovered endpoint instance to a physical address.
    fn resolve_address(&self, instance: &EndpointInstance) -> String;

    /// Dispatches a batch of outgoing operations, fire-and-confirm.
    async fn dispatch(
        &self,
        operations: Vec<TransportOperation>,
        transaction: &TransportTransaction,
    ) -> Result<(), TransportError>;
}

/// A started connection: dispatch plus receive-loop control.
#[async_trait]
pub trait TransportConnection: Dispatcher {
    /// `true` when the transport's broker fans out publishes by topic itself.
    /// Only meaningful after connect; ports select their publish/subscribe
    /// strategy from this flag.
    fn supports_native_publish(&self) -> bool;

    /// Native subscription manager, present when
    /// [`supports_native_publish`](TransportConnection::supports_native_publish)
    /// is `true`.
    fn subscription_manager(&self) -> Option<Arc<dyn SubscriptionManager>>;

    /// Starts pulling messages, invoking `handler` per delivery.
    async fn start_receiving(&self, handler: MessageHandler) -> Result<(), TransportError>;

    /// Stops pulling and waits for in-flight handlers to finish.
    async fn stop_receiving(&self) -> Result<(), TransportError>;

    /// Tears the connection down. Receiving must already be stopped.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Broker-side subscription control for natively multicast transports.
#[async_trait]
pub trait SubscriptionManager: Send + Sync {
    async fn subscribe(&self, event_type: &TypeHandle) -> Result<(), TransportError>;
    async fn unsubscribe(&self, event_type: &TypeHandle) -> Result<(), TransportError>;
}

//! One transport-attached side of a bridge or switch.
//!
//! A port owns its receiving queue, its dispatching connection and the
//! publish/subscribe infrastructure of its transport. Lifecycle:
//! Configured -> Initialized -> Receiving -> Draining -> Stopped.
//! Initialization must complete before receiving begins because the
//! publish/subscribe strategy depends on a capability of the started
//! connection that is only knowable post-connect.

use crate::addressing::{DistributionPolicy, EndpointInstances};
use crate::config::{PortConfiguration, RetrySettings};
use crate::error::{BridgeError, UnforwardableMessage};
use crate::headers;
use crate::identity::TypeRegistry;
use crate::interception::{ForwardContinuation, ForwardInterceptor};
use crate::message::MessageContext;
use crate::resilience::FailurePolicy;
use crate::routing::pubsub::{resolve_runtime, PubSubInfrastructure};
use crate::routing::reply_router::ReplyRouter;
use crate::routing::send_router::SendRouter;
use crate::routing::{subscribe_router, ForwardingTable, MessageIntent};
use crate::transport::{
    ConnectionSettings, Dispatcher, MessageHandler, MessagingTransport, TransportConnection,
};
use futures::future::BoxFuture;
use std::sync::{Arc, OnceLock};
use tracing::debug;

const PORT_TAG: &str = "Port:";

/// Routing entry invoked per received message, wired by the orchestrator.
pub(crate) type PortMessageHandler = Arc<
    dyn for<'a> Fn(&'a MessageContext) -> BoxFuture<'a, Result<(), BridgeError>> + Send + Sync,
>;

pub struct Port {
    name: String,
    transport: Arc<dyn MessagingTransport>,
    storage: Option<Arc<dyn subscription_store::SubscriptionStore>>,
    instances: Arc<EndpointInstances>,
    distribution: Arc<DistributionPolicy>,
    types: Arc<TypeRegistry>,
    interceptor: Arc<dyn ForwardInterceptor>,
    retries: RetrySettings,
    poison_queue: String,
    auto_create_queues: bool,
    auto_create_identity: Option<String>,
    max_concurrency: Option<usize>,

    send_router: SendRouter,
    reply_router: ReplyRouter,
    pubsub: PubSubInfrastructure,
    connection: OnceLock<Arc<dyn TransportConnection>>,
    side_channel: OnceLock<Option<Arc<dyn TransportConnection>>>,
    receive_handler: OnceLock<MessageHandler>,
}

impl Port {
    pub(crate) fn create(
        configuration: PortConfiguration,
        types: Arc<TypeRegistry>,
        interceptor: Arc<dyn ForwardInterceptor>,
        retries: RetrySettings,
        poison_queue: &str,
        default_auto_create: bool,
        default_identity: Option<String>,
        default_concurrency: Option<usize>,
    ) -> Self {
        let instances = configuration.instances;
        let distribution = configuration.distribution;
        Self {
            name: configuration.name,
            transport: configuration.transport,
            storage: configuration.storage,
            send_router: SendRouter::new(instances.clone(), distribution.clone()),
            reply_router: ReplyRouter::new(),
            instances,
            distribution,
            types,
            interceptor,
            retries,
            poison_queue: poison_queue.to_string(),
            auto_create_queues: configuration
                .auto_create_queues
                .unwrap_or(default_auto_create),
            auto_create_identity: configuration
                .auto_create_identity
                .or(default_identity),
            max_concurrency: configuration.max_concurrency.or(default_concurrency),
            pubsub: PubSubInfrastructure::new(),
            connection: OnceLock::new(),
            side_channel: OnceLock::new(),
            receive_handler: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn pubsub(&self) -> &PubSubInfrastructure {
        &self.pubsub
    }

    /// Dispatching side of this port; available once initialized.
    pub(crate) fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.connection().clone()
    }

    fn connection(&self) -> &Arc<dyn TransportConnection> {
        self.connection
            .get()
            .expect("port used before initialize completed")
    }

    fn connection_settings(&self, send_only: bool) -> ConnectionSettings {
        ConnectionSettings {
            input_queue: self.name.clone(),
            poison_queue: self.poison_queue.clone(),
            auto_create_queues: self.auto_create_queues,
            auto_create_identity: self.auto_create_identity.clone(),
            max_concurrency: self.max_concurrency,
            send_only,
        }
    }

    /// Connects, resolves the publish/subscribe strategy from the started
    /// connection and arms the receive pipeline. Must complete before
    /// [`start_receiving`](Port::start_receiving).
    pub(crate) async fn initialize(&self, on_message: PortMessageHandler) -> Result<(), BridgeError> {
        let connection = self
            .transport
            .connect(self.connection_settings(false))
            .await?;

        let side_channel = if connection.supports_native_publish() {
            None
        } else {
            // Control-plane dispatch for message-driven pub/sub runs on its
            // own send-only connection, started and stopped with the port.
            Some(
                self.transport
                    .connect(self.connection_settings(true))
                    .await?,
            )
        };

        let runtime = resolve_runtime(
            &connection,
            side_channel
                .clone()
                .map(|channel| -> Arc<dyn Dispatcher> { channel }),
            self.storage.clone(),
            self.types.clone(),
            self.instances.clone(),
            self.distribution.clone(),
        )?;
        self.pubsub.set(runtime);

        let policy = Arc::new(FailurePolicy::new(
            &self.name,
            self.retries.clone(),
            connection.clone(),
            &self.poison_queue,
        ));
        self.receive_handler
            .set(policy.wrap(on_message))
            .map_err(|_| {
                BridgeError::Configuration(format!("port '{}' initialized twice", self.name))
            })?;
        self.connection.set(connection).map_err(|_| {
            BridgeError::Configuration(format!("port '{}' initialized twice", self.name))
        })?;
        self.side_channel.set(side_channel).ok();

        debug!("{PORT_TAG} '{}' initialized", self.name);
        Ok(())
    }

    pub(crate) async fn start_receiving(&self) -> Result<(), BridgeError> {
        let handler = self
            .receive_handler
            .get()
            .expect("port started before initialize completed")
            .clone();
        self.connection().start_receiving(handler).await?;
        debug!("{PORT_TAG} '{}' receiving", self.name);
        Ok(())
    }

    /// Stops pulling new messages and drains in-flight handlers.
    pub(crate) async fn stop_receiving(&self) -> Result<(), BridgeError> {
        self.connection().stop_receiving().await?;
        debug!("{PORT_TAG} '{}' drained", self.name);
        Ok(())
    }

    /// Tears down the dispatching connection and the side channel.
    pub(crate) async fn stop(&self) -> Result<(), BridgeError> {
        if let Some(Some(side_channel)) = self.side_channel.get() {
            side_channel.close().await?;
        }
        self.connection().close().await?;
        debug!("{PORT_TAG} '{}' stopped", self.name);
        Ok(())
    }

    /// Routes one already-classified inbound message out of this port,
    /// passing through the configured interception hook.
    ///
    /// `source` is the port the message arrived on; its subscription storage
    /// records subscribers, its dispatcher is offered to the interceptor as
    /// the local dispatch.
    pub(crate) async fn forward(
        &self,
        source: &Port,
        context: &MessageContext,
        forwarding: &ForwardingTable,
    ) -> Result<(), BridgeError> {
        let next: ForwardContinuation<'_> = Box::new(move |dispatch| {
            Box::pin(async move { self.route(source, context, forwarding, dispatch).await })
        });
        self.interceptor
            .intercept(
                source.name(),
                context,
                source.dispatcher(),
                self.dispatcher(),
                next,
            )
            .await
    }

    async fn route(
        &self,
        source: &Port,
        context: &MessageContext,
        forwarding: &ForwardingTable,
        dispatch: Arc<dyn Dispatcher>,
    ) -> Result<(), BridgeError> {
        match MessageIntent::classify(context) {
            Some(MessageIntent::Send) => {
                self.send_router
                    .route(context, dispatch.as_ref(), forwarding, Some(source.name()))
                    .await
            }
            Some(MessageIntent::Publish) => {
                self.pubsub
                    .runtime()
                    .publish_router
                    .route(context, dispatch.as_ref())
                    .await
            }
            Some(intent @ (MessageIntent::Subscribe | MessageIntent::Unsubscribe)) => {
                subscribe_router::route(
                    context,
                    intent,
                    self.pubsub.runtime().forwarder.as_ref(),
                    source.pubsub().runtime().storage.as_ref(),
                    forwarding,
                )
                .await
            }
            Some(MessageIntent::Reply) => {
                self.reply_router.route(context, dispatch.as_ref()).await
            }
            None => Err(UnforwardableMessage::new(format!(
                "unroutable message intent: {:?}",
                context.header(headers::MESSAGE_INTENT).unwrap_or("<none>")
            ))
            .into()),
        }
    }
}

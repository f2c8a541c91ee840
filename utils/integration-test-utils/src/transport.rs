//! In-memory implementation of the transport contract.

use crate::broker::InMemoryBroker;
use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use transport_bridge::{
    AddressTag, ConnectionSettings, Dispatcher, MessageContext, MessageHandler,
    MessagingTransport, SubscriptionManager, TransportConnection, TransportError,
    TransportOperation, TransportTransaction, TypeHandle,
};

const DEFAULT_CONCURRENCY: usize = 64;

/// In-memory transport over a shared broker. Two flavors exist: the
/// message-driven flavor only understands unicast queues; the native flavor
/// additionally offers a broker-side multicast fabric with a subscription
/// manager.
pub struct InMemoryTransport {
    broker: Arc<InMemoryBroker>,
    native_publish: bool,
}

impl InMemoryTransport {
    pub fn message_driven(broker: Arc<InMemoryBroker>) -> Self {
        Self {
            broker,
            native_publish: false,
        }
    }

    pub fn native(broker: Arc<InMemoryBroker>) -> Self {
        Self {
            broker,
            native_publish: true,
        }
    }

    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl MessagingTransport for InMemoryTransport {
    async fn connect(
        &self,
        settings: ConnectionSettings,
    ) -> Result<Arc<dyn TransportConnection>, TransportError> {
        if settings.auto_create_queues {
            self.broker.create_queue(&settings.input_queue);
            self.broker.create_queue(&settings.poison_queue);
        } else if !self.broker.queue_exists(&settings.input_queue) {
            return Err(TransportError::UnknownQueue(settings.input_queue));
        }
        Ok(Arc::new(InMemoryConnection {
            broker: self.broker.clone(),
            settings,
            native_publish: self.native_publish,
            receive_loop: StdMutex::new(None),
        }))
    }
}

struct ReceiveLoop {
    token: CancellationToken,
    join: JoinHandle<()>,
}

struct InMemoryConnection {
    broker: Arc<InMemoryBroker>,
    settings: ConnectionSettings,
    native_publish: bool,
    receive_loop: StdMutex<Option<ReceiveLoop>>,
}

#[async_trait]
impl Dispatcher for InMemoryConnection {
    fn endpoint_name(&self) -> &str {
        &self.settings.input_queue
    }

    fn local_address(&self) -> &str {
        &self.settings.input_queue
    }

    fn resolve_address(&self, instance: &transport_bridge::addressing::EndpointInstance) -> String {
        match &instance.discriminator {
            Some(discriminator) => format!("{}-{discriminator}", instance.endpoint),
            None => instance.endpoint.clone(),
        }
    }

    async fn dispatch(
        &self,
        operations: Vec<TransportOperation>,
        _transaction: &TransportTransaction,
    ) -> Result<(), TransportError> {
        for operation in operations {
            match &operation.destination {
                AddressTag::Unicast(address) => {
                    self.broker
                        .send(address, &operation.message, self.settings.auto_create_queues)?;
                }
                AddressTag::Multicast(event_type) => {
                    self.broker.publish(
                        event_type.id(),
                        &operation.message,
                        self.settings.auto_create_queues,
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TransportConnection for InMemoryConnection {
    fn supports_native_publish(&self) -> bool {
        self.native_publish
    }

    fn subscription_manager(&self) -> Option<Arc<dyn SubscriptionManager>> {
        self.native_publish.then(|| {
            Arc::new(InMemorySubscriptionManager {
                broker: self.broker.clone(),
                queue_name: self.settings.input_queue.clone(),
            }) as Arc<dyn SubscriptionManager>
        })
    }

    async fn start_receiving(&self, handler: MessageHandler) -> Result<(), TransportError> {
        if self.settings.send_only {
            return Err(TransportError::Unsupported(
                "send-only connection cannot receive".to_string(),
            ));
        }
        let mut receiver = self.broker.take_receiver(&self.settings.input_queue)?;

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let broker = self.broker.clone();
        let queue_name = self.settings.input_queue.clone();
        let concurrency = self.settings.max_concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    received = receiver.recv() => {
                        let Some(message) = received else { break };
                        let permit = semaphore
                            .clone()
                            .acquire_owned()
                            .await
                            .expect("receive semaphore closed");
                        let handler = handler.clone();
                        // Stop drains in-flight handlers rather than
                        // cancelling them; each message gets its own token.
                        let message_token = CancellationToken::new();
                        let queue_name = queue_name.clone();
                        tokio::spawn(async move {
                            let context = MessageContext::new(
                                message.message_id,
                                message.headers,
                                message.body,
                                TransportTransaction::none(),
                                message_token,
                            );
                            if let Err(err) = handler(&context).await {
                                warn!(
                                    "in-memory transport: handler for queue '{queue_name}' failed: {err}"
                                );
                            }
                            drop(permit);
                        });
                    }
                }
            }
            // Drain: wait until every in-flight handler released its permit.
            let _ = semaphore.acquire_many(concurrency as u32).await;
            broker.restore_receiver(&queue_name, receiver);
        });

        let mut receive_loop = self.receive_loop.lock().expect("receive loop poisoned");
        if receive_loop.is_some() {
            token.cancel();
            return Err(TransportError::Other(
                "connection is already receiving".to_string(),
            ));
        }
        *receive_loop = Some(ReceiveLoop { token, join });
        Ok(())
    }

    async fn stop_receiving(&self) -> Result<(), TransportError> {
        let stopped = self
            .receive_loop
            .lock()
            .expect("receive loop poisoned")
            .take();
        if let Some(receive_loop) = stopped {
            receive_loop.token.cancel();
            receive_loop
                .join
                .await
                .map_err(|err| TransportError::Other(format!("receive loop panicked: {err}")))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.stop_receiving().await
    }
}

struct InMemorySubscriptionManager {
    broker: Arc<InMemoryBroker>,
    queue_name: String,
}

#[async_trait]
impl SubscriptionManager for InMemorySubscriptionManager {
    async fn subscribe(&self, event_type: &TypeHandle) -> Result<(), TransportError> {
        self.broker.subscribe_topic(event_type.id(), &self.queue_name);
        Ok(())
    }

    async fn unsubscribe(&self, event_type: &TypeHandle) -> Result<(), TransportError> {
        self.broker
            .unsubscribe_topic(event_type.id(), &self.queue_name);
        Ok(())
    }
}

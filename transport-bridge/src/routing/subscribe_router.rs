//! Routing strategy for Subscribe/Unsubscribe control messages.
//!
//! A subscription message has two sequential effects: the (subscriber, type)
//! pair is recorded in the inbound side's subscription storage, then a
//! translated request is forwarded toward the publisher side. Forwarding is
//! transport-shaped: message-driven transports send a routed control message
//! through the port's side channel, natively multicast transports call the
//! broker's subscription manager directly.

use crate::addressing::EndpointInstances;
use crate::error::{BridgeError, UnforwardableMessage};
use crate::headers;
use crate::identity::TypeRegistry;
use crate::message::{MessageContext, OutgoingMessage, TransportOperation, TransportTransaction};
use crate::routing::{type_full_name, ForwardingTable, MessageIntent};
use crate::transport::{Dispatcher, SubscriptionManager};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use subscription_store::{MessageType, Subscriber, SubscriptionStore};
use tracing::debug;

const SUBSCRIBE_ROUTER_TAG: &str = "SubscribeRouter:";

pub(crate) async fn route(
    context: &MessageContext,
    intent: MessageIntent,
    forwarder: &dyn SubscriptionForwarder,
    storage: &dyn SubscriptionStore,
    forwarding: &ForwardingTable,
) -> Result<(), BridgeError> {
    if intent != MessageIntent::Subscribe && intent != MessageIntent::Unsubscribe {
        return Err(UnforwardableMessage::new(
            "subscription messages need to have intent set to Subscribe/Unsubscribe",
        )
        .into());
    }

    let message_type = context
        .header(headers::SUBSCRIPTION_MESSAGE_TYPE)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            UnforwardableMessage::new(format!(
                "message intent is {intent}, but the '{}' header is missing",
                headers::SUBSCRIPTION_MESSAGE_TYPE
            ))
        })?;

    let publisher_endpoint = context
        .header(headers::DESTINATION_ENDPOINT)
        .ok_or_else(|| {
            UnforwardableMessage::new(format!(
                "subscription message does not contain the '{}' header",
                headers::DESTINATION_ENDPOINT
            ))
        })?;

    let subscriber = subscriber_from(context)?;
    let stored_type = MessageType::new(type_full_name(message_type));

    debug!(
        "{SUBSCRIBE_ROUTER_TAG} {intent} from {} for {}",
        subscriber.transport_address, stored_type
    );

    match intent {
        MessageIntent::Subscribe => {
            storage.subscribe(&subscriber, &stored_type).await?;
            forwarder
                .forward_subscribe(context, &subscriber, publisher_endpoint, message_type, forwarding)
                .await
        }
        _ => {
            storage.unsubscribe(&subscriber, &stored_type).await?;
            forwarder
                .forward_unsubscribe(context, &subscriber, publisher_endpoint, message_type, forwarding)
                .await
        }
    }
}

/// Native subscriptions carry an explicit subscriber address/endpoint pair;
/// message-driven ones fall back to the reply-to address.
fn subscriber_from(context: &MessageContext) -> Result<Subscriber, UnforwardableMessage> {
    if let Some(address) = context.header(headers::SUBSCRIBER_TRANSPORT_ADDRESS) {
        let endpoint = context
            .header(headers::SUBSCRIBER_ENDPOINT)
            .ok_or_else(|| {
                UnforwardableMessage::new(format!(
                    "subscription message carries '{}' but not '{}'",
                    headers::SUBSCRIBER_TRANSPORT_ADDRESS,
                    headers::SUBSCRIBER_ENDPOINT
                ))
            })?;
        return Ok(Subscriber::new(address, Some(endpoint.to_string())));
    }
    match context.header(headers::REPLY_TO_ADDRESS) {
        Some(reply_to) => Ok(Subscriber::new(reply_to, None)),
        None => Err(UnforwardableMessage::new(
            "subscription message arrived without a valid reply-to address",
        )),
    }
}

/// Forwards a translated subscribe/unsubscribe toward the publisher side.
#[async_trait]
pub trait SubscriptionForwarder: Send + Sync {
    async fn forward_subscribe(
        &self,
        context: &MessageContext,
        subscriber: &Subscriber,
        publisher_endpoint: &str,
        message_type: &str,
        forwarding: &ForwardingTable,
    ) -> Result<(), BridgeError>;

    async fn forward_unsubscribe(
        &self,
        context: &MessageContext,
        subscriber: &Subscriber,
        publisher_endpoint: &str,
        message_type: &str,
        forwarding: &ForwardingTable,
    ) -> Result<(), BridgeError>;
}

/// Sends a routed Subscribe/Unsubscribe control message toward the resolved
/// publisher endpoint address(es) through the port's side channel, honoring
/// the forwarding table's publisher next hops exactly as the send router
/// honors its own table.
pub(crate) struct MessageDrivenSubscriptionForwarder {
    instances: Arc<EndpointInstances>,
    control_dispatcher: Arc<dyn Dispatcher>,
}

impl MessageDrivenSubscriptionForwarder {
    pub(crate) fn new(
        instances: Arc<EndpointInstances>,
        control_dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            instances,
            control_dispatcher,
        }
    }

    async fn send(
        &self,
        context: &MessageContext,
        subscriber: &Subscriber,
        publisher_endpoint: &str,
        message_type: &str,
        intent: MessageIntent,
        forwarding: &ForwardingTable,
    ) -> Result<(), BridgeError> {
        let full_name = type_full_name(message_type);

        let operations = match forwarding.publisher_destinations(context, full_name)? {
            Some(next_hops) => {
                let mut operations = Vec::new();
                for next_hop in &next_hops {
                    for mut operation in
                        self.build_operations(subscriber, next_hop, message_type, intent)
                    {
                        // The next hop needs to know the eventual publisher.
                        operation.message.headers.insert(
                            headers::DESTINATION_ENDPOINT.to_string(),
                            publisher_endpoint.to_string(),
                        );
                        operations.push(operation);
                    }
                }
                operations
            }
            None => self.build_operations(subscriber, publisher_endpoint, message_type, intent),
        };

        self.control_dispatcher
            .dispatch(operations, &TransportTransaction::none())
            .await?;
        Ok(())
    }

    /// One control message per discovered instance of the next hop, stamped
    /// with this port as the subscriber so the publisher replies here.
    fn build_operations(
        &self,
        subscriber: &Subscriber,
        next_hop_endpoint: &str,
        message_type: &str,
        intent: MessageIntent,
    ) -> Vec<TransportOperation> {
        let mut control_headers = HashMap::new();
        control_headers.insert(headers::MESSAGE_INTENT.to_string(), intent.to_string());
        control_headers.insert(
            headers::SUBSCRIPTION_MESSAGE_TYPE.to_string(),
            message_type.to_string(),
        );
        control_headers.insert(
            headers::REPLY_TO_ADDRESS.to_string(),
            self.control_dispatcher.local_address().to_string(),
        );
        control_headers.insert(
            headers::SUBSCRIBER_TRANSPORT_ADDRESS.to_string(),
            self.control_dispatcher.local_address().to_string(),
        );
        control_headers.insert(
            headers::SUBSCRIBER_ENDPOINT.to_string(),
            self.control_dispatcher.endpoint_name().to_string(),
        );
        let now = chrono::Utc::now().to_rfc3339();
        control_headers.insert(headers::TIME_SENT.to_string(), now.clone());
        control_headers.insert(
            headers::RESUBSCRIPTION_ID.to_string(),
            uuid::Uuid::new_v4().to_string(),
        );
        control_headers.insert(headers::RESUBSCRIPTION_TIMESTAMP.to_string(), now);

        self.instances
            .find(next_hop_endpoint)
            .iter()
            .map(|instance| {
                let address = self.control_dispatcher.resolve_address(instance);
                debug!(
                    "{SUBSCRIBE_ROUTER_TAG} sending {intent} request for {message_type} to {address} on behalf of {}",
                    subscriber.transport_address
                );
                TransportOperation::unicast(
                    OutgoingMessage::new(
                        uuid::Uuid::new_v4().to_string(),
                        control_headers.clone(),
                        Vec::new(),
                    ),
                    address,
                )
            })
            .collect()
    }
}

#[async_trait]
impl SubscriptionForwarder for MessageDrivenSubscriptionForwarder {
    async fn forward_subscribe(
        &self,
        context: &MessageContext,
        subscriber: &Subscriber,
        publisher_endpoint: &str,
        message_type: &str,
        forwarding: &ForwardingTable,
    ) -> Result<(), BridgeError> {
        self.send(
            context,
            subscriber,
            publisher_endpoint,
            message_type,
            MessageIntent::Subscribe,
            forwarding,
        )
        .await
    }

    async fn forward_unsubscribe(
        &self,
        context: &MessageContext,
        subscriber: &Subscriber,
        publisher_endpoint: &str,
        message_type: &str,
        forwarding: &ForwardingTable,
    ) -> Result<(), BridgeError> {
        self.send(
            context,
            subscriber,
            publisher_endpoint,
            message_type,
            MessageIntent::Unsubscribe,
            forwarding,
        )
        .await
    }
}

/// Translates the subscription into a broker-side call on the native
/// transport's subscription manager, keyed by the resolved type handle.
pub(crate) struct NativeSubscriptionForwarder {
    manager: Arc<dyn SubscriptionManager>,
    types: Arc<TypeRegistry>,
}

impl NativeSubscriptionForwarder {
    pub(crate) fn new(manager: Arc<dyn SubscriptionManager>, types: Arc<TypeRegistry>) -> Self {
        Self { manager, types }
    }
}

#[async_trait]
impl SubscriptionForwarder for NativeSubscriptionForwarder {
    async fn forward_subscribe(
        &self,
        _context: &MessageContext,
        _subscriber: &Subscriber,
        _publisher_endpoint: &str,
        message_type: &str,
        _forwarding: &ForwardingTable,
    ) -> Result<(), BridgeError> {
        let event_type = self.types.resolve(message_type)?;
        self.manager.subscribe(&event_type).await?;
        Ok(())
    }

    async fn forward_unsubscribe(
        &self,
        _context: &MessageContext,
        _subscriber: &Subscriber,
        _publisher_endpoint: &str,
        message_type: &str,
        _forwarding: &ForwardingTable,
    ) -> Result<(), BridgeError> {
        let event_type = self.types.resolve(message_type)?;
        self.manager.unsubscribe(&event_type).await?;
        Ok(())
    }
}

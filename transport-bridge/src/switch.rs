//! N-port switch orchestrator.

use crate::correlation;
use crate::error::{BridgeError, UnforwardableMessage};
use crate::headers;
use crate::message::MessageContext;
use crate::port::{Port, PortMessageHandler};
use crate::routing::{ForwardingTable, MessageIntent};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const SWITCH_TAG: &str = "Switch:";

/// Generalizes the two-sided bridge to N ports routed by a port table.
///
/// Sends and subscriptions resolve their destination port from the explicit
/// destination-port header or from the endpoint-to-port table; publishes fan
/// out to every port except the incoming one; replies recover the origin
/// port from the `port` field of the correlation bundle, so the switch holds
/// no per-endpoint session state. Built via [`crate::SwitchConfiguration`].
pub struct Switch {
    inner: Arc<SwitchInner>,
}

struct SwitchInner {
    ports: HashMap<String, Arc<Port>>,
    port_table: HashMap<String, String>,
    forwarding: ForwardingTable,
}

impl Switch {
    pub(crate) fn new(ports: Vec<Port>, port_table: HashMap<String, String>) -> Self {
        Self {
            inner: Arc::new(SwitchInner {
                ports: ports
                    .into_iter()
                    .map(|port| (port.name().to_string(), Arc::new(port)))
                    .collect(),
                port_table,
                forwarding: ForwardingTable::new(),
            }),
        }
    }

    pub async fn start(&self) -> Result<(), BridgeError> {
        try_join_all(self.inner.ports.values().map(|port| {
            port.initialize(Self::forward_from(self.inner.clone(), port.name().to_string()))
        }))
        .await?;
        try_join_all(self.inner.ports.values().map(|port| port.start_receiving())).await?;
        info!("{SWITCH_TAG} started with {} port(s)", self.inner.ports.len());
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), BridgeError> {
        try_join_all(self.inner.ports.values().map(|port| port.stop_receiving())).await?;
        try_join_all(self.inner.ports.values().map(|port| port.stop())).await?;
        info!("{SWITCH_TAG} stopped");
        Ok(())
    }

    fn forward_from(inner: Arc<SwitchInner>, incoming_port: String) -> PortMessageHandler {
        use futures::future::BoxFuture;
        Arc::new(
            move |context: &MessageContext| -> BoxFuture<'_, Result<(), BridgeError>> {
                let inner = inner.clone();
                let incoming_port = incoming_port.clone();
                Box::pin(async move { inner.forward(&incoming_port, context).await })
            },
        )
    }
}

impl SwitchInner {
    async fn forward(
        &self,
        incoming_port: &str,
        context: &MessageContext,
    ) -> Result<(), BridgeError> {
        let source = self
            .ports
            .get(incoming_port)
            .expect("message received on an unknown port");

        match MessageIntent::classify(context) {
            Some(MessageIntent::Send | MessageIntent::Subscribe | MessageIntent::Unsubscribe) => {
                let destination = self.destination_port(context)?;
                debug!(
                    "{SWITCH_TAG} routing message {} from '{incoming_port}' to '{}'",
                    context.message_id,
                    destination.name()
                );
                destination.forward(source, context, &self.forwarding).await
            }
            Some(MessageIntent::Publish) => {
                try_join_all(
                    self.ports
                        .values()
                        .filter(|port| port.name() != incoming_port)
                        .map(|port| port.forward(source, context, &self.forwarding)),
                )
                .await?;
                Ok(())
            }
            Some(MessageIntent::Reply) => {
                let destination = self.reply_destination_port(context)?;
                destination.forward(source, context, &self.forwarding).await
            }
            None => Err(UnforwardableMessage::new(format!(
                "unroutable message intent: {:?}",
                context.header(headers::MESSAGE_INTENT).unwrap_or("<none>")
            ))
            .into()),
        }
    }

    /// Explicit destination-port header first, then the endpoint-to-port
    /// table keyed by the destination-endpoint header.
    fn destination_port(&self, context: &MessageContext) -> Result<&Arc<Port>, BridgeError> {
        let port_name = match context.header(headers::DESTINATION_PORT) {
            Some(port_name) => port_name.to_string(),
            None => {
                let Some(endpoint) = context.header(headers::DESTINATION_ENDPOINT) else {
                    return Err(UnforwardableMessage::new(format!(
                        "the message contains neither the '{}' header nor the '{}' header",
                        headers::DESTINATION_PORT,
                        headers::DESTINATION_ENDPOINT
                    ))
                    .into());
                };
                self.port_table.get(endpoint).cloned().ok_or_else(|| {
                    UnforwardableMessage::new(format!(
                        "the message does not contain the '{}' header and the port table has no entry for endpoint '{endpoint}'",
                        headers::DESTINATION_PORT
                    ))
                })?
            }
        };
        self.port_by_name(&port_name)
    }

    /// The origin port travels in the correlation bundle, not in any table:
    /// the reply's logical destination endpoint may be unknown to the switch.
    fn reply_destination_port(&self, context: &MessageContext) -> Result<&Arc<Port>, BridgeError> {
        let Some(correlation_id) = context.header(headers::CORRELATION_ID) else {
            return Err(UnforwardableMessage::new(format!(
                "the reply has to contain a '{}' header set by the bridge when sending out the initial message",
                headers::CORRELATION_ID
            ))
            .into());
        };

        let mut port_name = None;
        correlation::decode(correlation_id, |tag, value| {
            if tag == correlation::TAG_PORT {
                port_name = Some(value.to_string());
            }
        })?;

        let Some(port_name) = port_name else {
            return Err(UnforwardableMessage::new(
                "the reply message does not contain the 'port' correlation parameter required to route the message",
            )
            .into());
        };
        self.port_by_name(&port_name)
    }

    fn port_by_name(&self, port_name: &str) -> Result<&Arc<Port>, BridgeError> {
        self.ports.get(port_name).ok_or_else(|| {
            UnforwardableMessage::new(format!("port '{port_name}' is not configured")).into()
        })
    }
}

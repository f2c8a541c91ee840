//! Two-port bridge orchestrator.

use crate::error::BridgeError;
use crate::port::{Port, PortMessageHandler};
use crate::routing::ForwardingTable;
use std::sync::Arc;
use tracing::{debug, info};

const BRIDGE_TAG: &str = "Bridge:";

/// Connects exactly two transports, forwarding every message received on one
/// side out of the other.
///
/// The inter-bridge forwarding table applies only in the left-to-right
/// direction; replies and native responses flow right-to-left
/// unconditionally. Built via [`crate::BridgeConfiguration`].
pub struct Bridge {
    left: Arc<Port>,
    right: Arc<Port>,
    forwarding: Arc<ForwardingTable>,
}

impl Bridge {
    pub(crate) fn new(left: Port, right: Port, forwarding: ForwardingTable) -> Self {
        Self {
            left: Arc::new(left),
            right: Arc::new(right),
            forwarding: Arc::new(forwarding),
        }
    }

    /// Initializes both ports (pub/sub infrastructure resolved, side
    /// channels connected) before either receiver starts pulling, so
    /// publish/subscribe routing is resolvable before any message arrives.
    pub async fn start(&self) -> Result<(), BridgeError> {
        self.left
            .initialize(Self::forward_into(
                self.right.clone(),
                self.left.clone(),
                self.forwarding.clone(),
            ))
            .await?;
        self.right
            .initialize(Self::forward_into(
                self.left.clone(),
                self.right.clone(),
                // Right-to-left traffic is never subject to the forwarding
                // table override.
                Arc::new(ForwardingTable::new()),
            ))
            .await?;

        self.left.start_receiving().await?;
        self.right.start_receiving().await?;
        info!(
            "{BRIDGE_TAG} started, ports '{}' <-> '{}'",
            self.left.name(),
            self.right.name()
        );
        Ok(())
    }

    /// Drains both receivers before tearing down either dispatcher, so no
    /// in-flight forward loses the connection it dispatches on.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        self.left.stop_receiving().await?;
        self.right.stop_receiving().await?;
        self.left.stop().await?;
        self.right.stop().await?;
        info!("{BRIDGE_TAG} stopped");
        Ok(())
    }

    fn forward_into(
        destination: Arc<Port>,
        source: Arc<Port>,
        forwarding: Arc<ForwardingTable>,
    ) -> PortMessageHandler {
        use crate::message::MessageContext;
        use futures::future::BoxFuture;
        Arc::new(move |context: &MessageContext| -> BoxFuture<'_, Result<(), BridgeError>> {
            let destination = destination.clone();
            let source = source.clone();
            let forwarding = forwarding.clone();
            Box::pin(async move {
                debug!(
                    "{BRIDGE_TAG} forwarding message {} from '{}' to '{}'",
                    context.message_id,
                    source.name(),
                    destination.name()
                );
                destination
                    .forward(source.as_ref(), context, forwarding.as_ref())
                    .await
            })
        })
    }
}

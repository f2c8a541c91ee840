//! Inter-bridge forwarding table.
//!
//! Lets one bridge forward sends, publishes and subscriptions to another
//! bridge instance instead of the final endpoint, enabling multi-hop
//! topologies. Routing callbacks run before the static tables and may
//! resolve next hops from arbitrary header content (site-based routing).

use crate::error::UnforwardableMessage;
use crate::message::MessageContext;
use std::collections::HashMap;
use std::sync::Arc;

/// Dynamic next-hop resolution keyed by header content.
///
/// Returns `Ok(None)` when the callback does not apply to this message.
pub type RoutingCallback = Arc<
    dyn Fn(&MessageContext, &str) -> Result<Option<Vec<String>>, UnforwardableMessage>
        + Send
        + Sync,
>;

/// Read-only after configuration; consulted per forwarded message.
#[derive(Default, Clone)]
pub struct ForwardingTable {
    send_routes: HashMap<String, Vec<String>>,
    publisher_routes: HashMap<String, Vec<String>>,
    callbacks: Vec<RoutingCallback>,
}

impl ForwardingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes sent messages of this type to a designated next hop on the
    /// other side of the bridge. Repeated calls for the same type fan out.
    pub fn forward_to(&mut self, message_type: impl Into<String>, next_hop: impl Into<String>) {
        self.send_routes
            .entry(message_type.into())
            .or_default()
            .push(next_hop.into());
    }

    /// Registers a designated next hop as the publisher of this event type;
    /// used as the destination of forwarded subscribe messages.
    pub fn register_publisher(
        &mut self,
        event_type: impl Into<String>,
        next_hop: impl Into<String>,
    ) {
        self.publisher_routes
            .entry(event_type.into())
            .or_default()
            .push(next_hop.into());
    }

    pub fn register_routing_callback(&mut self, callback: RoutingCallback) {
        self.callbacks.push(callback);
    }

    /// Next hops for a sent message of the given root type, callbacks first.
    pub(crate) fn send_destinations(
        &self,
        context: &MessageContext,
        type_full_name: &str,
    ) -> Result<Option<Vec<String>>, UnforwardableMessage> {
        self.resolve(context, type_full_name, &self.send_routes)
    }

    /// Next hops for a forwarded subscription of the given event type.
    pub(crate) fn publisher_destinations(
        &self,
        context: &MessageContext,
        type_full_name: &str,
    ) -> Result<Option<Vec<String>>, UnforwardableMessage> {
        self.resolve(context, type_full_name, &self.publisher_routes)
    }

    fn resolve(
        &self,
        context: &MessageContext,
        type_full_name: &str,
        table: &HashMap<String, Vec<String>>,
    ) -> Result<Option<Vec<String>>, UnforwardableMessage> {
        for callback in &self.callbacks {
            if let Some(hops) = callback(context, type_full_name)? {
                return Ok(Some(hops));
            }
        }
        Ok(table.get(type_full_name).cloned())
    }
}

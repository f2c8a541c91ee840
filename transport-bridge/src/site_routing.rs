//! Site-based routing between bridges.
//!
//! Messages stamped with a destination-sites header are forwarded to the
//! bridge address mapped for each named site, via a routing callback that
//! runs before the forwarding table's static entries.

use crate::error::UnforwardableMessage;
use crate::headers;
use crate::routing::ForwardingTable;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Site name to bridge-endpoint table, populated after registration.
pub struct SiteRoutingTable {
    table: Arc<RwLock<HashMap<String, String>>>,
}

impl SiteRoutingTable {
    /// Maps a remote site to its bridge endpoint.
    pub fn add_site(&self, site_name: impl Into<String>, bridge_endpoint: impl Into<String>) {
        self.table
            .write()
            .expect("site routing table poisoned")
            .insert(site_name.into(), bridge_endpoint.into());
    }
}

/// Registers the destination-sites routing callback on a forwarding table
/// and returns the site table to populate.
pub fn configure_sites(forwarding: &mut ForwardingTable) -> SiteRoutingTable {
    let table: Arc<RwLock<HashMap<String, String>>> = Arc::new(RwLock::new(HashMap::new()));
    let callback_table = table.clone();
    forwarding.register_routing_callback(Arc::new(move |context, _message_type| {
        let Some(sites) = context.header(headers::DESTINATION_SITES) else {
            return Ok(None);
        };
        let mapped = callback_table.read().expect("site routing table poisoned");
        sites
            .split(';')
            .map(str::trim)
            .filter(|site| !site.is_empty())
            .map(|site| {
                mapped.get(site).cloned().ok_or_else(|| {
                    UnforwardableMessage::new(format!(
                        "site '{site}' is not mapped in bridge forwarding configuration"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }));
    SiteRoutingTable { table }
}

#[cfg(test)]
mod tests {
    use super::configure_sites;
    use crate::headers;
    use crate::message::{MessageContext, TransportTransaction};
    use crate::routing::ForwardingTable;
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    fn context_with_sites(sites: Option<&str>) -> MessageContext {
        let mut message_headers = HashMap::new();
        if let Some(sites) = sites {
            message_headers.insert(headers::DESTINATION_SITES.to_string(), sites.to_string());
        }
        MessageContext::new(
            "m1",
            message_headers,
            Vec::new(),
            TransportTransaction::none(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn mapped_sites_resolve_to_bridge_endpoints() {
        let mut forwarding = ForwardingTable::new();
        let sites = configure_sites(&mut forwarding);
        sites.add_site("dc-east", "bridge-east");
        sites.add_site("dc-west", "bridge-west");

        let hops = forwarding
            .send_destinations(&context_with_sites(Some("dc-east;dc-west")), "Any.Type")
            .unwrap()
            .unwrap();
        assert_eq!(hops, vec!["bridge-east", "bridge-west"]);
    }

    #[test]
    fn messages_without_sites_fall_through() {
        let mut forwarding = ForwardingTable::new();
        let _sites = configure_sites(&mut forwarding);
        forwarding.forward_to("Any.Type", "static-hop");

        let hops = forwarding
            .send_destinations(&context_with_sites(None), "Any.Type")
            .unwrap()
            .unwrap();
        assert_eq!(hops, vec!["static-hop"]);
    }

    #[test]
    fn unmapped_site_is_unforwardable() {
        let mut forwarding = ForwardingTable::new();
        let sites = configure_sites(&mut forwarding);
        sites.add_site("dc-east", "bridge-east");

        let err = forwarding
            .send_destinations(&context_with_sites(Some("dc-unknown")), "Any.Type")
            .unwrap_err();
        assert!(err.reason().contains("dc-unknown"));
    }
}

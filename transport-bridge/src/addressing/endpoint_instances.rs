//! Logical endpoint name to instance discovery.

use std::collections::HashMap;
use std::sync::RwLock;

/// One discovered instance of a logical endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointInstance {
    pub endpoint: String,
    /// Distinguishes scaled-out instances of the same endpoint.
    pub discriminator: Option<String>,
}

impl EndpointInstance {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            discriminator: None,
        }
    }

    pub fn with_discriminator(
        endpoint: impl Into<String>,
        discriminator: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            discriminator: Some(discriminator.into()),
        }
    }
}

/// Registry of statically configured endpoint instances.
///
/// Configured before start; lookups for unregistered endpoints fall back to a
/// single instance named after the endpoint itself.
#[derive(Default)]
pub struct EndpointInstances {
    instances: RwLock<HashMap<String, Vec<EndpointInstance>>>,
}

impl EndpointInstances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, endpoint: &str, instance: EndpointInstance) {
        self.instances
            .write()
            .expect("endpoint instance registry poisoned")
            .entry(endpoint.to_string())
            .or_default()
            .push(instance);
    }

    pub fn find(&self, endpoint: &str) -> Vec<EndpointInstance> {
        let instances = self
            .instances
            .read()
            .expect("endpoint instance registry poisoned");
        match instances.get(endpoint) {
            Some(found) if !found.is_empty() => found.clone(),
            _ => vec![EndpointInstance::new(endpoint)],
        }
    }
}

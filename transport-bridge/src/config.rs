//! Configuration surface for bridges, switches and their ports.
//!
//! The builder types carry the non-serializable collaborators (transports,
//! storage, interceptors); [`BridgeSettings`] holds the plain-data knobs and
//! can be loaded from a JSON5 document so hosts keep retry counts and
//! forwarding entries in a config file.

use crate::addressing::{DistributionPolicy, EndpointInstances};
use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::identity::TypeRegistry;
use crate::interception::{ForwardInterceptor, PassThroughInterceptor};
use crate::port::Port;
use crate::routing::ForwardingTable;
use crate::switch::Switch;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use subscription_store::SubscriptionStore;

const DEFAULT_POISON_QUEUE: &str = "poison";

/// Retry ladder and circuit-breaker knobs, shared by every port of one
/// bridge or switch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub immediate_retries: u32,
    pub delayed_retries: u32,
    pub circuit_breaker_threshold: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            immediate_retries: 5,
            delayed_retries: 5,
            circuit_breaker_threshold: 5,
        }
    }
}

/// Configures one side of a bridge or one port of a switch.
pub struct PortConfiguration {
    pub(crate) name: String,
    pub(crate) transport: Arc<dyn crate::transport::MessagingTransport>,
    pub(crate) storage: Option<Arc<dyn SubscriptionStore>>,
    pub(crate) instances: Arc<EndpointInstances>,
    pub(crate) distribution: Arc<DistributionPolicy>,
    pub(crate) max_concurrency: Option<usize>,
    pub(crate) auto_create_queues: Option<bool>,
    pub(crate) auto_create_identity: Option<String>,
}

impl PortConfiguration {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn crate::transport::MessagingTransport>,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            storage: None,
            instances: Arc::new(EndpointInstances::new()),
            distribution: Arc::new(DistributionPolicy::new()),
            max_concurrency: None,
            auto_create_queues: None,
            auto_create_identity: None,
        }
    }

    /// Subscription storage for message-driven publish/subscribe routing.
    /// Required when the port's transport lacks native multicast publish.
    pub fn use_subscription_storage(mut self, storage: Arc<dyn SubscriptionStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Limits concurrently processed messages on this port. A limit of 1
    /// gives strict per-port ordering.
    pub fn limit_message_processing_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Creates missing queues on startup, overriding the bridge-level flag.
    pub fn auto_create_queues(mut self, identity: Option<String>) -> Self {
        self.auto_create_queues = Some(true);
        self.auto_create_identity = identity;
        self
    }

    /// Physical routing settings of the port.
    pub fn endpoint_instances(&self) -> &Arc<EndpointInstances> {
        &self.instances
    }

    /// Distribution policy of the port.
    pub fn distribution_policy(&self) -> &Arc<DistributionPolicy> {
        &self.distribution
    }
}

/// Configures a two-sided bridge.
pub struct BridgeConfiguration {
    left: PortConfiguration,
    right: PortConfiguration,
    forwarding: ForwardingTable,
    interceptor: Arc<dyn ForwardInterceptor>,
    retries: RetrySettings,
    poison_queue: String,
    auto_create_queues: bool,
    auto_create_identity: Option<String>,
    max_concurrency: Option<usize>,
    types: Arc<TypeRegistry>,
}

impl BridgeConfiguration {
    pub fn new(left: PortConfiguration, right: PortConfiguration) -> Self {
        Self {
            left,
            right,
            forwarding: ForwardingTable::new(),
            interceptor: Arc::new(PassThroughInterceptor),
            retries: RetrySettings::default(),
            poison_queue: DEFAULT_POISON_QUEUE.to_string(),
            auto_create_queues: false,
            auto_create_identity: None,
            max_concurrency: None,
            types: Arc::new(TypeRegistry::new()),
        }
    }

    /// Inter-bridge forwarding table, applied to left-to-right traffic only.
    pub fn forwarding(&mut self) -> &mut ForwardingTable {
        &mut self.forwarding
    }

    /// Invokes the provided hook around every forward.
    pub fn intercept_forwarding(mut self, interceptor: Arc<dyn ForwardInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn retry_settings(mut self, retries: RetrySettings) -> Self {
        self.retries = retries;
        self
    }

    pub fn poison_queue(mut self, queue: impl Into<String>) -> Self {
        self.poison_queue = queue.into();
        self
    }

    pub fn auto_create_queues(mut self, identity: Option<String>) -> Self {
        self.auto_create_queues = true;
        self.auto_create_identity = identity;
        self
    }

    pub fn limit_message_processing_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Pre-registered types resolve version-insensitively for native
    /// multicast address tags.
    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Applies the plain-data knobs from a settings document.
    pub fn apply_settings(mut self, settings: &BridgeSettings) -> Self {
        self.retries = settings.retries.clone();
        if settings.auto_create_queues {
            self.auto_create_queues = true;
            self.auto_create_identity = settings.auto_create_identity.clone();
        }
        if let Some(max_concurrency) = settings.max_concurrency {
            self.max_concurrency = Some(max_concurrency);
        }
        for entry in &settings.forward_to {
            self.forwarding
                .forward_to(&entry.message_type, &entry.next_hop);
        }
        for entry in &settings.register_publisher {
            self.forwarding
                .register_publisher(&entry.message_type, &entry.next_hop);
        }
        self
    }

    pub fn create(self) -> Result<Bridge, BridgeError> {
        if self.left.name == self.right.name {
            return Err(BridgeError::Configuration(format!(
                "bridge ports must have distinct names, got '{}' twice",
                self.left.name
            )));
        }
        let left = Port::create(
            self.left,
            self.types.clone(),
            self.interceptor.clone(),
            self.retries.clone(),
            &self.poison_queue,
            self.auto_create_queues,
            self.auto_create_identity.clone(),
            self.max_concurrency,
        );
        let right = Port::create(
            self.right,
            self.types,
            self.interceptor,
            self.retries,
            &self.poison_queue,
            self.auto_create_queues,
            self.auto_create_identity,
            self.max_concurrency,
        );
        Ok(Bridge::new(left, right, self.forwarding))
    }
}

/// Configures an N-port switch.
pub struct SwitchConfiguration {
    ports: Vec<PortConfiguration>,
    port_table: HashMap<String, String>,
    interceptor: Arc<dyn ForwardInterceptor>,
    retries: RetrySettings,
    poison_queue: String,
    auto_create_queues: bool,
    auto_create_identity: Option<String>,
    max_concurrency: Option<usize>,
    types: Arc<TypeRegistry>,
}

impl Default for SwitchConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchConfiguration {
    pub fn new() -> Self {
        Self {
            ports: Vec::new(),
            port_table: HashMap::new(),
            interceptor: Arc::new(PassThroughInterceptor),
            retries: RetrySettings::default(),
            poison_queue: DEFAULT_POISON_QUEUE.to_string(),
            auto_create_queues: false,
            auto_create_identity: None,
            max_concurrency: None,
            types: Arc::new(TypeRegistry::new()),
        }
    }

    pub fn add_port(mut self, port: PortConfiguration) -> Self {
        self.ports.push(port);
        self
    }

    /// Routes messages addressed to `endpoint` out of `port`.
    pub fn route_endpoint_to_port(
        mut self,
        endpoint: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        self.port_table.insert(endpoint.into(), port.into());
        self
    }

    pub fn intercept_forwarding(mut self, interceptor: Arc<dyn ForwardInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn retry_settings(mut self, retries: RetrySettings) -> Self {
        self.retries = retries;
        self
    }

    pub fn auto_create_queues(mut self, identity: Option<String>) -> Self {
        self.auto_create_queues = true;
        self.auto_create_identity = identity;
        self
    }

    pub fn limit_message_processing_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn create(self) -> Result<Switch, BridgeError> {
        let mut names = HashSet::new();
        for port in &self.ports {
            if !names.insert(port.name.clone()) {
                return Err(BridgeError::Configuration(format!(
                    "switch ports must have distinct names, got '{}' twice",
                    port.name
                )));
            }
        }
        for (endpoint, port_name) in &self.port_table {
            if !names.contains(port_name) {
                return Err(BridgeError::Configuration(format!(
                    "port table routes endpoint '{endpoint}' to unknown port '{port_name}'"
                )));
            }
        }

        let ports = self
            .ports
            .into_iter()
            .map(|port| {
                Port::create(
                    port,
                    self.types.clone(),
                    self.interceptor.clone(),
                    self.retries.clone(),
                    &self.poison_queue,
                    self.auto_create_queues,
                    self.auto_create_identity.clone(),
                    self.max_concurrency,
                )
            })
            .collect();
        Ok(Switch::new(ports, self.port_table))
    }
}

/// One forwarding-table entry in a settings document.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardingEntry {
    pub message_type: String,
    pub next_hop: String,
}

/// Plain-data bridge settings, loadable from JSON5.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub auto_create_queues: bool,
    pub auto_create_identity: Option<String>,
    pub max_concurrency: Option<usize>,
    #[serde(flatten)]
    pub retries: RetrySettings,
    pub forward_to: Vec<ForwardingEntry>,
    pub register_publisher: Vec<ForwardingEntry>,
}

impl BridgeSettings {
    pub fn from_json5(document: &str) -> Result<Self, BridgeError> {
        json5::from_str(document)
            .map_err(|err| BridgeError::Configuration(format!("invalid bridge settings: {err}")))
    }
}

//! Per-port publish/subscribe infrastructure slot.
//!
//! The publish/subscribe strategy of a port depends on a capability of the
//! started transport connection, so it can only be resolved after connect.
//! The slot is set exactly once during port initialization and read lock-free
//! on every forwarded message.

use crate::addressing::{DistributionPolicy, EndpointInstances};
use crate::error::BridgeError;
use crate::identity::TypeRegistry;
use crate::routing::publish_router::{
    MessageDrivenPublishRouter, NativePublishRouter, PublishRouter,
};
use crate::routing::subscribe_router::{
    MessageDrivenSubscriptionForwarder, NativeSubscriptionForwarder, SubscriptionForwarder,
};
use crate::transport::{Dispatcher, TransportConnection};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use subscription_store::{NativeSubscriptionStore, SubscriptionStore};

pub(crate) struct PubSubRuntime {
    pub(crate) publish_router: Arc<dyn PublishRouter>,
    pub(crate) forwarder: Arc<dyn SubscriptionForwarder>,
    pub(crate) storage: Arc<dyn SubscriptionStore>,
}

#[derive(Default)]
pub(crate) struct PubSubInfrastructure {
    slot: ArcSwapOption<PubSubRuntime>,
}

impl PubSubInfrastructure {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, runtime: PubSubRuntime) {
        self.slot.store(Some(Arc::new(runtime)));
    }

    /// Calling forward before initialize completes is a programming error.
    pub(crate) fn runtime(&self) -> Arc<PubSubRuntime> {
        self.slot
            .load_full()
            .expect("port pub/sub infrastructure used before initialize completed")
    }
}

/// Selects the publish/subscribe variant for one started connection.
pub(crate) fn resolve_runtime(
    connection: &Arc<dyn TransportConnection>,
    side_channel: Option<Arc<dyn Dispatcher>>,
    configured_storage: Option<Arc<dyn SubscriptionStore>>,
    types: Arc<TypeRegistry>,
    instances: Arc<EndpointInstances>,
    distribution: Arc<DistributionPolicy>,
) -> Result<PubSubRuntime, BridgeError> {
    if connection.supports_native_publish() {
        let manager = connection.subscription_manager().ok_or_else(|| {
            BridgeError::Configuration(
                "transport declares native publish support but exposes no subscription manager"
                    .to_string(),
            )
        })?;
        return Ok(PubSubRuntime {
            publish_router: Arc::new(NativePublishRouter::new(types.clone())),
            forwarder: Arc::new(NativeSubscriptionForwarder::new(manager, types)),
            storage: Arc::new(NativeSubscriptionStore::new()),
        });
    }

    let storage = configured_storage.ok_or_else(|| {
        BridgeError::Configuration(
            "subscription storage has not been configured; use 'use_subscription_storage' to configure it"
                .to_string(),
        )
    })?;
    let side_channel = side_channel.ok_or_else(|| {
        BridgeError::Configuration(
            "message-driven publish/subscribe requires a side-channel dispatcher".to_string(),
        )
    })?;
    Ok(PubSubRuntime {
        publish_router: Arc::new(MessageDrivenPublishRouter::new(
            storage.clone(),
            distribution,
        )),
        forwarder: Arc::new(MessageDrivenSubscriptionForwarder::new(
            instances,
            side_channel,
        )),
        storage,
    })
}

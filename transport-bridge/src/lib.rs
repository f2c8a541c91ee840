/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! # transport-bridge
//!
//! `transport-bridge` forwards messages between independently-addressed
//! message-queueing transports, translating addressing, subscription and
//! reply-correlation metadata as it goes. Publishers and subscribers on
//! either side keep their existing send/publish/subscribe/reply semantics;
//! the bridge stays transparent.
//!
//! A [`Bridge`] connects exactly two transports; a [`Switch`] generalizes the
//! same forwarding machinery to N ports routed by an endpoint-to-port table.
//! Both are assembled from a configuration:
//!
//! ```no_run
//! use std::sync::Arc;
//! use subscription_store::{InMemoryBacking, TableSubscriptionStore};
//! use transport_bridge::{BridgeConfiguration, MessagingTransport, PortConfiguration};
//!
//! # async fn build(left_transport: Arc<dyn MessagingTransport>, right_transport: Arc<dyn MessagingTransport>) -> Result<(), transport_bridge::BridgeError> {
//! let storage = Arc::new(TableSubscriptionStore::new(InMemoryBacking::new()));
//!
//! let left = PortConfiguration::new("left", left_transport)
//!     .use_subscription_storage(storage.clone());
//! let right = PortConfiguration::new("right", right_transport)
//!     .use_subscription_storage(storage);
//!
//! let mut configuration = BridgeConfiguration::new(left, right).auto_create_queues(None);
//! configuration
//!     .forwarding()
//!     .forward_to("Sales.PlaceOrder", "bridge-b");
//!
//! let bridge = configuration.create()?;
//! bridge.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Internal architecture map
//!
//! - Ports: receive-loop ownership, lifecycle, per-intent dispatch
//! - Routing: the four intent strategies, forwarding table, pub/sub variant
//!   selection
//! - Addressing: instance discovery and distribution policy
//! - Identity: interned type handles for multicast address tags
//! - Resilience: retry ladder, poison queue, circuit breaker
//! - Orchestration: bridge and switch startup/shutdown ordering
//!
//! ## Observability model
//!
//! The crate emits `tracing` events and never installs a global subscriber;
//! binaries and tests own one-time `tracing_subscriber` initialization.

pub mod addressing;
mod bridge;
mod config;
pub mod correlation;
mod error;
pub mod headers;
mod identity;
mod interception;
mod message;
mod port;
mod resilience;
mod resubscriber;
mod routing;
mod site_routing;
mod switch;
mod transport;

pub use bridge::Bridge;
pub use config::{
    BridgeConfiguration, BridgeSettings, ForwardingEntry, PortConfiguration, RetrySettings,
    SwitchConfiguration,
};
pub use error::{BridgeError, TransportError, UnforwardableMessage};
pub use identity::{TypeHandle, TypeRegistry};
pub use interception::{ForwardContinuation, ForwardInterceptor, PassThroughInterceptor};
pub use message::{
    AddressTag, ContextBag, MessageContext, OutgoingMessage, TransportOperation,
    TransportTransaction,
};
pub use port::Port;
pub use resilience::CircuitBreaker;
pub use resubscriber::Resubscriber;
pub use routing::{ForwardingTable, MessageIntent, PublishRouter, RoutingCallback, SubscriptionForwarder};
pub use site_routing::{configure_sites, SiteRoutingTable};
pub use switch::Switch;
pub use transport::{
    ConnectionSettings, Dispatcher, MessageHandler, MessagingTransport, SubscriptionManager,
    TransportConnection,
};

// Re-exported so bridge hosts depend on one crate for the storage contract.
pub use subscription_store::{
    MessageType, NativeSubscriptionStore, StoreError, Subscriber, SubscriptionStore,
};

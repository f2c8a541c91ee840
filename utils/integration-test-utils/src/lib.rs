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

//! # integration-test-utils
//!
//! In-memory transport implementing the full `transport-bridge` transport
//! contract (unicast queues, a native multicast fabric with a subscription
//! manager, per-connection concurrency limiting and graceful drain), plus
//! endpoint helpers for driving bridge scenarios in tests.

mod broker;
mod endpoint;
mod transport;

pub use broker::InMemoryBroker;
pub use endpoint::{ReceivedMessage, TestEndpoint};
pub use transport::InMemoryTransport;

use std::sync::Once;

static INIT_TRACING: Once = Once::new();

/// One-time tracing initialization for test binaries; library crates never
/// install a global subscriber.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Unique queue/endpoint name for one test run.
pub fn unique_name(prefix: &str) -> String {
    use rand::Rng;
    let suffix: u32 = rand::thread_rng().gen();
    format!("{prefix}-{suffix:08x}")
}

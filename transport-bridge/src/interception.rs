//! Interception hook wrapped around every forward.
//!
//! Lets callers inject cross-cutting behavior (deduplication, transaction
//! suppression) without modifying routing logic. The interceptor receives
//! the incoming port's dispatcher, the destination port's dispatcher, and a
//! continuation that runs the routing with whichever dispatcher it is given;
//! not invoking the continuation drops the message.

use crate::error::BridgeError;
use crate::message::MessageContext;
use crate::transport::Dispatcher;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Continuation that executes routing using the dispatcher it is handed.
pub type ForwardContinuation<'a> =
    Box<dyn FnOnce(Arc<dyn Dispatcher>) -> BoxFuture<'a, Result<(), BridgeError>> + Send + 'a>;

#[async_trait]
pub trait ForwardInterceptor: Send + Sync {
    async fn intercept<'a>(
        &self,
        port_name: &'a str,
        context: &'a MessageContext,
        local_dispatch: Arc<dyn Dispatcher>,
        forward_dispatch: Arc<dyn Dispatcher>,
        next: ForwardContinuation<'a>,
    ) -> Result<(), BridgeError>;
}

/// Default hook: forward through the destination port's dispatcher.
pub struct PassThroughInterceptor;

#[async_trait]
impl ForwardInterceptor for PassThroughInterceptor {
    async fn intercept<'a>(
        &self,
        _port_name: &'a str,
        _context: &'a MessageContext,
        _local_dispatch: Arc<dyn Dispatcher>,
        forward_dispatch: Arc<dyn Dispatcher>,
        next: ForwardContinuation<'a>,
    ) -> Result<(), BridgeError> {
        next(forward_dispatch).await
    }
}

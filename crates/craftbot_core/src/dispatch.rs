//! Message dispatch: a fixed table from message kind to ordered handlers.
//!
//! The table is assembled with [`DispatcherBuilder`] during startup and frozen
//! by [`DispatcherBuilder::build`]. After that there is no way to register or
//! remove handlers, so dispatch needs no synchronization beyond the stats
//! counters.
//!
//! Handler failures are isolated: an `Err` or a panic from one handler is
//! logged and the remaining handlers for the message still run.

use crate::error::DispatchError;
use crate::wire::{InboundMessage, MessageKind};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Handler for one or more message kinds.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Handles one message.
    async fn handle(&self, message: &InboundMessage) -> Result<(), DispatchError>;
}

/// Adapter turning a synchronous closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    name: &'static str,
    handler: F,
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&InboundMessage) -> Result<(), DispatchError> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, message: &InboundMessage) -> Result<(), DispatchError> {
        (self.handler)(message)
    }
}

/// Wraps a closure as a shareable handler.
pub fn handler_fn<F>(name: &'static str, handler: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&InboundMessage) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    Arc::new(FnHandler { name, handler })
}

/// Counters exposed for monitoring and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub messages_dispatched: u64,
    pub messages_unhandled: u64,
    pub handler_failures: u64,
}

/// Collects handler registrations before the receive loop starts.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<MessageKind, Vec<Arc<dyn MessageHandler>>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the list for `kind`.
    pub fn on(mut self, kind: MessageKind, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    /// Freezes the table.
    pub fn build(self) -> Arc<Dispatcher> {
        Arc::new(Dispatcher {
            handlers: self.handlers,
            dispatched: AtomicU64::new(0),
            unhandled: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }
}

/// Routes decoded messages to their handlers.
pub struct Dispatcher {
    handlers: HashMap<MessageKind, Vec<Arc<dyn MessageHandler>>>,
    dispatched: AtomicU64,
    unhandled: AtomicU64,
    failures: AtomicU64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.handlers.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            messages_dispatched: self.dispatched.load(Ordering::Relaxed),
            messages_unhandled: self.unhandled.load(Ordering::Relaxed),
            handler_failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Runs every handler registered for the message's kind, in registration order.
    ///
    /// Messages with no registered handler are dropped silently.
    pub async fn dispatch(&self, message: &InboundMessage) {
        let kind = message.kind();
        let Some(handlers) = self.handlers.get(&kind) else {
            trace!("No handlers for '{}'", kind);
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            return;
        };

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(message)).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!(
                handler = handler.name(),
                kind = %kind,
                "Handler failed: {}",
                failure
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

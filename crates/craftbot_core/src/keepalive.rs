//! Keepalive responder: echoes liveness probes.

use crate::dispatch::MessageHandler;
use crate::error::DispatchError;
use crate::session::OutboundSender;
use crate::wire::InboundMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{trace, warn};

/// Answers every `keep_alive` probe with an ack carrying the same id.
///
/// A failed ack is logged and otherwise ignored; the supervisor's own drop
/// detection decides whether the session is alive.
pub struct KeepaliveResponder {
    sender: Arc<dyn OutboundSender>,
}

impl KeepaliveResponder {
    pub fn new(sender: Arc<dyn OutboundSender>) -> Self {
        Self { sender }
    }

    pub async fn on_probe(&self, id: u64) {
        match self.sender.send_keep_alive(id).await {
            Ok(()) => trace!("Acknowledged keepalive {}", id),
            Err(e) => warn!("Failed to acknowledge keepalive {}: {}", id, e),
        }
    }
}

#[async_trait]
impl MessageHandler for KeepaliveResponder {
    fn name(&self) -> &'static str {
        "keepalive"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<(), DispatchError> {
        if let InboundMessage::KeepAlive { id } = message {
            self.on_probe(*id).await;
        }
        Ok(())
    }
}

//! Shared half of a session: liveness state and the outbound queue.
//!
//! Handlers hold an `Arc<SessionLink>` (through [`OutboundSender`]) rather than
//! the session itself. Sending only pushes onto an unbounded queue drained by
//! the writer task, so a handler running on the reader task never waits for
//! anything that could only arrive through that same reader.

use crate::error::SessionError;
use crate::state::AgentState;
use crate::wire::{truncate_chat, OutboundMessage};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Liveness state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Send path used by handlers.
///
/// Implemented by [`SessionLink`]; tests substitute a recorder.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Sends a chat line, truncated to the chat limit.
    async fn send_chat(&self, text: &str) -> Result<(), SessionError>;

    /// Acknowledges a liveness probe with exactly the id received.
    async fn send_keep_alive(&self, id: u64) -> Result<(), SessionError>;
}

#[derive(Debug)]
struct LinkInner {
    state: SessionState,
    /// Bumped by every connect attempt and every local disconnect
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<OutboundMessage>>,
}

/// Liveness state plus outbound queue of the current connection.
#[derive(Debug)]
pub struct SessionLink {
    inner: RwLock<LinkInner>,
    shared: Arc<AgentState>,
}

impl SessionLink {
    pub fn new(shared: Arc<AgentState>) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(LinkInner {
                state: SessionState::Disconnected,
                generation: 0,
                outbound: None,
            }),
            shared,
        })
    }

    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == SessionState::Connected
    }

    /// Queues a frame for the writer task.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), SessionError> {
        if self.shared.run.is_stop_requested() {
            return Err(SessionError::Stopped);
        }

        let inner = self.inner.read().await;
        if inner.state != SessionState::Connected {
            return Err(SessionError::NotConnected(inner.state));
        }
        let outbound = inner
            .outbound
            .as_ref()
            .ok_or(SessionError::NotConnected(inner.state))?;
        outbound
            .send(message)
            .map_err(|_| SessionError::Connection("writer task has stopped".to_string()))
    }

    /// Disconnected → Connecting. Refused while a connection is in progress or up.
    ///
    /// Returns the generation identifying this attempt.
    pub(crate) async fn begin_connect(&self) -> Result<u64, SessionError> {
        let mut inner = self.inner.write().await;
        match inner.state {
            SessionState::Disconnected => {
                inner.state = SessionState::Connecting;
                inner.generation += 1;
                Ok(inner.generation)
            }
            active => Err(SessionError::AlreadyActive(active)),
        }
    }

    /// Connecting → Connected, installing the queue for the new writer task.
    ///
    /// Refused when a local disconnect superseded the attempt while it was
    /// logging in. The presence set is cleared here, before the reader
    /// starts, since the server resends the full player list after every login.
    pub(crate) async fn attach(
        &self,
        generation: u64,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.write().await;
            if inner.generation != generation || inner.state != SessionState::Connecting {
                return Err(SessionError::Connection(
                    "disconnected while the login was in progress".to_string(),
                ));
            }
            inner.outbound = Some(outbound);
            inner.state = SessionState::Connected;
        }

        self.shared.presence.reset().await;
        debug!("Session link attached");
        Ok(())
    }

    /// Marks the start of a local disconnect, returning the state it replaced.
    ///
    /// Any attempt still logging in is superseded and will not attach.
    pub(crate) async fn begin_disconnect(&self) -> SessionState {
        let mut inner = self.inner.write().await;
        let previous = inner.state;
        if previous != SessionState::Disconnected {
            inner.state = SessionState::Disconnecting;
        }
        inner.generation += 1;
        inner.outbound = None;
        previous
    }

    /// Forces the state to `Disconnected` and drops the queue.
    pub(crate) async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.state = SessionState::Disconnected;
        inner.outbound = None;
    }

    /// Connecting → Disconnected after a failed attempt, unless something
    /// else has taken over the link since.
    pub(crate) async fn abort_connect(&self, generation: u64) {
        let mut inner = self.inner.write().await;
        if inner.generation == generation && inner.state == SessionState::Connecting {
            inner.state = SessionState::Disconnected;
            inner.outbound = None;
        }
    }

    /// Called by the reader task when the stream ends on its own.
    ///
    /// Returns `false` when a local disconnect is already under way, in which
    /// case the loss is expected and not reported.
    pub(crate) async fn connection_lost(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != SessionState::Connected {
            return false;
        }
        inner.state = SessionState::Disconnected;
        inner.outbound = None;
        true
    }
}

#[async_trait]
impl OutboundSender for SessionLink {
    async fn send_chat(&self, text: &str) -> Result<(), SessionError> {
        let message = truncate_chat(text);
        self.send(OutboundMessage::Chat {
            message: message.to_string(),
        })
        .await?;
        info!("Sending chat: {}", message);
        Ok(())
    }

    async fn send_keep_alive(&self, id: u64) -> Result<(), SessionError> {
        self.send(OutboundMessage::KeepAlive { id }).await
    }
}

//! Transport session: one WebSocket connection to the game server.
//!
//! A [`Session`] performs the login handshake and, once connected, runs two
//! tasks:
//!
//! * a **writer** draining the outbound queue held by the [`SessionLink`]
//! * a **reader** (the dispatch worker) decoding frames and feeding the
//!   [`Dispatcher`] one message at a time, in arrival order
//!
//! When the reader's stream ends, for whatever reason, the link drops to
//! `Disconnected`. The supervisor observes that on its next poll.

pub mod link;

pub use link::{OutboundSender, SessionLink, SessionState};

use crate::config::SessionIdentity;
use crate::dispatch::Dispatcher;
use crate::error::SessionError;
use crate::wire::{InboundMessage, OutboundMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Type alias for the client WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Type alias for the outgoing half
type WsSink = SplitSink<WsStream, Message>;
/// Type alias for the incoming half
type WsSource = SplitStream<WsStream>;

/// How long a local disconnect waits for the writer to flush the close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

struct SessionTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// One logical connection lifecycle to the game server.
pub struct Session {
    identity: SessionIdentity,
    link: Arc<SessionLink>,
    dispatcher: Arc<Dispatcher>,
    tasks: Mutex<Option<SessionTasks>>,
}

impl Session {
    /// Creates a disconnected session.
    ///
    /// `link` is the same handle given to handlers that need to send; the
    /// dispatcher must be fully built before the first `connect()`.
    pub fn new(identity: SessionIdentity, link: Arc<SessionLink>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            identity,
            link,
            dispatcher,
            tasks: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn link(&self) -> Arc<SessionLink> {
        self.link.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.link.state().await
    }

    /// Opens the socket, logs in, and starts the reader and writer tasks.
    ///
    /// Rejected credentials yield [`SessionError::Auth`]; every other failure
    /// is retryable. Calling this while connecting or connected is refused.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let generation = self.link.begin_connect().await?;
        self.reap_tasks().await;

        let attempt = Uuid::new_v4();
        let span = info_span!(
            "connect",
            %attempt,
            host = %self.identity.host,
            port = self.identity.port
        );

        let handshake = timeout(self.identity.connect_timeout, self.handshake())
            .instrument(span)
            .await;

        let (mut sink, source) = match handshake {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                self.link.abort_connect(generation).await;
                return Err(e);
            }
            Err(_) => {
                self.link.abort_connect(generation).await;
                return Err(SessionError::Timeout(self.identity.connect_timeout));
            }
        };

        // Held across attach so a concurrent disconnect either sees these
        // tasks or supersedes the attempt before it attaches.
        let mut tasks = self.tasks.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.link.attach(generation, tx).await {
            drop(tasks);
            debug!(%attempt, "Discarding connection: {}", e);
            let _ = sink.close().await;
            return Err(e);
        }

        let writer = tokio::spawn(write_loop(sink, rx));
        let reader = tokio::spawn(read_loop(source, self.dispatcher.clone(), self.link.clone()));
        *tasks = Some(SessionTasks { reader, writer });
        drop(tasks);

        info!(%attempt, "Successfully connected and joined the server.");
        Ok(())
    }

    /// Sends a chat line. Only valid while connected.
    pub async fn send_chat(&self, text: &str) -> Result<(), SessionError> {
        self.link.send_chat(text).await
    }

    /// Tears the connection down. Safe to call in any state, any number of times.
    pub async fn disconnect(&self) {
        let previous = self.link.begin_disconnect().await;
        if previous != SessionState::Disconnected {
            info!("Disconnecting from {}:{}...", self.identity.host, self.identity.port);
        }

        if let Some(tasks) = self.tasks.lock().await.take() {
            // Dropping the queue ends the writer, which closes the socket politely.
            if timeout(WRITER_DRAIN_TIMEOUT, tasks.writer).await.is_err() {
                debug!("Writer did not finish in time");
            }
            tasks.reader.abort();
        }

        self.link.reset().await;
    }

    async fn handshake(&self) -> Result<(WsSink, WsSource), SessionError> {
        let url = self.identity.url();
        info!(
            "Connecting to {}:{} as {}...",
            self.identity.host, self.identity.port, self.identity.username
        );

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        let (mut sink, mut source) = ws.split();

        let login = OutboundMessage::Login {
            username: self.identity.username.clone(),
            password: self.identity.password.clone(),
        };
        let frame = login
            .encode()
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        sink.send(Message::text(frame))
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        while let Some(frame) = source.next().await {
            let text = match frame.map_err(|e| SessionError::Connection(e.to_string()))? {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(SessionError::Connection("server closed the socket during login".to_string()))
                }
                _ => continue,
            };

            match InboundMessage::decode(text.as_str()) {
                Ok(InboundMessage::LoginSuccess { .. }) => return Ok((sink, source)),
                Ok(InboundMessage::LoginRejected { reason }) => return Err(SessionError::Auth(reason)),
                Ok(InboundMessage::Disconnect { reason }) => {
                    return Err(SessionError::Connection(format!("disconnected during login: {reason}")))
                }
                Ok(other) => debug!("Ignoring '{}' before login completed", other.kind()),
                Err(e) => return Err(SessionError::Protocol(e.to_string())),
            }
        }

        Err(SessionError::Connection("stream ended during login".to_string()))
    }

    /// Cleans up tasks left over from a connection that dropped on its own.
    async fn reap_tasks(&self) {
        if let Some(tasks) = self.tasks.lock().await.take() {
            tasks.reader.abort();
            tasks.writer.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().take() {
            tasks.reader.abort();
            tasks.writer.abort();
        }
    }
}

async fn write_loop(mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<OutboundMessage>) {
    while let Some(message) = rx.recv().await {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode outbound frame: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::text(frame)).await {
            warn!("Failed to write frame: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut source: WsSource, dispatcher: Arc<Dispatcher>, link: Arc<SessionLink>) {
    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => match InboundMessage::decode(text.as_str()) {
                Ok(message) => {
                    dispatcher.dispatch(&message).await;
                    if let InboundMessage::Disconnect { reason } = message {
                        break format!("kicked by server: {reason}");
                    }
                }
                Err(e) => warn!("Skipping malformed frame: {}", e),
            },
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => format!("closed by server: {}", frame.reason.as_str()),
                    None => "closed by server".to_string(),
                };
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break format!("read error: {e}"),
            None => break "stream ended".to_string(),
        }
    };

    if link.connection_lost().await {
        warn!("Disconnected: {}", reason);
    } else {
        debug!("Reader stopped after local disconnect: {}", reason);
    }
}

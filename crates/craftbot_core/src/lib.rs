//! # Craftbot Core - Session Lifecycle for a Chat Agent
//!
//! The core library behind the `craftbot` agent. It owns one long-lived,
//! stateful connection to a game server, keeps it alive, and serves a small
//! chat/command layer on top of it.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Transport Session** ([`Session`]) - WebSocket connection, login handshake,
//!   liveness state and the outbound queue shared through [`SessionLink`]
//! * **Message Dispatcher** ([`Dispatcher`]) - Fixed table of handlers per
//!   message kind, built once at startup
//! * **Presence Tracker** ([`PresenceTracker`]) - Set of players currently online
//! * **Keepalive Responder** ([`KeepaliveResponder`]) - Echoes liveness probes
//! * **Chat Engine** ([`ChatEngine`]) - Command parsing and completion replies
//! * **Reconnection Supervisor** ([`Supervisor`]) - Initial backoff and steady
//!   state reconnection until a stop is requested
//!
//! ### Message Flow
//!
//! 1. The supervisor asks the session to connect and waits for `login_success`
//! 2. The session's reader task decodes each frame into an [`InboundMessage`]
//! 3. The dispatcher runs every handler registered for the message kind, in order
//! 4. Handlers answer through the [`SessionLink`] (keepalive acks, chat lines)
//! 5. When the stream ends the session drops to `Disconnected` and the
//!   supervisor notices on its next liveness poll
//!
//! ## Error Handling
//!
//! Only two conditions may end the process: rejected credentials on the first
//! connect, and an operator-requested shutdown. Everything else is absorbed at
//! the nearest component boundary and logged.

pub mod chat;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod keepalive;
pub mod presence;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod wire;

pub use chat::{extract_text, parse_command, ChatEngine, Command, Verb};
pub use completion::{Completion, CompletionError, OpenAiCompletion};
pub use config::{ReconnectPolicy, SessionIdentity};
pub use dispatch::{handler_fn, DispatchStats, Dispatcher, DispatcherBuilder, MessageHandler};
pub use error::{DispatchError, SessionError};
pub use history::{ChatHistory, HistoryError, JsonlChatHistory};
pub use keepalive::KeepaliveResponder;
pub use presence::PresenceTracker;
pub use session::{OutboundSender, Session, SessionLink, SessionState};
pub use state::{AgentState, RunState};
pub use supervisor::{Connector, Supervisor, SupervisorError, SupervisorState};
pub use wire::{InboundMessage, MessageKind, OutboundMessage, CHAT_LIMIT};

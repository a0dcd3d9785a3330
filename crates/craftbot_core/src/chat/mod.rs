//! Chat/command engine.
//!
//! Every inbound chat line is stored, then checked for a command addressed to
//! the agent (`<name> say ...`, `<name> jump`). Lines that merely mention the
//! agent are answered through the completion service. Failures here never
//! reach the dispatch loop: a failed completion becomes a fixed chat notice.

mod parse;

pub use parse::{extract_text, parse_command, Command, Verb};

use crate::completion::{Completion, CompletionError};
use crate::dispatch::MessageHandler;
use crate::error::DispatchError;
use crate::history::ChatHistory;
use crate::session::OutboundSender;
use crate::wire::{truncate_chat, InboundMessage};
use async_trait::async_trait;
use chrono::Utc;
use parse::contains_ignore_case;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Second name the agent answers to.
pub const FALLBACK_ALIAS: &str = "agentbot";
/// Sent when a completion fails.
pub const FALLBACK_NOTICE: &str = "[Agent Error] Could not process your request.";
/// Framing given to the completion service.
pub const SYSTEM_PROMPT: &str = "You are a helpful Minecraft agent.";
/// Literal sent for the `jump` command.
pub const JUMP_REPLY: &str = "*jumps*";

pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

const PLAYER_SENDER: &str = "player";
const AGENT_SENDER: &str = "agent";

pub struct ChatEngine {
    self_name: String,
    sender: Arc<dyn OutboundSender>,
    completion: Arc<dyn Completion>,
    history: Arc<dyn ChatHistory>,
    completion_timeout: Duration,
}

impl ChatEngine {
    pub fn new(
        self_name: impl Into<String>,
        sender: Arc<dyn OutboundSender>,
        completion: Arc<dyn Completion>,
        history: Arc<dyn ChatHistory>,
    ) -> Self {
        Self {
            self_name: self_name.into(),
            sender,
            completion,
            history,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }

    /// Upper bound on a single completion call, on top of the client's own timeout.
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    /// Processes one line of chat text.
    ///
    /// Lines the server relays back from us (`<selfName> ...`) are recorded
    /// but never answered, even though they contain our name.
    pub async fn handle(&self, text: &str) {
        info!("[CHAT RECEIVED] {}", text);
        self.record(PLAYER_SENDER, text).await;

        if self.is_own_echo(text) {
            debug!("Ignoring echo of our own chat");
            return;
        }

        let command = parse_command(text, &self.self_name);
        match command.verb {
            Verb::Say => {
                let argument = command.argument.unwrap_or_default();
                self.say(&argument).await;
            }
            Verb::Jump => self.say(JUMP_REPLY).await,
            Verb::None if self.is_addressed(text) => {
                let reply = match self.ask(text).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!("[Completion Error] {}", e);
                        FALLBACK_NOTICE.to_string()
                    }
                };
                self.say(&reply).await;
            }
            Verb::None => {}
        }
    }

    fn is_addressed(&self, text: &str) -> bool {
        contains_ignore_case(text, &self.self_name) || contains_ignore_case(text, FALLBACK_ALIAS)
    }

    /// Servers relay our own lines back as `<name> text`.
    fn is_own_echo(&self, text: &str) -> bool {
        text.strip_prefix('<')
            .and_then(|rest| rest.strip_prefix(self.self_name.as_str()))
            .is_some_and(|rest| rest.starts_with('>'))
    }

    async fn ask(&self, text: &str) -> Result<String, CompletionError> {
        info!("Sending message to completion service: {}", text);
        let reply = tokio::time::timeout(self.completion_timeout, self.completion.complete(SYSTEM_PROMPT, text))
            .await
            .map_err(|_| CompletionError::Timeout(self.completion_timeout))??;
        let reply = reply.trim().to_string();
        info!("Completion reply: {}", reply);
        Ok(reply)
    }

    async fn say(&self, text: &str) {
        match self.sender.send_chat(text).await {
            Ok(()) => self.record(AGENT_SENDER, truncate_chat(text)).await,
            Err(e) => warn!("Failed to send chat: {}", e),
        }
    }

    async fn record(&self, sender: &str, text: &str) {
        if let Err(e) = self.history.append(sender, text, Utc::now()).await {
            warn!("Failed to store chat line: {}", e);
        }
    }
}

#[async_trait]
impl MessageHandler for ChatEngine {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<(), DispatchError> {
        if let InboundMessage::Chat(payload) = message {
            let text = extract_text(payload);
            ChatEngine::handle(self, &text).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::history::HistoryError;
    use crate::session::SessionState;
    use crate::wire::{ChatPayload, CHAT_LIMIT};
    use chrono::DateTime;
    use std::sync::Mutex;

    #[derive(Default)]
    struct SentChat {
        lines: Mutex<Vec<String>>,
        offline: bool,
    }

    impl SentChat {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutboundSender for SentChat {
        async fn send_chat(&self, text: &str) -> Result<(), SessionError> {
            if self.offline {
                return Err(SessionError::NotConnected(SessionState::Disconnected));
            }
            self.lines.lock().unwrap().push(truncate_chat(text).to_string());
            Ok(())
        }

        async fn send_keep_alive(&self, _id: u64) -> Result<(), SessionError> {
            Ok(())
        }
    }

    enum Reply {
        Text(&'static str),
        Fail,
        Hang,
    }

    struct ScriptedCompletion {
        reply: Reply,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedCompletion {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Completion for ScriptedCompletion {
        async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
            self.prompts.lock().unwrap().push((system.to_string(), user.to_string()));
            match self.reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Fail => Err(CompletionError::Status {
                    status: 500,
                    body: "upstream exploded".to_string(),
                }),
                Reply::Hang => std::future::pending().await,
            }
        }
    }

    #[derive(Default)]
    struct MemoryHistory {
        entries: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatHistory for MemoryHistory {
        async fn append(&self, sender: &str, text: &str, _at: DateTime<Utc>) -> Result<(), HistoryError> {
            self.entries.lock().unwrap().push((sender.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct BrokenHistory;

    #[async_trait]
    impl ChatHistory for BrokenHistory {
        async fn append(&self, _sender: &str, _text: &str, _at: DateTime<Utc>) -> Result<(), HistoryError> {
            Err(HistoryError::Io(std::io::Error::other("disk full")))
        }
    }

    struct Harness {
        engine: ChatEngine,
        sent: Arc<SentChat>,
        completion: Arc<ScriptedCompletion>,
        history: Arc<MemoryHistory>,
    }

    fn harness(reply: Reply) -> Harness {
        let sent = Arc::new(SentChat::default());
        let completion = ScriptedCompletion::new(reply);
        let history = Arc::new(MemoryHistory::default());
        let engine = ChatEngine::new("AgentBot1", sent.clone(), completion.clone(), history.clone());
        Harness {
            engine,
            sent,
            completion,
            history,
        }
    }

    #[tokio::test]
    async fn say_sends_the_argument_verbatim() {
        let h = harness(Reply::Text("unused"));
        h.engine.handle("AgentBot1, say hello world").await;

        assert_eq!(h.sent.lines(), vec!["hello world"]);
        assert_eq!(h.completion.calls(), 0);
    }

    #[tokio::test]
    async fn say_without_argument_sends_empty_line() {
        let h = harness(Reply::Text("unused"));
        h.engine.handle("agentbot1 say").await;
        assert_eq!(h.sent.lines(), vec![""]);
    }

    #[tokio::test]
    async fn jump_sends_fixed_reply() {
        let h = harness(Reply::Text("unused"));
        h.engine.handle("AgentBot1: jump over there").await;
        assert_eq!(h.sent.lines(), vec![JUMP_REPLY]);
    }

    #[tokio::test]
    async fn mention_is_answered_by_completion() {
        let h = harness(Reply::Text("  Hello, Steve!  \n"));
        h.engine.handle("<Steve> hey agentbot1 what time is it?").await;

        assert_eq!(h.sent.lines(), vec!["Hello, Steve!"]);
        let prompts = h.completion.prompts.lock().unwrap().clone();
        assert_eq!(
            prompts,
            vec![(SYSTEM_PROMPT.to_string(), "<Steve> hey agentbot1 what time is it?".to_string())]
        );
    }

    #[tokio::test]
    async fn fallback_alias_triggers_completion() {
        let h = harness(Reply::Text("hi"));
        h.engine.handle("is AGENTBOT around?").await;
        assert_eq!(h.completion.calls(), 1);
    }

    #[tokio::test]
    async fn unrelated_chat_is_ignored() {
        let h = harness(Reply::Text("unused"));
        h.engine.handle("<Steve> nice house").await;

        assert!(h.sent.lines().is_empty());
        assert_eq!(h.completion.calls(), 0);
        assert_eq!(h.history.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completion_failure_sends_fallback_notice() {
        let h = harness(Reply::Fail);
        h.engine.handle("AgentBot1 tell me a joke").await;
        assert_eq!(h.sent.lines(), vec![FALLBACK_NOTICE]);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_timeout_sends_fallback_notice() {
        let h = harness(Reply::Hang);
        let engine = h.engine.with_completion_timeout(Duration::from_secs(5));

        engine.handle("AgentBot1 are you there?").await;
        assert_eq!(h.sent.lines(), vec![FALLBACK_NOTICE]);
    }

    #[tokio::test]
    async fn long_replies_are_truncated() {
        let long: &'static str = Box::leak("y".repeat(CHAT_LIMIT + 40).into_boxed_str());
        let h = harness(Reply::Text(long));
        h.engine.handle("agentbot, write an essay").await;

        let lines = h.sent.lines();
        assert_eq!(lines[0].chars().count(), CHAT_LIMIT);
        let stored = h.history.entries.lock().unwrap().clone();
        assert_eq!(stored.last().map(|(_, text)| text.chars().count()), Some(CHAT_LIMIT));
    }

    #[tokio::test]
    async fn both_directions_are_recorded() {
        let h = harness(Reply::Text("unused"));
        h.engine.handle("AgentBot1 say hi").await;

        let stored = h.history.entries.lock().unwrap().clone();
        assert_eq!(
            stored,
            vec![
                ("player".to_string(), "AgentBot1 say hi".to_string()),
                ("agent".to_string(), "hi".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn own_echo_is_recorded_but_not_answered() {
        let h = harness(Reply::Text("loop!"));
        h.engine.handle("<AgentBot1> hello agentbot fans").await;

        assert!(h.sent.lines().is_empty());
        assert_eq!(h.completion.calls(), 0);
        assert_eq!(h.history.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_and_history_failures_are_swallowed() {
        let sent = Arc::new(SentChat {
            offline: true,
            ..SentChat::default()
        });
        let engine = ChatEngine::new(
            "AgentBot1",
            sent.clone(),
            ScriptedCompletion::new(Reply::Text("hi")),
            Arc::new(BrokenHistory),
        );

        engine.handle("AgentBot1 say anything").await;
        assert!(sent.lines().is_empty());
    }

    #[tokio::test]
    async fn handler_extracts_structured_text() {
        let h = harness(Reply::Text("unused"));
        let message = InboundMessage::Chat(ChatPayload::structured(
            r#"{"extra":[{"text":"AgentBot1"},{"text":", jump"}]}"#,
        ));

        MessageHandler::handle(&h.engine, &message).await.unwrap();
        assert_eq!(h.sent.lines(), vec![JUMP_REPLY]);
    }
}

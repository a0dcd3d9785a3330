//! Reconnection supervisor.
//!
//! Two phases:
//!
//! 1. [`Supervisor::start`] makes the first connection, retrying retryable
//!    failures with exponential backoff up to `max_initial_attempts`. Giving
//!    up, or rejected credentials, is fatal to startup.
//! 2. [`Supervisor::run`] polls liveness every `poll_interval`. When the
//!    session drops it reconnects at a fixed `steady_state_delay`, forever,
//!    until a stop is requested.
//!
//! A stop request is observed within one poll interval. Any live session is
//! disconnected before `run` returns.

use crate::config::ReconnectPolicy;
use crate::error::SessionError;
use crate::session::Session;
use crate::state::AgentState;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// What the supervisor needs from a session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(), SessionError>;
    async fn is_connected(&self) -> bool;
    async fn disconnect(&self);
}

#[async_trait]
impl Connector for Session {
    async fn connect(&self) -> Result<(), SessionError> {
        Session::connect(self).await
    }

    async fn is_connected(&self) -> bool {
        self.link().is_connected().await
    }

    async fn disconnect(&self) {
        Session::disconnect(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Up,
    Reconnecting,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Up => "up",
            SupervisorState::Reconnecting => "reconnecting",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Reasons the initial connection did not come up.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("fatal connection error: {0}")]
    Fatal(SessionError),
    #[error("gave up after {attempts} connection attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: SessionError },
    #[error("stop requested before the agent came up")]
    Stopped,
}

/// Keeps one session connected for the life of the process.
pub struct Supervisor {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<AgentState>,
    state: RwLock<SupervisorState>,
}

impl Supervisor {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy, shared: Arc<AgentState>) -> Self {
        Self {
            connector,
            policy,
            shared,
            state: RwLock::new(SupervisorState::Idle),
        }
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.read().await
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    async fn set_state(&self, next: SupervisorState) {
        *self.state.write().await = next;
    }

    /// Makes the first connection.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        self.set_state(SupervisorState::Connecting).await;

        let max_attempts = self.policy.max_initial_attempts;
        let mut delays = self.policy.initial_delays();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if self.shared.run.is_stop_requested() {
                return self.abandon().await;
            }

            info!("Connection attempt {}/{}", attempt, max_attempts);
            match self.connector.connect().await {
                Ok(()) => {
                    return if self.came_up().await {
                        Ok(())
                    } else {
                        Err(SupervisorError::Stopped)
                    };
                }
                Err(e) if !e.is_retryable() => {
                    error!("Connection attempt {}/{} failed permanently: {}", attempt, max_attempts, e);
                    self.set_state(SupervisorState::Stopped).await;
                    return Err(SupervisorError::Fatal(e));
                }
                Err(e) => {
                    warn!("Connection attempt {}/{} failed: {}", attempt, max_attempts, e);
                    last_error = Some(e);
                }
            }

            if let Some(delay) = delays.next() {
                info!("Retrying in {:?}...", delay);
                if !self.pause(delay).await {
                    return self.abandon().await;
                }
            }
        }

        self.set_state(SupervisorState::Stopped).await;
        let last_error = last_error
            .unwrap_or_else(|| SessionError::Connection("no connection attempts were made".to_string()));
        error!("Could not connect after {} attempts", max_attempts);
        Err(SupervisorError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Watches liveness and reconnects until a stop is requested.
    pub async fn run(&self) {
        while self.pause(self.policy.poll_interval).await {
            if self.connector.is_connected().await {
                continue;
            }

            warn!("Connection lost, reconnecting...");
            self.set_state(SupervisorState::Reconnecting).await;
            if !self.reconnect().await {
                break;
            }
        }

        self.set_state(SupervisorState::Stopped).await;
        self.connector.disconnect().await;
        info!("Supervisor stopped");
    }

    /// Retries at the steady-state delay until connected (`true`) or stopped (`false`).
    async fn reconnect(&self) -> bool {
        let mut attempt: u64 = 0;
        loop {
            if self.shared.run.is_stop_requested() {
                return false;
            }

            attempt += 1;
            info!("Reconnection attempt {}", attempt);
            match self.connector.connect().await {
                Ok(()) => {
                    if !self.came_up().await {
                        return false;
                    }
                    info!("Reconnected after {} attempt(s)", attempt);
                    return true;
                }
                Err(e) if !e.is_retryable() => {
                    error!("Reconnection attempt {} rejected: {}", attempt, e)
                }
                Err(e) => warn!("Reconnection attempt {} failed: {}", attempt, e),
            }

            if !self.pause(self.policy.steady_state_delay).await {
                return false;
            }
        }
    }

    /// Marks the supervisor up, unless a stop arrived while connecting.
    async fn came_up(&self) -> bool {
        if self.shared.run.is_stop_requested() {
            self.connector.disconnect().await;
            self.set_state(SupervisorState::Stopped).await;
            return false;
        }
        self.set_state(SupervisorState::Up).await;
        true
    }

    async fn abandon(&self) -> Result<(), SupervisorError> {
        self.set_state(SupervisorState::Stopped).await;
        Err(SupervisorError::Stopped)
    }

    /// Sleeps for `duration`; returns `false` if a stop was requested instead.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shared.run.stopped() => false,
            _ = sleep(duration) => !self.shared.run.is_stop_requested(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Connector whose outcomes are scripted; unscripted attempts succeed.
    #[derive(Default)]
    struct ScriptedConnector {
        outcomes: Mutex<VecDeque<Result<(), SessionError>>>,
        attempts: Mutex<Vec<Instant>>,
        connected: AtomicBool,
        disconnects: AtomicUsize,
        stop_during_attempt: Option<(usize, Arc<AgentState>)>,
        always_fail: bool,
    }

    impl ScriptedConnector {
        fn with_outcomes(outcomes: Vec<Result<(), SessionError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Self::default()
            }
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }

        fn drop_connection(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<(), SessionError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(Instant::now());
                attempts.len()
            };
            if let Some((at, shared)) = &self.stop_during_attempt {
                if *at == attempt {
                    shared.run.request_stop();
                }
            }
            let outcome = if self.always_fail {
                Err(SessionError::Connection("refused".into()))
            } else {
                self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
            };
            if outcome.is_ok() {
                self.connected.store(true, Ordering::SeqCst);
            }
            outcome
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn refused() -> Result<(), SessionError> {
        Err(SessionError::Connection("connection refused".into()))
    }

    fn gaps(instants: &[Instant]) -> Vec<Duration> {
        instants.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn supervisor(connector: Arc<ScriptedConnector>, shared: Arc<AgentState>) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(connector, ReconnectPolicy::default(), shared))
    }

    #[tokio::test(start_paused = true)]
    async fn initial_backoff_doubles_then_gives_up() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![refused(), refused(), refused(), Ok(())]));
        let sup = supervisor(connector.clone(), AgentState::new());

        let result = sup.start().await;

        assert!(matches!(result, Err(SupervisorError::Exhausted { attempts: 3, .. })));
        assert_eq!(connector.attempt_count(), 3);
        assert_eq!(gaps(&connector.attempts()), vec![Duration::from_secs(5), Duration::from_secs(10)]);
        assert_eq!(sup.state().await, SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_connect_succeeds_after_retry() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![
            Err(SessionError::Timeout(Duration::from_secs(15))),
            Ok(()),
        ]));
        let sup = supervisor(connector.clone(), AgentState::new());

        sup.start().await.unwrap();

        assert_eq!(connector.attempt_count(), 2);
        assert_eq!(sup.state().await, SupervisorState::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn large_attempt_budget_backs_off_without_overflow() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![refused(), refused(), Ok(())]));
        let policy = ReconnectPolicy {
            max_initial_attempts: 70,
            ..ReconnectPolicy::default()
        };
        let sup = Supervisor::new(connector.clone(), policy, AgentState::new());

        sup.start().await.unwrap();

        assert_eq!(connector.attempt_count(), 3);
        assert_eq!(gaps(&connector.attempts()), vec![Duration::from_secs(5), Duration::from_secs(10)]);
        assert_eq!(sup.state().await, SupervisorState::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credentials_are_not_retried() {
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![Err(SessionError::Auth(
            "bad password".into(),
        ))]));
        let sup = supervisor(connector.clone(), AgentState::new());

        let result = sup.start().await;

        assert!(matches!(result, Err(SupervisorError::Fatal(SessionError::Auth(_)))));
        assert_eq!(connector.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_makes_no_attempt() {
        let shared = AgentState::new();
        shared.run.request_stop();
        let connector = Arc::new(ScriptedConnector::default());
        let sup = supervisor(connector.clone(), shared);

        assert!(matches!(sup.start().await, Err(SupervisorError::Stopped)));
        assert_eq!(connector.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_connect_discards_the_new_session() {
        let shared = AgentState::new();
        let connector = Arc::new(ScriptedConnector {
            stop_during_attempt: Some((1, shared.clone())),
            ..ScriptedConnector::default()
        });
        let sup = supervisor(connector.clone(), shared);

        assert!(matches!(sup.start().await, Err(SupervisorError::Stopped)));
        assert!(!connector.is_connected().await);
        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_state_retries_at_fixed_delay_until_connected() {
        let shared = AgentState::new();
        let connector = Arc::new(ScriptedConnector::with_outcomes(vec![
            Ok(()),
            refused(),
            refused(),
            refused(),
            refused(),
        ]));
        let sup = supervisor(connector.clone(), shared.clone());
        sup.start().await.unwrap();

        let runner = tokio::spawn({
            let sup = sup.clone();
            async move { sup.run().await }
        });

        connector.drop_connection();
        // 1 initial + 4 failures + 1 success
        while connector.attempt_count() < 6 {
            sleep(Duration::from_millis(100)).await;
        }
        assert!(connector.is_connected().await);
        assert_eq!(sup.state().await, SupervisorState::Up);

        let reconnects = &connector.attempts()[1..];
        assert!(gaps(reconnects).iter().all(|gap| *gap == Duration::from_secs(5)));

        shared.run.request_stop();
        runner.await.unwrap();

        assert_eq!(sup.state().await, SupervisorState::Stopped);
        assert!(!connector.is_connected().await);
        assert_eq!(connector.attempt_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_state_never_gives_up_before_stop() {
        let shared = AgentState::new();
        let connector = Arc::new(ScriptedConnector {
            always_fail: true,
            ..ScriptedConnector::default()
        });
        let sup = supervisor(connector.clone(), shared.clone());
        let runner = tokio::spawn({
            let sup = sup.clone();
            async move { sup.run().await }
        });

        let n = 25;
        while connector.attempt_count() < n + 1 {
            sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(sup.state().await, SupervisorState::Reconnecting);

        shared.run.request_stop();
        runner.await.unwrap();

        assert_eq!(connector.attempt_count(), n + 1);
        assert_eq!(sup.state().await, SupervisorState::Stopped);
        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_observed_within_one_poll_interval() {
        let shared = AgentState::new();
        let connector = Arc::new(ScriptedConnector::default());
        let sup = supervisor(connector.clone(), shared.clone());
        sup.start().await.unwrap();

        let runner = tokio::spawn({
            let sup = sup.clone();
            async move { sup.run().await }
        });
        sleep(Duration::from_millis(2_500)).await;

        let requested_at = Instant::now();
        shared.run.request_stop();
        runner.await.unwrap();

        assert!(requested_at.elapsed() <= sup.policy().poll_interval);
        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.attempt_count(), 1);
    }
}

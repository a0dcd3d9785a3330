//! Runtime configuration types consumed by the core.
//!
//! These are the already-validated values the session and supervisor work
//! with. Loading them from disk is the binary's job.

use std::time::Duration;

/// Who we are and where we connect to.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// Remote host name or address
    pub host: String,
    /// Remote port
    pub port: u16,
    /// WebSocket request path, starting with `/`
    pub path: String,
    /// Player name used to log in; also the name the chat engine answers to
    pub username: String,
    /// Optional credential sent with the login frame
    pub password: Option<String>,
    /// Upper bound for socket open plus login handshake
    pub connect_timeout: Duration,
}

impl SessionIdentity {
    /// Creates an identity with no credential, the root path and a 15s handshake timeout.
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_string(),
            username: username.into(),
            password: None,
            connect_timeout: Duration::from_secs(15),
        }
    }

    /// WebSocket URL for this identity.
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("ws://{}:{}{}", self.host, self.port, path)
    }
}

/// Reconnection behaviour, constant for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempts allowed for the very first connection (at least 1)
    pub max_initial_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Growth factor applied to the delay after each retryable failure (> 1)
    pub backoff_multiplier: f64,
    /// Fixed delay between attempts once we have been connected before
    pub steady_state_delay: Duration,
    /// How often the supervisor checks session liveness
    pub poll_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_initial_attempts: 3,
            initial_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            steady_state_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Checks the invariants the supervisor relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_initial_attempts < 1 {
            return Err("max_initial_attempts must be at least 1".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(format!(
                "backoff_multiplier must be greater than 1, got {}",
                self.backoff_multiplier
            ));
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be non-zero".to_string());
        }
        Ok(())
    }

    /// Delays slept between initial attempts, in order, computed lazily.
    ///
    /// There is one fewer delay than attempts: nothing is slept after the
    /// last failure. Growth saturates at [`Duration::MAX`].
    pub fn initial_delays(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial_delay), move |delay| Some(self.grow(*delay)))
            .take(self.max_initial_attempts.saturating_sub(1) as usize)
    }

    fn grow(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier).unwrap_or(Duration::MAX)
    }
}

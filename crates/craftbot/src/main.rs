//! Main application entry point for the craftbot agent
//!
//! Loads configuration, wires the session, handlers and supervisor together,
//! and runs until a termination signal arrives. Exit status is 1 when the
//! first connection cannot be made, 0 after an operator shutdown.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{anyhow, Context, Result};
use cli::CliArgs;
use config::AppConfig;
use craftbot_core::{
    AgentState, ChatEngine, Dispatcher, JsonlChatHistory, KeepaliveResponder, MessageKind, OpenAiCompletion,
    Session, SessionLink, Supervisor, SupervisorError,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// The agent with every component wired up.
pub struct Application {
    shared: Arc<AgentState>,
    session: Arc<Session>,
    supervisor: Arc<Supervisor>,
}

impl Application {
    /// Builds the component graph. Nothing touches the network yet.
    ///
    /// Handlers are registered in a fixed order (keepalive, presence, chat)
    /// and the dispatcher is frozen before the session is created.
    ///
    /// # Errors
    ///
    /// Fails only if the completion HTTP client cannot be built.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let shared = AgentState::new();
        let link = SessionLink::new(shared.clone());
        let identity = config.to_session_identity();

        let completion = completion_client(config)?;
        let history = JsonlChatHistory::new(&config.memory.db_path);
        let chat = ChatEngine::new(
            identity.username.clone(),
            link.clone(),
            Arc::new(completion),
            Arc::new(history),
        )
        .with_completion_timeout(config.completion_timeout());

        let dispatcher = Dispatcher::builder()
            .on(MessageKind::KeepAlive, Arc::new(KeepaliveResponder::new(link.clone())))
            .on(MessageKind::Presence, shared.presence.clone())
            .on(MessageKind::Chat, Arc::new(chat))
            .build();

        let session = Arc::new(Session::new(identity, link, dispatcher));
        let supervisor = Arc::new(Supervisor::new(
            session.clone(),
            config.to_reconnect_policy(),
            shared.clone(),
        ));

        Ok(Self {
            shared,
            session,
            supervisor,
        })
    }

    /// Connects and keeps the agent online until shutdown.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a signal-driven shutdown, including one that arrives
    /// before the first connection is made. An error when the first
    /// connection fails for good, which `main` turns into exit status 1.
    pub async fn run(self) -> Result<()> {
        let signal_task = {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                match signals::wait_for_shutdown_signal().await {
                    Ok(()) => {
                        info!("Disconnecting...");
                        shared.run.request_stop();
                    }
                    Err(e) => error!("Failed to install signal handlers: {}", e),
                }
            })
        };

        let outcome = match self.supervisor.start().await {
            Ok(()) => {
                info!("Agent is online. Press Ctrl+C to shut down.");
                self.supervisor.run().await;
                Ok(())
            }
            Err(SupervisorError::Stopped) => {
                self.session.disconnect().await;
                Ok(())
            }
            Err(e) => Err(anyhow!(e)).context("Failed to connect"),
        };

        signal_task.abort();
        if outcome.is_ok() {
            info!("Agent stopped");
        }
        outcome
    }
}

fn completion_client(config: &AppConfig) -> Result<OpenAiCompletion> {
    OpenAiCompletion::new(
        &config.openai.api_key,
        config.openai.model.clone(),
        config.openai.base_url.clone(),
        config.completion_timeout(),
    )
    .context("Failed to build completion client")
}

async fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    config.apply_cli(args);
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;
    Ok(config)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match load_config(&args).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to start agent: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::setup_logging(&config.logging) {
        eprintln!("Failed to start agent: {e:#}");
        return ExitCode::FAILURE;
    }

    if args.list_models {
        return match completion_client(&config) {
            Ok(client) => {
                for model in client.list_models().await {
                    println!("{model}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    info!(
        "Agent starting with username '{}' on {}:{} using model '{}'",
        config.minecraft.username, config.minecraft.server_host, config.minecraft.server_port, config.openai.model
    );

    let result = match Application::new(&config) {
        Ok(app) => app.run().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

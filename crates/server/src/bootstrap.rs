use std::sync::Arc;
use std::time::Duration;

use relaybot_agent::{build_generator, ReplyGenerator, ReplyRuntime};
use relaybot_core::config::{AppConfig, ConfigError, LoadOptions};
use relaybot_core::{
    Clock, ConversationStore, EventDeduplicator, GenerationError, SweepHandle, SweepWorker,
    SystemClock,
};
use relaybot_slack::events::relay_dispatcher;
use relaybot_slack::socket::{NoopSocketTransport, ReconnectPolicy, SocketModeRunner};
use relaybot_slack::web::{PostError, SlackWebClient};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub conversations: Arc<ConversationStore>,
    pub deduplicator: Arc<EventDeduplicator>,
    pub runtime: Arc<ReplyRuntime>,
    pub slack_runner: SocketModeRunner,
    sweepers: Vec<SweepHandle>,
}

impl Application {
    pub fn sweeper_count(&self) -> usize {
        self.sweepers.len()
    }

    /// Stops the background sweepers and waits for them to finish.
    pub async fn shutdown(self) {
        for sweeper in self.sweepers {
            sweeper.shutdown().await;
        }
        info!(
            event_name = "system.server.sweepers_stopped",
            correlation_id = "shutdown",
            "background sweepers stopped"
        );
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("reply generator could not be built: {0}")]
    Generator(#[source] GenerationError),
    #[error("slack web client could not be built: {0}")]
    SlackClient(#[source] PostError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let generator = build_generator(&config.llm).map_err(BootstrapError::Generator)?;
    bootstrap_with_generator(config, generator, Arc::new(SystemClock)).await
}

pub async fn bootstrap_with_generator(
    config: AppConfig,
    generator: Arc<dyn ReplyGenerator>,
    clock: Arc<dyn Clock>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        llm_model = %config.llm.model,
        "starting application bootstrap"
    );
    config.validate()?;

    let conversations =
        Arc::new(ConversationStore::with_clock(config.conversation.settings(), clock.clone()));
    let deduplicator = Arc::new(EventDeduplicator::with_clock(config.dedupe.settings(), clock));

    let sweepers = vec![
        SweepWorker::new(
            conversations.clone(),
            Duration::from_millis(config.conversation.sweep_interval_ms),
        )
        .spawn(),
        SweepWorker::new(deduplicator.clone(), Duration::from_millis(config.dedupe.sweep_interval_ms))
            .spawn(),
    ];
    info!(
        event_name = "system.bootstrap.sweepers_started",
        correlation_id = "bootstrap",
        conversation_sweep_ms = config.conversation.sweep_interval_ms,
        dedupe_sweep_ms = config.dedupe.sweep_interval_ms,
        "background sweepers started"
    );

    let runtime = Arc::new(ReplyRuntime::new(
        conversations.clone(),
        deduplicator.clone(),
        generator,
        config.conversation.system_prompt.clone(),
    ));

    let poster = SlackWebClient::new(
        config.slack.bot_token.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    )
    .map_err(BootstrapError::SlackClient)?;
    let slack_runner = SocketModeRunner::new(
        Arc::new(NoopSocketTransport),
        relay_dispatcher(runtime.clone(), config.slack.bot_user_id.clone()),
        Arc::new(poster),
        ReconnectPolicy::default(),
    );

    Ok(Application { config, conversations, deduplicator, runtime, slack_runner, sweepers })
}

use std::sync::Arc;

use relaybot_core::{
    to_display_error, ContextKind, ConversationStore, DisplayError, EventDeduplicator, Message,
};
use tracing::{debug, info, warn};

use crate::llm::ReplyGenerator;

/// A user utterance that reached the bot, already stripped of transport
/// details.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub event_id: Option<String>,
    pub user_id: String,
    pub context_kind: ContextKind,
    pub text: String,
    pub thread_id: Option<String>,
}

impl InboundEvent {
    pub fn new(user_id: impl Into<String>, context_kind: ContextKind, text: impl Into<String>) -> Self {
        Self {
            event_id: None,
            user_id: user_id.into(),
            context_kind,
            text: text.into(),
            thread_id: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    Duplicate,
    Ignored,
    Cleared,
    Help,
    Replied(String),
    Failed(DisplayError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Reset,
    Help,
}

impl BotCommand {
    /// Recognises a bare built-in command. Anything with extra words is a
    /// regular prompt.
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = text.trim().trim_start_matches('/').to_ascii_lowercase();
        match normalized.as_str() {
            "reset" | "clear" => Some(Self::Reset),
            "help" => Some(Self::Help),
            _ => None,
        }
    }
}

pub struct ReplyRuntime {
    conversations: Arc<ConversationStore>,
    deduplicator: Arc<EventDeduplicator>,
    generator: Arc<dyn ReplyGenerator>,
    system_prompt: Option<String>,
}

impl ReplyRuntime {
    pub fn new(
        conversations: Arc<ConversationStore>,
        deduplicator: Arc<EventDeduplicator>,
        generator: Arc<dyn ReplyGenerator>,
        system_prompt: Option<String>,
    ) -> Self {
        let system_prompt = system_prompt.filter(|prompt| !prompt.trim().is_empty());
        Self { conversations, deduplicator, generator, system_prompt }
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn deduplicator(&self) -> &Arc<EventDeduplicator> {
        &self.deduplicator
    }

    pub async fn handle(&self, event: InboundEvent) -> ReplyOutcome {
        let correlation_id = event.event_id.as_deref().unwrap_or("none");

        if self.deduplicator.is_duplicate(event.event_id.as_deref()) {
            info!(
                event_name = "agent.runtime.duplicate_skipped",
                correlation_id,
                user_id = %event.user_id,
                "skipping redelivered event"
            );
            return ReplyOutcome::Duplicate;
        }

        let text = event.text.trim();
        if text.is_empty() {
            debug!(
                event_name = "agent.runtime.empty_ignored",
                correlation_id,
                user_id = %event.user_id,
                "ignoring empty message"
            );
            return ReplyOutcome::Ignored;
        }

        match BotCommand::parse(text) {
            Some(BotCommand::Reset) => {
                self.conversations.clear_conversation(&event.user_id, event.context_kind);
                info!(
                    event_name = "agent.runtime.conversation_reset",
                    correlation_id,
                    user_id = %event.user_id,
                    context_kind = %event.context_kind,
                    "conversation reset by user"
                );
                return ReplyOutcome::Cleared;
            }
            Some(BotCommand::Help) => return ReplyOutcome::Help,
            None => {}
        }

        if let Some(prompt) = &self.system_prompt {
            if self.conversations.get_conversation(&event.user_id, event.context_kind).is_empty() {
                self.conversations.add_message(
                    &event.user_id,
                    event.context_kind,
                    Message::system(prompt.clone()),
                );
            }
        }

        self.conversations.add_message(&event.user_id, event.context_kind, Message::user(text));
        let history = self.conversations.get_conversation(&event.user_id, event.context_kind);

        match self.generator.generate(&history).await {
            Ok(reply) => {
                self.conversations.add_message(
                    &event.user_id,
                    event.context_kind,
                    Message::assistant(reply.clone()),
                );
                info!(
                    event_name = "agent.runtime.replied",
                    correlation_id,
                    user_id = %event.user_id,
                    context_kind = %event.context_kind,
                    history_len = history.len(),
                    reply_chars = reply.chars().count(),
                    "generated reply"
                );
                ReplyOutcome::Replied(reply)
            }
            Err(error) => {
                warn!(
                    event_name = "agent.runtime.generation_failed",
                    correlation_id,
                    user_id = %event.user_id,
                    context_kind = %event.context_kind,
                    error = %error,
                    "reply generation failed"
                );
                ReplyOutcome::Failed(to_display_error(&error))
            }
        }
    }

    /// Drops the user's history in every context, as `/relaybot reset` does.
    pub fn reset_all(&self, user_id: &str) {
        for context_kind in [ContextKind::Dm, ContextKind::Channel] {
            self.conversations.clear_conversation(user_id, context_kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use relaybot_core::{
        ContextKind, ConversationStore, EventDeduplicator, GenerationError, Message, Role,
    };
    use tokio::sync::Mutex;

    use super::{BotCommand, InboundEvent, ReplyOutcome, ReplyRuntime};
    use crate::llm::ReplyGenerator;

    #[derive(Default)]
    struct ScriptedGenerator {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        replies: VecDeque<Result<String, GenerationError>>,
        seen_histories: Vec<Vec<Message>>,
    }

    impl ScriptedGenerator {
        fn with_replies(replies: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                state: Mutex::new(ScriptedState { replies: replies.into(), seen_histories: Vec::new() }),
            }
        }

        async fn seen_histories(&self) -> Vec<Vec<Message>> {
            self.state.lock().await.seen_histories.clone()
        }
    }

    #[async_trait]
    impl ReplyGenerator for ScriptedGenerator {
        async fn generate(&self, history: &[Message]) -> Result<String, GenerationError> {
            let mut state = self.state.lock().await;
            state.seen_histories.push(history.to_vec());
            state.replies.pop_front().unwrap_or_else(|| Ok("default reply".to_owned()))
        }
    }

    fn runtime_with(
        generator: Arc<ScriptedGenerator>,
        system_prompt: Option<&str>,
    ) -> ReplyRuntime {
        ReplyRuntime::new(
            Arc::new(ConversationStore::default()),
            Arc::new(EventDeduplicator::default()),
            generator,
            system_prompt.map(str::to_owned),
        )
    }

    #[test]
    fn parses_builtin_commands() {
        assert_eq!(BotCommand::parse(" Reset "), Some(BotCommand::Reset));
        assert_eq!(BotCommand::parse("clear"), Some(BotCommand::Reset));
        assert_eq!(BotCommand::parse("/help"), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("help me write a poem"), None);
    }

    #[tokio::test]
    async fn reply_is_recorded_after_system_prompt_and_user_turn() {
        let generator = Arc::new(ScriptedGenerator::with_replies(vec![Ok("Hi there!".to_owned())]));
        let runtime = runtime_with(generator.clone(), Some("You are helpful."));

        let outcome = runtime
            .handle(InboundEvent::new("U1", ContextKind::Dm, "hello").with_event_id("Ev1"))
            .await;

        assert_eq!(outcome, ReplyOutcome::Replied("Hi there!".to_owned()));
        let history = runtime.conversations().get_conversation("U1", ContextKind::Dm);
        let roles = history.iter().map(|message| message.role).collect::<Vec<_>>();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(generator.seen_histories().await[0].len(), 2);
    }

    #[tokio::test]
    async fn system_prompt_is_seeded_once_per_conversation() {
        let generator = Arc::new(ScriptedGenerator::default());
        let runtime = runtime_with(generator, Some("sys"));

        runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "one")).await;
        runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "two")).await;

        let history = runtime.conversations().get_conversation("U1", ContextKind::Dm);
        assert_eq!(history.iter().filter(|message| message.is_system()).count(), 1);
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn redelivered_event_is_not_answered_twice() {
        let generator = Arc::new(ScriptedGenerator::default());
        let runtime = runtime_with(generator.clone(), None);
        let event = InboundEvent::new("U1", ContextKind::Channel, "hello").with_event_id("Ev42");

        let first = runtime.handle(event.clone()).await;
        let second = runtime.handle(event).await;

        assert!(matches!(first, ReplyOutcome::Replied(_)));
        assert_eq!(second, ReplyOutcome::Duplicate);
        assert_eq!(generator.seen_histories().await.len(), 1);
    }

    #[tokio::test]
    async fn events_without_ids_are_always_processed() {
        let generator = Arc::new(ScriptedGenerator::default());
        let runtime = runtime_with(generator.clone(), None);

        runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "hello")).await;
        runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "hello")).await;

        assert_eq!(generator.seen_histories().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_generation_returns_display_error() {
        let generator = Arc::new(ScriptedGenerator::with_replies(vec![Err(
            GenerationError::Http { status: 401, body: "nope".to_owned() },
        )]));
        let runtime = runtime_with(generator, None);

        let outcome = runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "hello")).await;

        let ReplyOutcome::Failed(display) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(display.message.contains("API key"));
        let history = runtime.conversations().get_conversation("U1", ContextKind::Dm);
        assert!(history.iter().all(|message| message.role != Role::Assistant));
    }

    #[tokio::test]
    async fn reset_command_clears_only_that_context() {
        let generator = Arc::new(ScriptedGenerator::default());
        let runtime = runtime_with(generator.clone(), None);
        runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "dm question")).await;
        runtime.handle(InboundEvent::new("U1", ContextKind::Channel, "channel question")).await;

        let outcome = runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "reset")).await;

        assert_eq!(outcome, ReplyOutcome::Cleared);
        assert!(runtime.conversations().get_conversation("U1", ContextKind::Dm).is_empty());
        assert_eq!(runtime.conversations().get_conversation("U1", ContextKind::Channel).len(), 2);
        assert_eq!(generator.seen_histories().await.len(), 2);
    }

    #[tokio::test]
    async fn blank_text_and_help_skip_generation() {
        let generator = Arc::new(ScriptedGenerator::default());
        let runtime = runtime_with(generator.clone(), None);

        assert_eq!(
            runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "   ")).await,
            ReplyOutcome::Ignored
        );
        assert_eq!(
            runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "help")).await,
            ReplyOutcome::Help
        );
        assert!(generator.seen_histories().await.is_empty());
    }

    #[tokio::test]
    async fn reset_all_clears_both_contexts() {
        let generator = Arc::new(ScriptedGenerator::default());
        let runtime = runtime_with(generator, None);
        runtime.handle(InboundEvent::new("U1", ContextKind::Dm, "a")).await;
        runtime.handle(InboundEvent::new("U1", ContextKind::Channel, "b")).await;

        runtime.reset_all("U1");

        assert_eq!(runtime.conversations().active_conversations(), 0);
    }
}

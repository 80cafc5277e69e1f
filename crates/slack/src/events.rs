use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use relaybot_agent::{InboundEvent, ReplyOutcome, ReplyRuntime};
use relaybot_core::ContextKind;
use thiserror::Error;
use tracing::debug;

use crate::{
    blocks::{self, MessageTemplate},
    commands::{CommandRouter, SlashCommandPayload},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    DirectMessage(MessageEvent),
    AppMention(MessageEvent),
    SlashCommand(SlashCommandPayload),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::DirectMessage(_) => SlackEventType::DirectMessage,
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    DirectMessage,
    AppMention,
    SlashCommand,
    Unsupported,
}

/// A user-authored message, either a DM (`message.im`) or an `app_mention`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub event_id: Option<String>,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
}

impl MessageEvent {
    /// The thread a reply belongs in: the existing thread, or a new one
    /// rooted at the triggering message.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

/// A message ready to be posted back to Slack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub channel_id: String,
    pub thread_ts: Option<String>,
    /// When set, the message is only visible to this user.
    pub ephemeral_user: Option<String>,
    pub message: MessageTemplate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutgoingMessage),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("message event is missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

/// The conversation runtime as seen from the Slack surface.
#[async_trait]
pub trait ReplyService: Send + Sync {
    async fn reply(&self, event: InboundEvent) -> ReplyOutcome;
    fn reset_user(&self, user_id: &str);
}

#[async_trait]
impl ReplyService for ReplyRuntime {
    async fn reply(&self, event: InboundEvent) -> ReplyOutcome {
        self.handle(event).await
    }

    fn reset_user(&self, user_id: &str) {
        self.reset_all(user_id);
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Wires DMs, mentions and `/relaybot` to `service`.
pub fn relay_dispatcher(
    service: Arc<dyn ReplyService>,
    bot_user_id: Option<String>,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(ConversationHandler::direct_messages(service.clone(), bot_user_id.clone()));
    dispatcher.register(ConversationHandler::app_mentions(service.clone(), bot_user_id));
    dispatcher.register(SlashCommandHandler::new(service));
    dispatcher
}

pub struct ConversationHandler {
    event_type: SlackEventType,
    context_kind: ContextKind,
    service: Arc<dyn ReplyService>,
    bot_user_id: Option<String>,
}

impl ConversationHandler {
    pub fn direct_messages(service: Arc<dyn ReplyService>, bot_user_id: Option<String>) -> Self {
        Self {
            event_type: SlackEventType::DirectMessage,
            context_kind: ContextKind::Dm,
            service,
            bot_user_id,
        }
    }

    pub fn app_mentions(service: Arc<dyn ReplyService>, bot_user_id: Option<String>) -> Self {
        Self {
            event_type: SlackEventType::AppMention,
            context_kind: ContextKind::Channel,
            service,
            bot_user_id,
        }
    }

    fn is_from_bot(&self, event: &MessageEvent) -> bool {
        event.bot_id.is_some() || self.bot_user_id.as_deref() == Some(event.user_id.as_str())
    }
}

#[async_trait]
impl EventHandler for ConversationHandler {
    fn event_type(&self) -> SlackEventType {
        self.event_type
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let (SlackEvent::DirectMessage(event) | SlackEvent::AppMention(event)) = &envelope.event
        else {
            return Ok(HandlerResult::Ignored);
        };

        if self.is_from_bot(event) {
            debug!(
                event_name = "ingress.slack.bot_message_ignored",
                correlation_id = %ctx.correlation_id,
                channel_id = %event.channel_id,
                "ignoring bot-authored message"
            );
            return Ok(HandlerResult::Ignored);
        }
        if event.user_id.trim().is_empty() {
            return Err(EventHandlerError::MissingField("user"));
        }
        if event.channel_id.trim().is_empty() {
            return Err(EventHandlerError::MissingField("channel"));
        }

        let thread_ts = event.reply_thread_ts().to_owned();
        let inbound = InboundEvent {
            event_id: event.event_id.clone(),
            user_id: event.user_id.clone(),
            context_kind: self.context_kind,
            text: strip_mentions(&event.text),
            thread_id: Some(thread_ts.clone()),
        };

        let message = match self.service.reply(inbound).await {
            ReplyOutcome::Duplicate | ReplyOutcome::Ignored => return Ok(HandlerResult::Ignored),
            ReplyOutcome::Cleared => blocks::cleared_message(),
            ReplyOutcome::Help => blocks::help_message(),
            ReplyOutcome::Replied(reply) => blocks::reply_message(&reply),
            ReplyOutcome::Failed(display) => blocks::error_message(&display, &ctx.correlation_id),
        };

        Ok(HandlerResult::Responded(OutgoingMessage {
            channel_id: event.channel_id.clone(),
            thread_ts: Some(thread_ts),
            ephemeral_user: None,
            message,
        }))
    }
}

pub struct SlashCommandHandler {
    router: CommandRouter,
}

impl SlashCommandHandler {
    pub fn new(service: Arc<dyn ReplyService>) -> Self {
        Self { router: CommandRouter::new(service) }
    }
}

#[async_trait]
impl EventHandler for SlashCommandHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let message = self.router.route(payload, &ctx.correlation_id);
        Ok(HandlerResult::Responded(OutgoingMessage {
            channel_id: payload.channel_id.clone(),
            thread_ts: None,
            ephemeral_user: Some(payload.user_id.clone()),
            message,
        }))
    }
}

/// Removes `<@U…>` user mentions so the model only sees what was asked.
pub fn strip_mentions(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<@") {
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        output.push_str(&rest[..start]);
        rest = &rest[start + end + 1..];
    }
    output.push_str(rest);

    output.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use relaybot_agent::{InboundEvent, ReplyOutcome};
    use relaybot_core::{ContextKind, DisplayError};
    use tokio::sync::Mutex;

    use super::{
        relay_dispatcher, strip_mentions, EventContext, EventDispatcher, EventHandlerError,
        DispatchError, HandlerResult, MessageEvent, ReplyService, SlackEnvelope, SlackEvent,
    };
    use crate::commands::SlashCommandPayload;

    struct ScriptedService {
        outcome: ReplyOutcome,
        received: Mutex<Vec<InboundEvent>>,
        resets: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn returning(outcome: ReplyOutcome) -> Self {
            Self {
                outcome,
                received: Mutex::new(Vec::new()),
                resets: std::sync::Mutex::new(Vec::new()),
            }
        }

        async fn received(&self) -> Vec<InboundEvent> {
            self.received.lock().await.clone()
        }
    }

    #[async_trait]
    impl ReplyService for ScriptedService {
        async fn reply(&self, event: InboundEvent) -> ReplyOutcome {
            self.received.lock().await.push(event);
            self.outcome.clone()
        }

        fn reset_user(&self, user_id: &str) {
            self.resets.lock().expect("lock").push(user_id.to_owned());
        }
    }

    fn message_event(text: &str) -> MessageEvent {
        MessageEvent {
            event_id: Some("Ev1".to_owned()),
            channel_id: "D1".to_owned(),
            user_id: "U1".to_owned(),
            text: text.to_owned(),
            ts: "1730000000.1000".to_owned(),
            thread_ts: None,
            bot_id: None,
        }
    }

    fn envelope(event: SlackEvent) -> SlackEnvelope {
        SlackEnvelope { envelope_id: "env-1".to_owned(), event }
    }

    #[tokio::test]
    async fn direct_message_reply_is_threaded_under_trigger() {
        let service = Arc::new(ScriptedService::returning(ReplyOutcome::Replied("hi!".to_owned())));
        let dispatcher = relay_dispatcher(service.clone(), Some("UBOT".to_owned()));

        let result = dispatcher
            .dispatch(&envelope(SlackEvent::DirectMessage(message_event("hello"))), &EventContext::default())
            .await
            .expect("dispatch");

        let HandlerResult::Responded(outgoing) = result else {
            panic!("expected a response, got {result:?}");
        };
        assert_eq!(outgoing.channel_id, "D1");
        assert_eq!(outgoing.thread_ts.as_deref(), Some("1730000000.1000"));
        assert_eq!(outgoing.message.fallback_text, "hi!");

        let received = service.received().await;
        assert_eq!(received[0].context_kind, ContextKind::Dm);
        assert_eq!(received[0].event_id.as_deref(), Some("Ev1"));
    }

    #[tokio::test]
    async fn mentions_are_stripped_and_tracked_as_channel_context() {
        let service = Arc::new(ScriptedService::returning(ReplyOutcome::Replied("ok".to_owned())));
        let dispatcher = relay_dispatcher(service.clone(), None);
        let mut event = message_event("<@UBOT> what is rust?");
        event.thread_ts = Some("1729999999.0001".to_owned());

        let result = dispatcher
            .dispatch(&envelope(SlackEvent::AppMention(event)), &EventContext::default())
            .await
            .expect("dispatch");

        let received = service.received().await;
        assert_eq!(received[0].text, "what is rust?");
        assert_eq!(received[0].context_kind, ContextKind::Channel);
        assert!(matches!(
            result,
            HandlerResult::Responded(outgoing) if outgoing.thread_ts.as_deref() == Some("1729999999.0001")
        ));
    }

    #[tokio::test]
    async fn bot_authored_messages_never_reach_the_runtime() {
        let service = Arc::new(ScriptedService::returning(ReplyOutcome::Replied("loop".to_owned())));
        let dispatcher = relay_dispatcher(service.clone(), Some("UBOT".to_owned()));
        let mut from_bot_id = message_event("echo");
        from_bot_id.bot_id = Some("B1".to_owned());
        let mut from_bot_user = message_event("echo");
        from_bot_user.user_id = "UBOT".to_owned();

        for event in [from_bot_id, from_bot_user] {
            let result = dispatcher
                .dispatch(&envelope(SlackEvent::DirectMessage(event)), &EventContext::default())
                .await
                .expect("dispatch");
            assert_eq!(result, HandlerResult::Ignored);
        }
        assert!(service.received().await.is_empty());
    }

    #[tokio::test]
    async fn duplicates_produce_no_response() {
        let service = Arc::new(ScriptedService::returning(ReplyOutcome::Duplicate));
        let dispatcher = relay_dispatcher(service, None);

        let result = dispatcher
            .dispatch(&envelope(SlackEvent::DirectMessage(message_event("hello"))), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn failures_render_error_template_with_correlation_id() {
        let service = Arc::new(ScriptedService::returning(ReplyOutcome::Failed(DisplayError::new(
            "Please try again.",
        ))));
        let dispatcher = relay_dispatcher(service, None);
        let ctx = EventContext { correlation_id: "env-77".to_owned() };

        let result = dispatcher
            .dispatch(&envelope(SlackEvent::DirectMessage(message_event("hello"))), &ctx)
            .await
            .expect("dispatch");

        let HandlerResult::Responded(outgoing) = result else {
            panic!("expected a response");
        };
        assert!(outgoing.message.fallback_text.contains("Please try again."));
        assert!(format!("{:?}", outgoing.message.blocks).contains("env-77"));
    }

    #[tokio::test]
    async fn missing_user_is_a_handler_error() {
        let service = Arc::new(ScriptedService::returning(ReplyOutcome::Ignored));
        let dispatcher = relay_dispatcher(service, None);
        let mut event = message_event("hello");
        event.user_id = String::new();

        let result = dispatcher
            .dispatch(&envelope(SlackEvent::DirectMessage(event)), &EventContext::default())
            .await;

        assert_eq!(result, Err(DispatchError::Handler(EventHandlerError::MissingField("user"))));
    }

    #[tokio::test]
    async fn slash_reset_is_answered_ephemerally() {
        let service = Arc::new(ScriptedService::returning(ReplyOutcome::Ignored));
        let dispatcher = relay_dispatcher(service.clone(), None);
        let payload = SlashCommandPayload {
            command: "/relaybot".to_owned(),
            text: "reset".to_owned(),
            channel_id: "C1".to_owned(),
            user_id: "U9".to_owned(),
            trigger_id: "t-1".to_owned(),
        };

        let result = dispatcher
            .dispatch(&envelope(SlackEvent::SlashCommand(payload)), &EventContext::default())
            .await
            .expect("dispatch");

        assert!(matches!(
            result,
            HandlerResult::Responded(outgoing) if outgoing.ephemeral_user.as_deref() == Some("U9")
        ));
        assert_eq!(*service.resets.lock().expect("lock"), vec!["U9".to_owned()]);
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();

        let result = dispatcher
            .dispatch(
                &envelope(SlackEvent::Unsupported { event_type: "reaction_added".to_owned() }),
                &EventContext::default(),
            )
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[test]
    fn relay_dispatcher_registers_handlers() {
        let service = Arc::new(ScriptedService::returning(ReplyOutcome::Ignored));
        assert_eq!(relay_dispatcher(service, None).handler_count(), 3);
    }

    #[test]
    fn strip_mentions_handles_multiple_and_unterminated_tokens() {
        assert_eq!(strip_mentions("<@U1> hi <@U2|bob> there"), "hi  there");
        assert_eq!(strip_mentions("  plain  "), "plain");
        assert_eq!(strip_mentions("<@U1 broken"), "<@U1 broken");
    }
}

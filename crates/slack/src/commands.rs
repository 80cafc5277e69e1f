use std::sync::Arc;

use relaybot_core::DisplayError;
use thiserror::Error;
use tracing::info;

use crate::blocks::{self, MessageTemplate};
use crate::events::ReplyService;

pub const SLASH_COMMAND: &str = "/relaybot";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelaybotCommand {
    Reset,
    Help,
    Unknown { verb: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
}

pub fn parse_relaybot_command(
    payload: &SlashCommandPayload,
) -> Result<RelaybotCommand, CommandParseError> {
    if payload.command.trim() != SLASH_COMMAND {
        return Err(CommandParseError::UnsupportedCommand(payload.command.clone()));
    }

    let verb = payload.text.split_whitespace().next().unwrap_or("help").to_ascii_lowercase();
    Ok(match verb.as_str() {
        "reset" | "clear" => RelaybotCommand::Reset,
        "help" => RelaybotCommand::Help,
        _ => RelaybotCommand::Unknown { verb },
    })
}

pub struct CommandRouter {
    service: Arc<dyn ReplyService>,
}

impl CommandRouter {
    pub fn new(service: Arc<dyn ReplyService>) -> Self {
        Self { service }
    }

    pub fn route(&self, payload: &SlashCommandPayload, correlation_id: &str) -> MessageTemplate {
        match parse_relaybot_command(payload) {
            Ok(RelaybotCommand::Reset) => {
                self.service.reset_user(&payload.user_id);
                info!(
                    event_name = "ingress.slack.command_reset",
                    correlation_id,
                    user_id = %payload.user_id,
                    "cleared all conversations for user"
                );
                blocks::cleared_message()
            }
            Ok(RelaybotCommand::Help) => blocks::help_message(),
            Ok(RelaybotCommand::Unknown { verb }) => blocks::error_message(
                &DisplayError::new(format!(
                    "Unsupported command `{SLASH_COMMAND} {verb}`. Try `{SLASH_COMMAND} help`."
                )),
                correlation_id,
            ),
            Err(CommandParseError::UnsupportedCommand(command)) => blocks::error_message(
                &DisplayError::new(format!("`{command}` is not handled by this bot.")),
                correlation_id,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use relaybot_agent::{InboundEvent, ReplyOutcome};

    use super::{
        parse_relaybot_command, CommandParseError, CommandRouter, RelaybotCommand,
        SlashCommandPayload,
    };
    use crate::blocks::{Block, TextObject};
    use crate::events::ReplyService;

    #[derive(Default)]
    struct RecordingService {
        resets: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ReplyService for RecordingService {
        async fn reply(&self, _event: InboundEvent) -> ReplyOutcome {
            ReplyOutcome::Ignored
        }

        fn reset_user(&self, user_id: &str) {
            self.resets.lock().expect("lock").push(user_id.to_owned());
        }
    }

    fn payload(command: &str, text: &str) -> SlashCommandPayload {
        SlashCommandPayload {
            command: command.to_owned(),
            text: text.to_owned(),
            channel_id: "C1".to_owned(),
            user_id: "U1".to_owned(),
            trigger_id: "trigger-1".to_owned(),
        }
    }

    #[test]
    fn parses_known_verbs_and_defaults_to_help() {
        assert_eq!(parse_relaybot_command(&payload("/relaybot", "RESET")), Ok(RelaybotCommand::Reset));
        assert_eq!(parse_relaybot_command(&payload("/relaybot", "")), Ok(RelaybotCommand::Help));
        assert_eq!(
            parse_relaybot_command(&payload("/relaybot", "dance now")),
            Ok(RelaybotCommand::Unknown { verb: "dance".to_owned() })
        );
    }

    #[test]
    fn rejects_foreign_commands() {
        assert_eq!(
            parse_relaybot_command(&payload("/weather", "help")),
            Err(CommandParseError::UnsupportedCommand("/weather".to_owned()))
        );
    }

    #[test]
    fn reset_routes_to_service_and_confirms() {
        let service = Arc::new(RecordingService::default());
        let router = CommandRouter::new(service.clone());

        let message = router.route(&payload("/relaybot", "reset"), "req-1");

        assert_eq!(*service.resets.lock().expect("lock"), vec!["U1".to_owned()]);
        assert_eq!(message.fallback_text, "Conversation cleared");
    }

    #[test]
    fn unknown_verb_renders_error_with_correlation_id() {
        let router = CommandRouter::new(Arc::new(RecordingService::default()));

        let message = router.route(&payload("/relaybot", "dance"), "req-2");

        assert!(message.fallback_text.contains("/relaybot dance"));
        assert!(matches!(
            &message.blocks[1],
            Block::Context { elements, .. }
                if matches!(elements.first(), Some(TextObject::Plain { text }) if text.contains("req-2"))
        ));
    }
}

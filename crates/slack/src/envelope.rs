//! Decoding of raw Socket Mode frames into [`SlackEnvelope`]s.
//!
//! Transports hand the JSON text of each frame to [`parse_socket_frame`] and
//! forward the resulting envelopes to the runner.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::commands::SlashCommandPayload;
use crate::events::{MessageEvent, SlackEnvelope, SlackEvent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("socket frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("socket frame `{frame_type}` is missing `envelope_id`")]
    MissingEnvelopeId { frame_type: String },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    event_id: Option<String>,
    event: RawEvent,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    subtype: Option<String>,
    channel_type: Option<String>,
    channel: Option<String>,
    user: Option<String>,
    #[serde(default)]
    text: String,
    ts: Option<String>,
    thread_ts: Option<String>,
    bot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSlashCommand {
    command: String,
    #[serde(default)]
    text: String,
    channel_id: String,
    user_id: String,
    #[serde(default)]
    trigger_id: String,
}

pub fn parse_socket_frame(raw: &str) -> Result<SocketFrame, EnvelopeError> {
    let frame: RawFrame = serde_json::from_str(raw)?;

    match frame.frame_type.as_str() {
        "hello" => return Ok(SocketFrame::Hello),
        "disconnect" => {
            return Ok(SocketFrame::Disconnect {
                reason: frame.reason.unwrap_or_else(|| "unspecified".to_owned()),
            })
        }
        _ => {}
    }

    let envelope_id = frame
        .envelope_id
        .ok_or_else(|| EnvelopeError::MissingEnvelopeId { frame_type: frame.frame_type.clone() })?;

    let event = match frame.frame_type.as_str() {
        "events_api" => {
            let callback: EventCallback = serde_json::from_value(frame.payload)?;
            classify_event(callback)
        }
        "slash_commands" => {
            let command: RawSlashCommand = serde_json::from_value(frame.payload)?;
            SlackEvent::SlashCommand(SlashCommandPayload {
                command: command.command,
                text: command.text,
                channel_id: command.channel_id,
                user_id: command.user_id,
                trigger_id: command.trigger_id,
            })
        }
        other => SlackEvent::Unsupported { event_type: other.to_owned() },
    };

    Ok(SocketFrame::Envelope(SlackEnvelope { envelope_id, event }))
}

fn classify_event(callback: EventCallback) -> SlackEvent {
    let raw = callback.event;
    let is_direct_message = raw.event_type == "message"
        && raw.channel_type.as_deref() == Some("im")
        && raw.subtype.is_none();
    let is_mention = raw.event_type == "app_mention";

    if !is_direct_message && !is_mention {
        let event_type = match raw.subtype {
            Some(subtype) => format!("{}.{subtype}", raw.event_type),
            None => raw.event_type,
        };
        return SlackEvent::Unsupported { event_type };
    }

    let message = MessageEvent {
        event_id: callback.event_id,
        channel_id: raw.channel.unwrap_or_default(),
        user_id: raw.user.unwrap_or_default(),
        text: raw.text,
        ts: raw.ts.unwrap_or_default(),
        thread_ts: raw.thread_ts,
        bot_id: raw.bot_id,
    };

    if is_mention {
        SlackEvent::AppMention(message)
    } else {
        SlackEvent::DirectMessage(message)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_socket_frame, EnvelopeError, SocketFrame};
    use crate::events::SlackEvent;

    #[test]
    fn parses_direct_message_envelope() {
        let frame = parse_socket_frame(
            r#"{
                "envelope_id": "env-1",
                "type": "events_api",
                "payload": {
                    "event_id": "Ev01",
                    "event": {
                        "type": "message",
                        "channel_type": "im",
                        "channel": "D1",
                        "user": "U1",
                        "text": "hello",
                        "ts": "1730000000.1000"
                    }
                }
            }"#,
        )
        .expect("parse");

        let SocketFrame::Envelope(envelope) = frame else {
            panic!("expected envelope");
        };
        assert_eq!(envelope.envelope_id, "env-1");
        let SlackEvent::DirectMessage(message) = envelope.event else {
            panic!("expected direct message");
        };
        assert_eq!(message.event_id.as_deref(), Some("Ev01"));
        assert_eq!(message.channel_id, "D1");
        assert_eq!(message.text, "hello");
    }

    #[test]
    fn parses_app_mention_with_thread() {
        let frame = parse_socket_frame(
            r#"{"envelope_id":"env-2","type":"events_api","payload":{"event_id":"Ev02","event":{"type":"app_mention","channel":"C1","user":"U1","text":"<@UBOT> hi","ts":"2.0","thread_ts":"1.0"}}}"#,
        )
        .expect("parse");

        assert!(matches!(
            frame,
            SocketFrame::Envelope(envelope)
                if matches!(&envelope.event, SlackEvent::AppMention(message) if message.thread_ts.as_deref() == Some("1.0"))
        ));
    }

    #[test]
    fn edited_messages_are_unsupported() {
        let frame = parse_socket_frame(
            r#"{"envelope_id":"env-3","type":"events_api","payload":{"event":{"type":"message","subtype":"message_changed","channel_type":"im"}}}"#,
        )
        .expect("parse");

        assert!(matches!(
            frame,
            SocketFrame::Envelope(envelope)
                if envelope.event == SlackEvent::Unsupported { event_type: "message.message_changed".to_owned() }
        ));
    }

    #[test]
    fn parses_slash_command_and_control_frames() {
        let command = parse_socket_frame(
            r#"{"envelope_id":"env-4","type":"slash_commands","payload":{"command":"/relaybot","text":"reset","channel_id":"C1","user_id":"U1","trigger_id":"t1"}}"#,
        )
        .expect("parse");
        assert!(matches!(
            command,
            SocketFrame::Envelope(envelope) if matches!(&envelope.event, SlackEvent::SlashCommand(payload) if payload.text == "reset")
        ));

        assert_eq!(parse_socket_frame(r#"{"type":"hello"}"#).expect("hello"), SocketFrame::Hello);
        assert_eq!(
            parse_socket_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#)
                .expect("disconnect"),
            SocketFrame::Disconnect { reason: "refresh_requested".to_owned() }
        );
    }

    #[test]
    fn rejects_envelopes_without_id() {
        let error = parse_socket_frame(r#"{"type":"events_api","payload":{}}"#).expect_err("error");

        assert!(matches!(error, EnvelopeError::MissingEnvelopeId { .. }));
    }
}

//! Slack Integration - Socket Mode bot interface
//!
//! This crate provides the Slack surface of the relay bot:
//! - **Socket Mode** (`socket`) - envelope pump with ack, reconnect and reply posting
//! - **Envelopes** (`envelope`) - decoding raw Socket Mode frames
//! - **Events** (`events`) - DMs, app mentions and slash commands routed to the runtime
//! - **Slash Commands** (`commands`) - `/relaybot reset`, `/relaybot help`
//! - **Block Kit** (`blocks`) - reply, error, help and confirmation messages
//! - **Web API** (`web`) - `chat.postMessage` / `chat.postEphemeral`
//!
//! # Getting Started
//!
//! 1. Create a Slack app at https://api.slack.com/apps
//! 2. Enable Socket Mode and subscribe to `message.im` and `app_mention`
//! 3. Add the `/relaybot` slash command
//! 4. Set env vars: `RELAYBOT_SLACK_APP_TOKEN`, `RELAYBOT_SLACK_BOT_TOKEN`
//!
//! # Architecture
//!
//! ```text
//! Socket Mode → EventDispatcher → Handlers → ReplyService (runtime)
//!                                    ↓
//!                      Block Kit → ReplyPoster → Slack Web API
//! ```

pub mod blocks;
pub mod commands;
pub mod envelope;
pub mod events;
pub mod socket;
pub mod web;

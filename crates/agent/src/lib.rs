//! Reply runtime - turns an inbound user message into an assistant reply
//!
//! - **Runtime** (`runtime`) - dedupe, built-in commands, history bookkeeping
//! - **Generation** (`llm`) - the `ReplyGenerator` seam plus retrying HTTP plumbing
//! - **Providers** (`providers`) - OpenAI, Anthropic and Ollama chat clients
//!
//! # Flow
//!
//! ```text
//! InboundEvent → dedupe → command? → history += user → generate → history += assistant
//!                                                          ↓ (error)
//!                                                    DisplayError
//! ```
//!
//! History is only extended with an assistant turn when generation succeeds.

pub mod llm;
pub mod providers;
pub mod runtime;

pub use llm::{build_generator, ReplyGenerator};
pub use runtime::{BotCommand, InboundEvent, ReplyOutcome, ReplyRuntime};

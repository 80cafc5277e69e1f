//! In-memory conversation state and event deduplication for the relay bot.
//!
//! - [`conversation::ConversationStore`] keeps per-(user, context kind) chat
//!   history, trimmed to a maximum length and expired after an idle window.
//! - [`dedupe::EventDeduplicator`] suppresses redelivered Slack events.
//! - [`sweep::SweepWorker`] evicts aged-out entries from both on a fixed cadence.
//!
//! Everything here is synchronous and total: none of the store operations can
//! fail. Time comes from an injected [`clock::Clock`].

pub mod clock;
pub mod config;
pub mod conversation;
pub mod dedupe;
pub mod domain;
pub mod errors;
pub mod sweep;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation::{ConversationSettings, ConversationStore};
pub use dedupe::{DedupeSettings, EventDeduplicator};
pub use domain::{ContextKind, ConversationKey, Message, Role};
pub use errors::{to_display_error, DisplayError, GenerationError};
pub use sweep::{Sweep, SweepHandle, SweepWorker};

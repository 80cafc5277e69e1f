use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::domain::{ContextKind, ConversationKey, Message};
use crate::sweep::Sweep;

pub const DEFAULT_MAX_HISTORY_LENGTH: usize = 10;
pub const DEFAULT_CONVERSATION_EXPIRATION_MS: u64 = 30 * 60 * 1_000;
pub const DEFAULT_CONVERSATION_SWEEP_INTERVAL_MS: u64 = 60 * 1_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSettings {
    pub max_history_length: usize,
    pub expiration_ms: u64,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            max_history_length: DEFAULT_MAX_HISTORY_LENGTH,
            expiration_ms: DEFAULT_CONVERSATION_EXPIRATION_MS,
        }
    }
}

impl ConversationSettings {
    fn expiration(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.expiration_ms).unwrap_or(i64::MAX))
    }
}

#[derive(Debug)]
struct ConversationEntry {
    messages: Vec<Message>,
    last_touched: DateTime<Utc>,
}

impl ConversationEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self { messages: Vec::new(), last_touched: now }
    }

    fn is_idle(&self, now: DateTime<Utc>, expiration: Duration) -> bool {
        now - self.last_touched >= expiration
    }

    /// Marks the entry as used at `now`, dropping history that already sat
    /// idle past the window but has not been swept yet.
    fn touch(&mut self, now: DateTime<Utc>, expiration: Duration) {
        if self.is_idle(now, expiration) {
            self.messages.clear();
        }
        self.last_touched = now;
    }
}

/// Per-(user, context kind) message history with bounded length and idle
/// expiry.
///
/// Every read or write refreshes the entry's `last_touched` timestamp. Idle
/// entries are evicted by [`Sweep::sweep_expired`], normally driven by a
/// [`crate::sweep::SweepWorker`].
///
/// History is capped at `max_history_length`, except that a leading system
/// message survives trimming: when the cut would drop it, it is re-inserted
/// at index 0, so a conversation that carries a system prompt can hold
/// `max_history_length + 1` messages.
pub struct ConversationStore {
    entries: DashMap<String, ConversationEntry>,
    settings: ConversationSettings,
    clock: Arc<dyn Clock>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(ConversationSettings::default())
    }
}

impl ConversationStore {
    pub fn new(settings: ConversationSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: ConversationSettings, clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), settings, clock }
    }

    pub fn settings(&self) -> &ConversationSettings {
        &self.settings
    }

    /// Returns a snapshot of the history for the key, creating an empty
    /// conversation when none exists.
    pub fn get_conversation(&self, user_id: &str, context_kind: ContextKind) -> Vec<Message> {
        let key = ConversationKey::new(user_id, context_kind).storage_key();
        let now = self.clock.now();
        let expiration = self.settings.expiration();

        let mut entry = self.entries.entry(key).or_insert_with(|| ConversationEntry::new(now));
        entry.touch(now, expiration);
        entry.messages.clone()
    }

    pub fn add_message(&self, user_id: &str, context_kind: ContextKind, message: Message) {
        let key = ConversationKey::new(user_id, context_kind).storage_key();
        let now = self.clock.now();
        let expiration = self.settings.expiration();

        let mut entry = self.entries.entry(key).or_insert_with(|| ConversationEntry::new(now));
        entry.touch(now, expiration);
        entry.messages.push(message);
        enforce_history_limit(&mut entry.messages, self.settings.max_history_length);
    }

    pub fn clear_conversation(&self, user_id: &str, context_kind: ContextKind) {
        let key = ConversationKey::new(user_id, context_kind).storage_key();
        if self.entries.remove(&key).is_some() {
            debug!(
                event_name = "core.conversation.cleared",
                conversation_key = %key,
                "conversation cleared"
            );
        }
    }

    pub fn active_conversations(&self) -> usize {
        self.entries.len()
    }
}

impl Sweep for ConversationStore {
    fn name(&self) -> &'static str {
        "conversation_store"
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let expiration = self.settings.expiration();
        let mut evicted = 0;

        self.entries.retain(|_, entry| {
            let keep = !entry.is_idle(now, expiration);
            if !keep {
                evicted += 1;
            }
            keep
        });

        evicted
    }
}

fn enforce_history_limit(messages: &mut Vec<Message>, max_history_length: usize) {
    if messages.len() <= max_history_length {
        return;
    }

    let system = messages.iter().find(|message| message.is_system()).cloned();
    let excess = messages.len() - max_history_length;
    messages.drain(..excess);

    if let Some(system) = system {
        if !messages.iter().any(Message::is_system) {
            messages.insert(0, system);
        }
    }
}

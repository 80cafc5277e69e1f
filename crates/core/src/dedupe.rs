use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

use crate::clock::{Clock, SystemClock};
use crate::sweep::Sweep;

pub const DEFAULT_EVENT_DEDUPE_TTL_MS: u64 = 5 * 60 * 1_000;
pub const DEFAULT_DEDUPE_SWEEP_INTERVAL_MS: u64 = 60 * 1_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DedupeSettings {
    pub ttl_ms: u64,
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self { ttl_ms: DEFAULT_EVENT_DEDUPE_TTL_MS }
    }
}

/// Remembers inbound event ids so redelivered webhooks are processed once.
///
/// A recorded id stays authoritative until a sweep removes it; the sweep only
/// drops records older than the TTL, so an id is never forgotten early but may
/// linger for up to one sweep interval past the TTL.
pub struct EventDeduplicator {
    seen: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DedupeSettings::default())
    }
}

impl EventDeduplicator {
    pub fn new(settings: DedupeSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: DedupeSettings, clock: Arc<dyn Clock>) -> Self {
        let ttl = Duration::milliseconds(i64::try_from(settings.ttl_ms).unwrap_or(i64::MAX));
        Self { seen: DashMap::new(), ttl, clock }
    }

    /// Returns `true` when `event_id` was already recorded, otherwise records
    /// it and returns `false`. Events without an id are never deduplicated.
    pub fn is_duplicate(&self, event_id: Option<&str>) -> bool {
        let Some(event_id) = event_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return false;
        };

        match self.seen.entry(event_id.to_owned()) {
            Entry::Occupied(_) => true,
            Entry::Vacant(vacant) => {
                vacant.insert(self.clock.now());
                false
            }
        }
    }

    pub fn tracked_events(&self) -> usize {
        self.seen.len()
    }
}

impl Sweep for EventDeduplicator {
    fn name(&self) -> &'static str {
        "event_deduplicator"
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        self.seen.retain(|_, first_seen| {
            let keep = now - *first_seen <= self.ttl;
            if !keep {
                removed += 1;
            }
            keep
        });

        removed
    }
}

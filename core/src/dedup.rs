//! Per-session event deduplication across relays.

use crate::event::{EventId, PublicKey, RawEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

const SHARDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    New,
    Duplicate,
    /// Seen before, but author, kind or timestamp differ from the first copy.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    pubkey: PublicKey,
    created_at: u64,
    kind: u16,
}

impl From<&RawEvent> for Fingerprint {
    fn from(ev: &RawEvent) -> Self {
        Fingerprint { pubkey: ev.pubkey, created_at: ev.created_at, kind: ev.kind }
    }
}

/// Remembers every event id seen during one scan. Shared between relay tasks;
/// for any id exactly one `observe` call returns [`Observation::New`].
#[derive(Debug)]
pub struct EventDeduplicator {
    shards: Vec<Mutex<HashMap<EventId, Fingerprint>>>,
    duplicates: AtomicU64,
    anomalies: AtomicU64,
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDeduplicator {
    pub fn new() -> Self {
        EventDeduplicator {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            duplicates: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, event: &RawEvent) -> Observation {
        let shard = &self.shards[event.id.as_bytes()[0] as usize % SHARDS];
        let mut seen = shard.lock().unwrap_or_else(PoisonError::into_inner);
        let fp = Fingerprint::from(event);
        match seen.get(&event.id) {
            None => {
                seen.insert(event.id, fp);
                Observation::New
            }
            Some(first) => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                if *first != fp {
                    // Equal ids are assumed to mean equal events; a disagreement is
                    // reported but the first copy stays authoritative.
                    self.anomalies.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        event_id = %event.id.short(),
                        relay = %event.relay,
                        first_created_at = first.created_at,
                        created_at = event.created_at,
                        "relays disagree on event with identical id"
                    );
                    return Observation::Conflict;
                }
                Observation::Duplicate
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }
}

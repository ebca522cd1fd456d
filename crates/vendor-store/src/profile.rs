use dvmscan_core::{EventId, PublicKey, RawEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Result content is cut to this many characters before it is stored.
pub const RESULT_CONTENT_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub event_id: EventId,
    pub created_at: u64,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub event_id: EventId,
    pub kind: u16,
    pub created_at: u64,
    pub content: String,
    /// The job request this result answers (`e` tag).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<Feedback>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub event_id: EventId,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub content: String,
}

impl Announcement {
    pub(crate) fn from_event(ev: &RawEvent) -> Self {
        Announcement {
            event_id: ev.id,
            created_at: ev.created_at,
            content: ev.content.clone(),
            tags: ev.tags.clone(),
        }
    }

    fn key(&self) -> (u64, EventId) {
        (self.created_at, self.event_id)
    }
}

impl JobResult {
    pub(crate) fn from_event(ev: &RawEvent) -> Self {
        JobResult {
            event_id: ev.id,
            kind: ev.kind,
            created_at: ev.created_at,
            content: ev.content.chars().take(RESULT_CONTENT_LIMIT).collect(),
            request_id: ev.first_tag("e").and_then(|v| EventId::from_hex(v).ok()),
            feedback: Vec::new(),
        }
    }

    fn key(&self) -> (u64, EventId) {
        (self.created_at, self.event_id)
    }

    fn add_feedback(&mut self, fb: Feedback) -> bool {
        if self.feedback.iter().any(|f| f.event_id == fb.event_id) {
            return false;
        }
        let key = (fb.created_at, fb.event_id);
        let pos = self.feedback.partition_point(|f| (f.created_at, f.event_id) < key);
        self.feedback.insert(pos, fb);
        true
    }
}

impl Feedback {
    pub(crate) fn from_event(ev: &RawEvent) -> Self {
        Feedback {
            event_id: ev.id,
            created_at: ev.created_at,
            status: ev.first_tag("status").map(str::to_string),
            content: ev.content.chars().take(RESULT_CONTENT_LIMIT).collect(),
        }
    }
}

/// Everything known about one DVM vendor. Every mutation is a merge, so the
/// final value does not depend on the order observations arrive in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorProfile {
    pub pubkey: PublicKey,
    pub first_seen: u64,
    pub last_seen: u64,
    /// Ordered by `(created_at, event_id)`.
    #[serde(default)]
    pub announcements: Vec<Announcement>,
    /// Service identifiers from announcement `d` tags.
    #[serde(default)]
    pub services: BTreeSet<String>,
    /// Job kinds advertised through announcement `k` tags.
    #[serde(default)]
    pub supported_kinds: BTreeSet<u16>,
    /// Newest first, bounded by the store's result cap.
    #[serde(default)]
    pub results: Vec<JobResult>,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub request_ids: BTreeSet<EventId>,
}

impl VendorProfile {
    pub fn new(pubkey: PublicKey, seen_at: u64) -> Self {
        VendorProfile {
            pubkey,
            first_seen: seen_at,
            last_seen: seen_at,
            announcements: Vec::new(),
            services: BTreeSet::new(),
            supported_kinds: BTreeSet::new(),
            results: Vec::new(),
            request_count: 0,
            request_ids: BTreeSet::new(),
        }
    }

    pub(crate) fn observe(&mut self, at: u64) -> bool {
        let mut changed = false;
        if at > self.last_seen {
            self.last_seen = at;
            changed = true;
        }
        if at < self.first_seen {
            self.first_seen = at;
            changed = true;
        }
        changed
    }

    pub(crate) fn add_announcement(&mut self, ann: Announcement) -> bool {
        if self.announcements.iter().any(|a| a.event_id == ann.event_id) {
            return false;
        }
        for tag in ann.tags.iter().filter(|t| t.len() >= 2) {
            match tag[0].as_str() {
                "d" => {
                    self.services.insert(tag[1].clone());
                }
                "k" => {
                    if let Ok(kind) = tag[1].trim().parse::<u16>() {
                        self.supported_kinds.insert(kind);
                    }
                }
                _ => {}
            }
        }
        let pos = self.announcements.partition_point(|a| a.key() < ann.key());
        self.announcements.insert(pos, ann);
        true
    }

    /// Insert keeping the newest `cap` results. Returns whether `result` was
    /// kept.
    pub(crate) fn add_result(&mut self, result: JobResult, cap: usize) -> bool {
        if let Some(existing) = self.results.iter_mut().find(|r| r.event_id == result.event_id) {
            let mut changed = false;
            for fb in result.feedback {
                changed |= existing.add_feedback(fb);
            }
            return changed;
        }
        let pos = self.results.partition_point(|r| r.key() > result.key());
        if pos >= cap {
            return false;
        }
        self.results.insert(pos, result);
        self.results.truncate(cap);
        true
    }

    pub(crate) fn has_result_for(&self, request_id: EventId) -> bool {
        self.results.iter().any(|r| r.request_id == Some(request_id))
    }

    pub(crate) fn attach_feedback(&mut self, request_id: EventId, fb: Feedback) -> bool {
        let mut changed = false;
        for result in self.results.iter_mut().filter(|r| r.request_id == Some(request_id)) {
            changed |= result.add_feedback(fb.clone());
        }
        changed
    }

    /// `request_count` is the larger of the stored count and the number of
    /// distinct ids. Files written without `request_ids` keep their count
    /// until enough ids are seen to pass it.
    pub(crate) fn count_request(&mut self, request_id: EventId) -> bool {
        if !self.request_ids.insert(request_id) {
            return false;
        }
        self.sync_request_count();
        true
    }

    fn sync_request_count(&mut self) -> bool {
        let distinct = self.request_ids.len() as u64;
        if distinct > self.request_count {
            self.request_count = distinct;
            return true;
        }
        false
    }

    /// Fold another snapshot of the same vendor into this one.
    pub(crate) fn absorb(&mut self, other: VendorProfile, cap: usize) -> bool {
        let mut changed = self.observe(other.first_seen);
        changed |= self.observe(other.last_seen);
        for ann in other.announcements {
            changed |= self.add_announcement(ann);
        }
        for service in other.services {
            changed |= self.services.insert(service);
        }
        for kind in other.supported_kinds {
            changed |= self.supported_kinds.insert(kind);
        }
        for result in other.results {
            changed |= self.add_result(result, cap);
        }
        if other.request_count > self.request_count {
            self.request_count = other.request_count;
            changed = true;
        }
        for id in other.request_ids {
            changed |= self.request_ids.insert(id);
        }
        changed |= self.sync_request_count();
        changed
    }

    pub(crate) fn enforce_cap(&mut self, cap: usize) {
        self.results.sort_by(|a, b| b.key().cmp(&a.key()));
        self.results.dedup_by_key(|r| r.event_id);
        self.results.truncate(cap);
    }
}

use crate::profile::{Announcement, Feedback, JobResult, VendorProfile};
use dvmscan_core::{EventId, KindClass, PublicKey, RawEvent};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

pub const DEFAULT_RESULT_CAP: usize = 50;

/// An event that cannot be applied. The event is dropped; the scan goes on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("job request {event_id} has no valid `p` target")]
    MissingTarget { event_id: EventId },
}

/// Vendors affected by a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub created: Vec<PublicKey>,
    pub updated: Vec<PublicKey>,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }

    fn note(&mut self, pubkey: PublicKey, created: bool, changed: bool) {
        if created {
            if !self.created.contains(&pubkey) {
                self.created.push(pubkey);
            }
        } else if changed && !self.created.contains(&pubkey) && !self.updated.contains(&pubkey) {
            self.updated.push(pubkey);
        }
    }
}

/// Vendor profiles keyed by public key.
///
/// Merges are commutative and idempotent: folding the same set of events in
/// any order, any number of times, produces the same profiles. Every job
/// feedback the store has seen is kept in a transient index keyed by
/// `(author, request id)`, so each retained result carries all feedback for
/// its request no matter which arrived first. The index is never persisted.
/// Feedback timestamps do not move `first_seen` or `last_seen`.
#[derive(Debug, Clone)]
pub struct VendorStore {
    vendors: BTreeMap<PublicKey, VendorProfile>,
    feedback: HashMap<(PublicKey, EventId), Vec<Feedback>>,
    result_cap: usize,
}

impl Default for VendorStore {
    fn default() -> Self {
        VendorStore::new(DEFAULT_RESULT_CAP)
    }
}

impl PartialEq for VendorStore {
    fn eq(&self, other: &Self) -> bool {
        self.vendors == other.vendors
    }
}

impl VendorStore {
    pub fn new(result_cap: usize) -> Self {
        VendorStore {
            vendors: BTreeMap::new(),
            feedback: HashMap::new(),
            result_cap: result_cap.max(1),
        }
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = VendorProfile>, result_cap: usize) -> Self {
        let mut store = VendorStore::new(result_cap);
        for mut profile in profiles {
            profile.enforce_cap(store.result_cap);
            index_feedback(&mut store.feedback, &profile);
            store.vendors.insert(profile.pubkey, profile);
        }
        store.sync_feedback(&mut MergeOutcome::default());
        store
    }

    pub fn result_cap(&self) -> usize {
        self.result_cap
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }

    pub fn get(&self, pubkey: &PublicKey) -> Option<&VendorProfile> {
        self.vendors.get(pubkey)
    }

    /// Profiles in public key order.
    pub fn iter(&self) -> impl Iterator<Item = &VendorProfile> {
        self.vendors.values()
    }

    /// Most active vendors first: more results, then more requests, then
    /// most recently seen.
    pub fn profiles_sorted(&self) -> Vec<&VendorProfile> {
        let mut profiles: Vec<&VendorProfile> = self.vendors.values().collect();
        profiles.sort_by(|a, b| {
            (b.results.len(), b.request_count, b.last_seen)
                .cmp(&(a.results.len(), a.request_count, a.last_seen))
                .then_with(|| a.pubkey.cmp(&b.pubkey))
        });
        profiles
    }

    /// Feedback whose result is not among the retained results.
    pub fn pending_feedback(&self) -> usize {
        self.feedback
            .iter()
            .filter(|((pubkey, req), _)| {
                !self.vendors.get(pubkey).is_some_and(|p| p.has_result_for(*req))
            })
            .map(|(_, fbs)| fbs.len())
            .sum()
    }

    pub(crate) fn profiles(&self) -> &BTreeMap<PublicKey, VendorProfile> {
        &self.vendors
    }

    /// Apply one event.
    pub fn merge(&mut self, ev: &RawEvent) -> Result<MergeOutcome, MergeError> {
        let mut outcome = MergeOutcome::default();
        let cap = self.result_cap;
        match ev.class() {
            KindClass::Announcement => {
                let (profile, created) = entry(&mut self.vendors, ev.pubkey, ev.created_at);
                let mut changed = profile.observe(ev.created_at);
                changed |= profile.add_announcement(Announcement::from_event(ev));
                outcome.note(ev.pubkey, created, changed);
            }
            KindClass::JobResult => {
                let result = JobResult::from_event(ev);
                let request_id = result.request_id;
                let (profile, created) = entry(&mut self.vendors, ev.pubkey, ev.created_at);
                let mut changed = profile.observe(ev.created_at);
                if profile.add_result(result, cap) {
                    changed = true;
                    let known = request_id.and_then(|req| {
                        self.feedback.get(&(ev.pubkey, req)).map(|fbs| (req, fbs))
                    });
                    if let Some((req, fbs)) = known {
                        for fb in fbs {
                            profile.attach_feedback(req, fb.clone());
                        }
                    }
                }
                outcome.note(ev.pubkey, created, changed);
            }
            KindClass::JobRequest => {
                let targets: BTreeSet<PublicKey> = ev
                    .tag_values("p")
                    .filter_map(|v| PublicKey::from_hex(v).ok())
                    .collect();
                if targets.is_empty() {
                    return Err(MergeError::MissingTarget { event_id: ev.id });
                }
                for target in targets {
                    let (profile, created) = entry(&mut self.vendors, target, ev.created_at);
                    let mut changed = profile.observe(ev.created_at);
                    changed |= profile.count_request(ev.id);
                    outcome.note(target, created, changed);
                }
            }
            KindClass::JobFeedback => {
                let Some(req) = ev.first_tag("e").and_then(|v| EventId::from_hex(v).ok()) else {
                    return Ok(outcome);
                };
                let fb = Feedback::from_event(ev);
                if !remember(&mut self.feedback, (ev.pubkey, req), fb.clone()) {
                    return Ok(outcome);
                }
                if let Some(profile) = self.vendors.get_mut(&ev.pubkey) {
                    let changed = profile.attach_feedback(req, fb);
                    outcome.note(ev.pubkey, false, changed);
                }
            }
            KindClass::Other => {}
        }
        Ok(outcome)
    }

    /// Fold a whole store into this one, e.g. a fresh scan into the state
    /// loaded from disk.
    pub fn merge_store(&mut self, other: VendorStore) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let cap = self.result_cap;
        for (key, fbs) in other.feedback {
            for fb in fbs {
                remember(&mut self.feedback, key, fb);
            }
        }
        for (pubkey, profile) in other.vendors {
            index_feedback(&mut self.feedback, &profile);
            match self.vendors.get_mut(&pubkey) {
                Some(existing) => {
                    let changed = existing.absorb(profile, cap);
                    outcome.note(pubkey, false, changed);
                }
                None => {
                    let mut profile = profile;
                    profile.enforce_cap(cap);
                    self.vendors.insert(pubkey, profile);
                    outcome.note(pubkey, true, true);
                }
            }
        }
        self.sync_feedback(&mut outcome);
        outcome
    }

    /// Give every retained result all indexed feedback for its request.
    fn sync_feedback(&mut self, outcome: &mut MergeOutcome) {
        for ((pubkey, req), fbs) in &self.feedback {
            let Some(profile) = self.vendors.get_mut(pubkey) else {
                continue;
            };
            let mut changed = false;
            for fb in fbs {
                changed |= profile.attach_feedback(*req, fb.clone());
            }
            outcome.note(*pubkey, false, changed);
        }
    }
}

/// Insert unless an entry with the same event id is already there.
fn remember(
    index: &mut HashMap<(PublicKey, EventId), Vec<Feedback>>,
    key: (PublicKey, EventId),
    fb: Feedback,
) -> bool {
    let known = index.entry(key).or_default();
    if known.iter().any(|f| f.event_id == fb.event_id) {
        return false;
    }
    known.push(fb);
    true
}

fn index_feedback(index: &mut HashMap<(PublicKey, EventId), Vec<Feedback>>, profile: &VendorProfile) {
    for result in &profile.results {
        let Some(req) = result.request_id else { continue };
        for fb in &result.feedback {
            remember(index, (profile.pubkey, req), fb.clone());
        }
    }
}

fn entry(
    vendors: &mut BTreeMap<PublicKey, VendorProfile>,
    pubkey: PublicKey,
    seen_at: u64,
) -> (&mut VendorProfile, bool) {
    let created = !vendors.contains_key(&pubkey);
    let profile = vendors
        .entry(pubkey)
        .or_insert_with(|| VendorProfile::new(pubkey, seen_at));
    (profile, created)
}

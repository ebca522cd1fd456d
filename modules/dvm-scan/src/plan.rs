//! Which relays to ask and what to ask them for.

use dvmscan_core::kind::{DVM_ANNOUNCEMENT, JOB_FEEDBACK};
use dvmscan_core::{FilterSet, FilterValidationError};
use std::ops::RangeInclusive;

pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://relay.nostr.band",
    "wss://nos.lol",
    "wss://relay.snort.social",
    "wss://nostr.wine",
    "wss://relay.primal.net",
    "wss://nostr-pub.wellorder.net",
    "wss://relay.nostr.bg",
    "wss://nostr.mom",
    "wss://relay.current.fyi",
];

pub const DEFAULT_LIMIT: usize = 100;
pub const DEFAULT_ANNOUNCEMENT_LIMIT: usize = 1000;

/// Most relays index only the low end of each job range, so the default plan
/// asks for the first ten request and result kinds.
const REQUEST_KINDS: RangeInclusive<u16> = 5000..=5009;
const RESULT_KINDS: RangeInclusive<u16> = 6000..=6009;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanParams {
    pub limit: usize,
    pub announcement_limit: usize,
    pub since: Option<u64>,
    pub until: Option<u64>,
}

impl Default for PlanParams {
    fn default() -> Self {
        PlanParams {
            limit: DEFAULT_LIMIT,
            announcement_limit: DEFAULT_ANNOUNCEMENT_LIMIT,
            since: None,
            until: None,
        }
    }
}

pub fn default_relays() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect()
}

/// Announcements, results, requests and feedback, one filter each.
pub fn default_plan(params: &PlanParams) -> Result<Vec<FilterSet>, FilterValidationError> {
    let windowed = |b: dvmscan_core::FilterSetBuilder| b.since(params.since).until(params.until);
    Ok(vec![
        windowed(FilterSet::builder().kind(DVM_ANNOUNCEMENT).limit(params.announcement_limit)).build()?,
        windowed(FilterSet::builder().kind_range(RESULT_KINDS).limit(params.limit)).build()?,
        windowed(FilterSet::builder().kind_range(REQUEST_KINDS).limit(params.limit)).build()?,
        windowed(FilterSet::builder().kind(JOB_FEEDBACK).limit(params.limit)).build()?,
    ])
}

/// A single filter over caller-chosen kinds.
pub fn custom_plan(
    kinds: &[RangeInclusive<u16>],
    params: &PlanParams,
) -> Result<Vec<FilterSet>, FilterValidationError> {
    let filter = FilterSet::builder()
        .kind_ranges(kinds.iter().cloned())
        .limit(params.limit)
        .since(params.since)
        .until(params.until)
        .build()?;
    Ok(vec![filter])
}

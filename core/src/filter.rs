//! Declarative relay filters.

use crate::error::FilterValidationError;
use crate::event::{PublicKey, RawEvent};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// Which events to request from every relay. Construction goes through
/// [`FilterSetBuilder::build`], so a `FilterSet` is always valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    kinds: Vec<RangeInclusive<u16>>,
    since: Option<u64>,
    until: Option<u64>,
    limit: usize,
    authors: Option<BTreeSet<PublicKey>>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterSetBuilder {
    kinds: Vec<RangeInclusive<u16>>,
    since: Option<u64>,
    until: Option<u64>,
    limit: Option<usize>,
    authors: Option<BTreeSet<PublicKey>>,
}

impl FilterSetBuilder {
    pub fn kind(self, kind: u16) -> Self {
        self.kind_range(kind..=kind)
    }

    pub fn kind_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.kinds.push(range);
        self
    }

    pub fn kind_ranges(mut self, ranges: impl IntoIterator<Item = RangeInclusive<u16>>) -> Self {
        self.kinds.extend(ranges);
        self
    }

    pub fn since(mut self, since: Option<u64>) -> Self {
        self.since = since;
        self
    }

    pub fn until(mut self, until: Option<u64>) -> Self {
        self.until = until;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.get_or_insert_with(BTreeSet::new).insert(author);
        self
    }

    pub fn build(self) -> Result<FilterSet, FilterValidationError> {
        let limit = self.limit.unwrap_or(0);
        if limit == 0 {
            return Err(FilterValidationError::ZeroLimit);
        }
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(FilterValidationError::InvertedTimeRange { since, until });
            }
        }
        if self.kinds.is_empty() {
            return Err(FilterValidationError::NoKinds);
        }
        if let Some(bad) = self.kinds.iter().find(|r| r.start() > r.end()) {
            return Err(FilterValidationError::InvalidKindRange(format!(
                "{}-{}",
                bad.start(),
                bad.end()
            )));
        }
        Ok(FilterSet {
            kinds: normalize(self.kinds),
            since: self.since,
            until: self.until,
            limit,
            authors: self.authors,
        })
    }
}

impl FilterSet {
    pub fn builder() -> FilterSetBuilder {
        FilterSetBuilder::default()
    }

    pub fn kinds(&self) -> &[RangeInclusive<u16>] {
        &self.kinds
    }

    pub fn since(&self) -> Option<u64> {
        self.since
    }

    pub fn until(&self) -> Option<u64> {
        self.until
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn authors(&self) -> Option<&BTreeSet<PublicKey>> {
        self.authors.as_ref()
    }

    /// Every kind covered by the ranges, ascending.
    pub fn expanded_kinds(&self) -> Vec<u16> {
        self.kinds.iter().flat_map(|r| r.clone()).collect()
    }

    /// NIP-01 filter object for a `REQ` message.
    pub fn to_nostr_filter(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("kinds".into(), json!(self.expanded_kinds()));
        if let Some(authors) = &self.authors {
            let hex: Vec<String> = authors.iter().map(|a| a.to_hex()).collect();
            obj.insert("authors".into(), json!(hex));
        }
        if let Some(since) = self.since {
            obj.insert("since".into(), json!(since));
        }
        if let Some(until) = self.until {
            obj.insert("until".into(), json!(until));
        }
        obj.insert("limit".into(), json!(self.limit));
        Value::Object(obj)
    }

    /// Local check of whether `event` satisfies this filter (ignoring `limit`).
    pub fn matches(&self, event: &RawEvent) -> bool {
        if !self.kinds.iter().any(|r| r.contains(&event.kind)) {
            return false;
        }
        if self.since.is_some_and(|s| event.created_at < s) {
            return false;
        }
        if self.until.is_some_and(|u| event.created_at > u) {
            return false;
        }
        match &self.authors {
            Some(authors) => authors.contains(&event.pubkey),
            None => true,
        }
    }
}

/// Parse a comma-separated list of kinds/ranges (e.g. "5000-5009,7000,31990").
pub fn parse_kinds(spec: &str) -> Result<Vec<RangeInclusive<u16>>, FilterValidationError> {
    let mut ranges = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let bad = || FilterValidationError::InvalidKindRange(part.to_string());
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.trim().parse().map_err(|_| bad())?;
            let e: u16 = end.trim().parse().map_err(|_| bad())?;
            if s > e {
                return Err(bad());
            }
            ranges.push(s..=e);
        } else {
            let k: u16 = part.parse().map_err(|_| bad())?;
            ranges.push(k..=k);
        }
    }
    if ranges.is_empty() {
        return Err(FilterValidationError::NoKinds);
    }
    Ok(normalize(ranges))
}

/// Sort and coalesce overlapping or adjacent ranges.
fn normalize(mut ranges: Vec<RangeInclusive<u16>>) -> Vec<RangeInclusive<u16>> {
    ranges.sort_by_key(|r| (*r.start(), *r.end()));
    let mut out: Vec<RangeInclusive<u16>> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match out.last_mut() {
            Some(last) if u32::from(*r.start()) <= u32::from(*last.end()) + 1 => {
                if r.end() > last.end() {
                    *last = *last.start()..=*r.end();
                }
            }
            _ => out.push(r),
        }
    }
    out
}

use crate::error::SessionError;
use dvmscan_core::{FilterSet, PublicKey};
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub relays: Vec<String>,
    pub filters: Vec<FilterSet>,
    /// Global deadline for the scanning phase.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Longest silence tolerated from a relay before its EOSE.
    pub idle_timeout: Duration,
    /// How long to keep absorbing in-flight messages once scanning ends.
    pub grace: Duration,
}

impl ScanOptions {
    pub fn new(relays: Vec<String>, filters: Vec<FilterSet>) -> Self {
        ScanOptions {
            relays,
            filters,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            grace: DEFAULT_GRACE,
        }
    }
}

/// A problem recorded during a scan that did not stop it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanIssue {
    pub relay: String,
    pub message: String,
}

/// One scan run.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub id: Uuid,
    /// Configured scanner identity. Events are never signed with it; it is
    /// only recorded.
    pub identity: Option<PublicKey>,
    pub started_at: OffsetDateTime,
    pub options: ScanOptions,
    errors: Vec<ScanIssue>,
}

impl ScanSession {
    pub fn new(options: ScanOptions) -> Result<Self, SessionError> {
        if options.relays.is_empty() {
            return Err(SessionError::NoRelays);
        }
        if options.filters.is_empty() {
            return Err(SessionError::NoFilters);
        }
        if options.timeout.is_zero() {
            return Err(SessionError::ZeroTimeout);
        }
        Ok(ScanSession {
            id: Uuid::now_v7(),
            identity: None,
            started_at: OffsetDateTime::now_utc(),
            options,
            errors: Vec::new(),
        })
    }

    pub fn with_identity(mut self, identity: Option<PublicKey>) -> Self {
        self.identity = identity;
        self
    }

    pub fn record_error(&mut self, relay: &str, message: impl Into<String>) {
        self.errors.push(ScanIssue { relay: relay.to_string(), message: message.into() });
    }

    pub fn errors(&self) -> &[ScanIssue] {
        &self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters() -> Vec<FilterSet> {
        vec![FilterSet::builder().kind(31990).limit(1).build().unwrap()]
    }

    #[test]
    fn rejects_empty_plans() {
        assert_eq!(
            ScanSession::new(ScanOptions::new(vec![], filters())).err(),
            Some(SessionError::NoRelays)
        );
        assert_eq!(
            ScanSession::new(ScanOptions::new(vec!["wss://a".into()], vec![])).err(),
            Some(SessionError::NoFilters)
        );
        let mut opts = ScanOptions::new(vec!["wss://a".into()], filters());
        opts.timeout = Duration::ZERO;
        assert_eq!(ScanSession::new(opts).err(), Some(SessionError::ZeroTimeout));
    }

    #[test]
    fn sessions_get_distinct_ids_and_collect_errors() {
        let a = ScanSession::new(ScanOptions::new(vec!["wss://a".into()], filters())).unwrap();
        let mut b = ScanSession::new(ScanOptions::new(vec!["wss://a".into()], filters()))
            .unwrap()
            .with_identity(Some(PublicKey::from_bytes([1; 32])));
        assert_ne!(a.id, b.id);
        b.record_error("wss://a", "refused");
        assert_eq!(b.errors()[0].message, "refused");
        assert!(b.identity.is_some());
    }
}

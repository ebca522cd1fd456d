use crate::report::ScanReport;
use thiserror::Error;
use vendor_store::PersistenceError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no relays configured")]
    NoRelays,
    #[error("scan plan has no filters")]
    NoFilters,
    #[error("scan timeout must be greater than zero")]
    ZeroTimeout,
}

/// Failures that stop a scan from producing a saved result.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Every relay failed before connecting. Nothing was saved.
    #[error("no relay could be reached")]
    NoRelays(Box<ScanReport>),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

use thiserror::Error;

/// A filter that cannot be sent to a relay. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterValidationError {
    #[error("filter limit must be greater than zero")]
    ZeroLimit,
    #[error("filter since ({since}) is after until ({until})")]
    InvertedTimeRange { since: u64, until: u64 },
    #[error("filter needs at least one kind range")]
    NoKinds,
    #[error("invalid kind range: {0}")]
    InvalidKindRange(String),
}

/// A message from a relay that could not be understood. The message is
/// dropped and the connection kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("invalid hex in {field}: {value:?}")]
    BadHex { field: &'static str, value: String },
    #[error("event id mismatch: claimed {claimed}, computed {computed}")]
    IdMismatch { claimed: String, computed: String },
}

//! Multi-relay NIP-90 DVM discovery: plan, scan, merge, persist.

mod error;
mod orchestrator;
pub mod plan;
mod report;
mod session;

pub use error::{ScanError, SessionError};
pub use orchestrator::{scan_and_persist, ScanOrchestrator, ScanResult};
pub use plan::{custom_plan, default_plan, default_relays, PlanParams, DEFAULT_RELAYS};
pub use report::{RelayReport, RelayStatus, ScanOutcome, ScanPhase, ScanReport, ScanStats};
pub use session::{
    ScanIssue, ScanOptions, ScanSession, DEFAULT_CONNECT_TIMEOUT, DEFAULT_GRACE, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_TIMEOUT,
};

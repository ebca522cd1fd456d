use crate::session::ScanIssue;
use serde::Serialize;
use vendor_store::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Connecting,
    Scanning,
    Draining,
    Done,
    TimedOut,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Connecting => "connecting",
            ScanPhase::Scanning => "scanning",
            ScanPhase::Draining => "draining",
            ScanPhase::Done => "done",
            ScanPhase::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Every relay delivered its stored events.
    Complete,
    /// At least one relay connected, at least one did not finish.
    Partial,
    /// No relay connected.
    NoRelays,
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Complete => "complete",
            ScanOutcome::Partial => "partial",
            ScanOutcome::NoRelays => "no_relays",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    Pending,
    /// Subscribed, stored events still arriving.
    Connected,
    Eose,
    /// Closed by the relay after EOSE.
    Closed,
    Failed,
}

impl RelayStatus {
    /// No more stored events will come from this relay.
    pub fn is_settled(&self) -> bool {
        matches!(self, RelayStatus::Eose | RelayStatus::Closed | RelayStatus::Failed)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RelayStatus::Eose | RelayStatus::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub url: String,
    pub status: RelayStatus,
    pub connected: bool,
    /// First sightings forwarded to the merge.
    pub events: u64,
    pub duplicates: u64,
    pub protocol_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelayReport {
    pub(crate) fn pending(url: &str) -> Self {
        RelayReport {
            url: url.to_string(),
            status: RelayStatus::Pending,
            connected: false,
            events: 0,
            duplicates: 0,
            protocol_errors: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Distinct events received.
    pub events: u64,
    pub duplicates: u64,
    /// Duplicates whose content disagreed with the first copy.
    pub anomalies: u64,
    /// Events the store refused.
    pub dropped: u64,
    pub protocol_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub session_id: String,
    pub started_at: String,
    pub elapsed_ms: u64,
    pub phase: ScanPhase,
    pub phases: Vec<ScanPhase>,
    pub outcome: ScanOutcome,
    pub relays: Vec<RelayReport>,
    pub errors: Vec<ScanIssue>,
    pub stats: ScanStats,
    pub vendors_discovered: usize,
    pub vendors_updated: usize,
    pub total_vendors: usize,
}

impl ScanReport {
    pub fn relays_ok(&self) -> usize {
        self.relays.iter().filter(|r| r.status.is_ok()).count()
    }

    /// Connected but still streaming when the scan ended.
    pub fn relays_partial(&self) -> usize {
        self.relays.iter().filter(|r| r.status == RelayStatus::Connected).count()
    }

    pub fn relays_failed(&self) -> usize {
        self.relays
            .iter()
            .filter(|r| matches!(r.status, RelayStatus::Failed | RelayStatus::Pending))
            .count()
    }

    pub fn finished_entry(&self) -> LogEntry {
        LogEntry::ScanFinished {
            session: self.session_id.clone(),
            phase: self.phase.as_str().to_string(),
            outcome: self.outcome.as_str().to_string(),
            relays_ok: self.relays_ok(),
            relays_partial: self.relays_partial(),
            relays_failed: self.relays_failed(),
            events: self.stats.events,
            duplicates: self.stats.duplicates,
            dropped: self.stats.dropped,
            vendors_discovered: self.vendors_discovered,
            vendors_updated: self.vendors_updated,
            total_vendors: self.total_vendors,
        }
    }
}

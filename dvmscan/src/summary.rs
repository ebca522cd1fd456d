use crate::OutputFormat;
use anyhow::Result;
use dvm_scan::{RelayStatus, ScanReport};
use std::fmt::Write;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use vendor_store::{VendorProfile, VendorStore};

/// Services listed per vendor in text output.
const SERVICES_SHOWN: usize = 5;

pub fn render_report(report: &ScanReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(report)?);
    }
    let mut out = String::new();
    writeln!(
        out,
        "scan {} {} ({}) in {:.1}s",
        report.session_id,
        report.outcome.as_str(),
        report.phase.as_str(),
        report.elapsed_ms as f64 / 1000.0
    )?;
    write!(out, "relays: {} ok", report.relays_ok())?;
    if report.relays_partial() > 0 {
        write!(out, ", {} partial", report.relays_partial())?;
    }
    writeln!(out, ", {} failed", report.relays_failed())?;
    for r in &report.relays {
        let status = match r.status {
            RelayStatus::Eose | RelayStatus::Closed => "ok",
            RelayStatus::Connected => "partial",
            RelayStatus::Pending | RelayStatus::Failed => "failed",
        };
        write!(out, "  {status:<8}{}  events={} duplicates={}", r.url, r.events, r.duplicates)?;
        if r.protocol_errors > 0 {
            write!(out, " bad_messages={}", r.protocol_errors)?;
        }
        if let Some(error) = &r.error {
            write!(out, "  ({error})")?;
        }
        out.push('\n');
    }
    let s = &report.stats;
    writeln!(
        out,
        "events: {} new, {} duplicates, {} dropped, {} anomalies",
        s.events, s.duplicates, s.dropped, s.anomalies
    )?;
    write!(
        out,
        "vendors: {} discovered, {} updated, {} total",
        report.vendors_discovered, report.vendors_updated, report.total_vendors
    )?;
    Ok(out)
}

pub fn render_vendors(store: &VendorStore, top: Option<usize>, format: OutputFormat) -> Result<String> {
    let profiles: Vec<&VendorProfile> =
        store.profiles_sorted().into_iter().take(top.unwrap_or(usize::MAX)).collect();
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(&profiles)?);
    }
    let mut out = String::new();
    writeln!(out, "{} vendors", store.len())?;
    for p in profiles {
        let hex = p.pubkey.to_hex();
        writeln!(out, "\nVendor: {}...", &hex[..16])?;
        writeln!(out, "  First Seen: {}", timestamp(p.first_seen))?;
        writeln!(out, "  Last Seen: {}", timestamp(p.last_seen))?;
        writeln!(out, "  Announcements: {}", p.announcements.len())?;
        writeln!(out, "  Services: {}", p.services.len())?;
        if !p.supported_kinds.is_empty() {
            let kinds: Vec<String> = p.supported_kinds.iter().map(u16::to_string).collect();
            writeln!(out, "  Kinds: {}", kinds.join(","))?;
        }
        writeln!(out, "  Results Found: {}", p.results.len())?;
        writeln!(out, "  Request Count: {}", p.request_count)?;
        for service in p.services.iter().take(SERVICES_SHOWN) {
            writeln!(out, "    - Service: {service}")?;
        }
    }
    Ok(out.trim_end().to_string())
}

fn timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvm_scan::{RelayReport, ScanOutcome, ScanPhase, ScanStats};
    use dvmscan_core::{PublicKey, RawEvent};

    fn report() -> ScanReport {
        let relay = |url: &str, status: RelayStatus, error: Option<&str>| RelayReport {
            url: url.into(),
            status,
            connected: status != RelayStatus::Failed,
            events: 4,
            duplicates: 1,
            protocol_errors: 0,
            error: error.map(str::to_string),
        };
        ScanReport {
            session_id: "s-1".into(),
            started_at: "2024-01-01T00:00:00Z".into(),
            elapsed_ms: 1500,
            phase: ScanPhase::Done,
            phases: vec![ScanPhase::Idle, ScanPhase::Connecting, ScanPhase::Done],
            outcome: ScanOutcome::Partial,
            relays: vec![
                relay("wss://good", RelayStatus::Eose, None),
                relay("wss://bad", RelayStatus::Failed, Some("connection refused")),
            ],
            errors: vec![],
            stats: ScanStats { events: 8, duplicates: 2, ..ScanStats::default() },
            vendors_discovered: 3,
            vendors_updated: 1,
            total_vendors: 9,
        }
    }

    #[test]
    fn text_report_lists_every_relay() {
        let text = render_report(&report(), OutputFormat::Text).unwrap();
        assert!(text.starts_with("scan s-1 partial (done) in 1.5s"));
        assert!(text.contains("relays: 1 ok, 1 failed"));
        assert!(text.contains("wss://bad  events=4 duplicates=1  (connection refused)"));
        assert!(text.ends_with("vendors: 3 discovered, 1 updated, 9 total"));
    }

    #[test]
    fn relay_cut_off_by_the_deadline_is_partial_not_failed() {
        let mut r = report();
        r.relays[0].status = RelayStatus::Connected;
        r.relays.pop();
        let text = render_report(&r, OutputFormat::Text).unwrap();
        assert!(text.contains("relays: 0 ok, 1 partial, 0 failed"));
        assert!(text.contains("  partial wss://good"));
    }

    #[test]
    fn json_report_is_machine_readable() {
        let json = render_report(&report(), OutputFormat::Json).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["outcome"], "partial");
        assert_eq!(v["relays"][1]["status"], "failed");
        assert_eq!(v["stats"]["events"], 8);
    }

    #[test]
    fn vendor_listing_respects_top() {
        let mut store = VendorStore::default();
        for b in 1..=3u8 {
            let ev = RawEvent::compose(
                PublicKey::from_bytes([b; 32]),
                1_700_000_000,
                31990,
                vec![vec!["d".into(), format!("svc-{b}")], vec!["k".into(), "5002".into()]],
                "{}",
            );
            store.merge(&ev).unwrap();
        }
        let text = render_vendors(&store, Some(2), OutputFormat::Text).unwrap();
        assert!(text.starts_with("3 vendors"));
        assert_eq!(text.matches("Vendor: ").count(), 2);
        assert!(text.contains("First Seen: 2023-11-14T22:13:20Z"));
        assert!(text.contains("Kinds: 5002"));

        let json = render_vendors(&store, None, OutputFormat::Json).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 3);
    }
}

//! Fan out to every relay, fan events back in to a single merge consumer.

use crate::error::ScanError;
use crate::report::{RelayReport, RelayStatus, ScanOutcome, ScanPhase, ScanReport, ScanStats};
use crate::session::ScanSession;
use dvmscan_core::{EventDeduplicator, EventId, FilterSet, Observation, ProtocolError, PublicKey, RawEvent};
use relay_conn::{ConnectionError, Connector, RelayError, RelayMessage, RelayStream};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vendor_store::{LogEntry, ScanLog, VendorFile, VendorStore};

const CHANNEL_CAPACITY: usize = 1024;
/// Time relay tasks get to close their sockets once cancelled.
const CLOSE_WAIT: Duration = Duration::from_secs(1);

/// What relay tasks report to the merge consumer.
#[derive(Debug)]
enum RelayUpdate {
    Connected { relay: usize },
    Event { relay: usize, event: RawEvent },
    Duplicate { relay: usize },
    Conflict { relay: usize, event_id: EventId },
    Protocol { relay: usize, error: ProtocolError },
    Eose { relay: usize },
    /// The socket ended on the relay's side.
    Ended { relay: usize },
    Failed { relay: usize, error: String },
}

pub struct ScanResult {
    pub report: ScanReport,
    pub store: VendorStore,
}

pub struct ScanOrchestrator<C> {
    connector: Arc<C>,
}

impl<C: Connector> ScanOrchestrator<C> {
    pub fn new(connector: C) -> Self {
        ScanOrchestrator { connector: Arc::new(connector) }
    }

    /// Run one scan, merging everything into `seed`.
    ///
    /// Never fails: relay problems end up in the report. A report whose
    /// outcome is [`ScanOutcome::NoRelays`] carries the untouched seed.
    pub async fn run(
        &self,
        session: &mut ScanSession,
        seed: VendorStore,
        log: Option<&ScanLog>,
    ) -> ScanResult {
        let opts = session.options.clone();
        let clock = Instant::now();
        let deadline = tokio::time::Instant::now() + opts.timeout;

        info!(
            session = %session.id,
            identity = ?session.identity.map(|k| k.short()),
            relays = opts.relays.len(),
            filters = opts.filters.len(),
            "scan started"
        );
        write_log(
            log,
            LogEntry::ScanStarted {
                session: session.id.to_string(),
                relays: opts.relays.clone(),
                filters: opts.filters.len(),
            },
        );

        let mut consumer = MergeConsumer::new(session, seed, log);
        let dedup = Arc::new(EventDeduplicator::new());
        let cancel = CancellationToken::new();
        let filters: Arc<[FilterSet]> = opts.filters.clone().into();
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);

        consumer.advance(ScanPhase::Connecting);
        let mut tasks = JoinSet::new();
        for (index, url) in opts.relays.iter().enumerate() {
            let task = RelayTask {
                index,
                url: url.clone(),
                connector: self.connector.clone(),
                filters: filters.clone(),
                dedup: dedup.clone(),
                tx: tx.clone(),
                cancel: cancel.clone(),
                connect_timeout: opts.connect_timeout,
                idle_timeout: opts.idle_timeout,
            };
            tasks.spawn(task.run());
        }
        drop(tx);

        let mut timed_out = false;
        while !consumer.all_settled() {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(update)) => consumer.apply(update),
                Ok(None) => break,
                Err(_) => {
                    warn!(timeout = ?opts.timeout, "scan deadline reached");
                    timed_out = true;
                    break;
                }
            }
        }

        if consumer.any_connected() {
            consumer.advance(ScanPhase::Draining);
            let grace_end = tokio::time::Instant::now() + opts.grace;
            while let Ok(Some(update)) = timeout_at(grace_end, rx.recv()).await {
                consumer.apply(update);
            }
        }

        cancel.cancel();
        let close_end = tokio::time::Instant::now() + CLOSE_WAIT;
        while let Ok(Some(update)) = timeout_at(close_end, rx.recv()).await {
            consumer.apply(update);
        }
        tasks.shutdown().await;

        consumer.advance(if timed_out { ScanPhase::TimedOut } else { ScanPhase::Done });
        let result = consumer.finish(clock.elapsed());
        info!(
            session = %result.report.session_id,
            outcome = result.report.outcome.as_str(),
            events = result.report.stats.events,
            vendors = result.report.total_vendors,
            "scan finished"
        );
        result
    }
}

/// Load the vendor file, scan into it, save it back.
///
/// The file is left untouched when no relay was reachable.
pub async fn scan_and_persist<C: Connector>(
    orchestrator: &ScanOrchestrator<C>,
    session: &mut ScanSession,
    file: &VendorFile,
    log: Option<&ScanLog>,
) -> Result<ScanResult, ScanError> {
    let prior = file.load()?;
    info!(path = %file.path().display(), vendors = prior.len(), "loaded prior vendors");
    let result = orchestrator.run(session, prior, log).await;
    if result.report.outcome == ScanOutcome::NoRelays {
        write_log(log, result.report.finished_entry());
        return Err(ScanError::NoRelays(Box::new(result.report)));
    }
    file.save(&result.store)?;
    write_log(log, result.report.finished_entry());
    Ok(result)
}

fn write_log(log: Option<&ScanLog>, entry: LogEntry) {
    if let Some(log) = log {
        if let Err(e) = log.append(&entry) {
            warn!(path = %log.path().display(), error = %e, "scan log write failed");
        }
    }
}

/// Sole owner of the store during a scan.
struct MergeConsumer<'a> {
    session: &'a mut ScanSession,
    log: Option<&'a ScanLog>,
    store: VendorStore,
    relays: Vec<RelayReport>,
    stats: ScanStats,
    phases: Vec<ScanPhase>,
    discovered: BTreeSet<PublicKey>,
    updated: BTreeSet<PublicKey>,
}

impl<'a> MergeConsumer<'a> {
    fn new(session: &'a mut ScanSession, store: VendorStore, log: Option<&'a ScanLog>) -> Self {
        let relays = session.options.relays.iter().map(|u| RelayReport::pending(u)).collect();
        MergeConsumer {
            session,
            log,
            store,
            relays,
            stats: ScanStats::default(),
            phases: vec![ScanPhase::Idle],
            discovered: BTreeSet::new(),
            updated: BTreeSet::new(),
        }
    }

    fn phase(&self) -> ScanPhase {
        self.phases.last().copied().unwrap_or(ScanPhase::Idle)
    }

    fn advance(&mut self, next: ScanPhase) {
        debug!(from = self.phase().as_str(), to = next.as_str(), "scan phase");
        self.phases.push(next);
    }

    fn all_settled(&self) -> bool {
        self.relays.iter().all(|r| r.status.is_settled())
    }

    fn any_connected(&self) -> bool {
        self.relays.iter().any(|r| r.connected)
    }

    fn apply(&mut self, update: RelayUpdate) {
        match update {
            RelayUpdate::Connected { relay } => {
                let r = &mut self.relays[relay];
                r.status = RelayStatus::Connected;
                r.connected = true;
                info!(relay = %r.url, "relay connected");
                let entry = LogEntry::RelayConnected { relay: r.url.clone() };
                write_log(self.log, entry);
                if self.phase() == ScanPhase::Connecting {
                    self.advance(ScanPhase::Scanning);
                }
            }
            RelayUpdate::Event { relay, event } => {
                self.relays[relay].events += 1;
                self.stats.events += 1;
                self.merge(relay, &event);
            }
            RelayUpdate::Duplicate { relay } => {
                self.relays[relay].duplicates += 1;
                self.stats.duplicates += 1;
            }
            RelayUpdate::Conflict { relay, event_id } => {
                self.relays[relay].duplicates += 1;
                self.stats.duplicates += 1;
                self.stats.anomalies += 1;
                let entry = LogEntry::ProtocolAnomaly {
                    relay: self.relays[relay].url.clone(),
                    reason: format!("conflicting copies of event {event_id}"),
                };
                write_log(self.log, entry);
            }
            RelayUpdate::Protocol { relay, error } => {
                self.relays[relay].protocol_errors += 1;
                self.stats.protocol_errors += 1;
                debug!(relay = %self.relays[relay].url, %error, "message dropped");
            }
            RelayUpdate::Eose { relay } => {
                let r = &mut self.relays[relay];
                if r.status == RelayStatus::Connected {
                    r.status = RelayStatus::Eose;
                    info!(relay = %r.url, events = r.events, "end of stored events");
                    let entry = LogEntry::RelayEose { relay: r.url.clone(), events: r.events };
                    write_log(self.log, entry);
                }
            }
            RelayUpdate::Ended { relay } => match self.relays[relay].status {
                RelayStatus::Eose => {
                    let r = &mut self.relays[relay];
                    r.status = RelayStatus::Closed;
                    let entry = LogEntry::RelayClosed { relay: r.url.clone(), events: r.events };
                    write_log(self.log, entry);
                }
                RelayStatus::Pending | RelayStatus::Connected => {
                    self.fail(relay, "connection ended before EOSE".to_string());
                }
                RelayStatus::Closed | RelayStatus::Failed => {}
            },
            RelayUpdate::Failed { relay, error } => {
                let status = self.relays[relay].status;
                if status.is_settled() {
                    debug!(relay = %self.relays[relay].url, %error, "late relay error ignored");
                } else {
                    self.fail(relay, error);
                }
            }
        }
    }

    fn merge(&mut self, relay: usize, event: &RawEvent) {
        match self.store.merge(event) {
            Ok(outcome) => {
                for pubkey in outcome.created {
                    if self.discovered.insert(pubkey) {
                        info!(vendor = %pubkey.short(), relay = %event.relay, "vendor discovered");
                        write_log(self.log, LogEntry::VendorDiscovered { pubkey: pubkey.to_hex() });
                    }
                }
                for pubkey in outcome.updated {
                    if !self.discovered.contains(&pubkey) && self.updated.insert(pubkey) {
                        write_log(self.log, LogEntry::VendorUpdated { pubkey: pubkey.to_hex() });
                    }
                }
            }
            Err(error) => {
                self.stats.dropped += 1;
                let url = self.relays[relay].url.clone();
                warn!(relay = %url, event_id = %event.id.short(), %error, "event dropped");
                let entry = LogEntry::MergeDropped {
                    relay: url,
                    event_id: event.id.to_hex(),
                    reason: error.to_string(),
                };
                write_log(self.log, entry);
            }
        }
    }

    fn fail(&mut self, relay: usize, error: String) {
        let r = &mut self.relays[relay];
        r.status = RelayStatus::Failed;
        r.error = Some(error.clone());
        warn!(relay = %r.url, %error, "relay failed");
        let url = r.url.clone();
        self.session.record_error(&url, error.clone());
        write_log(self.log, LogEntry::RelayFailed { relay: url, error });
    }

    fn finish(mut self, elapsed: Duration) -> ScanResult {
        let stuck: Vec<usize> = self
            .relays
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == RelayStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        for relay in stuck {
            self.fail(relay, ConnectionError::Cancelled.to_string());
        }

        let outcome = if !self.any_connected() {
            ScanOutcome::NoRelays
        } else if self.relays.iter().all(|r| r.status.is_ok()) {
            ScanOutcome::Complete
        } else {
            ScanOutcome::Partial
        };

        let report = ScanReport {
            session_id: self.session.id.to_string(),
            started_at: self.session.started_at.format(&Rfc3339).unwrap_or_default(),
            elapsed_ms: elapsed.as_millis() as u64,
            phase: self.phase(),
            phases: self.phases,
            outcome,
            relays: self.relays,
            errors: self.session.errors().to_vec(),
            stats: self.stats,
            vendors_discovered: self.discovered.len(),
            vendors_updated: self.updated.len(),
            total_vendors: self.store.len(),
        };
        ScanResult { report, store: self.store }
    }
}

/// Connect, subscribe, then forward first sightings until cancelled.
struct RelayTask<C> {
    index: usize,
    url: String,
    connector: Arc<C>,
    filters: Arc<[FilterSet]>,
    dedup: Arc<EventDeduplicator>,
    tx: mpsc::Sender<RelayUpdate>,
    cancel: CancellationToken,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl<C: Connector> RelayTask<C> {
    async fn run(self) {
        let relay = self.index;
        let connect = timeout(self.connect_timeout, self.connector.connect(&self.url, self.connect_timeout));
        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConnectionError::Cancelled),
            r = connect => r.unwrap_or_else(|_| Err(ConnectionError::Timeout(self.connect_timeout))),
        };
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                self.send(RelayUpdate::Failed { relay, error: e.to_string() }).await;
                return;
            }
        };
        if let Err(e) = stream.subscribe(&self.filters).await {
            self.send(RelayUpdate::Failed { relay, error: e.to_string() }).await;
            self.close(&mut stream).await;
            return;
        }
        if !self.send(RelayUpdate::Connected { relay }).await {
            self.close(&mut stream).await;
            return;
        }

        let idle = self.idle_timeout;
        let mut eose = false;
        loop {
            let next = async {
                if eose {
                    Ok(stream.next_message().await)
                } else {
                    timeout(idle, stream.next_message()).await
                }
            };
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                r = next => r,
            };
            let update = match received {
                Err(_) => {
                    let error = ConnectionError::Idle(idle).to_string();
                    self.send(RelayUpdate::Failed { relay, error }).await;
                    break;
                }
                Ok(None) => {
                    self.send(RelayUpdate::Ended { relay }).await;
                    return;
                }
                Ok(Some(Ok(RelayMessage::Event { event, .. }))) => match self.dedup.observe(&event) {
                    Observation::New => RelayUpdate::Event { relay, event },
                    Observation::Duplicate => RelayUpdate::Duplicate { relay },
                    Observation::Conflict => RelayUpdate::Conflict { relay, event_id: event.id },
                },
                Ok(Some(Ok(RelayMessage::Eose { .. }))) => {
                    eose = true;
                    RelayUpdate::Eose { relay }
                }
                Ok(Some(Ok(RelayMessage::Closed { message, .. }))) => {
                    let error = format!("subscription closed by relay: {message}");
                    self.send(RelayUpdate::Failed { relay, error }).await;
                    break;
                }
                Ok(Some(Ok(RelayMessage::Notice { message }))) => {
                    info!(relay = %self.url, %message, "relay notice");
                    continue;
                }
                Ok(Some(Ok(RelayMessage::Other { kind }))) => {
                    debug!(relay = %self.url, %kind, "ignored relay message");
                    continue;
                }
                Ok(Some(Err(RelayError::Protocol(error)))) => RelayUpdate::Protocol { relay, error },
                Ok(Some(Err(RelayError::Connection(e)))) => {
                    self.send(RelayUpdate::Failed { relay, error: e.to_string() }).await;
                    return;
                }
            };
            if !self.send(update).await {
                break;
            }
        }
        self.close(&mut stream).await;
    }

    /// False once the consumer is gone or the scan was cancelled mid-send.
    async fn send(&self, update: RelayUpdate) -> bool {
        if self.cancel.is_cancelled() {
            return self.tx.try_send(update).is_ok();
        }
        tokio::select! {
            biased;
            r = self.tx.send(update) => r.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    async fn close(&self, stream: &mut C::Stream) {
        match timeout(CLOSE_WAIT, stream.close()).await {
            Ok(Ok(())) => debug!(relay = %self.url, "closed"),
            Ok(Err(e)) => warn!(relay = %self.url, error = %e, "close failed"),
            Err(_) => warn!(relay = %self.url, "close timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ScanOptions;
    use async_trait::async_trait;
    use relay_conn::SubscriptionId;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Frame = Result<RelayMessage, RelayError>;

    #[derive(Clone)]
    enum Script {
        Refuse,
        Hang,
        /// Deliver `frames`; then stay open silently or end the socket.
        Serve { frames: Vec<Frame>, linger: bool },
    }

    fn serve(events: &[RawEvent]) -> Script {
        let mut frames: Vec<Frame> = events.iter().map(|e| Ok(event_msg(e))).collect();
        frames.push(Ok(RelayMessage::Eose { subscription_id: "t".into() }));
        Script::Serve { frames, linger: true }
    }

    fn event_msg(ev: &RawEvent) -> RelayMessage {
        RelayMessage::Event { subscription_id: "t".into(), event: ev.clone() }
    }

    #[derive(Clone, Default)]
    struct ScriptedConnector {
        scripts: HashMap<String, Script>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn with(mut self, url: &str, script: Script) -> Self {
            self.scripts.insert(url.to_string(), script);
            self
        }
    }

    struct ScriptedStream {
        url: String,
        frames: VecDeque<Frame>,
        linger: bool,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Stream = ScriptedStream;

        async fn connect(&self, url: &str, _timeout: Duration) -> Result<ScriptedStream, ConnectionError> {
            match self.scripts.get(url).cloned() {
                None | Some(Script::Refuse) => Err(ConnectionError::WebSocket("connection refused".into())),
                Some(Script::Hang) => std::future::pending().await,
                Some(Script::Serve { frames, linger }) => Ok(ScriptedStream {
                    url: url.to_string(),
                    frames: frames.into(),
                    linger,
                    closes: self.closes.clone(),
                }),
            }
        }
    }

    #[async_trait]
    impl RelayStream for ScriptedStream {
        fn url(&self) -> &str {
            &self.url
        }

        async fn subscribe(&mut self, _filters: &[FilterSet]) -> Result<SubscriptionId, ConnectionError> {
            Ok(SubscriptionId::from("t"))
        }

        async fn next_message(&mut self) -> Option<Frame> {
            match self.frames.pop_front() {
                Some(frame) => Some(frame),
                None if self.linger => std::future::pending().await,
                None => None,
            }
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pk(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    fn announcement(author: u8, ts: u64) -> RawEvent {
        RawEvent::compose(pk(author), ts, 31990, vec![vec!["d".into(), format!("svc{author}")]], "{}")
    }

    fn job_result(author: u8, ts: u64) -> RawEvent {
        RawEvent::compose(pk(author), ts, 6001, vec![], "out")
    }

    fn session(relays: &[&str]) -> ScanSession {
        let filters = crate::plan::default_plan(&Default::default()).unwrap();
        let mut opts = ScanOptions::new(relays.iter().map(|r| r.to_string()).collect(), filters);
        opts.timeout = Duration::from_secs(5);
        opts.connect_timeout = Duration::from_millis(200);
        opts.idle_timeout = Duration::from_secs(2);
        opts.grace = Duration::from_millis(50);
        ScanSession::new(opts).unwrap()
    }

    async fn scan(connector: ScriptedConnector, session: &mut ScanSession) -> ScanResult {
        ScanOrchestrator::new(connector).run(session, VendorStore::default(), None).await
    }

    #[tokio::test]
    async fn tolerates_three_of_five_relays_failing() {
        let connector = ScriptedConnector::default()
            .with("wss://a", serve(&[announcement(1, 10), job_result(1, 20)]))
            .with("wss://b", serve(&[announcement(2, 11)]))
            .with("wss://c", Script::Refuse)
            .with("wss://d", Script::Refuse)
            .with("wss://e", Script::Hang);
        let closes = connector.closes.clone();
        let mut s = session(&["wss://a", "wss://b", "wss://c", "wss://d", "wss://e"]);
        let result = scan(connector, &mut s).await;
        let report = &result.report;

        assert_eq!(report.outcome, ScanOutcome::Partial);
        assert_eq!(report.phase, ScanPhase::Done);
        assert_eq!(
            report.phases,
            vec![
                ScanPhase::Idle,
                ScanPhase::Connecting,
                ScanPhase::Scanning,
                ScanPhase::Draining,
                ScanPhase::Done
            ]
        );
        assert_eq!(report.relays_ok(), 2);
        assert_eq!(report.relays_failed(), 3);
        assert_eq!(report.errors.len(), 3);
        assert!(report.relays[4].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(result.store.len(), 2);
        assert_eq!(report.vendors_discovered, 2);
        assert_eq!(report.stats.events, 3);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn global_timeout_bounds_a_silent_relay() {
        let frames = vec![Ok(event_msg(&announcement(1, 10)))];
        let connector = ScriptedConnector::default().with("wss://slow", Script::Serve { frames, linger: true });
        let mut s = session(&["wss://slow"]);
        s.options.timeout = Duration::from_secs(1);
        s.options.idle_timeout = Duration::from_secs(30);

        let started = Instant::now();
        let result = scan(connector, &mut s).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.report.phase, ScanPhase::TimedOut);
        assert_eq!(result.report.outcome, ScanOutcome::Partial);
        assert_eq!(result.report.relays[0].status, RelayStatus::Connected);
        assert_eq!(result.report.relays_partial(), 1);
        assert_eq!(result.report.relays_failed(), 0);
        assert_eq!(result.report.finished_entry(), LogEntry::ScanFinished {
            session: s.id.to_string(),
            phase: "timed_out".into(),
            outcome: "partial".into(),
            relays_ok: 0,
            relays_partial: 1,
            relays_failed: 0,
            events: 1,
            duplicates: 0,
            dropped: 0,
            vendors_discovered: 1,
            vendors_updated: 0,
            total_vendors: 1,
        });
        assert_eq!(result.store.len(), 1);
    }

    #[tokio::test]
    async fn all_relays_failing_is_no_relays() {
        let connector = ScriptedConnector::default();
        let mut s = session(&["wss://x", "wss://y"]);
        let result = scan(connector, &mut s).await;
        assert_eq!(result.report.outcome, ScanOutcome::NoRelays);
        assert_eq!(
            result.report.phases,
            vec![ScanPhase::Idle, ScanPhase::Connecting, ScanPhase::Done]
        );
        assert!(result.store.is_empty());
        assert_eq!(s.errors().len(), 2);
    }

    #[tokio::test]
    async fn events_seen_on_several_relays_merge_once() {
        let events = [announcement(1, 10), job_result(1, 12), announcement(2, 9)];
        let connector = ScriptedConnector::default()
            .with("wss://a", serve(&events))
            .with("wss://b", serve(&events))
            .with("wss://c", serve(&events[..1]));
        let mut s = session(&["wss://a", "wss://b", "wss://c"]);
        let result = scan(connector, &mut s).await;
        let report = &result.report;
        assert_eq!(report.outcome, ScanOutcome::Complete);
        assert_eq!(report.stats.events, 3);
        assert_eq!(report.stats.duplicates, 4);
        assert_eq!(report.stats.anomalies, 0);
        let per_relay: u64 = report.relays.iter().map(|r| r.events).sum();
        assert_eq!(per_relay, 3);
        assert_eq!(result.store.get(&pk(1)).unwrap().announcements.len(), 1);
    }

    #[tokio::test]
    async fn idle_relay_fails_without_blocking_others() {
        let connector = ScriptedConnector::default()
            .with("wss://quiet", Script::Serve { frames: vec![], linger: true })
            .with("wss://ok", serve(&[announcement(1, 1)]));
        let mut s = session(&["wss://quiet", "wss://ok"]);
        s.options.idle_timeout = Duration::from_millis(200);
        let result = scan(connector, &mut s).await;
        assert_eq!(result.report.phase, ScanPhase::Done);
        assert_eq!(result.report.relays[0].status, RelayStatus::Failed);
        assert!(result.report.relays[0].error.as_deref().unwrap().contains("no message"));
        assert_eq!(result.report.relays[1].status, RelayStatus::Eose);
    }

    #[tokio::test]
    async fn bad_frames_and_unmergeable_events_are_counted() {
        let untargeted = RawEvent::compose(pk(9), 5, 5001, vec![], "no target");
        let frames = vec![
            Err(RelayError::Protocol(ProtocolError::Json("eof".into()))),
            Ok(event_msg(&untargeted)),
            Ok(RelayMessage::Notice { message: "hi".into() }),
            Ok(event_msg(&announcement(1, 3))),
            Ok(RelayMessage::Eose { subscription_id: "t".into() }),
        ];
        let connector = ScriptedConnector::default().with("wss://a", Script::Serve { frames, linger: false });
        let mut s = session(&["wss://a"]);
        let result = scan(connector, &mut s).await;
        let report = &result.report;
        assert_eq!(report.stats.protocol_errors, 1);
        assert_eq!(report.stats.dropped, 1);
        assert_eq!(report.stats.events, 2);
        assert_eq!(report.relays[0].status, RelayStatus::Closed);
        assert_eq!(report.outcome, ScanOutcome::Complete);
    }

    #[tokio::test]
    async fn socket_ending_before_eose_is_a_failure() {
        let frames = vec![Ok(event_msg(&announcement(1, 3)))];
        let connector = ScriptedConnector::default().with("wss://a", Script::Serve { frames, linger: false });
        let mut s = session(&["wss://a"]);
        let result = scan(connector, &mut s).await;
        assert_eq!(result.report.relays[0].status, RelayStatus::Failed);
        assert_eq!(result.report.outcome, ScanOutcome::Partial);
        assert_eq!(result.store.len(), 1);
    }

    #[tokio::test]
    async fn seeded_vendors_count_as_updated() {
        let mut seed = VendorStore::default();
        seed.merge(&announcement(1, 10)).unwrap();
        let connector = ScriptedConnector::default()
            .with("wss://a", serve(&[announcement(1, 10), job_result(1, 30), announcement(2, 5)]));
        let mut s = session(&["wss://a"]);
        let result = ScanOrchestrator::new(connector).run(&mut s, seed, None).await;
        assert_eq!(result.report.vendors_discovered, 1);
        assert_eq!(result.report.vendors_updated, 1);
        assert_eq!(result.report.total_vendors, 2);
        assert_eq!(result.store.get(&pk(1)).unwrap().last_seen, 30);
    }

    #[tokio::test]
    async fn scan_and_persist_saves_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let file = VendorFile::new(dir.path().join("vendors.json"));
        let log = ScanLog::open(dir.path().join("scan.log")).unwrap();
        let events = [announcement(1, 10), job_result(1, 20)];

        let orchestrator = ScanOrchestrator::new(ScriptedConnector::default().with("wss://a", serve(&events)));
        let mut first = session(&["wss://a"]);
        let result = scan_and_persist(&orchestrator, &mut first, &file, Some(&log)).await.unwrap();
        assert_eq!(result.report.vendors_discovered, 1);
        assert_eq!(file.load().unwrap(), result.store);

        let mut second = session(&["wss://a"]);
        let again = scan_and_persist(&orchestrator, &mut second, &file, Some(&log)).await.unwrap();
        assert_eq!(again.report.vendors_discovered, 0);
        assert_eq!(again.report.vendors_updated, 0);
        assert_eq!(again.store, result.store);

        let text = std::fs::read_to_string(log.path()).unwrap();
        let events: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(events.first().map(String::as_str), Some("scan_started"));
        assert_eq!(events.last().map(String::as_str), Some("scan_finished"));
        assert_eq!(events.iter().filter(|e| *e == "vendor_discovered").count(), 1);
        assert_eq!(events.iter().filter(|e| *e == "scan_finished").count(), 2);
        assert!(events.iter().any(|e| e == "relay_eose"));
    }

    #[tokio::test]
    async fn unreachable_relays_leave_the_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let file = VendorFile::new(dir.path().join("vendors.json"));
        let orchestrator = ScanOrchestrator::new(ScriptedConnector::default());
        let mut s = session(&["wss://down"]);
        let err = scan_and_persist(&orchestrator, &mut s, &file, None).await.err().unwrap();
        match err {
            ScanError::NoRelays(report) => assert_eq!(report.relays_failed(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!file.path().exists());
    }
}

//! # Batch Dispatcher
//!
//! One dispatcher per upload stream. Producers `add` synchronously; a
//! background loop flushes batches over the authenticated session.
//!
//! ## Flush Decision
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         flush()                                         │
//! │                                                                         │
//! │  session authenticated? ── no ──► NotAuthenticated                      │
//! │          │ yes                                                          │
//! │  snapshot in flight?    ── yes ─► InFlight                              │
//! │          │ no                                                           │
//! │  queue empty?           ── yes ─► Empty                                 │
//! │          │ no                                                           │
//! │  before next attempt?   ── yes ─► CoolingDown                           │
//! │          │ no                                                           │
//! │  take ≤ batch_size ──► sign ──► POST /v1/<stream>                       │
//! │                                    │                                    │
//! │                      2xx ──────────┴───────── error                     │
//! │                       │                        │                        │
//! │                 ack (drop or retain)     requeue at front               │
//! │                 next try after cooldown  next try after retry interval  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Loop Wakeups
//! - the flush interval elapses
//! - `add` fills a whole batch
//! - the retry or cooldown delay ends
//!
//! Send failures never reach producers. The only loss is eviction under the
//! queue bound, which is logged and reported to the emitter.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lumen_core::{BatchEntry, Record};

use crate::error::ClientResult;
use crate::protocol::{StorageBatch, EVENTS_PATH, LOGS_PATH, STORAGE_PATH, TELEMETRY_PATH};
use crate::queue::PendingQueue;
use crate::session::AuthSession;
use crate::transport::HttpMethod;

// =============================================================================
// Streams
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Storage,
    Events,
    Telemetry,
    Logs,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Storage,
        StreamKind::Events,
        StreamKind::Telemetry,
        StreamKind::Logs,
    ];

    /// Upload endpoint.
    pub fn path(&self) -> &'static str {
        match self {
            StreamKind::Storage => STORAGE_PATH,
            StreamKind::Events => EVENTS_PATH,
            StreamKind::Telemetry => TELEMETRY_PATH,
            StreamKind::Logs => LOGS_PATH,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Storage => "storage",
            StreamKind::Events => "events",
            StreamKind::Telemetry => "telemetry",
            StreamKind::Logs => "logs",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single `flush` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Sent(usize),
    Failed { requeued: usize },
    NotAuthenticated,
    InFlight,
    Empty,
    CoolingDown,
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct BatchDispatcher {
    kind: StreamKind,
    session: Arc<AuthSession>,
    queue: Mutex<PendingQueue>,
    /// Earliest instant the next send may start.
    next_attempt: Mutex<Option<Instant>>,
    wake: Notify,
    sent_total: AtomicU64,
}

impl BatchDispatcher {
    pub fn new(kind: StreamKind, session: Arc<AuthSession>) -> Self {
        let max_len = session.dispatch_settings().max_queue_size;
        BatchDispatcher {
            kind,
            session,
            queue: Mutex::new(PendingQueue::new(max_len)),
            next_attempt: Mutex::new(None),
            wake: Notify::new(),
            sent_total: AtomicU64::new(0),
        }
    }

    fn queue(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_attempt(&self) -> MutexGuard<'_, Option<Instant>> {
        self.next_attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    // =========================================================================
    // Producers
    // =========================================================================

    /// Queues `entry`. Never blocks on the network.
    pub fn add(&self, entry: BatchEntry) {
        let settings = self.session.dispatch_settings();

        let (len, evicted) = {
            let mut queue = self.queue();
            queue.set_max_len(settings.max_queue_size);
            let evicted = queue.push(entry);
            (queue.len(), evicted)
        };

        if evicted > 0 {
            self.report_eviction(evicted);
        }
        if len >= settings.batch_size {
            self.wake.notify_one();
        }
    }

    /// Queues `payload` under `name`, stamped now, with default routing.
    pub fn add_record(&self, name: impl Into<String>, payload: Record) {
        self.add(BatchEntry::new(name, payload, Utc::now()));
    }

    fn report_eviction(&self, evicted: usize) {
        let evicted_total = self.queue().evicted_total();
        warn!(
            stream = %self.kind,
            evicted,
            evicted_total,
            "Queue bound reached, dropped oldest entries"
        );
        self.session.emitter().emit_queue_evicted(self.kind, evicted);
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    /// Sends at most one batch, subject to the gates in the module docs.
    pub async fn flush(&self) -> FlushOutcome {
        self.flush_inner(false).await
    }

    async fn flush_inner(&self, ignore_cooldown: bool) -> FlushOutcome {
        if !self.session.is_authenticated() {
            debug!(stream = %self.kind, "Not authenticated, skipping flush");
            return FlushOutcome::NotAuthenticated;
        }

        let settings = self.session.dispatch_settings();
        let now = Instant::now();

        let batch = {
            let mut queue = self.queue();
            if queue.has_in_flight() {
                return FlushOutcome::InFlight;
            }
            if queue.is_empty() {
                return FlushOutcome::Empty;
            }

            let mut next_attempt = self.next_attempt();
            if !ignore_cooldown && next_attempt.is_some_and(|at| now < at) {
                return FlushOutcome::CoolingDown;
            }
            *next_attempt = Some(now + settings.send_cooldown());

            match queue.take_batch(settings.batch_size) {
                Some(batch) => batch,
                None => return FlushOutcome::Empty,
            }
        };

        let count = batch.len();
        match self.send(&batch).await {
            Ok(()) => {
                self.queue().ack(settings.retain_after_sent);
                self.sent_total.fetch_add(count as u64, Ordering::Relaxed);
                info!(stream = %self.kind, count, "Batch sent");
                FlushOutcome::Sent(count)
            }
            Err(e) => {
                let (requeued, evicted) = self.queue().requeue();
                let delay = settings.retry_interval().max(settings.send_cooldown());
                *self.next_attempt() = Some(Instant::now() + delay);
                warn!(
                    stream = %self.kind,
                    count = requeued,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "Batch send failed, requeued"
                );
                if evicted > 0 {
                    self.report_eviction(evicted);
                }
                FlushOutcome::Failed { requeued }
            }
        }
    }

    async fn send(&self, batch: &[BatchEntry]) -> ClientResult<()> {
        let api = self.session.api();
        let body = api.encode(&StorageBatch::from_entries(batch))?;
        let request = self
            .session
            .signed_request(HttpMethod::Post, self.kind.path(), Some(body))?;
        api.send(request).await?;
        Ok(())
    }

    /// Makes the flush loop re-check now, e.g. after authentication.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Best-effort send of everything queued, ignoring the cooldown.
    ///
    /// Stops at the first batch that does not go out.
    pub async fn drain(&self) -> usize {
        let mut sent = 0;
        loop {
            match self.flush_inner(true).await {
                FlushOutcome::Sent(count) => sent += count,
                _ => return sent,
            }
        }
    }

    /// Returns an orphaned in-flight snapshot to the queue front.
    ///
    /// Used after the flush loop died mid-send.
    pub fn recover_in_flight(&self) -> usize {
        let (requeued, evicted) = self.queue().requeue();
        if requeued > 0 {
            info!(stream = %self.kind, count = requeued, "Recovered in-flight batch");
        }
        if evicted > 0 {
            self.report_eviction(evicted);
        }
        requeued
    }

    /// Flush loop; runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        debug!(stream = %self.kind, "Dispatcher loop started");

        loop {
            let outcome = self.flush().await;
            let delay = self.next_delay(outcome);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(stream = %self.kind, "Dispatcher loop stopped");
    }

    fn next_delay(&self, outcome: FlushOutcome) -> Duration {
        let settings = self.session.dispatch_settings();
        let until_next_attempt = || {
            self.next_attempt()
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or_default()
        };

        match outcome {
            FlushOutcome::Sent(_) if self.pending_len() >= settings.batch_size => until_next_attempt(),
            FlushOutcome::Failed { .. } | FlushOutcome::CoolingDown => until_next_attempt(),
            _ => settings.flush_interval(),
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn pending_len(&self) -> usize {
        self.queue().len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.queue().in_flight_len()
    }

    pub fn evicted_total(&self) -> u64 {
        self.queue().evicted_total()
    }

    pub fn sent_total(&self) -> u64 {
        self.sent_total.load(Ordering::Relaxed)
    }

    /// Confirmed entries kept by `retain_after_sent`.
    pub fn take_sent(&self) -> Vec<BatchEntry> {
        self.queue().take_sent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::protocol::AUTH_TOKEN_PATH;
    use crate::testing::{auth_ok, legacy_config, MockTransport, RecordingHost};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    async fn authenticated(mock: &Arc<MockTransport>, host: &Arc<RecordingHost>, config: ClientConfig) -> Arc<AuthSession> {
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(1)));
        let session = AuthSession::builder(config)
            .with_transport(mock.clone())
            .with_emitter(host.clone())
            .build()
            .unwrap();
        session.authenticate().await.unwrap();
        Arc::new(session)
    }

    fn small_batches() -> ClientConfig {
        let mut config = legacy_config();
        config.dispatch.batch_size = 2;
        config.dispatch.send_cooldown_ms = 0;
        config
    }

    fn sent_names(mock: &MockTransport, path: &str) -> Vec<Vec<String>> {
        mock.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .map(|r| {
                let body: StorageBatch = serde_json::from_slice(r.body.as_ref().unwrap()).unwrap();
                body.data.into_iter().map(|e| e.name).collect()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_not_authenticated_skips() {
        let mock = Arc::new(MockTransport::new());
        let session = Arc::new(
            AuthSession::builder(legacy_config())
                .with_transport(mock.clone())
                .build()
                .unwrap(),
        );
        let dispatcher = BatchDispatcher::new(StreamKind::Events, session);
        dispatcher.add_record("click", json!({}));

        assert_eq!(dispatcher.flush().await, FlushOutcome::NotAuthenticated);
        assert!(mock.requests().is_empty());
        assert_eq!(dispatcher.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_batch_of_two_fails_then_resends_in_order() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let session = authenticated(&mock, &host, small_batches()).await;
        mock.respond(STORAGE_PATH, 500, json!({}));
        mock.respond(STORAGE_PATH, 200, json!({}));

        let dispatcher = BatchDispatcher::new(StreamKind::Storage, session);
        for name in ["e1", "e2", "e3"] {
            dispatcher.add_record(name, json!({ "v": name }));
        }

        assert_eq!(dispatcher.flush().await, FlushOutcome::Failed { requeued: 2 });
        assert_eq!(dispatcher.pending_len(), 3);
        assert_eq!(dispatcher.flush().await, FlushOutcome::CoolingDown);

        assert_eq!(dispatcher.drain().await, 3);
        assert_eq!(
            sent_names(&mock, STORAGE_PATH),
            vec![
                vec!["e1".to_string(), "e2".to_string()],
                vec!["e1".to_string(), "e2".to_string()],
                vec!["e3".to_string()],
            ]
        );
        assert_eq!(dispatcher.pending_len(), 0);
        assert_eq!(dispatcher.sent_total(), 3);
    }

    #[tokio::test]
    async fn test_requests_are_signed() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let session = authenticated(&mock, &host, small_batches()).await;
        mock.respond(TELEMETRY_PATH, 200, json!({}));

        let dispatcher = BatchDispatcher::new(StreamKind::Telemetry, session);
        dispatcher.add_record("fps", json!(60));
        assert_eq!(dispatcher.flush().await, FlushOutcome::Sent(1));

        let request = mock.requests().into_iter().find(|r| r.path == TELEMETRY_PATH).unwrap();
        let body = request.body.as_deref().unwrap();
        let timestamp = request.header(lumen_core::signing::TIMESTAMP_HEADER).unwrap();
        let expected = lumen_core::sign_request(
            request.header("Authorization").unwrap().trim_start_matches("Bearer "),
            "session-secret",
            timestamp.parse().unwrap(),
            Some(body),
        )
        .unwrap();
        assert_eq!(request.header(lumen_core::signing::HASH_HEADER), Some(expected.signature.as_str()));
    }

    #[tokio::test]
    async fn test_cooldown_between_sends() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let mut config = small_batches();
        config.dispatch.send_cooldown_ms = 60_000;
        let session = authenticated(&mock, &host, config).await;
        mock.respond(LOGS_PATH, 200, json!({}));

        let dispatcher = BatchDispatcher::new(StreamKind::Logs, session);
        for i in 0..3 {
            dispatcher.add_record("info", json!({ "i": i }));
        }

        assert_eq!(dispatcher.flush().await, FlushOutcome::Sent(2));
        assert_eq!(dispatcher.flush().await, FlushOutcome::CoolingDown);
        assert_eq!(dispatcher.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_eviction_reported() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let mut config = legacy_config();
        config.dispatch.max_queue_size = 2;
        let session = authenticated(&mock, &host, config).await;

        let dispatcher = BatchDispatcher::new(StreamKind::Events, session);
        for name in ["a", "b", "c"] {
            dispatcher.add_record(name, json!({}));
        }

        assert_eq!(dispatcher.pending_len(), 2);
        assert_eq!(dispatcher.evicted_total(), 1);
        assert_eq!(host.evictions(), vec![(StreamKind::Events, 1)]);
    }

    #[tokio::test]
    async fn test_retain_after_sent() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let mut config = small_batches();
        config.dispatch.retain_after_sent = true;
        let session = authenticated(&mock, &host, config).await;
        mock.respond(EVENTS_PATH, 200, json!({}));

        let dispatcher = BatchDispatcher::new(StreamKind::Events, session);
        dispatcher.add_record("start", json!({}));
        dispatcher.flush().await;

        assert_eq!(dispatcher.take_sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_flushes_full_batch_immediately() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let mut config = small_batches();
        config.dispatch.flush_interval_secs = 3_600;
        let session = authenticated(&mock, &host, config).await;
        mock.respond(EVENTS_PATH, 200, json!({}));

        let dispatcher = Arc::new(BatchDispatcher::new(StreamKind::Events, session));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.clone().run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.add_record("a", json!({}));
        dispatcher.add_record("b", json!({}));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(mock.count(EVENTS_PATH), 1);
        assert_eq!(dispatcher.pending_len(), 0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_retries_after_interval() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let mut config = small_batches();
        config.dispatch.retry_interval_secs = 15;
        let session = authenticated(&mock, &host, config).await;
        mock.unreachable(LOGS_PATH);
        mock.respond(LOGS_PATH, 200, json!({}));

        let dispatcher = Arc::new(BatchDispatcher::new(StreamKind::Logs, session));
        dispatcher.add_record("warn", json!({}));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.clone().run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.count(LOGS_PATH), 1);
        assert_eq!(dispatcher.pending_len(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(mock.count(LOGS_PATH), 2);
        assert_eq!(dispatcher.pending_len(), 0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_recover_in_flight() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let session = authenticated(&mock, &host, small_batches()).await;
        let dispatcher = BatchDispatcher::new(StreamKind::Storage, session);
        dispatcher.add_record("x", json!({}));
        dispatcher.add_record("y", json!({}));

        // Simulate a loop that died between snapshot and ack.
        dispatcher.queue().take_batch(2).unwrap();
        assert_eq!(dispatcher.in_flight_len(), 2);

        assert_eq!(dispatcher.recover_in_flight(), 2);
        assert_eq!(dispatcher.pending_len(), 2);
        assert_eq!(dispatcher.in_flight_len(), 0);
    }
}

//! # Lumen Client
//!
//! Top-level handle a host application holds. Wires one session to the four
//! upload streams and runs their background loops.
//!
//! ## Client Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           LumenClient                                   │
//! │                                                                         │
//! │   authenticate() / submit_secondary_answer() / re_authenticate()        │
//! │                               │                                         │
//! │                               ▼                                         │
//! │                   ┌──────────────────────┐                              │
//! │                   │  Arc<AuthSession>    │◄──────────┐                  │
//! │                   └──────────┬───────────┘           │                  │
//! │          ┌─────────────┬─────┴───────┬─────────────┐ │                  │
//! │          ▼             ▼             ▼             ▼ │                  │
//! │     ┌─────────┐   ┌─────────┐   ┌───────────┐  ┌──────┐ ┌────────────┐  │
//! │     │ storage │   │ events  │   │ telemetry │  │ logs │ │ refresh    │  │
//! │     │ put/get │   │ track_  │   │ record_   │  │ log  │ │ poller     │  │
//! │     │ /delete │   │ event   │   │ telemetry │  │      │ │            │  │
//! │     └─────────┘   └─────────┘   └───────────┘  └──────┘ └────────────┘  │
//! │                                                                         │
//! │   start(): every loop above runs under the Scheduler                    │
//! │   shutdown(): cancel loops, requeue in-flight, one final flush each     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use lumen_core::{Record, SessionIdentity};

use crate::codec::WireCodec;
use crate::config::ClientConfig;
use crate::dispatcher::{BatchDispatcher, StreamKind};
use crate::error::{ClientError, ClientResult};
use crate::events::{AuthPromptHandler, SessionEventEmitter};
use crate::handoff::AuthHandoffReceiver;
use crate::refresh::TokenRefreshPoller;
use crate::scheduler::{Scheduler, DEFAULT_RESTART_DELAY};
use crate::session::{AuthSession, AuthSessionBuilder, AuthState};
use crate::storage::StorageClient;
use crate::transport::Transport;

// =============================================================================
// Status
// =============================================================================

/// Counters of one upload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    pub stream: StreamKind,
    pub pending: usize,
    pub in_flight: usize,
    pub sent_total: u64,
    pub evicted_total: u64,
}

/// Point-in-time snapshot for hosts that poll.
#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub state: AuthState,
    pub authenticated: bool,
    pub handoff: bool,
    pub token_expiry: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    pub running: bool,
    pub streams: Vec<StreamStatus>,
}

impl ClientStatus {
    pub fn stream(&self, kind: StreamKind) -> Option<&StreamStatus> {
        self.streams.iter().find(|s| s.stream == kind)
    }
}

// =============================================================================
// Client
// =============================================================================

struct Streams {
    storage: Arc<BatchDispatcher>,
    events: Arc<BatchDispatcher>,
    telemetry: Arc<BatchDispatcher>,
    logs: Arc<BatchDispatcher>,
}

impl Streams {
    fn new(session: &Arc<AuthSession>) -> Self {
        let make = |kind| Arc::new(BatchDispatcher::new(kind, session.clone()));
        Streams {
            storage: make(StreamKind::Storage),
            events: make(StreamKind::Events),
            telemetry: make(StreamKind::Telemetry),
            logs: make(StreamKind::Logs),
        }
    }

    fn get(&self, kind: StreamKind) -> &Arc<BatchDispatcher> {
        match kind {
            StreamKind::Storage => &self.storage,
            StreamKind::Events => &self.events,
            StreamKind::Telemetry => &self.telemetry,
            StreamKind::Logs => &self.logs,
        }
    }

    fn all(&self) -> [&Arc<BatchDispatcher>; 4] {
        [&self.storage, &self.events, &self.telemetry, &self.logs]
    }
}

pub struct LumenClient {
    session: Arc<AuthSession>,
    streams: Streams,
    storage: StorageClient,
    poller: Arc<TokenRefreshPoller>,
    scheduler: Scheduler,
    started: AtomicBool,
    closed: AtomicBool,
}

impl LumenClient {
    pub fn builder(config: ClientConfig) -> LumenClientBuilder {
        LumenClientBuilder::new(config)
    }

    fn from_session(session: AuthSession, restart_delay: Duration) -> ClientResult<Self> {
        let session = Arc::new(session);
        let streams = Streams::new(&session);
        let storage = StorageClient::new(session.clone(), streams.storage.clone())?;
        let poller = Arc::new(TokenRefreshPoller::new(session.clone()));

        Ok(LumenClient {
            session,
            streams,
            storage,
            poller,
            scheduler: Scheduler::new(restart_delay),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Spawns the flush loops and the refresh poller. Idempotent.
    pub fn start(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for dispatcher in self.streams.all() {
            let run = dispatcher.clone();
            let recover = dispatcher.clone();
            self.scheduler.supervise(
                dispatcher.kind().as_str(),
                move |cancel| run.clone().run(cancel),
                move || {
                    recover.recover_in_flight();
                },
            );
        }

        let poller = self.poller.clone();
        self.scheduler
            .supervise("token_refresh", move |cancel| poller.clone().run(cancel), || {});

        info!(
            device_id = %self.session.identity().device_id,
            session_id = %self.session.identity().session_id,
            "Lumen client started"
        );
        Ok(())
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    pub async fn authenticate(&self) -> ClientResult<()> {
        self.session.authenticate().await?;
        self.wake_streams();
        Ok(())
    }

    pub async fn submit_secondary_answer(&self, answer: &str) -> ClientResult<bool> {
        let accepted = self.session.submit_secondary_answer(answer).await?;
        if accepted {
            self.wake_streams();
        }
        Ok(accepted)
    }

    pub async fn re_authenticate(&self) -> ClientResult<()> {
        self.session.re_authenticate().await?;
        self.wake_streams();
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    fn wake_streams(&self) {
        if self.session.is_authenticated() {
            for dispatcher in self.streams.all() {
                dispatcher.wake();
            }
        }
    }

    // =========================================================================
    // Producers
    // =========================================================================

    pub fn track_event(&self, name: impl Into<String>, payload: Record) -> ClientResult<()> {
        self.enqueue(StreamKind::Events, name.into(), payload)
    }

    pub fn record_telemetry(&self, name: impl Into<String>, payload: Record) -> ClientResult<()> {
        self.enqueue(StreamKind::Telemetry, name.into(), payload)
    }

    /// Queues a log line on the logs stream, named by its level.
    pub fn log(&self, level: Level, message: impl Into<String>) -> ClientResult<()> {
        let name = level.to_string().to_lowercase();
        let payload = json!({ "level": name, "message": message.into() });
        self.enqueue(StreamKind::Logs, name, payload)
    }

    fn enqueue(&self, kind: StreamKind, name: String, payload: Record) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ShuttingDown);
        }
        self.streams.get(kind).add_record(name, payload);
        Ok(())
    }

    pub fn storage(&self) -> &StorageClient {
        &self.storage
    }

    pub fn dispatcher(&self, kind: StreamKind) -> &Arc<BatchDispatcher> {
        self.streams.get(kind)
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn status(&self) -> ClientStatus {
        let streams = StreamKind::ALL
            .iter()
            .map(|&kind| {
                let dispatcher = self.streams.get(kind);
                StreamStatus {
                    stream: kind,
                    pending: dispatcher.pending_len(),
                    in_flight: dispatcher.in_flight_len(),
                    sent_total: dispatcher.sent_total(),
                    evicted_total: dispatcher.evicted_total(),
                }
            })
            .collect();

        ClientStatus {
            state: self.session.state(),
            authenticated: self.session.is_authenticated(),
            handoff: self.session.is_handoff(),
            token_expiry: self.session.token_expiry(),
            failed_attempts: self.session.failed_attempts(),
            running: self.started.load(Ordering::SeqCst) && !self.scheduler.is_shut_down(),
            streams,
        }
    }

    /// Stops every loop, then makes one best-effort flush per stream.
    ///
    /// Entries that could not be sent stay queued in memory.
    pub async fn shutdown(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down Lumen client");

        self.scheduler.shutdown().await;

        let mut sent = 0;
        let mut left = 0;
        for dispatcher in self.streams.all() {
            dispatcher.recover_in_flight();
            sent += dispatcher.drain().await;
            left += dispatcher.pending_len();
        }

        info!(sent, left, "Lumen client stopped");
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a [`LumenClient`] with options.
pub struct LumenClientBuilder {
    session: AuthSessionBuilder,
    restart_delay: Duration,
}

impl LumenClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        LumenClientBuilder {
            session: AuthSession::builder(config),
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.session = self.session.with_transport(transport);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn WireCodec>) -> Self {
        self.session = self.session.with_codec(codec);
        self
    }

    pub fn with_handoff(mut self, receiver: AuthHandoffReceiver) -> Self {
        self.session = self.session.with_handoff(receiver);
        self
    }

    pub fn with_prompt_handler(mut self, prompt: Arc<dyn AuthPromptHandler>) -> Self {
        self.session = self.session.with_prompt_handler(prompt);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SessionEventEmitter>) -> Self {
        self.session = self.session.with_emitter(emitter);
        self
    }

    pub fn with_identity(mut self, identity: SessionIdentity) -> Self {
        self.session = self.session.with_identity(identity);
        self
    }

    /// Delay before a crashed background loop is restarted.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn build(self) -> ClientResult<LumenClient> {
        LumenClient::from_session(self.session.build()?, self.restart_delay)
    }
}

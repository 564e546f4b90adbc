//! # lumen-client: Authenticated Upload Client for the Lumen SDK
//!
//! Authenticates the process against the Lumen backend and ships batches of
//! storage values, events, telemetry and logs over signed HTTPS requests.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          LumenClient                                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                        AuthSession                               │  │
//! │  │                                                                  │  │
//! │  │  Hand-off bundle ──► installed, zero requests                    │  │
//! │  │  otherwise        ──► POST /v1/auth/token (fixed-interval retry) │  │
//! │  │                   ──► GET  /v1/storage/config (overrides, step-up)│ │
//! │  │  Epoch counter discards results of superseded flows              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ sign_request()                          │
//! │         ┌──────────────┬──────┴───────┬──────────────┐                 │
//! │         ▼              ▼              ▼              ▼                  │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐           │
//! │  │  storage   │ │   events   │ │ telemetry  │ │    logs    │           │
//! │  │ Dispatcher │ │ Dispatcher │ │ Dispatcher │ │ Dispatcher │           │
//! │  └────────────┘ └────────────┘ └────────────┘ └────────────┘           │
//! │                                                                         │
//! │  Scheduler: supervised flush loops + TokenRefreshPoller                 │
//! │  Transport: reqwest behind a trait, JSON through WireCodec              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - TOML + environment configuration
//! - [`session`] - Auth state machine, signing, refresh
//! - [`handoff`] - Side-channel credential bundles
//! - [`dispatcher`] / [`queue`] - Per-stream batching and requeue
//! - [`storage`] - Remote key-value reads and deletes
//! - [`refresh`] / [`scheduler`] - Background loops
//! - [`transport`] / [`codec`] / [`protocol`] - Wire layer
//! - [`client`] - The orchestrator hosts hold
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use lumen_client::{ClientConfig, LumenClient};
//!
//! let client = LumenClient::builder(ClientConfig::load(None)?).build()?;
//! client.start()?;
//! client.authenticate().await?;
//! client.track_event("app_opened", serde_json::json!({}))?;
//! client.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handoff;
pub mod protocol;
pub mod queue;
pub mod refresh;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{ClientStatus, LumenClient, LumenClientBuilder, StreamStatus};
pub use codec::{JsonCodec, WireCodec};
pub use config::{AuthSettings, ClientConfig, DispatchSettings};
pub use dispatcher::{BatchDispatcher, FlushOutcome, StreamKind};
pub use error::{ClientError, ClientResult};
pub use events::{AuthCompletion, AuthPrompt, AuthPromptHandler, NoOpEmitter, SessionEventEmitter};
pub use handoff::{AuthHandoffReceiver, HandoffSource, IntentExtraSource, LaunchArgSource, UrlQuerySource};
pub use refresh::TokenRefreshPoller;
pub use scheduler::Scheduler;
pub use session::{AuthSession, AuthSessionBuilder, AuthState, RefreshOutcome};
pub use storage::StorageClient;
pub use transport::{HttpTransport, Transport};

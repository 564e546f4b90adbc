//! # Credential Hand-off
//!
//! A launcher that already holds a session can pass it to this process so
//! no network authentication is needed.
//!
//! ## Side Channels (priority order)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. IntentExtraSource   host-supplied key/value extras                  │
//! │  2. LaunchArgSource     --auth_handoff=<json>                           │
//! │                         --auth_handoff <json>                           │
//! │                         auth_handoff=<json>                             │
//! │  3. UrlQuerySource      https://app.example/launch?auth_handoff=<json>  │
//! │                                                                         │
//! │  Bundle = the /v1/auth/token response body:                             │
//! │  {"Token": "...", "Secret": "...", "UserId": ..., "Modules": [...]}     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A missing, unparseable or incomplete bundle is skipped and the session
//! authenticates normally. A bundle is installed at most once per process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use url::Url;

use lumen_core::HANDOFF_KEY;

use crate::protocol::AuthResponse;

/// One place a hand-off bundle may be found.
pub trait HandoffSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Raw bundle text, if this channel carries one.
    fn read(&self) -> Option<String>;
}

// =============================================================================
// Sources
// =============================================================================

/// Extras attached to the launching intent, copied in by the host.
#[derive(Debug, Clone, Default)]
pub struct IntentExtraSource {
    extras: HashMap<String, String>,
}

impl IntentExtraSource {
    pub fn new(extras: HashMap<String, String>) -> Self {
        IntentExtraSource { extras }
    }
}

impl HandoffSource for IntentExtraSource {
    fn name(&self) -> &'static str {
        "intent_extra"
    }

    fn read(&self) -> Option<String> {
        self.extras.get(HANDOFF_KEY).cloned()
    }
}

/// Process launch arguments.
#[derive(Debug, Clone, Default)]
pub struct LaunchArgSource {
    args: Vec<String>,
}

impl LaunchArgSource {
    pub fn new(args: Vec<String>) -> Self {
        LaunchArgSource { args }
    }

    /// Arguments of the current process, program name excluded.
    pub fn from_env() -> Self {
        Self::new(std::env::args().skip(1).collect())
    }
}

impl HandoffSource for LaunchArgSource {
    fn name(&self) -> &'static str {
        "launch_arg"
    }

    fn read(&self) -> Option<String> {
        let flag = format!("--{}", HANDOFF_KEY);
        let long = format!("--{}=", HANDOFF_KEY);
        let bare = format!("{}=", HANDOFF_KEY);

        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            if *arg == flag {
                return args.next().cloned();
            }
            if let Some(value) = arg.strip_prefix(&long).or_else(|| arg.strip_prefix(&bare)) {
                return Some(value.to_string());
            }
        }
        None
    }
}

/// Query string of the URL the app was launched with.
#[derive(Debug, Clone, Default)]
pub struct UrlQuerySource {
    url: Option<String>,
}

impl UrlQuerySource {
    pub fn new(url: Option<String>) -> Self {
        UrlQuerySource { url }
    }
}

impl HandoffSource for UrlQuerySource {
    fn name(&self) -> &'static str {
        "url_query"
    }

    fn read(&self) -> Option<String> {
        let raw = self.url.as_deref()?;
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, "Launch URL is not parseable");
                return None;
            }
        };
        url.query_pairs()
            .find(|(key, _)| key == HANDOFF_KEY)
            .map(|(_, value)| value.into_owned())
    }
}

// =============================================================================
// Receiver
// =============================================================================

/// Probes the configured sources for a usable bundle.
#[derive(Default)]
pub struct AuthHandoffReceiver {
    sources: Vec<Box<dyn HandoffSource>>,
    consumed: AtomicBool,
}

impl AuthHandoffReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver over the three standard channels in priority order.
    pub fn standard(
        extras: HashMap<String, String>,
        args: Vec<String>,
        launch_url: Option<String>,
    ) -> Self {
        Self::new()
            .with_source(IntentExtraSource::new(extras))
            .with_source(LaunchArgSource::new(args))
            .with_source(UrlQuerySource::new(launch_url))
    }

    /// Appends a source with lower priority than those already added.
    pub fn with_source(mut self, source: impl HandoffSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// First bundle carrying both token and secret, unless one was already
    /// installed.
    pub fn receive(&self) -> Option<AuthResponse> {
        if self.is_consumed() {
            debug!("Hand-off already consumed");
            return None;
        }

        for source in &self.sources {
            let Some(raw) = source.read() else {
                continue;
            };

            match serde_json::from_str::<AuthResponse>(&raw) {
                Ok(bundle) if bundle.has_credentials() => {
                    info!(source = source.name(), "Found hand-off credentials");
                    return Some(bundle);
                }
                Ok(_) => {
                    warn!(source = source.name(), "Hand-off bundle lacks Token or Secret, ignoring");
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Malformed hand-off bundle, ignoring");
                }
            }
        }

        debug!("No hand-off bundle");
        None
    }

    /// Marks the bundle as installed.
    pub fn consume(&self) {
        self.consumed.store(true, Ordering::SeqCst);
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }
}

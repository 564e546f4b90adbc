//! # Host Callbacks
//!
//! The two narrow surfaces the SDK reports through:
//!
//! - [`AuthPromptHandler`]: shows a secondary-auth prompt. The host answers
//!   later through `AuthSession::submit_secondary_answer`.
//! - [`SessionEventEmitter`]: session-level outcomes (authenticated or not,
//!   hand-off used or not) and data-loss signals. Individual retries are
//!   never reported here.

use crate::dispatcher::StreamKind;

/// Prompt to show for a secondary-auth challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPrompt {
    /// Text to display, prefixed with `(n) ` after `n` failed answers.
    pub text: String,
    pub mechanism_type: String,
    pub domain: String,
    pub input_source: String,
    pub failed_attempts: u32,
}

/// Outcome of an authentication flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCompletion {
    pub success: bool,
    /// Credentials came from a hand-off bundle.
    pub handoff: bool,
    pub error: Option<String>,
}

impl AuthCompletion {
    pub fn succeeded(handoff: bool) -> Self {
        AuthCompletion {
            success: true,
            handoff,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        AuthCompletion {
            success: false,
            handoff: false,
            error: Some(error.into()),
        }
    }
}

/// Displays secondary-auth prompts (implemented by the host UI).
pub trait AuthPromptHandler: Send + Sync {
    fn show_prompt(&self, prompt: &AuthPrompt);
}

/// Receives session outcomes (implemented by the host).
pub trait SessionEventEmitter: Send + Sync {
    /// An authentication flow finished.
    fn emit_auth_complete(&self, completion: &AuthCompletion);

    /// `count` queued entries were dropped from `stream` by the size bound.
    fn emit_queue_evicted(&self, stream: StreamKind, count: usize);
}

/// No-op handler and emitter for hosts that poll instead.
pub struct NoOpEmitter;

impl SessionEventEmitter for NoOpEmitter {
    fn emit_auth_complete(&self, _completion: &AuthCompletion) {}
    fn emit_queue_evicted(&self, _stream: StreamKind, _count: usize) {}
}

impl AuthPromptHandler for NoOpEmitter {
    fn show_prompt(&self, _prompt: &AuthPrompt) {}
}

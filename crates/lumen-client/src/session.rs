//! # Authentication Session
//!
//! Owns the session credentials and every transition between auth states.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        AuthSession States                               │
//! │                                                                         │
//! │  ┌─────────────────┐  authenticate()   ┌─────────────────────┐          │
//! │  │ Unauthenticated │ ────────────────► │ PrimaryAuthInFlight │          │
//! │  └─────────────────┘                   └──────────┬──────────┘          │
//! │          ▲   hand-off bundle                      │                     │
//! │          │   (zero requests) ──────┐   mechanism? │ no mechanism        │
//! │          │                         │      ┌───────┴────────┐            │
//! │          │ failure                 │      ▼                ▼            │
//! │          │              ┌──────────────────────┐   ┌───────────────┐    │
//! │          └───────────── │ SecondaryAuthPending │──►│ Authenticated │◄┐  │
//! │                         │  (n) prompt on miss  │   └───────┬───────┘ │  │
//! │                         └──────────────────────┘           │ poller  │  │
//! │                                                            ▼         │  │
//! │  ┌──────────────────┐   re_authenticate()          ┌──────────┐      │  │
//! │  │ Reauthenticating │ ◄──── from any state         │ Expiring │ ─────┘  │
//! │  └────────┬─────────┘                              └──────────┘         │
//! │           └──► PrimaryAuthInFlight                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! - One async mutex serializes flows (authenticate, secondary answer,
//!   refresh). The refresh poller only `try_lock`s it.
//! - Every flow runs under an epoch. `re_authenticate` bumps the epoch and
//!   cancels the running flow before queueing on the mutex, so a flow stuck
//!   retrying leaves at its next wait, and any response it was already
//!   awaiting is dropped when it tries to commit.
//! - Session fields sit behind a `std::sync::RwLock` that is never held
//!   across an `.await`.

use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lumen_core::token::decode_expiry;
use lumen_core::validation::validate_credentials;
use lumen_core::{
    sign_request, AuthMechanism, Credentials, SessionIdentity, SessionProfile, SessionToken,
    HANDOFF_KEY,
};

use crate::codec::WireCodec;
use crate::config::{ClientConfig, DispatchSettings};
use crate::error::{ClientError, ClientResult};
use crate::events::{
    AuthCompletion, AuthPrompt, AuthPromptHandler, NoOpEmitter, SessionEventEmitter,
};
use crate::handoff::AuthHandoffReceiver;
use crate::protocol::{AuthRequest, AuthResponse, RemoteConfig, AUTH_TOKEN_PATH, STORAGE_CONFIG_PATH};
use crate::retry::{retry_with_interval, RetryPolicy};
use crate::transport::{ApiClient, ApiRequest, HttpMethod, HttpTransport, Transport};

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    PrimaryAuthInFlight,
    SecondaryAuthPending,
    Authenticated,
    /// A background refresh is running; the old token still serves.
    Expiring,
    Reauthenticating,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::Unauthenticated => write!(f, "unauthenticated"),
            AuthState::PrimaryAuthInFlight => write!(f, "primary_auth_in_flight"),
            AuthState::SecondaryAuthPending => write!(f, "secondary_auth_pending"),
            AuthState::Authenticated => write!(f, "authenticated"),
            AuthState::Expiring => write!(f, "expiring"),
            AuthState::Reauthenticating => write!(f, "reauthenticating"),
        }
    }
}

/// Result of one refresh check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    NotDue,
    /// Another auth flow holds the session.
    Busy,
    NotAuthenticated,
    /// Hand-off session without usable configured credentials.
    HandoffOnly,
}

struct SessionInner {
    state: AuthState,
    epoch: u64,
    cancel: CancellationToken,
    token: Option<SessionToken>,
    mechanism: Option<AuthMechanism>,
    secondary_passed: bool,
    failed_attempts: u32,
    handoff: bool,
    profile: SessionProfile,
    remote: RemoteConfig,
}

impl SessionInner {
    fn new() -> Self {
        SessionInner {
            state: AuthState::Unauthenticated,
            epoch: 0,
            cancel: CancellationToken::new(),
            token: None,
            mechanism: None,
            secondary_passed: false,
            failed_attempts: 0,
            handoff: false,
            profile: SessionProfile::default(),
            remote: RemoteConfig::default(),
        }
    }

    /// Remote overrides survive; they describe the backend, not the session.
    fn clear_credentials(&mut self) {
        self.token = None;
        self.mechanism = None;
        self.secondary_passed = false;
        self.failed_attempts = 0;
        self.handoff = false;
        self.profile = SessionProfile::default();
    }
}

fn prompt_for(mechanism: &AuthMechanism, failed_attempts: u32) -> AuthPrompt {
    let text = if failed_attempts == 0 {
        mechanism.prompt.clone()
    } else {
        format!("({}) {}", failed_attempts, mechanism.prompt)
    };

    AuthPrompt {
        text,
        mechanism_type: mechanism.mechanism_type.clone(),
        domain: mechanism.domain.clone(),
        input_source: mechanism.input_source.clone(),
        failed_attempts,
    }
}

// =============================================================================
// Auth Session
// =============================================================================

/// The single authenticated session of a process.
pub struct AuthSession {
    config: Arc<ClientConfig>,
    api: ApiClient,
    identity: SessionIdentity,
    inner: RwLock<SessionInner>,
    flow: tokio::sync::Mutex<()>,
    handoff: Option<AuthHandoffReceiver>,
    prompt: Arc<dyn AuthPromptHandler>,
    emitter: Arc<dyn SessionEventEmitter>,
}

impl AuthSession {
    pub fn builder(config: ClientConfig) -> AuthSessionBuilder {
        AuthSessionBuilder::new(config)
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticket(&self) -> (u64, CancellationToken) {
        let inner = self.read();
        (inner.epoch, inner.cancel.clone())
    }

    /// Applies `f` only if `epoch` is still current.
    fn commit<R>(&self, epoch: u64, f: impl FnOnce(&mut SessionInner) -> R) -> ClientResult<R> {
        let mut inner = self.write();
        if inner.epoch != epoch {
            warn!(epoch, current = inner.epoch, "Discarding result of superseded auth flow");
            return Err(ClientError::Superseded { epoch });
        }
        Ok(f(&mut inner))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// True when a token and secret are held, `now < expiry`, and any
    /// required secondary auth has passed.
    pub fn is_authenticated(&self) -> bool {
        let inner = self.read();
        let state_ok = matches!(inner.state, AuthState::Authenticated | AuthState::Expiring);
        let token_ok = inner
            .token
            .as_ref()
            .is_some_and(|t| t.is_valid_at(Utc::now()));
        let secondary_ok = inner.mechanism.is_none() || inner.secondary_passed;
        state_ok && token_ok && secondary_ok
    }

    pub fn state(&self) -> AuthState {
        self.read().state
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    pub fn failed_attempts(&self) -> u32 {
        self.read().failed_attempts
    }

    pub fn is_handoff(&self) -> bool {
        self.read().handoff
    }

    pub fn token_expiry(&self) -> Option<DateTime<Utc>> {
        self.read().token.as_ref().map(|t| t.expiry)
    }

    pub fn profile(&self) -> SessionProfile {
        self.read().profile.clone()
    }

    pub fn remote_config(&self) -> RemoteConfig {
        self.read().remote.clone()
    }

    /// Pending secondary-auth prompt, if the session is waiting on one.
    pub fn pending_prompt(&self) -> Option<AuthPrompt> {
        let inner = self.read();
        match (inner.state, &inner.mechanism) {
            (AuthState::SecondaryAuthPending, Some(m)) => Some(prompt_for(m, inner.failed_attempts)),
            _ => None,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn api(&self) -> &ApiClient {
        &self.api
    }

    pub(crate) fn emitter(&self) -> &Arc<dyn SessionEventEmitter> {
        &self.emitter
    }

    /// Batching tunables with the server's overrides applied.
    pub fn dispatch_settings(&self) -> DispatchSettings {
        self.config.dispatch.with_overrides(&self.read().remote)
    }

    fn auth_policy(&self) -> RetryPolicy {
        let settings = self.config.auth.with_overrides(&self.read().remote);
        RetryPolicy::new(settings.max_retries, settings.retry_interval())
    }

    // =========================================================================
    // Signing
    // =========================================================================

    /// Authorization, timestamp and hash headers for a request body.
    pub fn signed_headers(&self, body: Option<&[u8]>) -> ClientResult<Vec<(String, String)>> {
        let (token, secret) = {
            let inner = self.read();
            match &inner.token {
                Some(t) => (t.token.clone(), t.secret.clone()),
                None => return Err(ClientError::NotAuthenticated),
            }
        };

        sign_request(&token, &secret, Utc::now().timestamp(), body)
            .map(|headers| headers.to_pairs())
            .map_err(|e| {
                error!(error = %e, "Request signing attempted without session credentials");
                ClientError::from(e)
            })
    }

    /// Request carrying `body` and its signature.
    pub fn signed_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> ClientResult<ApiRequest> {
        let headers = self.signed_headers(body.as_deref())?;
        let request = ApiRequest::new(method, path).with_headers(headers);
        Ok(match body {
            Some(body) => request.with_body(body),
            None => request,
        })
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Runs a full authentication flow.
    ///
    /// Uses a hand-off bundle when one is available. Otherwise validates the
    /// configured credentials (no request is sent if they are malformed),
    /// then authenticates with the backend and loads the server overrides.
    /// Ends in `Authenticated` or, when the server asks for step-up, in
    /// `SecondaryAuthPending` with the prompt shown to the host.
    pub async fn authenticate(&self) -> ClientResult<()> {
        let _flow = self.flow.lock().await;
        let (epoch, cancel) = self.ticket();

        let result = self.run_authentication(epoch, &cancel).await;
        if let Err(e) = &result {
            self.finish_failed(epoch, e);
        }
        result
    }

    async fn run_authentication(&self, epoch: u64, cancel: &CancellationToken) -> ClientResult<()> {
        if self.try_install_handoff(epoch)? {
            return Ok(());
        }

        let credentials = self.validated_credentials()?;
        self.commit(epoch, |inner| inner.state = AuthState::PrimaryAuthInFlight)?;
        info!(
            epoch,
            mode = %credentials.mode(),
            build_type = %self.config.build_type(),
            "Starting primary authentication"
        );

        let (token, profile) = retry_with_interval("primary_auth", epoch, self.auth_policy(), cancel, || {
            self.request_session(&credentials, None)
        })
        .await?;
        let expiry = token.expiry;
        self.commit(epoch, |inner| {
            inner.token = Some(token);
            inner.profile = profile;
        })?;
        debug!(epoch, expiry = %expiry, "Primary authentication accepted");

        let remote = retry_with_interval("remote_config", epoch, self.auth_policy(), cancel, || {
            self.fetch_remote_config()
        })
        .await?;
        let mechanism = remote.auth_mechanism.clone();
        self.commit(epoch, |inner| {
            inner.remote = remote;
            inner.mechanism = mechanism.clone();
            inner.secondary_passed = false;
            inner.failed_attempts = 0;
            inner.state = if mechanism.is_some() {
                AuthState::SecondaryAuthPending
            } else {
                AuthState::Authenticated
            };
        })?;

        match mechanism {
            Some(mechanism) => {
                info!(epoch, mechanism = %mechanism.mechanism_type, "Secondary authentication required");
                self.prompt.show_prompt(&prompt_for(&mechanism, 0));
            }
            None => {
                info!(epoch, "Authenticated");
                self.emitter.emit_auth_complete(&AuthCompletion::succeeded(false));
            }
        }
        Ok(())
    }

    /// Re-issues primary auth with the challenge answered. One attempt.
    ///
    /// Returns `Ok(false)` when the answer was not accepted; the prompt has
    /// then been shown again with the failure count.
    pub async fn submit_secondary_answer(&self, answer: &str) -> ClientResult<bool> {
        let _flow = self.flow.lock().await;

        let (epoch, mechanism) = {
            let inner = self.read();
            match (inner.state, &inner.mechanism) {
                (AuthState::SecondaryAuthPending, Some(m)) => (inner.epoch, m.clone()),
                (state, _) => {
                    return Err(ClientError::InvalidState {
                        expected: AuthState::SecondaryAuthPending.to_string(),
                        actual: state.to_string(),
                    })
                }
            }
        };

        let credentials = self.validated_credentials()?;
        let answered = mechanism.with_answer(answer);

        match self.request_session(&credentials, Some(&answered)).await {
            Ok((token, profile)) => {
                self.commit(epoch, |inner| {
                    inner.token = Some(token);
                    inner.profile = profile;
                    inner.secondary_passed = true;
                    inner.failed_attempts = 0;
                    inner.state = AuthState::Authenticated;
                })?;
                info!(epoch, "Secondary authentication passed");
                self.emitter.emit_auth_complete(&AuthCompletion::succeeded(false));
                Ok(true)
            }
            Err(e) => {
                let failed = self.commit(epoch, |inner| {
                    inner.failed_attempts += 1;
                    inner.failed_attempts
                })?;
                warn!(epoch, failed_attempts = failed, error = %e, "Secondary authentication answer rejected");
                self.prompt.show_prompt(&prompt_for(&mechanism, failed));
                Ok(false)
            }
        }
    }

    /// Drops the current session and authenticates from scratch.
    ///
    /// Identity and server overrides are kept. A flow still running under
    /// the old epoch has its outcome discarded.
    pub async fn re_authenticate(&self) -> ClientResult<()> {
        let epoch = {
            let mut inner = self.write();
            inner.epoch += 1;
            inner.cancel.cancel();
            inner.cancel = CancellationToken::new();
            inner.clear_credentials();
            inner.state = AuthState::Reauthenticating;
            inner.epoch
        };
        info!(epoch, "Re-authenticating");

        self.authenticate().await
    }

    /// Renews the token when less than the configured threshold is left.
    ///
    /// Never waits for another flow. On failure the current token is kept
    /// and left to expire.
    pub async fn refresh_if_due(&self) -> ClientResult<RefreshOutcome> {
        self.refresh_until(&CancellationToken::new()).await
    }

    /// [`refresh_if_due`](Self::refresh_if_due) that gives up with
    /// `ShuttingDown` once `stop` fires. The current token is kept.
    pub async fn refresh_until(&self, stop: &CancellationToken) -> ClientResult<RefreshOutcome> {
        if stop.is_cancelled() {
            return Err(ClientError::ShuttingDown);
        }
        let Ok(_flow) = self.flow.try_lock() else {
            debug!("Auth flow in progress, skipping refresh");
            return Ok(RefreshOutcome::Busy);
        };

        let (epoch, cancel, handoff) = {
            let inner = self.read();
            let Some(token) = inner.token.as_ref() else {
                return Ok(RefreshOutcome::NotAuthenticated);
            };
            if inner.state != AuthState::Authenticated {
                return Ok(RefreshOutcome::NotAuthenticated);
            }
            if !token.needs_refresh_at(Utc::now(), self.config.auth.refresh_threshold()) {
                return Ok(RefreshOutcome::NotDue);
            }
            (inner.epoch, inner.cancel.clone(), inner.handoff)
        };

        let credentials = match self.validated_credentials() {
            Ok(credentials) => credentials,
            Err(_) if handoff => {
                debug!("Hand-off session has no usable credentials, not refreshing");
                return Ok(RefreshOutcome::HandoffOnly);
            }
            Err(e) => return Err(e),
        };

        self.commit(epoch, |inner| inner.state = AuthState::Expiring)?;
        info!(epoch, "Refreshing session token");

        let policy = RetryPolicy::new(
            self.config.auth.refresh_max_retries,
            self.auth_policy().interval,
        );
        let result = tokio::select! {
            result = retry_with_interval("token_refresh", epoch, policy, &cancel, || {
                self.request_session(&credentials, None)
            }) => result,
            _ = stop.cancelled() => Err(ClientError::ShuttingDown),
        };

        match result {
            Ok((token, profile)) => {
                let expiry = token.expiry;
                self.commit(epoch, |inner| {
                    inner.token = Some(token);
                    inner.profile = profile;
                    inner.handoff = false;
                    inner.state = AuthState::Authenticated;
                })?;
                info!(epoch, expiry = %expiry, "Session token refreshed");
                Ok(RefreshOutcome::Refreshed)
            }
            Err(e) => {
                let _ = self.commit(epoch, |inner| {
                    if inner.state == AuthState::Expiring {
                        inner.state = AuthState::Authenticated;
                    }
                });
                warn!(epoch, error = %e, "Token refresh failed, current token left to expire");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Flow Steps
    // =========================================================================

    fn validated_credentials(&self) -> ClientResult<Credentials> {
        let credentials = self.config.credentials.credentials()?;
        validate_credentials(&credentials, self.config.build_type())?;
        Ok(credentials)
    }

    fn try_install_handoff(&self, epoch: u64) -> ClientResult<bool> {
        let Some(receiver) = &self.handoff else {
            return Ok(false);
        };
        let Some(bundle) = receiver.receive() else {
            return Ok(false);
        };

        let (token, secret) = bundle.credentials(HANDOFF_KEY)?;
        let expiry = Utc::now() + self.config.auth.handoff_validity();
        let profile = bundle.profile();

        self.commit(epoch, |inner| {
            inner.token = Some(SessionToken {
                token,
                secret,
                expiry,
            });
            inner.profile = profile;
            inner.mechanism = None;
            inner.secondary_passed = false;
            inner.failed_attempts = 0;
            inner.handoff = true;
            inner.state = AuthState::Authenticated;
        })?;
        receiver.consume();

        info!(epoch, expiry = %expiry, "Authenticated from hand-off");
        self.emitter.emit_auth_complete(&AuthCompletion::succeeded(true));
        Ok(true)
    }

    /// One `POST /v1/auth/token` round trip.
    async fn request_session(
        &self,
        credentials: &Credentials,
        mechanism: Option<&AuthMechanism>,
    ) -> ClientResult<(SessionToken, SessionProfile)> {
        let request = AuthRequest::build(
            credentials,
            self.config.build_type(),
            &self.identity,
            &self.config.device,
            mechanism,
        );
        let body = self.api.encode(&request)?;
        let bytes = self
            .api
            .send(ApiRequest::new(HttpMethod::Post, AUTH_TOKEN_PATH).with_body(body))
            .await?;

        let response: AuthResponse = self.api.decode(&bytes)?;
        let (token, secret) = response.credentials(AUTH_TOKEN_PATH)?;
        let expiry = decode_expiry(&token)?;

        Ok((
            SessionToken {
                token,
                secret,
                expiry,
            },
            response.profile(),
        ))
    }

    async fn fetch_remote_config(&self) -> ClientResult<RemoteConfig> {
        let request = self.signed_request(HttpMethod::Get, STORAGE_CONFIG_PATH, None)?;
        match self.api.send(request).await {
            Ok(bytes) => Ok(self.api.decode::<Option<RemoteConfig>>(&bytes)?.unwrap_or_default()),
            Err(ClientError::Http { status: 404, .. }) => {
                debug!("Backend publishes no overrides");
                Ok(RemoteConfig::default())
            }
            Err(e) => Err(e),
        }
    }

    fn finish_failed(&self, epoch: u64, err: &ClientError) {
        if matches!(err, ClientError::Superseded { .. }) {
            debug!(epoch, "Auth flow superseded");
            return;
        }

        let current = {
            let mut inner = self.write();
            if inner.epoch == epoch {
                inner.clear_credentials();
                inner.state = AuthState::Unauthenticated;
                true
            } else {
                false
            }
        };
        if !current {
            return;
        }

        if err.is_config_error() {
            error!(epoch, error = %err, "Credentials rejected, no request sent");
        } else {
            error!(epoch, error = %err, "Authentication failed");
        }
        self.emitter.emit_auth_complete(&AuthCompletion::failed(err.to_string()));
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`AuthSession`].
pub struct AuthSessionBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    codec: Option<Arc<dyn WireCodec>>,
    handoff: Option<AuthHandoffReceiver>,
    prompt: Option<Arc<dyn AuthPromptHandler>>,
    emitter: Option<Arc<dyn SessionEventEmitter>>,
    identity: Option<SessionIdentity>,
}

impl AuthSessionBuilder {
    pub fn new(config: ClientConfig) -> Self {
        AuthSessionBuilder {
            config,
            transport: None,
            codec: None,
            handoff: None,
            prompt: None,
            emitter: None,
            identity: None,
        }
    }

    /// Overrides the reqwest transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn WireCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_handoff(mut self, receiver: AuthHandoffReceiver) -> Self {
        self.handoff = Some(receiver);
        self
    }

    pub fn with_prompt_handler(mut self, prompt: Arc<dyn AuthPromptHandler>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SessionEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Uses an identity supplied by the host instead of generating one.
    pub fn with_identity(mut self, identity: SessionIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn build(self) -> ClientResult<AuthSession> {
        self.config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                &self.config.api.base_url,
                self.config.request_timeout(),
            )?),
        };
        let api = match self.codec {
            Some(codec) => ApiClient::with_codec(transport, codec),
            None => ApiClient::new(transport),
        };

        let identity = self.identity.unwrap_or_else(|| {
            SessionIdentity::generate(self.config.device.id.clone(), self.config.device.tags.clone())
        });
        debug!(session_id = %identity.session_id, device_id = %identity.device_id, "Session identity");

        Ok(AuthSession {
            config: Arc::new(self.config),
            api,
            identity,
            inner: RwLock::new(SessionInner::new()),
            flow: tokio::sync::Mutex::new(()),
            handoff: self.handoff,
            prompt: self.prompt.unwrap_or_else(|| Arc::new(NoOpEmitter)),
            emitter: self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::LaunchArgSource;
    use crate::testing::{auth_ok, legacy_config, mint_token, MockTransport, RecordingHost};
    use chrono::Duration as ChronoDuration;
    use lumen_core::signing::{AUTHORIZATION_HEADER, HASH_HEADER};
    use lumen_core::BuildType;
    use serde_json::json;
    use std::time::Duration;

    fn session(mock: &Arc<MockTransport>, host: &Arc<RecordingHost>, config: ClientConfig) -> AuthSession {
        AuthSession::builder(config)
            .with_transport(mock.clone())
            .with_prompt_handler(host.clone())
            .with_emitter(host.clone())
            .build()
            .unwrap()
    }

    fn pin_mechanism() -> serde_json::Value {
        json!({ "authMechanism": { "type": "pin", "prompt": "Enter PIN", "domain": "school" } })
    }

    #[tokio::test]
    async fn test_primary_auth_success() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(1)));
        mock.respond(STORAGE_CONFIG_PATH, 200, json!({ "batchSize": 7 }));
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());

        session.authenticate().await.unwrap();

        assert!(session.is_authenticated());
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.profile().user_id.as_deref(), Some("user-1"));
        assert_eq!(session.dispatch_settings().batch_size, 7);
        assert_eq!(host.completions(), vec![AuthCompletion::succeeded(false)]);

        let requests = mock.requests();
        assert!(requests[0].header(AUTHORIZATION_HEADER).is_none());
        let config_request = &requests[1];
        assert_eq!(config_request.path, STORAGE_CONFIG_PATH);
        assert!(config_request
            .header(AUTHORIZATION_HEADER)
            .is_some_and(|v| v.starts_with("Bearer ")));
        assert!(config_request.header(HASH_HEADER).is_some());
    }

    #[tokio::test]
    async fn test_malformed_org_id_sends_nothing() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let mut config = legacy_config();
        config.credentials.build_type = BuildType::Development;
        config.credentials.org_id = Some("not-a-uuid".into());
        let session = session(&mock, &host, config);

        let err = session.authenticate().await.unwrap_err();

        assert!(err.is_config_error());
        assert!(mock.requests().is_empty());
        assert!(!session.is_authenticated());
        let completions = host.completions();
        assert_eq!(completions.len(), 1);
        assert!(!completions[0].success);
    }

    #[tokio::test]
    async fn test_missing_expiry_is_not_retried() {
        let mock = Arc::new(MockTransport::new());
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &json!({ "sub": "device" }),
            &jsonwebtoken::EncodingKey::from_secret(b"k"),
        )
        .unwrap();
        mock.respond(AUTH_TOKEN_PATH, 200, json!({ "Token": token, "Secret": "s" }));
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());

        let err = session.authenticate().await.unwrap_err();

        assert!(matches!(err, ClientError::Token(lumen_core::TokenError::MissingExpiry)));
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 1);
        assert_eq!(session.state(), AuthState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_retry_at_fixed_interval() {
        let mock = Arc::new(MockTransport::new());
        mock.unreachable(AUTH_TOKEN_PATH);
        mock.respond(AUTH_TOKEN_PATH, 503, json!({}));
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(1)));
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());

        let started = tokio::time::Instant::now();
        session.authenticate().await.unwrap();

        assert_eq!(mock.count(AUTH_TOKEN_PATH), 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(session.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_primary_retries() {
        let mock = Arc::new(MockTransport::new());
        mock.unreachable(AUTH_TOKEN_PATH);
        let host = Arc::new(RecordingHost::default());
        let mut config = legacy_config();
        config.auth.max_retries = 2;
        let session = session(&mock, &host, config);

        let err = session.authenticate().await.unwrap_err();

        assert!(matches!(err, ClientError::MaxRetriesExceeded { attempts: 2, .. }));
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 2);
        assert!(!host.completions()[0].success);
    }

    #[tokio::test]
    async fn test_expired_token_is_not_authenticated() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::seconds(-30)));
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());

        session.authenticate().await.unwrap();

        assert_eq!(session.state(), AuthState::Authenticated);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_handoff_skips_network() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let bundle = json!({ "Token": "handed.off.token", "Secret": "s", "PackageName": "org.lumen.kiosk" });
        let receiver = AuthHandoffReceiver::new()
            .with_source(LaunchArgSource::new(vec![format!("--auth_handoff={}", bundle)]));
        let session = AuthSession::builder(legacy_config())
            .with_transport(mock.clone())
            .with_emitter(host.clone())
            .with_handoff(receiver)
            .build()
            .unwrap();

        session.authenticate().await.unwrap();

        assert!(session.is_authenticated());
        assert!(session.is_handoff());
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 0);
        assert!(mock.requests().is_empty());
        assert_eq!(host.completions(), vec![AuthCompletion::succeeded(true)]);
        assert_eq!(session.profile().package_name.as_deref(), Some("org.lumen.kiosk"));

        let remaining = session.token_expiry().unwrap() - Utc::now();
        assert!(remaining > ChronoDuration::hours(7));

        // The bundle is used once; re-authentication goes to the network.
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(1)));
        session.re_authenticate().await.unwrap();
        assert!(!session.is_handoff());
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 1);
    }

    #[tokio::test]
    async fn test_secondary_two_wrong_then_right() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(1)));
        mock.respond(AUTH_TOKEN_PATH, 401, json!({ "error": "bad pin" }));
        mock.respond(AUTH_TOKEN_PATH, 401, json!({ "error": "bad pin" }));
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(1)));
        mock.respond(STORAGE_CONFIG_PATH, 200, pin_mechanism());
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());

        session.authenticate().await.unwrap();
        assert_eq!(session.state(), AuthState::SecondaryAuthPending);
        assert!(!session.is_authenticated());
        assert!(host.completions().is_empty());
        assert_eq!(host.prompts()[0].text, "Enter PIN");

        assert!(!session.submit_secondary_answer("0000").await.unwrap());
        assert_eq!(session.failed_attempts(), 1);
        assert!(!session.submit_secondary_answer("1111").await.unwrap());
        assert_eq!(session.failed_attempts(), 2);

        let prompts = host.prompts();
        assert_eq!(prompts[1].text, "(1) Enter PIN");
        assert!(prompts[2].text.contains("(2)"));
        assert_eq!(prompts[2].domain, "school");

        assert!(session.submit_secondary_answer("4321").await.unwrap());
        assert!(session.is_authenticated());
        assert_eq!(session.failed_attempts(), 0);
        assert_eq!(host.completions(), vec![AuthCompletion::succeeded(false)]);

        // The answer replaces the mechanism prompt on the wire.
        let last = mock.requests().into_iter().rev().find(|r| r.path == AUTH_TOKEN_PATH).unwrap();
        let body: serde_json::Value = serde_json::from_slice(last.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["authMechanism"]["prompt"], "4321");
        assert_eq!(body["authMechanism"]["type"], "pin");
    }

    #[tokio::test]
    async fn test_answer_outside_pending_state() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());

        let err = session.submit_secondary_answer("1234").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState { .. }));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reauthenticate_breaks_endless_retry() {
        let mock = Arc::new(MockTransport::new());
        mock.unreachable(AUTH_TOKEN_PATH);
        let host = Arc::new(RecordingHost::default());
        let session = Arc::new(session(&mock, &host, legacy_config()));

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.authenticate().await }
        });
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(mock.count(AUTH_TOKEN_PATH) >= 2);

        mock.clear(AUTH_TOKEN_PATH);
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(1)));
        session.re_authenticate().await.unwrap();

        assert!(matches!(first.await.unwrap(), Err(ClientError::Superseded { epoch: 0 })));
        assert!(session.is_authenticated());
        assert_eq!(session.epoch(), 1);
        assert_eq!(host.completions(), vec![AuthCompletion::succeeded(false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_discarded() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(1)));
        mock.set_latency(AUTH_TOKEN_PATH, Duration::from_secs(10));
        let host = Arc::new(RecordingHost::default());
        let session = Arc::new(session(&mock, &host, legacy_config()));

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.authenticate().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        session.re_authenticate().await.unwrap();

        assert!(matches!(first.await.unwrap(), Err(ClientError::Superseded { .. })));
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 2);
        assert!(session.is_authenticated());
        assert_eq!(host.completions().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::seconds(120)));
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(2)));
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());
        session.authenticate().await.unwrap();
        let before = session.token_expiry().unwrap();
        let session_id = session.identity().session_id.clone();

        assert_eq!(session.refresh_if_due().await.unwrap(), RefreshOutcome::Refreshed);

        assert!(session.token_expiry().unwrap() > before);
        assert!(session.is_authenticated());
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 2);
        assert_eq!(session.identity().session_id, session_id);
        let last = mock.requests().into_iter().rev().find(|r| r.path == AUTH_TOKEN_PATH).unwrap();
        let body: serde_json::Value = serde_json::from_slice(last.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["sessionId"], session_id.as_str());
        assert!(body.get("authMechanism").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_in_flight_keeps_session_authenticated() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::seconds(120)));
        mock.unreachable(AUTH_TOKEN_PATH);
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(2)));
        let host = Arc::new(RecordingHost::default());
        let session = Arc::new(session(&mock, &host, legacy_config()));
        session.authenticate().await.unwrap();
        let before = session.token_expiry().unwrap();
        mock.set_latency(AUTH_TOKEN_PATH, Duration::from_secs(10));

        let refresh = tokio::spawn({
            let session = session.clone();
            async move { session.refresh_if_due().await }
        });

        // First attempt still waiting on the backend.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.state(), AuthState::Expiring);
        assert!(session.is_authenticated());
        assert_eq!(session.token_expiry(), Some(before));

        // Between the failed attempt and the retry.
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(session.state(), AuthState::Expiring);
        assert!(session.is_authenticated());

        assert_eq!(refresh.await.unwrap().unwrap(), RefreshOutcome::Refreshed);
        assert_eq!(session.state(), AuthState::Authenticated);
        assert!(session.token_expiry().unwrap() > before + ChronoDuration::minutes(30));
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 3);
    }

    #[tokio::test]
    async fn test_refresh_not_due() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(1)));
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());
        session.authenticate().await.unwrap();

        assert_eq!(session.refresh_if_due().await.unwrap(), RefreshOutcome::NotDue);
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_keeps_token() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::seconds(120)));
        mock.unreachable(AUTH_TOKEN_PATH);
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());
        session.authenticate().await.unwrap();
        let before = session.token_expiry();

        let err = session.refresh_if_due().await.unwrap_err();

        assert!(matches!(err, ClientError::MaxRetriesExceeded { attempts: 3, .. }));
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 4);
        assert_eq!(session.token_expiry(), before);
        assert_eq!(session.state(), AuthState::Authenticated);
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_handoff_session_without_credentials_not_refreshed() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let bundle = json!({ "Token": mint_token(ChronoDuration::hours(1)), "Secret": "s" });
        let receiver = AuthHandoffReceiver::new()
            .with_source(LaunchArgSource::new(vec![format!("auth_handoff={}", bundle)]));
        let mut config = legacy_config();
        config.credentials.app_id = None;
        config.auth.handoff_validity_hours = 0;
        let session = AuthSession::builder(config)
            .with_transport(mock.clone())
            .with_emitter(host.clone())
            .with_handoff(receiver)
            .build()
            .unwrap();

        session.authenticate().await.unwrap();

        assert_eq!(session.refresh_if_due().await.unwrap(), RefreshOutcome::HandoffOnly);
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_signing_requires_session() {
        let mock = Arc::new(MockTransport::new());
        let host = Arc::new(RecordingHost::default());
        let session = session(&mock, &host, legacy_config());
        assert!(matches!(
            session.signed_headers(Some(b"{}")),
            Err(ClientError::NotAuthenticated)
        ));
    }
}

//! # Token Refresh Poller
//!
//! Checks the session on a fixed interval and renews the token before it
//! runs out. The check itself lives in [`AuthSession::refresh_if_due`]; this
//! module only drives it.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::session::{AuthSession, RefreshOutcome};

pub struct TokenRefreshPoller {
    session: Arc<AuthSession>,
    interval: Duration,
}

impl TokenRefreshPoller {
    /// Poller using the configured check interval.
    pub fn new(session: Arc<AuthSession>) -> Self {
        let interval = session.config().auth.refresh_check_interval();
        TokenRefreshPoller { session, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One refresh check.
    pub async fn tick(&self) -> ClientResult<RefreshOutcome> {
        self.tick_until(&CancellationToken::new()).await
    }

    /// One refresh check, abandoned when `stop` fires.
    pub async fn tick_until(&self, stop: &CancellationToken) -> ClientResult<RefreshOutcome> {
        let result = self.session.refresh_until(stop).await;
        match &result {
            Ok(RefreshOutcome::Refreshed) => {
                info!(expiry = ?self.session.token_expiry(), "Background refresh succeeded");
            }
            Ok(outcome) => debug!(?outcome, "Refresh check"),
            Err(ClientError::ShuttingDown) => debug!("Refresh abandoned for shutdown"),
            Err(e) => warn!(error = %e, "Background refresh failed"),
        }
        result
    }

    /// Ticks every interval until `cancel` fires. The first tick is one
    /// interval after start.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_secs = self.interval.as_secs(), "Refresh poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.tick_until(&cancel).await;
                }
            }
        }

        debug!("Refresh poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AUTH_TOKEN_PATH;
    use crate::session::AuthState;
    use crate::testing::{auth_ok, legacy_config, MockTransport};
    use chrono::Duration as ChronoDuration;

    async fn session_expiring_in(mock: &Arc<MockTransport>, valid_for: ChronoDuration) -> Arc<AuthSession> {
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(valid_for));
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::hours(2)));
        let session = AuthSession::builder(legacy_config())
            .with_transport(mock.clone())
            .build()
            .unwrap();
        session.authenticate().await.unwrap();
        Arc::new(session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_refreshes_near_expiry() {
        let mock = Arc::new(MockTransport::new());
        let session = session_expiring_in(&mock, ChronoDuration::seconds(120)).await;
        let before = session.token_expiry().unwrap();
        let poller = Arc::new(TokenRefreshPoller::new(session.clone()));
        assert_eq!(poller.interval(), Duration::from_secs(60));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poller.clone().run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 2);
        assert!(session.token_expiry().unwrap() > before);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_failing_refresh() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(AUTH_TOKEN_PATH, 200, auth_ok(ChronoDuration::seconds(120)));
        mock.unreachable(AUTH_TOKEN_PATH);
        let mut config = legacy_config();
        config.auth.refresh_max_retries = 10_000;
        let session = AuthSession::builder(config)
            .with_transport(mock.clone())
            .build()
            .unwrap();
        session.authenticate().await.unwrap();
        let session = Arc::new(session);
        let expiry = session.token_expiry().unwrap();

        let cancel = CancellationToken::new();
        let poller = Arc::new(TokenRefreshPoller::new(session.clone()));
        let task = tokio::spawn(poller.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(session.state(), AuthState::Expiring);
        let attempts = mock.count(AUTH_TOKEN_PATH);
        assert!(attempts > 2);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("poller did not stop")
            .unwrap();

        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(session.token_expiry(), Some(expiry));
        assert!(session.is_authenticated());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.count(AUTH_TOKEN_PATH), attempts);
    }

    #[tokio::test]
    async fn test_stopped_tick_returns_shutting_down() {
        let mock = Arc::new(MockTransport::new());
        let session = session_expiring_in(&mock, ChronoDuration::seconds(120)).await;
        let poller = TokenRefreshPoller::new(session);
        let stop = CancellationToken::new();
        stop.cancel();

        assert!(matches!(poller.tick_until(&stop).await, Err(ClientError::ShuttingDown)));
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 1);
    }

    #[tokio::test]
    async fn test_tick_skips_fresh_token() {
        let mock = Arc::new(MockTransport::new());
        let session = session_expiring_in(&mock, ChronoDuration::hours(1)).await;
        let poller = TokenRefreshPoller::new(session);

        assert_eq!(poller.tick().await.unwrap(), RefreshOutcome::NotDue);
        assert_eq!(mock.count(AUTH_TOKEN_PATH), 1);
    }

    #[tokio::test]
    async fn test_tick_before_authentication() {
        let mock = Arc::new(MockTransport::new());
        let session = Arc::new(
            AuthSession::builder(legacy_config())
                .with_transport(mock.clone())
                .build()
                .unwrap(),
        );
        let poller = TokenRefreshPoller::new(session);

        assert_eq!(poller.tick().await.unwrap(), RefreshOutcome::NotAuthenticated);
        assert!(mock.requests().is_empty());
    }
}

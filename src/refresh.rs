use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::client::OidcClient;
use crate::context::AuthContext;
use crate::state::Transition;

/// How often the refresh timer fires.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Refresh once the token has fewer than this many seconds left.
pub const DEFAULT_MIN_VALIDITY: u64 = 70;

/// Timing of the background token refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub(crate) interval: Duration,
    pub(crate) min_validity: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REFRESH_INTERVAL,
            min_validity: DEFAULT_MIN_VALIDITY,
        }
    }
}

impl RefreshSettings {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_min_validity(mut self, secs: u64) -> Self {
        self.min_validity = secs;
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn min_validity(&self) -> u64 {
        self.min_validity
    }
}

/// One timer tick: refresh if near expiry and republish the new token.
///
/// Failures are logged and dropped; the next tick is the retry.
pub(crate) async fn refresh_once<C: OidcClient>(
    client: &C,
    ctx: &AuthContext,
    min_validity: u64,
) -> bool {
    match client.update_token(min_validity).await {
        Ok(true) => {
            if let Some(token) = client.token() {
                ctx.apply(Transition::TokenRefreshed(token));
            }
            tracing::debug!("Token refreshed");
            true
        }
        Ok(false) => false,
        Err(e) => {
            tracing::debug!(error = %e, "Token refresh failed; retrying on next tick");
            false
        }
    }
}

/// Start the refresh loop. It runs until the runtime shuts down.
pub(crate) fn spawn_refresh_timer<C: OidcClient>(
    client: Arc<C>,
    ctx: AuthContext,
    settings: RefreshSettings,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // `interval_at` panics on a zero period.
        let period = settings.interval.max(Duration::from_millis(1));
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            refresh_once(client.as_ref(), &ctx, settings.min_validity).await;
        }
    })
}

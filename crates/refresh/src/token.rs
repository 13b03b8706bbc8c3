//! Upstream session validity tracking.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use synergia_gateway::GatewayError;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
enum TokenState {
    Absent,
    Valid { expires_at: Instant },
}

/// Tracks whether the upstream session is believed valid.
///
/// The session itself lives inside the gateway (cookies); this only decides
/// when a fresh `authenticate` call is due. Expiry is measured from the
/// moment the login started, so a slow login never stretches the lifetime.
#[derive(Debug)]
pub struct SessionToken {
    lifetime: Duration,
    state: Mutex<TokenState>,
    refreshes: AtomicU64,
}

impl SessionToken {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            state: Mutex::new(TokenState::Absent),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Make sure a live session exists, calling `authenticate` when the
    /// token is absent, expired or `force` is set.
    ///
    /// Concurrent callers wait on the same lock, so one login serves them
    /// all. On failure the token stays absent.
    pub async fn ensure<F, Fut>(&self, force: bool, authenticate: F) -> Result<(), GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), GatewayError>>,
    {
        let mut state = self.state.lock().await;
        if !force {
            if let TokenState::Valid { expires_at } = *state {
                if Instant::now() < expires_at {
                    return Ok(());
                }
                debug!("session token expired");
            }
        }

        *state = TokenState::Absent;
        let started = Instant::now();
        authenticate().await?;
        *state = TokenState::Valid {
            expires_at: started + self.lifetime,
        };
        let n = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(refreshes = n, forced = force, "upstream session refreshed");
        Ok(())
    }

    /// Drop the session so the next `ensure` logs in again.
    pub async fn invalidate(&self) {
        *self.state.lock().await = TokenState::Absent;
        debug!("session token invalidated");
    }

    pub async fn is_valid(&self) -> bool {
        match *self.state.lock().await {
            TokenState::Valid { expires_at } => Instant::now() < expires_at,
            TokenState::Absent => false,
        }
    }

    /// Successful logins since startup.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

//! In-memory credential cache shared by every run in the process.
//!
//! Entries are keyed by [`Principal`] and carry their own time-to-live. Reads
//! take the shared lock, writes and the background sweep take the exclusive
//! lock. Expired entries are never returned by [`CredentialCache::get`], and
//! the sweep reclaims them so the map does not grow with retired principals.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use signflow_api::AccountSession;
use signflow_types::Principal;
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Margin subtracted from the provider's token lifetime.
pub const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest sweep period; shorter requests are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A resolved account session and how long it may be reused.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session: AccountSession,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl AuthContext {
    pub fn new(session: AccountSession, ttl: Duration) -> Self {
        Self {
            session,
            created_at: Instant::now(),
            ttl,
        }
    }

    /// Context for a token the provider says lives `lifetime`; the reuse
    /// window ends [`TOKEN_EXPIRY_BUFFER`] before the token does.
    pub fn from_token_lifetime(session: AccountSession, lifetime: Duration) -> Self {
        Self::new(session, lifetime.saturating_sub(TOKEN_EXPIRY_BUFFER))
    }

    pub fn is_fresh(&self) -> bool {
        self.created_at.elapsed() < self.ttl
    }

    pub fn access_token(&self) -> &str {
        &self.session.access_token
    }

    pub fn account_id(&self) -> &str {
        &self.session.account_id
    }

    pub fn base_uri(&self) -> &str {
        &self.session.base_uri
    }
}

struct Sweeper {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Principal to [`AuthContext`] map with a cancellable eviction loop.
pub struct CredentialCache {
    entries: RwLock<HashMap<Principal, AuthContext>>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL)
    }
}

impl CredentialCache {
    pub fn new(sweep_interval: Duration) -> Self {
        if sweep_interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = sweep_interval.as_millis() as u64,
                minimum_ms = MIN_SWEEP_INTERVAL.as_millis() as u64,
                "sweep interval too short; using the minimum"
            );
        }
        Self {
            entries: RwLock::new(HashMap::new()),
            sweep_interval: sweep_interval.max(MIN_SWEEP_INTERVAL),
            sweeper: Mutex::new(None),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Returns a clone of the live entry for `principal`, if any.
    pub async fn get(&self, principal: &Principal) -> Option<AuthContext> {
        let entries = self.entries.read().await;
        entries.get(principal).filter(|context| context.is_fresh()).cloned()
    }

    /// Stores `context`, replacing whatever was cached for `principal`.
    pub async fn set(&self, principal: Principal, context: AuthContext) {
        self.entries.write().await.insert(principal, context);
    }

    /// Removes every expired entry in one pass and returns how many went.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, context| context.is_fresh());
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Spawns the periodic sweep on the current runtime. Calling it again
    /// while a sweep is running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweep_loop(Arc::downgrade(self), self.sweep_interval, cancel.clone()));
        *slot = Some(Sweeper { cancel, task });
    }

    /// Cancels the sweep and waits for it to exit.
    pub async fn stop(&self) {
        let sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(Sweeper { cancel, task }) = sweeper {
            cancel.cancel();
            if let Err(error) = task.await {
                warn!(%error, "credential sweep ended abnormally; expired entries were not being evicted");
            }
        }
    }
}

async fn sweep_loop(cache: Weak<CredentialCache>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else { break };
                let evicted = cache.sweep().await;
                if evicted > 0 {
                    debug!(evicted, "swept expired credentials");
                }
            }
        }
    }
}

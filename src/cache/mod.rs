//! Single-flight, expiry-aware token cache.
//!
//! `TokenCache` sits between request handlers and a [`CredentialSource`]:
//!
//! ```text
//! get_token() ──► valid cached token? ──yes──► return (no I/O)
//!                       │ no
//!                       ▼
//!                 mint in flight? ──yes──► await the shared mint
//!                       │ no
//!                       ▼
//!                 spawn mint task ──► store on success, clear in-flight
//! ```
//!
//! The state mutex only guards the swap of the stored token and the in-flight
//! handle. The mint itself runs in its own task outside the lock, so callers
//! holding a valid token never wait behind it. A mint that has started runs to
//! completion even if every caller awaiting it goes away.

use crate::config::{CacheConfig, MAX_EXPIRY_SKEW_SECONDS};
use crate::credentials::{CredentialSource, MintError, Token};
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};


/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Tuning for [`TokenCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// Tokens expiring within this margin are treated as already expired.
    pub expiry_skew: Duration,
    /// Upper bound on a single mint.
    pub mint_timeout: std::time::Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        // Checked by `CacheConfig::validate`; clamped so the skew is never negative.
        let skew = config.expiry_skew_seconds.clamp(0, MAX_EXPIRY_SKEW_SECONDS);
        Self {
            expiry_skew: Duration::try_seconds(skew).unwrap_or_else(Duration::zero),
            mint_timeout: std::time::Duration::from_secs(config.mint_timeout_seconds.max(1)),
        }
    }
}

type MintResult = Result<Arc<Token>, MintError>;
type SharedMint = Shared<BoxFuture<'static, MintResult>>;

#[derive(Default)]
struct CacheState {
    token: Option<Arc<Token>>,
    in_flight: Option<SharedMint>,
}

struct Inner {
    source: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    state: Mutex<CacheState>,
}

/// Cache holding at most one token, refreshed through a single in-flight mint.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct TokenCache {
    inner: Arc<Inner>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn CredentialSource>, settings: CacheSettings) -> Self {
        Self::with_clock(source, Arc::new(SystemClock), settings)
    }

    pub fn with_clock(
        source: Arc<dyn CredentialSource>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                settings,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Return a token valid for at least the configured skew, minting if needed.
    ///
    /// Concurrent callers that miss are coalesced onto one mint and all observe
    /// its result, token or error. A failed mint leaves nothing behind, so the
    /// next call tries again.
    pub async fn get_token(&self) -> Result<Arc<Token>, MintError> {
        let pending = {
            let mut state = self.inner.lock_state();

            if let Some(token) = &state.token {
                if token.is_valid_at(self.inner.clock.now(), self.inner.settings.expiry_skew) {
                    return Ok(Arc::clone(token));
                }
            }

            state
                .in_flight
                .get_or_insert_with(|| self.start_mint())
                .clone()
        };

        pending.await
    }

    /// Set the Authorization header on `headers` from a cached or fresh token.
    ///
    /// Failures are logged and leave `headers` untouched.
    pub async fn update_auth_header(&self, headers: &mut HeaderMap) {
        let token = match self.get_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failure while updating auth header");
                return;
            }
        };
        debug!(token_type = %token.token_type(), "Updating auth header");
        if let Err(e) = token.set_auth_header(headers) {
            warn!(error = %e, "Failure while updating auth header");
        }
    }

    /// Spawn the mint task. Must be called with the state lock held so the
    /// returned handle is recorded before the task can complete.
    fn start_mint(&self) -> SharedMint {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = inner.mint_once().await;
            inner.complete(&result);
            result
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(MintError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        // State is two pointer swaps; a panic mid-update cannot leave it torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn mint_once(&self) -> MintResult {
        debug!("Minting new credential");
        match tokio::time::timeout(self.settings.mint_timeout, self.source.mint()).await {
            Ok(Ok(token)) if !token.is_valid_at(self.clock.now(), Duration::zero()) => {
                Err(MintError::Expiry(format!(
                    "helper returned a credential that expired at {}",
                    token.expiry().to_rfc3339()
                )))
            }
            Ok(Ok(token)) => Ok(Arc::new(token)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MintError::Timeout(self.settings.mint_timeout)),
        }
    }

    fn complete(&self, result: &MintResult) {
        let mut state = self.lock_state();
        state.in_flight = None;

        match result {
            Ok(token) => {
                info!(
                    token_type = %token.token_type(),
                    expiry = %token.expiry(),
                    "Minted new credential"
                );
                state.token = Some(Arc::clone(token));
            }
            Err(e) => {
                warn!(error = %e, "Credential mint failed");
                let now = self.clock.now();
                if state
                    .token
                    .as_ref()
                    .is_some_and(|t| !t.is_valid_at(now, self.settings.expiry_skew))
                {
                    state.token = None;
                }
            }
        }
    }
}

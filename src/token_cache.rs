//! Shared authentication-token cache.
//!
//! One cache instance is shared by every probe in the process. It maps a
//! target name to the most recent login token and its expiry, so that
//! consecutive probes against the same target reuse the session instead of
//! logging in again.
//!
//! Locking is two-level: a plain mutex guards the map of entries and is only
//! held long enough to clone out a per-target handle, while each entry has
//! its own async mutex that is held across the login call. Concurrent probes
//! for the same target therefore perform at most one login between them, and
//! probes for different targets never wait on each other.

use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Nominal lifetime of a Commvault session token. The backend does not
/// report expiry, so this is assumed.
const TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Margin subtracted from the nominal lifetime so a token is refreshed
/// before the backend can expire it mid-probe.
const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// An opaque session credential with its client-side expiry.
#[derive(Debug, Clone)]
pub struct AuthToken {
    /// Token value, sent verbatim in the `Authtoken` request header.
    pub value: String,
    /// Point after which the token is treated as stale.
    pub expires_at: Instant,
}

impl AuthToken {
    /// Create a token expiring after the nominal lifetime minus the safety margin.
    pub fn new(value: String) -> Self {
        Self {
            value,
            expires_at: Instant::now() + TOKEN_LIFETIME - TOKEN_SAFETY_MARGIN,
        }
    }

    /// A token is valid iff its expiry is strictly in the future.
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Default)]
struct TokenSlot {
    token: Option<AuthToken>,
}

/// Process-wide token store keyed by target name.
#[derive(Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<TokenSlot>>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token for `target` if still valid, otherwise run
    /// `login` and store its result.
    ///
    /// Callers racing on the same target serialize on that target's entry:
    /// exactly one performs the login while the rest wait and then observe
    /// the fresh token. On login failure the entry is cleared so the next
    /// call retries from scratch, and the error is returned to the caller.
    pub async fn get_or_refresh<F, Fut>(&self, target: &str, login: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<AuthToken>>,
    {
        let slot = self.slot(target);
        let mut guard = slot.lock().await;

        if let Some(token) = &guard.token {
            if token.is_valid() {
                debug!(target = %target, "Reusing cached auth token");
                return Ok(token.value.clone());
            }
            debug!(target = %target, "Cached auth token expired");
        }

        match login().await {
            Ok(token) => {
                let value = token.value.clone();
                guard.token = Some(token);
                debug!(target = %target, "Stored fresh auth token");
                Ok(value)
            }
            Err(e) => {
                guard.token = None;
                warn!(target = %target, "Login failed, invalidating cache entry: {}", e);
                Err(e)
            }
        }
    }

    /// Drop the cached token for `target`, if any.
    pub fn invalidate(&self, target: &str) {
        if let Some(slot) = self.entries.lock().unwrap().get(target) {
            if let Ok(mut guard) = slot.try_lock() {
                guard.token = None;
            }
        }
    }

    fn slot(&self, target: &str) -> Arc<tokio::sync::Mutex<TokenSlot>> {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(target.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CvError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn expired_token(value: &str) -> AuthToken {
        AuthToken {
            value: value.to_string(),
            expires_at: Instant::now() - Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_login_runs_once_and_result_is_cached() {
        let cache = TokenCache::new();
        let logins = AtomicUsize::new(0);

        for _ in 0..3 {
            let token = cache
                .get_or_refresh("cs1", || async {
                    logins.fetch_add(1, Ordering::SeqCst);
                    Ok(AuthToken::new("tok-1".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(token, "tok-1");
        }

        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token_triggers_refresh() {
        let cache = TokenCache::new();

        cache
            .get_or_refresh("cs1", || async { Ok(expired_token("stale")) })
            .await
            .unwrap();

        let token = cache
            .get_or_refresh("cs1", || async { Ok(AuthToken::new("fresh".to_string())) })
            .await
            .unwrap();
        assert_eq!(token, "fresh");
    }

    #[tokio::test]
    async fn test_concurrent_same_target_logins_in_single_flight() {
        let cache = Arc::new(TokenCache::new());
        let logins = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let logins = logins.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh("cs1", || async move {
                        logins.fetch_add(1, Ordering::SeqCst);
                        // Hold the in-flight login long enough for the others to queue up
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(AuthToken::new("tok".to_string()))
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "tok");
        }
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_targets_do_not_serialize() {
        let cache = Arc::new(TokenCache::new());

        // A login for cs1 that parks until released
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let slow = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_refresh("cs1", || async move {
                        let _ = release_rx.await;
                        Ok(AuthToken::new("slow".to_string()))
                    })
                    .await
                    .unwrap()
            })
        };

        // While cs1's login is parked, cs2 must complete immediately
        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_refresh("cs2", || async { Ok(AuthToken::new("fast".to_string())) }),
        )
        .await
        .expect("cs2 login blocked behind cs1's in-flight login")
        .unwrap();
        assert_eq!(fast, "fast");

        release_tx.send(()).unwrap();
        assert_eq!(slow.await.unwrap(), "slow");
    }

    #[tokio::test]
    async fn test_login_failure_invalidates_and_propagates() {
        let cache = TokenCache::new();

        let err = cache
            .get_or_refresh("cs1", || async {
                Err::<AuthToken, _>(CvError::Auth("bad credentials".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CvError::Auth(_)));

        // Next call retries the login rather than observing a stale entry
        let token = cache
            .get_or_refresh("cs1", || async { Ok(AuthToken::new("retried".to_string())) })
            .await
            .unwrap();
        assert_eq!(token, "retried");
    }

    #[tokio::test]
    async fn test_invalidate_forces_next_login() {
        let cache = TokenCache::new();
        let logins = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_refresh("cs1", || async {
                    logins.fetch_add(1, Ordering::SeqCst);
                    Ok(AuthToken::new("tok".to_string()))
                })
                .await
                .unwrap();
        }
        assert_eq!(logins.load(Ordering::SeqCst), 1);

        cache.invalidate("cs1");
        cache
            .get_or_refresh("cs1", || async {
                logins.fetch_add(1, Ordering::SeqCst);
                Ok(AuthToken::new("tok".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(logins.load(Ordering::SeqCst), 2);
    }
}

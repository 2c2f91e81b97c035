//! Short-lived bearer-token cache
//!
//! PayPal and the regional gateway authenticate with short-lived tokens.
//! The cache holds one token behind an async mutex; the lock stays held
//! across the fetch, so concurrent callers hitting a cold or expired cache
//! coalesce into a single auth call instead of each fetching their own.

use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use tokio::sync::Mutex;

/// Safety margin subtracted from the provider-reported lifetime
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// A freshly fetched token and its lifetime in seconds
#[derive(Debug, Clone)]
pub struct FetchedToken {
    pub token: String,
    pub expires_in_secs: i64,
}

#[derive(Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, or run `fetch` to obtain a new one.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchedToken, E>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        let fresh = fetch().await?;
        let expires_at =
            Utc::now() + Duration::seconds((fresh.expires_in_secs - EXPIRY_SKEW_SECS).max(0));
        *slot = Some(CachedToken {
            token: fresh.token.clone(),
            expires_at,
        });
        Ok(fresh.token)
    }

    /// Drop the cached token so the next caller re-authenticates. Used
    /// when a provider rejects a token before its reported expiry.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn second_call_hits_cache() {
        let cache = TokenCache::new();
        let fetches = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let fetches = fetches.clone();
            let token: Result<String, ()> = cache
                .get_or_fetch(|| async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(FetchedToken {
                        token: "tok_1".to_string(),
                        expires_in_secs: 3600,
                    })
                })
                .await;
            assert_eq!(token.unwrap(), "tok_1");
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_token_is_refetched() {
        let cache = TokenCache::new();

        // Lifetime below the skew caches an already-expired token
        let _: Result<String, ()> = cache
            .get_or_fetch(|| async {
                Ok(FetchedToken {
                    token: "tok_old".to_string(),
                    expires_in_secs: 10,
                })
            })
            .await;

        let token: Result<String, ()> = cache
            .get_or_fetch(|| async {
                Ok(FetchedToken {
                    token: "tok_new".to_string(),
                    expires_in_secs: 3600,
                })
            })
            .await;
        assert_eq!(token.unwrap(), "tok_new");
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = TokenCache::new();
        let fetches = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let fetches = fetches.clone();
            let _: Result<String, ()> = cache
                .get_or_fetch(|| async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(FetchedToken {
                        token: "tok".to_string(),
                        expires_in_secs: 3600,
                    })
                })
                .await;
            cache.invalidate().await;
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_cold_callers_coalesce() {
        let cache = Arc::new(TokenCache::new());
        let fetches = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let fetches = fetches.clone();
            handles.push(tokio::spawn(async move {
                let token: Result<String, ()> = cache
                    .get_or_fetch(|| async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        // Hold the slot long enough for the others to queue
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(FetchedToken {
                            token: "tok_shared".to_string(),
                            expires_in_secs: 3600,
                        })
                    })
                    .await;
                token.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "tok_shared");
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}

use std::{future::Future, sync::Arc};

use tokio::sync::{Mutex, RwLock};

/// Holds the app access token and serialises refreshes.
///
/// Callers that observed a rejected token pass it back to
/// [`TokenCell::refresh_if_stale`]; only the first of them re-authenticates,
/// the rest pick up the token it stored.
#[derive(Default)]
pub struct TokenCell {
    current: RwLock<Option<Arc<str>>>,
    refresh: Mutex<()>,
}

impl TokenCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Arc<str>> {
        self.current.read().await.clone()
    }

    pub async fn set(&self, token: impl Into<Arc<str>>) {
        *self.current.write().await = Some(token.into());
    }

    /// Unconditionally fetches and stores a new token.
    pub async fn replace_with<F, Fut, E>(&self, fetch: F) -> Result<Arc<str>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let _guard = self.refresh.lock().await;
        let token = fetch().await?;
        Ok(self.store(token).await)
    }

    /// Fetches a new token unless the held one already differs from `stale`.
    ///
    /// `stale` is `None` when the caller had no token at all.
    pub async fn refresh_if_stale<F, Fut, E>(
        &self,
        stale: Option<&str>,
        fetch: F,
    ) -> Result<Arc<str>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let _guard = self.refresh.lock().await;
        if let Some(current) = self.current().await {
            if stale.map_or(true, |stale| stale != &*current) {
                return Ok(current);
            }
        }
        let token = fetch().await?;
        Ok(self.store(token).await)
    }

    async fn store(&self, token: String) -> Arc<str> {
        let token: Arc<str> = Arc::from(token);
        *self.current.write().await = Some(token.clone());
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn refresh_replaces_matching_stale_token() {
        let cell = TokenCell::new();
        cell.set("old").await;

        let token = cell
            .refresh_if_stale(Some("old"), || async { Ok::<_, ()>("new".to_string()) })
            .await
            .expect("refresh");

        assert_eq!(&*token, "new");
        assert_eq!(cell.current().await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn refresh_skips_when_token_already_rotated() {
        let cell = TokenCell::new();
        cell.set("rotated").await;

        let token = cell
            .refresh_if_stale(Some("old"), || async {
                Err::<String, _>("fetch must not run")
            })
            .await
            .expect("no fetch");

        assert_eq!(&*token, "rotated");
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_token() {
        let cell = TokenCell::new();
        cell.set("old").await;

        let err = cell
            .refresh_if_stale(Some("old"), || async { Err::<String, _>("denied") })
            .await
            .expect_err("fetch error");

        assert_eq!(err, "denied");
        assert_eq!(cell.current().await.as_deref(), Some("old"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_fetch_once() {
        let cell = Arc::new(TokenCell::new());
        cell.set("old").await;
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cell = cell.clone();
            let fetches = fetches.clone();
            handles.push(tokio::spawn(async move {
                cell.refresh_if_stale(Some("old"), || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, ()>("new".to_string())
                })
                .await
            }));
        }

        for handle in handles {
            let token = handle.await.expect("join").expect("refresh");
            assert_eq!(&*token, "new");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}

use futures_util::future::select_all;
use std::future::pending;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellable lifetime of a single job.
///
/// Fires when its deadline passes, when any parent token fires, or when it is
/// cancelled or dropped. Downstream consumers only ever see one token.
#[derive(Debug)]
pub struct Lifetime {
    token: CancellationToken,
}

impl Lifetime {
    pub fn new(timeout: Duration) -> Self {
        Self::merged(timeout, [])
    }

    /// Merges `parents` with an internal deadline. Must be called inside a tokio runtime.
    pub fn merged(timeout: Duration, parents: impl IntoIterator<Item = CancellationToken>) -> Self {
        let token = CancellationToken::new();
        let deadline = Instant::now() + timeout;
        let parents: Vec<CancellationToken> = parents.into_iter().collect();

        let watched = token.clone();
        tokio::spawn(async move {
            let any_parent = async {
                if parents.is_empty() {
                    pending::<()>().await;
                } else {
                    select_all(parents.iter().map(|p| Box::pin(p.cancelled()))).await;
                }
            };

            tokio::select! {
                _ = watched.cancelled() => return,
                _ = sleep_until(deadline) => debug!("job lifetime reached its deadline"),
                _ = any_parent => debug!("job lifetime cancelled by its caller"),
            }

            watched.cancel();
        });

        Self { token }
    }

    /// A handle that observes this lifetime. Cancelling it cancels the lifetime.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

//! Cancellable, deadline-bounded scope shared by one resolution's workers

use tokio::sync::watch;
use tokio::time::Instant;

/// Owner side of the scope.
///
/// Dropping the scope cancels it, so workers never outlive the resolution
/// call that spawned them, even when the caller drops the resolve future.
#[derive(Debug)]
pub(crate) struct ResolveScope {
    cancel_tx: watch::Sender<bool>,
    deadline: Instant,
}

impl ResolveScope {
    pub(crate) fn new(deadline: Instant) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            cancel_tx,
            deadline,
        }
    }

    pub(crate) fn token(&self) -> ScopeToken {
        ScopeToken {
            cancel_rx: self.cancel_tx.subscribe(),
            deadline: self.deadline,
        }
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

impl Drop for ResolveScope {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Worker side of the scope
#[derive(Debug, Clone)]
pub(crate) struct ScopeToken {
    cancel_rx: watch::Receiver<bool>,
    deadline: Instant,
}

impl ScopeToken {
    /// Completes once the scope is cancelled, dropped, or past its deadline
    pub(crate) async fn cancelled(&mut self) {
        tokio::select! {
            // Err means the scope was dropped, which also cancels.
            _ = self.cancel_rx.wait_for(|cancelled| *cancelled) => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow() || Instant::now() >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_tokens() {
        let scope = ResolveScope::new(Instant::now() + Duration::from_secs(60));
        let mut token = scope.token();

        assert!(!token.is_cancelled());
        scope.cancel();

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("token observes cancellation");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_scope_cancels() {
        let scope = ResolveScope::new(Instant::now() + Duration::from_secs(60));
        let mut token = scope.token();
        drop(scope);

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("token observes dropped scope");
    }

    #[tokio::test]
    async fn deadline_cancels() {
        let scope = ResolveScope::new(Instant::now() + Duration::from_millis(20));
        let mut token = scope.token();

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("token observes deadline");
        assert!(token.is_cancelled());
        assert!(Instant::now() >= scope.deadline());
    }
}

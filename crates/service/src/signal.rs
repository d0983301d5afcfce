use std::future::Future;

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

/// Maps one interrupt source onto cancellation of a lifecycle token.
///
/// The token is a child of the parent passed in, so cancelling the parent
/// also cancels it. Dropping the signal stops listening; the token itself
/// stays valid (and stays cancelled if it already fired).
pub struct ShutdownSignal {
    token: CancellationToken,
    listener: JoinHandle<()>,
}

impl ShutdownSignal {
    /// Cancel on Ctrl-C / SIGINT.
    pub fn on_interrupt(parent: &CancellationToken) -> Self {
        Self::with_trigger(parent, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "unable to listen for interrupt, relying on parent token");
                std::future::pending::<()>().await;
            }
        })
    }

    /// Cancel when `trigger` completes.
    pub fn with_trigger<F>(parent: &CancellationToken, trigger: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let fire = token.clone();
        let listener = tokio::spawn(async move {
            tokio::select! {
                () = trigger => {
                    info!("interrupt received, shutting down");
                    fire.cancel();
                },
                () = fire.cancelled() => {},
            }
        });
        Self { token, listener }
    }

    /// The lifecycle token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::time::Duration,
        tokio::{sync::oneshot, time::timeout},
    };

    #[tokio::test]
    async fn trigger_cancels_token_once() {
        let parent = CancellationToken::new();
        let (tx, rx) = oneshot::channel::<()>();
        let signal = ShutdownSignal::with_trigger(&parent, async {
            let _ = rx.await;
        });
        assert!(!signal.is_cancelled());

        tx.send(()).unwrap();
        timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
        assert!(signal.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let signal = ShutdownSignal::with_trigger(&parent, std::future::pending());
        parent.cancel();
        timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn drop_releases_the_listener() {
        let parent = CancellationToken::new();
        let (tx, rx) = oneshot::channel::<()>();
        let signal = ShutdownSignal::with_trigger(&parent, async {
            let _ = rx.await;
        });
        let token = signal.token().clone();
        drop(signal);

        // Give the abort a chance to land; the trigger must no longer fire.
        tokio::task::yield_now().await;
        let _ = tx.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn stays_cancelled() {
        let parent = CancellationToken::new();
        let signal = ShutdownSignal::with_trigger(&parent, async {});
        timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(signal.is_cancelled());
    }
}

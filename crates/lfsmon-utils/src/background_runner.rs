use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receiver side of a runner's shutdown flag.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Spawns background tokio tasks with graceful shutdown support.
pub struct BackgroundRunner {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl BackgroundRunner {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = self.shutdown_tx.subscribe();
        self.handles.push((name.into(), tokio::spawn(f(rx))));
    }

    pub fn spawn_periodic<F, Fut>(&mut self, name: impl Into<String>, interval: Duration, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => { f().await; }
                    _ = rx.changed() => { break; }
                }
            }
        });
        self.handles.push((name.into(), handle));
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Raise the shutdown flag, then join every task in spawn order.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(task = %name, error = %e, "background task ended abnormally");
            }
        }
    }
}

impl Default for BackgroundRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep for `duration` unless shutdown is raised first.
///
/// Returns `false` when interrupted by shutdown.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut ShutdownSignal) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_spawn_observes_shutdown() {
        let mut runner = BackgroundRunner::new();
        let stopped = Arc::new(AtomicUsize::new(0));
        let s = stopped.clone();
        runner.spawn("waiter", move |mut rx| async move {
            let _ = rx.changed().await;
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runner.task_count(), 1);
        runner.shutdown().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_until_shutdown() {
        let mut runner = BackgroundRunner::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();
        runner.spawn_periodic("ticker", Duration::from_secs(1), move || {
            let t = t.clone();
            async move {
                t.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        runner.shutdown().await;
        // First tick fires immediately, then at 1s and 2s.
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_shutdown() {
        let runner = BackgroundRunner::new();
        let mut rx = runner.shutdown_signal();
        assert!(sleep_or_shutdown(Duration::from_millis(10), &mut rx).await);

        let mut rx2 = runner.shutdown_signal();
        let waiter =
            tokio::spawn(async move { sleep_or_shutdown(Duration::from_secs(3600), &mut rx2).await });
        tokio::task::yield_now().await;
        runner.shutdown().await;
        assert!(!waiter.await.unwrap());
    }
}

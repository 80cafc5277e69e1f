//! Periodic garbage collection for the in-memory stores.
//!
//! One [`SweepWorker`] per store replaces per-entry timers: the worker ticks
//! on a fixed interval and asks the store to evict whatever has aged out.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub trait Sweep: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Removes expired entries and returns how many were dropped.
    fn sweep_expired(&self) -> usize;
}

/// Runs one sweep pass, containing any panic so the caller's schedule
/// survives. Returns `None` when the pass panicked.
pub fn run_guarded(target: &dyn Sweep) -> Option<usize> {
    match catch_unwind(AssertUnwindSafe(|| target.sweep_expired())) {
        Ok(removed) => {
            if removed > 0 {
                debug!(
                    event_name = "core.sweep.completed",
                    sweep = target.name(),
                    removed,
                    "sweep removed expired entries"
                );
            }
            Some(removed)
        }
        Err(_) => {
            warn!(
                event_name = "core.sweep.failed",
                sweep = target.name(),
                "sweep pass panicked; next pass stays scheduled"
            );
            None
        }
    }
}

pub struct SweepWorker<S> {
    target: Arc<S>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl<S: Sweep> SweepWorker<S> {
    pub fn new(target: Arc<S>, interval: Duration) -> Self {
        Self { target, interval, shutdown: Arc::new(Notify::new()) }
    }

    pub fn spawn(self) -> SweepHandle {
        let shutdown = Arc::clone(&self.shutdown);
        let task = tokio::spawn(async move {
            self.run().await;
        });
        SweepHandle { shutdown, task }
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the first sweep waits a full interval.
        ticker.tick().await;

        info!(
            event_name = "core.sweep.started",
            sweep = self.target.name(),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "sweep worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_guarded(self.target.as_ref());
                }
                () = self.shutdown.notified() => {
                    info!(
                        event_name = "core.sweep.stopped",
                        sweep = self.target.name(),
                        "sweep worker shutting down"
                    );
                    break;
                }
            }
        }
    }
}

/// Owner handle for a spawned [`SweepWorker`].
pub struct SweepHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(error) = self.task.await {
            warn!(event_name = "core.sweep.join_failed", error = %error, "sweep worker did not stop cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{run_guarded, Sweep, SweepWorker};

    #[derive(Default)]
    struct CountingSweep {
        calls: AtomicUsize,
        panic_on_first: bool,
    }

    impl CountingSweep {
        fn panicking_once() -> Self {
            Self { calls: AtomicUsize::new(0), panic_on_first: true }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Sweep for CountingSweep {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn sweep_expired(&self) -> usize {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_first && call == 0 {
                panic!("sweep blew up");
            }
            1
        }
    }

    #[test]
    fn guarded_run_contains_panics() {
        let target = CountingSweep::panicking_once();

        assert_eq!(run_guarded(&target), None);
        assert_eq!(run_guarded(&target), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_sweeps_on_each_interval_after_the_first() {
        let target = Arc::new(CountingSweep::default());
        let handle = SweepWorker::new(target.clone(), Duration::from_secs(60)).spawn();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(target.calls(), 0);

        tokio::time::sleep(Duration::from_secs(155)).await;
        assert_eq!(target.calls(), 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn worker_survives_a_panicking_pass() {
        let target = Arc::new(CountingSweep::panicking_once());
        let handle = SweepWorker::new(target.clone(), Duration::from_secs(60)).spawn();

        tokio::time::sleep(Duration::from_secs(125)).await;

        assert_eq!(target.calls(), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_further_sweeps() {
        let target = Arc::new(CountingSweep::default());
        let handle = SweepWorker::new(target.clone(), Duration::from_secs(60)).spawn();

        tokio::time::sleep(Duration::from_secs(65)).await;
        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(300)).await;

        assert_eq!(target.calls(), 1);
    }
}

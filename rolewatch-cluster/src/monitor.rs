//! Periodic scheduling of poll jobs
//!
//! Every tick runs all jobs concurrently. A slow tick delays the next one
//! instead of piling up cycles.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use rolewatch_core::metrics::{CYCLES_TOTAL, CYCLE_FAILURES_TOTAL};

use crate::emit::MetricSink;
use crate::jobs::PollJob;

pub struct Monitor {
    jobs: Vec<Arc<dyn PollJob>>,
    sink: Arc<dyn MetricSink>,
    interval: Duration,
    cancel_token: CancellationToken,
}

impl Monitor {
    #[must_use]
    pub fn new(jobs: Vec<Arc<dyn PollJob>>, sink: Arc<dyn MetricSink>, interval: Duration) -> Self {
        Self {
            jobs,
            sink,
            interval,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Start the polling loop; the first tick fires immediately
    ///
    /// Use `shutdown()` to stop it. A tick that is still running is dropped
    /// along with its in-flight probes.
    #[must_use]
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let jobs = self.jobs.clone();
        let sink = self.sink.clone();
        let cancel_token = self.cancel_token.clone();

        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        tracing::info!("Monitor shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        tokio::select! {
                            () = cancel_token.cancelled() => {
                                tracing::info!("Monitor shutting down, abandoning running cycle");
                                return;
                            }
                            _ = Self::run_jobs(&jobs, sink.as_ref()) => {}
                        }
                    }
                }
            }
        })
    }

    /// Run every job once, returning how many failed
    pub async fn run_once(&self) -> usize {
        Self::run_jobs(&self.jobs, self.sink.as_ref()).await
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    async fn run_jobs(jobs: &[Arc<dyn PollJob>], sink: &dyn MetricSink) -> usize {
        let results = join_all(jobs.iter().map(|job| async move { (job.name(), job.poll(sink).await) })).await;

        let mut failures = 0;
        for (name, result) in results {
            CYCLES_TOTAL.with_label_values(&[name]).inc();
            if let Err(e) = result {
                failures += 1;
                CYCLE_FAILURES_TOTAL.with_label_values(&[name]).inc();
                tracing::error!(job = name, error = %e, "Poll job failed");
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::RecordingSink;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingJob {
        name: &'static str,
        runs: AtomicUsize,
        fail: bool,
    }

    impl CountingJob {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl PollJob for CountingJob {
        fn name(&self) -> &str {
            self.name
        }

        async fn poll(&self, sink: &dyn MetricSink) -> Result<()> {
            let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            sink.emit(self.name, runs as f64);
            if self.fail {
                return Err(Error::Store("unavailable".to_string()));
            }
            Ok(())
        }
    }

    /// Takes far longer than any test waits for
    struct StuckJob {
        finished: AtomicBool,
    }

    #[async_trait]
    impl PollJob for StuckJob {
        fn name(&self) -> &str {
            "monitor_stuck"
        }

        async fn poll(&self, _sink: &dyn MetricSink) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_once_counts_failures() {
        let ok = CountingJob::new("monitor_ok", false);
        let broken = CountingJob::new("monitor_broken", true);
        let sink = Arc::new(RecordingSink::new());
        let monitor = Monitor::new(vec![ok.clone() as Arc<dyn PollJob>, broken.clone()], sink.clone(), Duration::from_secs(60));

        assert_eq!(monitor.run_once().await, 1);
        assert_eq!(sink.get("monitor_ok"), Some(1.0));
        assert_eq!(sink.get("monitor_broken"), Some(1.0));
        assert_eq!(CYCLE_FAILURES_TOTAL.with_label_values(&["monitor_broken"]).get(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_until_shutdown() {
        let job = CountingJob::new("monitor_loop", false);
        let monitor = Monitor::new(vec![job.clone() as Arc<dyn PollJob>], Arc::new(RecordingSink::new()), Duration::from_secs(60));

        let handle = monitor.start();
        // Ticks at 0s, 60s and 120s
        tokio::time::sleep(Duration::from_secs(150)).await;
        monitor.shutdown();
        handle.await.unwrap();

        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_running_cycle() {
        let job = Arc::new(StuckJob {
            finished: AtomicBool::new(false),
        });
        let monitor = Monitor::new(vec![job.clone() as Arc<dyn PollJob>], Arc::new(RecordingSink::new()), Duration::from_secs(60));

        let started = tokio::time::Instant::now();
        let handle = monitor.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.shutdown();
        handle.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(!job.finished.load(Ordering::SeqCst));
    }
}

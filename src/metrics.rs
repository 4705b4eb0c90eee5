//! Server throughput accounting.
//!
//! `ServerMetrics` is owned by the server and handed to every session.
//! A sampler task turns the running total into a per-interval rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Counters shared between sessions and the sampler.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Completed 9-byte requests since process start
    completed: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one completed request.
    pub fn record_request(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Total completed requests.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Derives a rate from successive counter readings.
#[derive(Debug)]
pub struct RateSampler {
    previous: u64,
}

impl RateSampler {
    pub fn new(start: u64) -> Self {
        Self { previous: start }
    }

    /// Return `current - previous` and remember `current`.
    pub fn sample(&mut self, current: u64) -> u64 {
        let rate = current.saturating_sub(self.previous);
        self.previous = current;
        rate
    }
}

/// Periodically sample `metrics` and pass each rate to `report`.
///
/// Runs until the task is aborted. The first report arrives one full
/// `period` after start.
pub async fn run_sampler<F>(metrics: Arc<ServerMetrics>, period: Duration, mut report: F)
where
    F: FnMut(u64),
{
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sampler = RateSampler::new(metrics.completed());

    loop {
        interval.tick().await;
        report(sampler.sample(metrics.completed()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_counter_increments_by_one() {
        let metrics = ServerMetrics::new();
        assert_eq!(metrics.completed(), 0);

        let mut last = 0;
        for _ in 0..10 {
            metrics.record_request();
            let now = metrics.completed();
            assert_eq!(now, last + 1);
            last = now;
        }
    }

    #[test]
    fn test_rate_is_difference() {
        let mut sampler = RateSampler::new(100);
        assert_eq!(sampler.sample(250), 150);
        assert_eq!(sampler.sample(250), 0);
        assert_eq!(sampler.sample(251), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_reports_each_interval() {
        let metrics = ServerMetrics::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_sampler(
            Arc::clone(&metrics),
            Duration::from_secs(1),
            move |rate| {
                let _ = tx.send(rate);
            },
        ));
        // Let the sampler take its baseline reading.
        tokio::task::yield_now().await;

        for _ in 0..5 {
            metrics.record_request();
        }
        assert_eq!(rx.recv().await, Some(5));

        for _ in 0..3 {
            metrics.record_request();
        }
        assert_eq!(rx.recv().await, Some(3));

        assert_eq!(rx.recv().await, Some(0));
        task.abort();
    }
}

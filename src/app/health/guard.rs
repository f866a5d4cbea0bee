// src/app/health/guard.rs

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::app::metrics::PressureMetrics;

use super::sampler::{DelaySampler, MemoryProbe, UtilizationSampler};
use super::types::Snapshot;

/// Cloneable handle to the latest published snapshot.
///
/// - lock-free read
/// - readers always see a whole snapshot (pointer swap)
#[derive(Clone, Debug)]
pub struct SnapshotHandle {
    snap: Arc<ArcSwap<Snapshot>>,
}

impl SnapshotHandle {
    #[inline]
    pub fn load(&self) -> Snapshot {
        **self.snap.load()
    }
}

/// Everything one sampling tick reads from.
pub struct Sampler {
    memory: Arc<dyn MemoryProbe>,
    delay: Box<dyn DelaySampler>,
    utilization: Box<dyn UtilizationSampler>,
    memory_failed: bool,
}

impl Sampler {
    pub fn new(
        memory: Arc<dyn MemoryProbe>,
        delay: Box<dyn DelaySampler>,
        utilization: Box<dyn UtilizationSampler>,
    ) -> Self {
        Self {
            memory,
            delay,
            utilization,
            memory_failed: false,
        }
    }

    /// Takes one full sample. A failing memory probe keeps the previous counters.
    pub fn tick(&mut self, prev: &Snapshot) -> Snapshot {
        let (heap_used_bytes, rss_bytes) = match self.memory.sample() {
            Ok(m) => {
                self.memory_failed = false;
                (m.heap_used_bytes, m.rss_bytes)
            }
            Err(e) => {
                if !self.memory_failed {
                    tracing::warn!(
                        component = "sampler",
                        error = %e,
                        "memory probe failed; keeping previous memory values"
                    );
                    self.memory_failed = true;
                }
                (prev.heap_used_bytes, prev.rss_bytes)
            }
        };

        Snapshot {
            event_loop_delay_ms: self.delay.sample(),
            event_loop_utilized: self.utilization.sample(),
            heap_used_bytes,
            rss_bytes,
            captured_at: Utc::now(),
        }
    }
}

/// Starts the sampling loop and returns a handle + join handle.
///
/// The first sample lands one `period` after start; until then the snapshot
/// holds zeros, so nothing is asserted before data exists.
pub fn start_sampling_loop(
    period: Duration,
    mut sampler: Sampler,
    metrics: Option<Arc<PressureMetrics>>,
    shutdown: CancellationToken,
) -> (SnapshotHandle, JoinHandle<()>) {
    let snap = Arc::new(ArcSwap::from_pointee(Snapshot::default()));
    let handle = SnapshotHandle { snap: snap.clone() };

    let jh = tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        // a late tick pushes the schedule back instead of bursting to catch up
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        tracing::info!(
            component = "sampler",
            period_ms = period.as_millis() as u64,
            "sampling loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(component = "sampler", "sampling loop shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }

            let prev = **snap.load();
            let next = sampler.tick(&prev);

            if let Some(m) = metrics.as_ref() {
                m.observe_snapshot(&next);
            }

            snap.store(Arc::new(next));
        }
    });

    (handle, jh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::health::sampler::{PollingDelaySampler, UtilizationUnavailable};
    use crate::app::health::types::MemoryUsage;
    use crate::error::{AppError, AppResult};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Scripted {
        calls: AtomicU64,
    }

    impl MemoryProbe for Scripted {
        fn sample(&self) -> AppResult<MemoryUsage> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                return Err(AppError::Disabled("probe offline".into()));
            }
            Ok(MemoryUsage {
                heap_used_bytes: 100 + n,
                rss_bytes: 200 + n,
            })
        }
    }

    fn sampler(period: Duration) -> Sampler {
        Sampler::new(
            Arc::new(Scripted {
                calls: AtomicU64::new(0),
            }),
            Box::new(PollingDelaySampler::new(period)),
            Box::new(UtilizationUnavailable),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_keeps_previous_memory() {
        let mut s = sampler(Duration::from_millis(5));
        let first = s.tick(&Snapshot::default());
        assert_eq!((first.heap_used_bytes, first.rss_bytes), (100, 200));

        let second = s.tick(&first);
        assert_eq!((second.heap_used_bytes, second.rss_bytes), (100, 200));
        assert_eq!(second.event_loop_utilized, None);

        let third = s.tick(&second);
        assert_eq!((third.heap_used_bytes, third.rss_bytes), (102, 202));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_publishes_after_first_period_and_stops_on_cancel() {
        let period = Duration::from_millis(50);
        let token = CancellationToken::new();
        let (handle, jh) = start_sampling_loop(period, sampler(period), None, token.clone());

        // before any tick: zeros
        let initial = handle.load();
        assert_eq!(initial.heap_used_bytes, 0);
        assert_eq!(initial.event_loop_delay_ms, 0.0);

        time::sleep(Duration::from_millis(60)).await;
        let snap = handle.load();
        assert_eq!(snap.heap_used_bytes, 100);
        assert_eq!(snap.event_loop_delay_ms, 0.0);

        token.cancel();
        jh.await.unwrap();
    }
}

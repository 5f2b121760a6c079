use crate::transport::scheduler::AdmissionGate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    scheduled_fetches: AtomicU64,
    completed_payloads: AtomicU64,
    payload_bytes: AtomicU64,
    fetch_failures: AtomicU64,
    materialize_failures: AtomicU64,
    structural_violations: AtomicU64,
    cancellations: AtomicU64,
    admission_refusals: AtomicU64,
}

impl Telemetry {
    pub fn record_scheduled_fetches(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.scheduled_fetches.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_completed_payload(&self, bytes: u64) {
        self.completed_payloads.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_materialize_failure(&self) {
        self.materialize_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_structural_violation(&self) {
        self.structural_violations.fetch_add(1, Ordering::Relaxed);
        self.materialize_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission_refusal(&self) {
        self.admission_refusals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            scheduled_fetches: self.scheduled_fetches.load(Ordering::Relaxed),
            completed_payloads: self.completed_payloads.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            materialize_failures: self.materialize_failures.load(Ordering::Relaxed),
            structural_violations: self.structural_violations.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            admission_refusals: self.admission_refusals.load(Ordering::Relaxed),
        }
    }

    pub fn completed_payloads(&self) -> u64 {
        self.completed_payloads.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn cancellations(&self) -> u64 {
        self.cancellations.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub scheduled_fetches: u64,
    pub completed_payloads: u64,
    pub payload_bytes: u64,
    pub fetch_failures: u64,
    pub materialize_failures: u64,
    pub structural_violations: u64,
    pub cancellations: u64,
    pub admission_refusals: u64,
}

/// Spawns a background task that periodically logs payload throughput, the
/// transport pending-request gauge, and failure counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    gate: Arc<dyn AdmissionGate>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "multicontent::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let completed_delta = current_snapshot
                        .completed_payloads
                        .saturating_sub(last_snapshot.completed_payloads);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        completed_delta as f64 / elapsed
                    };
                    let pending_requests = gate.pending_count();

                    tracing::info!(
                        target: "multicontent::metrics",
                        throughput = format!("{throughput:.2}"),
                        completed = current_snapshot.completed_payloads,
                        payload_bytes = current_snapshot.payload_bytes,
                        pending_requests,
                        fetch_failures = current_snapshot.fetch_failures,
                        materialize_failures = current_snapshot.materialize_failures,
                        cancellations = current_snapshot.cancellations,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scheduler::SlotScheduler;
    use tokio::time::timeout;

    #[tokio::test]
    async fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_scheduled_fetches(3);
        telemetry.record_completed_payload(128);
        telemetry.record_completed_payload(64);
        telemetry.record_fetch_failure();
        telemetry.record_materialize_failure();
        telemetry.record_structural_violation();
        telemetry.record_cancellation();
        telemetry.record_admission_refusal();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.scheduled_fetches, 3);
        assert_eq!(snapshot.completed_payloads, 2);
        assert_eq!(snapshot.payload_bytes, 192);
        assert_eq!(snapshot.fetch_failures, 1);
        assert_eq!(snapshot.materialize_failures, 2);
        assert_eq!(snapshot.structural_violations, 1);
        assert_eq!(snapshot.cancellations, 1);
        assert_eq!(snapshot.admission_refusals, 1);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_completed_payload(512);
        let gate: Arc<dyn AdmissionGate> = Arc::new(SlotScheduler::new(8, 4));

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(
            telemetry,
            gate,
            shutdown.clone(),
            Duration::from_millis(10),
        );

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }
}

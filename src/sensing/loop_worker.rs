use std::sync::Arc;

use chrono::Utc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::metrics::{CycleMetrics, CycleOutcome, CycleTrigger};

use super::controller::SchedulerInner;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_debug, log_info, log_warn};

/// Cycle loop for one session epoch.
///
/// The next cycle is armed only after the previous one has fully finished, so
/// the spacing is measured from completion. A manual cycle that finishes while
/// the loop is waiting re-arms the wait from its own completion. The loop exits
/// at the first scheduling decision that sees a newer epoch.
pub(super) async fn sensing_loop(
    inner: Arc<SchedulerInner>,
    epoch: u64,
    cancel_token: CancellationToken,
) {
    let mut armed_at: Option<Instant> = None;

    loop {
        let wait_from = {
            // A cycle from a previous epoch may still be finishing.
            let _cycle = inner.cycle_lock.lock().await;
            if !inner.is_current(epoch) {
                break;
            }
            match armed_at.and_then(|armed| inner.finished_after(armed)) {
                Some(finished) => {
                    log_debug!("manual cycle ran during the wait; re-arming (epoch {epoch})");
                    finished
                }
                None => {
                    run_cycle(&inner, CycleTrigger::Scheduled, epoch).await;
                    Instant::now()
                }
            }
        };

        if !inner.is_current(epoch) {
            break;
        }

        let interval_ms = inner.session.lock().await.interval_ms;
        log_debug!("next cycle in {interval_ms}ms (epoch {epoch})");

        armed_at = Some(Instant::now());
        tokio::select! {
            _ = tokio::time::sleep_until(wait_from + Duration::from_millis(interval_ms)) => {}
            _ = cancel_token.cancelled() => break,
        }

        if !inner.is_current(epoch) {
            break;
        }
    }

    log_info!("sensing loop for epoch {epoch} shutting down");
}

/// Marks a cycle in flight for as long as it lives.
struct InFlight<'a>(&'a SchedulerInner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a SchedulerInner) -> Self {
        inner.set_in_flight(true);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set_in_flight(false);
    }
}

/// capture → classify → actuate. The caller must hold `cycle_lock`.
///
/// Every failure is contained here: a failed capture keeps the previous
/// artifact and verdict, a failed classification has already become the
/// fallback verdict, and a failed actuation is only logged.
pub(super) async fn run_cycle(
    inner: &SchedulerInner,
    trigger: CycleTrigger,
    epoch: u64,
) -> CycleOutcome {
    let _in_flight = InFlight::enter(inner);
    let timestamp = Utc::now();
    let cycle_start = Instant::now();

    let capture_start = Instant::now();
    let captured = inner.capture.capture_once().await;
    let capture_ms = capture_start.elapsed().as_millis() as u64;

    let mut record = CycleMetrics {
        timestamp,
        trigger,
        outcome: CycleOutcome::Completed,
        capture_ms,
        classify_ms: None,
        actuation_ms: None,
        image_bytes: 0,
        fallback_verdict: false,
        total_ms: 0,
        cpu_percent: 0.0,
        memory_mb: 0.0,
    };

    record.outcome = match captured {
        Err(err) => {
            log_warn!("capture failed, keeping previous artifact: {err}");
            CycleOutcome::CaptureFailed
        }
        Ok(lease) => {
            record.image_bytes = lease.bytes.len();

            let classify_start = Instant::now();
            let verdict = inner.gate.classify(&lease.bytes, lease.mime).await;
            record.classify_ms = Some(classify_start.elapsed().as_millis() as u64);
            drop(lease);

            match verdict {
                None => {
                    log_info!("classification already in flight; verdict unchanged");
                    CycleOutcome::Coalesced
                }
                Some(verdict) => {
                    record.fallback_verdict = verdict.fallback;

                    if inner.device.is_connected() {
                        let command = verdict.actuation_command();
                        let actuation_start = Instant::now();
                        let sent = inner.device.send_command(command).await;
                        record.actuation_ms =
                            Some(actuation_start.elapsed().as_millis() as u64);

                        match sent {
                            Ok(reply) => {
                                log_debug!("device acknowledged {command}: {reply}");
                                CycleOutcome::Completed
                            }
                            Err(err) => {
                                log_warn!("actuation {command} failed: {err}");
                                CycleOutcome::ActuationFailed
                            }
                        }
                    } else {
                        log_debug!("no device connected; skipping actuation");
                        CycleOutcome::Completed
                    }
                }
            }
        }
    };

    // Superseded artifacts whose last lease was this cycle can go now.
    inner.capture.collect();

    let system = inner.metrics.sample_system_metrics().await;
    record.total_ms = cycle_start.elapsed().as_millis() as u64;
    record.cpu_percent = system.cpu_percent;
    record.memory_mb = system.memory_mb;

    log_info!(
        "{:?} cycle finished: {:?} in {}ms (capture={}ms classify={:?}ms actuation={:?}ms)",
        trigger,
        record.outcome,
        record.total_ms,
        record.capture_ms,
        record.classify_ms,
        record.actuation_ms
    );

    let outcome = record.outcome;
    inner.mark_finished(Instant::now());
    inner.metrics.record_cycle(record).await;
    inner.complete_cycle(epoch).await;
    outcome
}

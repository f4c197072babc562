use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capture::CaptureArtifactManager;
use crate::classifier::ClassifierGate;
use crate::device::DeviceLink;
use crate::error::SensingError;
use crate::metrics::{CycleOutcome, CycleTrigger, MetricsCollector};
use crate::settings::MIN_CAPTURE_INTERVAL_MS;

use super::loop_worker::{run_cycle, sensing_loop};
use super::state::{SensingSession, SensingSnapshot};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub(super) struct SchedulerInner {
    pub(super) session: Mutex<SensingSession>,
    /// Bumped on every start and stop. A loop only runs cycles for the epoch
    /// it was spawned with.
    pub(super) epoch: AtomicU64,
    /// Held for the whole of a cycle; scheduled cycles queue on it, manual
    /// triggers give up if it is taken.
    pub(super) cycle_lock: Mutex<()>,
    pub(super) in_flight: AtomicBool,
    /// When the most recent cycle of either trigger finished.
    last_finished: std::sync::Mutex<Option<tokio::time::Instant>>,
    pub(super) capture: Arc<CaptureArtifactManager>,
    pub(super) gate: Arc<ClassifierGate>,
    pub(super) device: DeviceLink,
    pub(super) metrics: MetricsCollector,
    state: watch::Sender<SensingSnapshot>,
    workers: Mutex<Vec<Worker>>,
}

struct Worker {
    epoch: u64,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl SchedulerInner {
    pub(super) fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    pub(super) fn publish(&self, session: &SensingSession) {
        let snapshot = SensingSnapshot::new(session, self.in_flight.load(Ordering::SeqCst));
        self.state.send_replace(snapshot);
    }

    pub(super) fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::SeqCst);
        self.state.send_if_modified(|snapshot| {
            let changed = snapshot.cycle_in_flight != in_flight;
            snapshot.cycle_in_flight = in_flight;
            changed
        });
    }

    pub(super) fn mark_finished(&self, at: tokio::time::Instant) {
        *self.last_finished.lock().unwrap_or_else(|p| p.into_inner()) = Some(at);
    }

    /// The finish time of a cycle that completed after `armed_at`, if any.
    pub(super) fn finished_after(
        &self,
        armed_at: tokio::time::Instant,
    ) -> Option<tokio::time::Instant> {
        let last = *self.last_finished.lock().unwrap_or_else(|p| p.into_inner());
        last.filter(|finished| *finished > armed_at)
    }

    /// Cancels every loop spawned for an epoch other than the current one.
    /// The caller must hold the session lock.
    async fn cancel_stale_workers(&self) {
        let current = self.epoch.load(Ordering::SeqCst);
        for worker in self.workers.lock().await.iter() {
            if worker.epoch != current {
                worker.cancel.cancel();
            }
        }
    }

    /// Counts a finished cycle against the session that scheduled it.
    pub(super) async fn complete_cycle(&self, epoch: u64) {
        let mut session = self.session.lock().await;
        if session.is_active() && self.is_current(epoch) {
            session.cycles_completed += 1;
            self.publish(&session);
        }
    }
}

/// Owns the monitoring session and the cycle loop that serves it.
#[derive(Clone)]
pub struct SensingScheduler {
    inner: Arc<SchedulerInner>,
}

impl SensingScheduler {
    pub fn new(
        capture: Arc<CaptureArtifactManager>,
        gate: Arc<ClassifierGate>,
        device: DeviceLink,
        metrics: MetricsCollector,
        interval_ms: u64,
    ) -> Self {
        let session = SensingSession::with_interval(interval_ms.max(MIN_CAPTURE_INTERVAL_MS));
        let (state, _) = watch::channel(SensingSnapshot::new(&session, false));

        Self {
            inner: Arc::new(SchedulerInner {
                session: Mutex::new(session),
                epoch: AtomicU64::new(0),
                cycle_lock: Mutex::new(()),
                in_flight: AtomicBool::new(false),
                last_finished: std::sync::Mutex::new(None),
                capture,
                gate,
                device,
                metrics,
                state,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub async fn snapshot(&self) -> SensingSnapshot {
        let session = self.inner.session.lock().await;
        SensingSnapshot::new(&session, self.inner.in_flight.load(Ordering::SeqCst))
    }

    pub fn subscribe(&self) -> watch::Receiver<SensingSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn is_cycle_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// `Idle → Active`. The first cycle is triggered right away.
    pub async fn start(&self) -> Result<SensingSnapshot, SensingError> {
        let mut session = self.inner.session.lock().await;
        if session.is_active() {
            return Err(SensingError::AlreadyActive);
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        session.begin(Uuid::new_v4().to_string(), Utc::now(), Instant::now());
        self.inner.publish(&session);

        log_info!(
            "sensing started: session={} interval={}ms epoch={}",
            session.session_id.as_deref().unwrap_or_default(),
            session.interval_ms,
            epoch
        );
        let snapshot = SensingSnapshot::new(&session, self.inner.in_flight.load(Ordering::SeqCst));

        // Registered before the session lock is released so a racing stop
        // always sees this worker with its epoch.
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sensing_loop(Arc::clone(&self.inner), epoch, cancel.clone()));
        let mut workers = self.inner.workers.lock().await;
        workers.retain(|worker| !worker.handle.is_finished());
        workers.push(Worker {
            epoch,
            handle,
            cancel,
        });
        drop(workers);
        drop(session);

        Ok(snapshot)
    }

    /// `Active → Idle`. Never waits: a cycle already in flight finishes on its
    /// own, and nothing is scheduled after it.
    pub async fn stop(&self) -> SensingSnapshot {
        let mut session = self.inner.session.lock().await;
        if !session.is_active() {
            return SensingSnapshot::new(&session, self.inner.in_flight.load(Ordering::SeqCst));
        }

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        log_info!(
            "sensing stopped: session={} after {} cycle(s)",
            session.session_id.as_deref().unwrap_or_default(),
            session.cycles_completed
        );
        session.end();
        self.inner.publish(&session);
        self.inner.cancel_stale_workers().await;

        SensingSnapshot::new(&session, self.inner.in_flight.load(Ordering::SeqCst))
    }

    /// Sets the spacing used for the next scheduling decision. A wait that is
    /// already running keeps its original length.
    pub async fn retune(&self, interval_ms: u64) -> Result<SensingSnapshot, SensingError> {
        if interval_ms < MIN_CAPTURE_INTERVAL_MS {
            log_warn!("retune to {interval_ms}ms rejected");
            return Err(SensingError::IntervalTooShort {
                requested: interval_ms,
                minimum: MIN_CAPTURE_INTERVAL_MS,
            });
        }

        let mut session = self.inner.session.lock().await;
        session.interval_ms = interval_ms;
        self.inner.publish(&session);
        log_info!("sensing interval retuned to {interval_ms}ms");

        Ok(SensingSnapshot::new(&session, self.inner.in_flight.load(Ordering::SeqCst)))
    }

    /// Runs one cycle now, outside the schedule. Dropped as
    /// [`CycleOutcome::Coalesced`] if a cycle is already in flight.
    pub async fn analyze_now(&self) -> CycleOutcome {
        let Ok(_cycle) = self.inner.cycle_lock.try_lock() else {
            log_info!("analyze-now ignored: a cycle is already in flight");
            self.inner.metrics.record_coalesced().await;
            return CycleOutcome::Coalesced;
        };

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        run_cycle(&self.inner, CycleTrigger::Manual, epoch).await
    }

    /// Stops the session and waits for every loop, including a cycle still in
    /// flight, to wind down.
    pub async fn shutdown(&self) {
        self.stop().await;

        let workers = std::mem::take(&mut *self.inner.workers.lock().await);
        for worker in workers {
            worker.cancel.cancel();
            if let Err(err) = worker.handle.await {
                log_warn!("sensing loop task failed to join: {err}");
            }
        }
    }
}

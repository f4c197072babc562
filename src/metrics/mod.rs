#[cfg(feature = "desktop")]
pub mod commands;
mod types;

pub use types::{CycleMetrics, CycleOutcome, CycleTrigger, MetricsSnapshot, SystemMetrics};

use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_CYCLES: usize = 20;

/// Rolling record of recent sensing cycles for the debug view.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_cycles: VecDeque<CycleMetrics>,
    cycle_count: u64,
    capture_failures: u64,
    fallback_verdicts: u64,
    coalesced_triggers: u64,
    system: System,
    pid: Pid,
}

impl MetricsState {
    fn sample_process(&mut self) -> SystemMetrics {
        let pid = self.pid;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        match self.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics::default(),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // Initial refresh to establish baseline for CPU calculation
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_cycles: VecDeque::with_capacity(MAX_RECENT_CYCLES),
                cycle_count: 0,
                capture_failures: 0,
                fallback_verdicts: 0,
                coalesced_triggers: 0,
                system,
                pid,
            })),
        }
    }

    /// Current process CPU and memory. CPU needs two samples over time to be meaningful.
    pub async fn sample_system_metrics(&self) -> SystemMetrics {
        self.inner.lock().await.sample_process()
    }

    pub async fn record_cycle(&self, metrics: CycleMetrics) {
        let mut state = self.inner.lock().await;

        state.cycle_count += 1;
        if metrics.outcome == CycleOutcome::CaptureFailed {
            state.capture_failures += 1;
        }
        if metrics.fallback_verdict {
            state.fallback_verdicts += 1;
        }

        state.recent_cycles.push_back(metrics);
        if state.recent_cycles.len() > MAX_RECENT_CYCLES {
            state.recent_cycles.pop_front();
        }
    }

    /// A trigger that was dropped because a cycle was already in flight.
    pub async fn record_coalesced(&self) {
        self.inner.lock().await.coalesced_triggers += 1;
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let system = state.sample_process();

        MetricsSnapshot {
            system,
            recent_cycles: state.recent_cycles.iter().cloned().collect(),
            cycle_count: state.cycle_count,
            capture_failures: state.capture_failures,
            fallback_verdicts: state.fallback_verdicts,
            coalesced_triggers: state.coalesced_triggers,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.recent_cycles.clear();
        state.cycle_count = 0;
        state.capture_failures = 0;
        state.fallback_verdicts = 0;
        state.coalesced_triggers = 0;
        // Re-establish baseline for CPU after reset
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

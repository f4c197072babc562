use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CycleTrigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CycleOutcome {
    /// Verdict produced and, if a device was connected, actuated.
    Completed,
    /// Verdict produced but the actuation command failed.
    ActuationFailed,
    /// Capture failed; the previous artifact and verdict stay current.
    CaptureFailed,
    /// Classification was already in flight; no new verdict.
    Coalesced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleMetrics {
    pub timestamp: DateTime<Utc>,
    pub trigger: CycleTrigger,
    pub outcome: CycleOutcome,
    pub capture_ms: u64,
    pub classify_ms: Option<u64>,
    pub actuation_ms: Option<u64>,
    pub image_bytes: usize,
    pub fallback_verdict: bool,
    pub total_ms: u64,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_cycles: Vec<CycleMetrics>,
    pub cycle_count: u64,
    pub capture_failures: u64,
    pub fallback_verdicts: u64,
    pub coalesced_triggers: u64,
}

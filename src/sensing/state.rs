use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::settings::DEFAULT_CAPTURE_INTERVAL_MS;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SensingStatus {
    #[default]
    Idle,
    Active,
}

/// One monitoring period. `started_at` is set iff the status is `Active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensingSession {
    pub status: SensingStatus,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub interval_ms: u64,
    pub cycles_completed: u64,
    /// Monotonic start of the session; drives `elapsed_ms`.
    #[serde(skip)]
    pub running_anchor: Option<Instant>,
}

impl Default for SensingSession {
    fn default() -> Self {
        Self::with_interval(DEFAULT_CAPTURE_INTERVAL_MS)
    }
}

impl SensingSession {
    pub fn with_interval(interval_ms: u64) -> Self {
        Self {
            status: SensingStatus::Idle,
            session_id: None,
            started_at: None,
            interval_ms,
            cycles_completed: 0,
            running_anchor: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SensingStatus::Active
    }

    pub fn elapsed_ms(&self) -> u64 {
        match (self.status, self.running_anchor) {
            (SensingStatus::Active, Some(anchor)) => anchor.elapsed().as_millis() as u64,
            _ => 0,
        }
    }

    pub fn begin(&mut self, session_id: String, start_at: DateTime<Utc>, now: Instant) {
        *self = Self {
            status: SensingStatus::Active,
            session_id: Some(session_id),
            started_at: Some(start_at),
            interval_ms: self.interval_ms,
            cycles_completed: 0,
            running_anchor: Some(now),
        };
    }

    /// Back to idle; the interval survives for the next session.
    pub fn end(&mut self) {
        *self = Self::with_interval(self.interval_ms);
    }
}

/// What the presentation layer sees of the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensingSnapshot {
    pub session: SensingSession,
    pub elapsed_ms: u64,
    pub cycle_in_flight: bool,
}

impl SensingSnapshot {
    pub fn new(session: &SensingSession, cycle_in_flight: bool) -> Self {
        Self {
            elapsed_ms: session.elapsed_ms(),
            session: session.clone(),
            cycle_in_flight,
        }
    }
}

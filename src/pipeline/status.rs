// src/pipeline/status.rs
use crate::error::ParseError;
use crate::input_format::Parsed;
use crate::pipeline::batch::DeliveryOutcome;
use crate::stats::StatsInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Starting,
    Running,
    Stopped,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ParseStats {
    pub parsed: u64,
    pub failed: u64,
    pub last_error: String,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub batches_delivered: u64,
    pub batches_dropped: u64,
    pub batches_aborted: u64,
    pub records_delivered: u64,
    pub records_discarded: u64,
    pub send_attempts: u64,
    pub last_send_error: String,
    pub last_send_error_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of a runner, for an external monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerStatus {
    pub name: String,
    pub state: RunnerState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines_read: u64,
    pub parse: ParseStats,
    /// One entry per configured transformer, in configured order
    pub stages: Vec<StatsInfo>,
    pub delivery: DeliveryStats,
}

/// Shared, cloneable handle on a runner's status.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<Mutex<RunnerStatus>>,
}

impl StatusHandle {
    pub fn new(name: &str, stages: Vec<StatsInfo>) -> Self {
        let now = Utc::now();
        StatusHandle {
            inner: Arc::new(Mutex::new(RunnerStatus {
                name: name.to_string(),
                state: RunnerState::Starting,
                started_at: now,
                updated_at: now,
                lines_read: 0,
                parse: ParseStats::default(),
                stages,
                delivery: DeliveryStats::default(),
            })),
        }
    }

    pub fn snapshot(&self) -> RunnerStatus {
        self.lock().clone()
    }

    pub fn set_state(&self, state: RunnerState) {
        self.update(|status| status.state = state);
    }

    pub fn add_lines(&self, count: usize) {
        self.update(|status| status.lines_read += count as u64);
    }

    pub fn record_parse(&self, parsed: &Parsed) {
        self.update(|status| {
            status.parse.parsed += parsed.records.len() as u64;
            status.parse.failed += parsed.errors.len() as u64;
            if let Some(ParseError { line, message }) = parsed.errors.last() {
                status.parse.last_error = format!("line {}: {}", line, message);
                status.parse.last_error_at = Some(Utc::now());
            }
        });
    }

    pub fn update_stage(&self, index: usize, stats: StatsInfo) {
        self.update(|status| {
            if let Some(slot) = status.stages.get_mut(index) {
                *slot = stats;
            }
        });
    }

    pub fn record_delivery(&self, outcome: &DeliveryOutcome, records: usize) {
        self.update(|status| {
            let delivery = &mut status.delivery;
            delivery.send_attempts += outcome.attempts() as u64;
            match outcome {
                DeliveryOutcome::Delivered { .. } => {
                    delivery.batches_delivered += 1;
                    delivery.records_delivered += records as u64;
                }
                DeliveryOutcome::Dropped { last_error, .. } => {
                    delivery.batches_dropped += 1;
                    delivery.last_send_error = last_error.to_string();
                    delivery.last_send_error_at = Some(Utc::now());
                }
                DeliveryOutcome::Aborted { .. } => {
                    delivery.batches_aborted += 1;
                }
            }
        });
    }

    pub fn record_discarded(&self, records: usize) {
        self.update(|status| status.delivery.records_discarded += records as u64);
    }

    fn update(&self, apply: impl FnOnce(&mut RunnerStatus)) {
        let mut status = self.lock();
        apply(&mut status);
        status.updated_at = Utc::now();
    }

    fn lock(&self) -> MutexGuard<'_, RunnerStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// src/stats.rs
use crate::error::StageError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;

/// Cumulative counters for one stage instance.
///
/// Counters only grow for the lifetime of the instance; a fresh instance
/// starts from zero.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct StatsInfo {
    pub stage_type: String,
    pub processed: u64,
    pub failed: u64,
    pub last_error: String,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl StatsInfo {
    pub fn new(stage_type: &str) -> Self {
        StatsInfo {
            stage_type: stage_type.to_string(),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> u64 {
        self.processed - self.failed
    }

    /// Fold one call's summary into the cumulative counters.
    pub fn absorb(&mut self, summary: &CallSummary) {
        self.processed += summary.total as u64;
        self.failed += summary.failed as u64;
    }

    /// Record the last error text. Empty text keeps the previous error.
    pub fn set_last_error(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.last_error = text.to_string();
        self.last_error_at = Some(Utc::now());
    }
}

/// Outcome of one stage call, folded from its per-record results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    pub stage: String,
    pub total: usize,
    pub failed: usize,
    pub last: Option<String>,
}

impl CallSummary {
    pub fn fold<E: Display>(stage: &str, outcomes: &[Result<(), E>]) -> Self {
        let mut summary = CallSummary {
            stage: stage.to_string(),
            total: outcomes.len(),
            failed: 0,
            last: None,
        };
        for outcome in outcomes {
            if let Err(err) = outcome {
                summary.failed += 1;
                summary.last = Some(err.to_string());
            }
        }
        summary
    }

    /// The aggregate error for this call, if any record failed.
    pub fn into_result(self) -> Result<(), StageError> {
        match self.last {
            Some(last) if self.failed > 0 => Err(StageError::Records {
                stage: self.stage,
                failed: self.failed,
                total: self.total,
                last,
            }),
            _ => Ok(()),
        }
    }
}

// src/pipeline/batch.rs
//! Batch accumulation and delivery with bounded retry.
//!
//! ```text
//! Accumulating ──threshold──▶ Ready ──▶ Sending ──ok──▶ Delivered
//!                                         ▲  │
//!                                  backoff│  │error
//!                                         │  ▼
//!                                       Retrying ──attempts exhausted──▶ Dropped
//! ```
//!
//! A new batch opens as soon as the previous one leaves `Accumulating`.
//! Finished batches go through a bounded queue to a single delivery task,
//! so sending overlaps with intake but a batch is never sent twice at once.

use crate::error::{ConstructionError, RunnerError, SendFailure};
use crate::pipeline::config::ShutdownPolicy;
use crate::pipeline::status::StatusHandle;
use crate::pipeline::stop_requested;
use crate::record::{record_size, Record};
use crate::sender::Sender;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Longest accepted `batch_interval`.
pub const MAX_BATCH_INTERVAL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Flush thresholds. Whichever fires first closes the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSpec {
    pub max_records: usize,
    pub max_bytes: usize,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl BatchSpec {
    pub fn validate(&self) -> Result<(), ConstructionError> {
        let zero = [
            ("batch_len", self.max_records == 0),
            ("batch_size", self.max_bytes == 0),
            ("batch_interval", self.max_interval.is_zero()),
            ("batch_try_times", self.max_attempts == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConstructionError::config(
                "batch",
                format!("{} must be greater than zero", name),
            ));
        }
        if self.max_interval > MAX_BATCH_INTERVAL {
            return Err(ConstructionError::config(
                "batch",
                format!(
                    "batch_interval must be at most {} seconds",
                    MAX_BATCH_INTERVAL.as_secs()
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Accumulating,
    Ready,
    Sending,
    Retrying,
    Delivered,
    Dropped,
}

impl BatchState {
    pub fn can_become(self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Accumulating, Ready)
                | (Ready, Sending)
                | (Ready, Dropped)
                | (Sending, Delivered)
                | (Sending, Retrying)
                | (Sending, Dropped)
                | (Retrying, Sending)
                | (Retrying, Dropped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchState::Delivered | BatchState::Dropped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    Count,
    Size,
    Interval,
    Shutdown,
}

#[derive(Debug)]
pub struct Batch {
    id: u64,
    records: Vec<Record>,
    bytes: usize,
    opened_at: Instant,
    state: BatchState,
    reason: Option<FlushReason>,
}

impl Batch {
    fn open(id: u64) -> Self {
        Batch {
            id,
            records: Vec::new(),
            bytes: 0,
            opened_at: Instant::now(),
            state: BatchState::Accumulating,
            reason: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn reason(&self) -> Option<FlushReason> {
        self.reason
    }

    fn advance(&mut self, next: BatchState) {
        debug_assert!(
            self.state.can_become(next),
            "batch {}: {:?} -> {:?}",
            self.id,
            self.state,
            next
        );
        self.state = next;
    }

    fn close(&mut self, reason: FlushReason) {
        self.reason = Some(reason);
        self.advance(BatchState::Ready);
    }
}

/// Holds the open batch and decides when it is ready.
#[derive(Debug)]
pub struct Accumulator {
    spec: BatchSpec,
    current: Option<Batch>,
    next_id: u64,
}

impl Accumulator {
    pub fn new(spec: BatchSpec) -> Self {
        Accumulator {
            spec,
            current: None,
            next_id: 1,
        }
    }

    /// Append a record. Returns the batch if this record made it ready.
    pub fn push(&mut self, record: Record) -> Option<Batch> {
        let next_id = &mut self.next_id;
        let batch = self.current.get_or_insert_with(|| {
            let batch = Batch::open(*next_id);
            *next_id += 1;
            batch
        });

        batch.bytes += record_size(&record);
        batch.records.push(record);

        let reason = if batch.records.len() >= self.spec.max_records {
            Some(FlushReason::Count)
        } else if batch.bytes >= self.spec.max_bytes {
            Some(FlushReason::Size)
        } else if batch.opened_at.elapsed() >= self.spec.max_interval {
            Some(FlushReason::Interval)
        } else {
            None
        };
        reason.and_then(|reason| self.take(reason))
    }

    /// When the open batch will be due by interval. `None` when no batch is
    /// open or the interval reaches past what `Instant` can hold.
    pub fn deadline(&self) -> Option<Instant> {
        self.current
            .as_ref()
            .and_then(|b| b.opened_at.checked_add(self.spec.max_interval))
    }

    /// Close the open batch now, whatever its size.
    pub fn take(&mut self, reason: FlushReason) -> Option<Batch> {
        let mut batch = self.current.take()?;
        batch.close(reason);
        Some(batch)
    }

    pub fn pending(&self) -> usize {
        self.current.as_ref().map_or(0, Batch::len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub send_timeout: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Dropped { attempts: u32, last_error: SendFailure },
    /// Stopped by shutdown between attempts.
    Aborted { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts }
            | DeliveryOutcome::Dropped { attempts, .. }
            | DeliveryOutcome::Aborted { attempts } => *attempts,
        }
    }
}

/// Send one ready batch, retrying up to the policy's attempt limit.
///
/// Each attempt has its own timeout. Once `abort` is true no retry wait
/// runs to its end: the batch is left `Dropped` and reported `Aborted`.
pub async fn deliver(
    sender: &mut dyn Sender,
    batch: &mut Batch,
    policy: &RetryPolicy,
    abort: &mut watch::Receiver<bool>,
) -> DeliveryOutcome {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        batch.advance(BatchState::Sending);

        let attempt_result =
            tokio::time::timeout(policy.send_timeout, sender.send(batch.records())).await;
        let result = match attempt_result {
            Ok(result) => result,
            Err(_) => Err(SendFailure::Timeout(policy.send_timeout)),
        };

        let err = match result {
            Ok(()) => {
                batch.advance(BatchState::Delivered);
                tracing::debug!(
                    batch = batch.id,
                    records = batch.len(),
                    attempts = attempt,
                    "Batch delivered"
                );
                return DeliveryOutcome::Delivered { attempts: attempt };
            }
            Err(err) => err,
        };

        if attempt >= policy.max_attempts {
            batch.advance(BatchState::Dropped);
            tracing::error!(
                batch = batch.id,
                records = batch.len(),
                attempts = attempt,
                sender = sender.name(),
                error = %err,
                "Max send attempts exhausted, dropping batch"
            );
            return DeliveryOutcome::Dropped {
                attempts: attempt,
                last_error: err,
            };
        }

        batch.advance(BatchState::Retrying);
        let delay = policy.backoff(attempt);
        tracing::warn!(
            batch = batch.id,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Send failed, will retry"
        );

        tokio::select! {
            biased;
            _ = stop_requested(abort) => {
                batch.advance(BatchState::Dropped);
                tracing::warn!(batch = batch.id, attempts = attempt, "Retry aborted by shutdown");
                return DeliveryOutcome::Aborted { attempts: attempt };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Owns the open batch and the delivery task of one runner.
pub struct BatchController {
    accumulator: Accumulator,
    queue: mpsc::Sender<Batch>,
    /// Ends retry waits; queued batches still get one attempt.
    abort: watch::Sender<bool>,
    /// Queued batches are dropped without an attempt.
    discard: watch::Sender<bool>,
    worker: JoinHandle<()>,
    status: StatusHandle,
}

impl BatchController {
    /// Spawn the delivery task. At most `max_inflight` ready batches wait
    /// for the sender; beyond that `push` blocks.
    pub fn start(
        spec: BatchSpec,
        policy: RetryPolicy,
        sender: Box<dyn Sender>,
        max_inflight: usize,
        status: StatusHandle,
    ) -> Self {
        let (queue, receiver) = mpsc::channel(max_inflight.max(1));
        let (abort, abort_rx) = watch::channel(false);
        let (discard, discard_rx) = watch::channel(false);
        let worker = tokio::spawn(delivery_worker(
            sender,
            receiver,
            policy,
            Halt {
                abort: abort_rx,
                discard: discard_rx,
            },
            status.clone(),
        ));

        BatchController {
            accumulator: Accumulator::new(spec),
            queue,
            abort,
            discard,
            worker,
            status,
        }
    }

    pub async fn push(&mut self, records: Vec<Record>) -> Result<(), RunnerError> {
        for record in records {
            if let Some(batch) = self.accumulator.push(record) {
                self.enqueue(batch).await?;
            }
        }
        Ok(())
    }

    /// Hand off the open batch because its interval ran out.
    pub async fn flush_interval(&mut self) -> Result<(), RunnerError> {
        match self.accumulator.take(FlushReason::Interval) {
            Some(batch) => self.enqueue(batch).await,
            None => Ok(()),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.accumulator.deadline()
    }

    pub fn pending(&self) -> usize {
        self.accumulator.pending()
    }

    /// The input has ended: hand off the open batch and deliver everything
    /// still queued with the full retry policy.
    pub async fn finish(mut self) -> Result<(), RunnerError> {
        if let Some(batch) = self.accumulator.take(FlushReason::Shutdown) {
            self.enqueue(batch).await?;
        }
        self.join().await
    }

    /// The runner was told to stop. Pending retries are abandoned under
    /// either policy. `Flush` gives the open batch and every queued batch
    /// one send attempt; `Discard` sends nothing more.
    pub async fn close(mut self, policy: ShutdownPolicy) -> Result<(), RunnerError> {
        // No receivers left only means the worker is already gone
        if policy == ShutdownPolicy::Discard {
            let _ = self.discard.send(true);
        }
        let _ = self.abort.send(true);

        if let Some(batch) = self.accumulator.take(FlushReason::Shutdown) {
            match policy {
                ShutdownPolicy::Flush => self.enqueue(batch).await?,
                ShutdownPolicy::Discard => {
                    tracing::warn!(records = batch.len(), "Discarding open batch on shutdown");
                    self.status.record_discarded(batch.len());
                }
            }
        }
        self.join().await
    }

    async fn join(self) -> Result<(), RunnerError> {
        drop(self.queue);
        self.worker.await.map_err(|_| RunnerError::DeliveryStopped)
    }

    async fn enqueue(&mut self, batch: Batch) -> Result<(), RunnerError> {
        tracing::debug!(
            batch = batch.id(),
            records = batch.len(),
            bytes = batch.bytes(),
            reason = ?batch.reason(),
            "Batch ready"
        );
        self.queue
            .send(batch)
            .await
            .map_err(|_| RunnerError::DeliveryStopped)
    }
}

/// Shutdown signals seen by the delivery task.
struct Halt {
    abort: watch::Receiver<bool>,
    discard: watch::Receiver<bool>,
}

async fn delivery_worker(
    mut sender: Box<dyn Sender>,
    mut queue: mpsc::Receiver<Batch>,
    policy: RetryPolicy,
    mut halt: Halt,
    status: StatusHandle,
) {
    while let Some(mut batch) = queue.recv().await {
        if *halt.discard.borrow() {
            batch.advance(BatchState::Dropped);
            status.record_delivery(&DeliveryOutcome::Aborted { attempts: 0 }, batch.len());
            continue;
        }
        let outcome = deliver(sender.as_mut(), &mut batch, &policy, &mut halt.abort).await;
        status.record_delivery(&outcome, batch.len());
    }
}

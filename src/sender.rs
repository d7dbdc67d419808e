// src/sender.rs
use crate::error::SendFailure;
use crate::record::Record;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Destination of finished batches. Any error is treated as retryable.
#[async_trait]
pub trait Sender: Send {
    fn name(&self) -> &str;

    async fn send(&mut self, batch: &[Record]) -> Result<(), SendFailure>;
}

/// Writes each record as one compact JSON line.
pub struct JsonLinesSender<W> {
    name: String,
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSender<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        JsonLinesSender {
            name: name.into(),
            writer,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Sender for JsonLinesSender<W> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, batch: &[Record]) -> Result<(), SendFailure> {
        // Encode the whole batch first so a bad record never leaves half a batch written
        let mut buffer = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut buffer, record).map_err(|e| SendFailure::Rejected {
                sender: self.name.clone(),
                message: e.to_string(),
            })?;
            buffer.push(b'\n');
        }
        self.writer.write_all(&buffer).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Keeps delivered batches in memory. Clones share the same storage.
///
/// Failures can be scripted up front with [`MemorySender::fail_next`].
#[derive(Debug, Clone, Default)]
pub struct MemorySender {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    batches: Vec<Vec<Record>>,
    attempts: usize,
    failures: VecDeque<String>,
}

impl MemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` send attempts fail with `message`.
    pub fn fail_next(&self, count: usize, message: &str) {
        let mut state = self.lock();
        state.failures.extend(std::iter::repeat(message.to_string()).take(count));
    }

    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.lock().batches.clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().batches.iter().flatten().cloned().collect()
    }

    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Sender for MemorySender {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&mut self, batch: &[Record]) -> Result<(), SendFailure> {
        let mut state = self.lock();
        state.attempts += 1;
        if let Some(message) = state.failures.pop_front() {
            return Err(SendFailure::Rejected {
                sender: "memory".to_string(),
                message,
            });
        }
        state.batches.push(batch.to_vec());
        Ok(())
    }
}

// src/pipeline/runner.rs
use crate::error::{RunnerError, StageError};
use crate::input_format::LineParser;
use crate::pipeline::batch::{BatchController, BatchSpec, RetryPolicy};
use crate::pipeline::config::{RunnerConfig, ShutdownPolicy};
use crate::pipeline::status::{RunnerState, RunnerStatus, StatusHandle};
use crate::pipeline::stop_requested;
use crate::reader::{ReadOutcome, Reader};
use crate::record::Record;
use crate::sender::Sender;
use crate::stats::StatsInfo;
use crate::transforms::{Registry, Stage, Transformer};
use std::io;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// How long to wait before polling a reader again after it reported idle.
pub const IDLE_WAIT: Duration = Duration::from_millis(200);

/// A stage instance and its position in the configured list.
struct Slot {
    index: usize,
    stage: Box<dyn Transformer>,
}

/// Why the read loop ended.
enum Exit {
    Exhausted,
    Stopped,
    Failed(io::Error),
}

enum Event {
    Stop,
    Deadline,
    IdleOver,
    Read(io::Result<ReadOutcome>),
}

/// The ordered stages of one runner and the parser between them.
struct StageChain {
    name: String,
    before: Vec<Slot>,
    after: Vec<Slot>,
    parser: Box<dyn LineParser>,
    status: StatusHandle,
    lines_read: usize,
}

impl StageChain {
    fn process(&mut self, mut lines: Vec<String>) -> Vec<Record> {
        let first_line = self.lines_read + 1;
        self.lines_read += lines.len();
        self.status.add_lines(lines.len());

        for slot in &mut self.before {
            let result = slot.stage.raw_transform(&mut lines);
            finish_call(&self.name, &self.status, slot, result);
        }

        let parsed = self.parser.parse(&lines, first_line);
        self.status.record_parse(&parsed);
        if let Err(err) = parsed.aggregate(self.parser.name()) {
            tracing::warn!(
                runner = %self.name,
                failed = err.failed(),
                error = %err,
                "Parse errors"
            );
        }

        let mut records = parsed.records;
        for slot in &mut self.after {
            let result = slot.stage.transform(&mut records);
            finish_call(&self.name, &self.status, slot, result);
        }
        records
    }

    async fn forward(
        &mut self,
        chunk: Vec<String>,
        controller: &mut BatchController,
    ) -> Result<(), RunnerError> {
        let records = self.process(chunk);
        controller.push(records).await
    }
}

/// Add lines to `chunk` for as long as the reader has them ready, up to
/// `limit`. Returns the first outcome that is not a line, if any.
async fn read_ready(
    reader: &mut dyn Reader,
    chunk: &mut Vec<String>,
    limit: usize,
) -> Option<io::Result<ReadOutcome>> {
    while chunk.len() < limit {
        let read = tokio::select! {
            biased;
            read = reader.read_line() => read,
            // The reader would wait; relies on `read_line` being cancel-safe
            _ = std::future::ready(()) => return None,
        };
        match read {
            Ok(ReadOutcome::Line(line)) => chunk.push(line),
            other => return Some(other),
        }
    }
    None
}

/// One configured pipeline. Built once, run once.
pub struct Runner {
    chain: StageChain,
    reader: Box<dyn Reader>,
    sender: Box<dyn Sender>,
    spec: BatchSpec,
    retry: RetryPolicy,
    max_inflight: usize,
    shutdown_policy: ShutdownPolicy,
}

impl Runner {
    /// Build every stage from the registry. Any construction error fails
    /// the whole runner before a single line is read.
    pub fn new(
        config: &RunnerConfig,
        registry: &Registry,
        reader: Box<dyn Reader>,
        sender: Box<dyn Sender>,
    ) -> Result<Self, RunnerError> {
        let spec = config.batch_spec()?;
        let max_inflight = config.max_inflight()?;
        let parser = config.parser.build()?;

        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut stats = Vec::with_capacity(config.transforms.len());
        for (index, transform) in config.transforms.iter().enumerate() {
            let (stage, _) = registry.build_validated(transform)?;
            stats.push(stage.stats());
            let slot = Slot { index, stage };
            match slot.stage.stage() {
                Stage::BeforeParse => before.push(slot),
                Stage::AfterParse => after.push(slot),
            }
        }

        tracing::info!(
            runner = %config.name,
            reader = reader.name(),
            parser = parser.name(),
            sender = sender.name(),
            before_parse = before.len(),
            after_parse = after.len(),
            "Runner built"
        );

        Ok(Runner {
            chain: StageChain {
                name: config.name.clone(),
                before,
                after,
                parser,
                status: StatusHandle::new(&config.name, stats),
                lines_read: 0,
            },
            reader,
            sender,
            spec,
            retry: config.retry_policy(),
            max_inflight,
            shutdown_policy: config.shutdown,
        })
    }

    pub fn name(&self) -> &str {
        &self.chain.name
    }

    /// Handle for reading the status while the runner is running.
    pub fn status(&self) -> StatusHandle {
        self.chain.status.clone()
    }

    /// Run raw lines through pre-parse stages, the parser and post-parse
    /// stages. Never drops a record because of a per-record failure.
    pub fn process_lines(&mut self, lines: Vec<String>) -> Vec<Record> {
        self.chain.process(lines)
    }

    /// Read until the source is exhausted or `shutdown` turns true, then
    /// flush or discard per the shutdown policy and wait for delivery.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunnerStatus, RunnerError> {
        let Runner {
            mut chain,
            mut reader,
            sender,
            spec,
            retry,
            max_inflight,
            shutdown_policy,
        } = self;

        let status = chain.status.clone();
        let mut controller =
            BatchController::start(spec, retry, sender, max_inflight, status.clone());
        status.set_state(RunnerState::Running);
        tracing::info!(runner = %chain.name, "Runner started");

        let mut idle_until: Option<Instant> = None;
        // Outcome that ended the last burst of ready lines
        let mut carried: Option<io::Result<ReadOutcome>> = None;

        let exit = loop {
            let event = match carried.take() {
                Some(read) => Event::Read(read),
                None => {
                    let deadline = controller.deadline();
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut shutdown) => Event::Stop,
                        _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                            if deadline.is_some() => Event::Deadline,
                        _ = tokio::time::sleep_until(idle_until.unwrap_or_else(Instant::now)),
                            if idle_until.is_some() => Event::IdleOver,
                        read = reader.read_line(), if idle_until.is_none() => Event::Read(read),
                    }
                }
            };

            match event {
                Event::Stop => break Exit::Stopped,
                Event::Deadline => controller.flush_interval().await?,
                Event::IdleOver => idle_until = None,
                Event::Read(Ok(ReadOutcome::Line(line))) => {
                    // Lines only wait while more are ready
                    let mut chunk = vec![line];
                    carried = read_ready(reader.as_mut(), &mut chunk, spec.max_records).await;
                    chain.forward(chunk, &mut controller).await?;
                }
                Event::Read(Ok(ReadOutcome::Idle)) => idle_until = Some(Instant::now() + IDLE_WAIT),
                Event::Read(Ok(ReadOutcome::Exhausted)) => break Exit::Exhausted,
                Event::Read(Err(err)) => break Exit::Failed(err),
            }
        };

        // Only an explicit stop abandons retries or discards
        match exit {
            Exit::Stopped => controller.close(shutdown_policy).await?,
            Exit::Exhausted | Exit::Failed(_) => controller.finish().await?,
        }

        status.set_state(RunnerState::Stopped);
        let snapshot = status.snapshot();
        tracing::info!(
            runner = %chain.name,
            lines = snapshot.lines_read,
            delivered = snapshot.delivery.batches_delivered,
            dropped = snapshot.delivery.batches_dropped,
            "Runner stopped"
        );

        match exit {
            Exit::Failed(err) => {
                tracing::error!(runner = %chain.name, error = %err, "Reader failed");
                Err(RunnerError::Io(err))
            }
            Exit::Exhausted | Exit::Stopped => Ok(snapshot),
        }
    }
}

fn finish_call(
    runner: &str,
    status: &StatusHandle,
    slot: &mut Slot,
    result: Result<(), StageError>,
) {
    let text = match result {
        Ok(()) => String::new(),
        Err(err) => {
            tracing::warn!(
                runner,
                stage = slot.stage.type_name(),
                failed = err.failed(),
                error = %err,
                "Stage reported errors"
            );
            err.to_string()
        }
    };
    let stats: StatsInfo = slot.stage.set_stats(&text);
    status.update_stage(slot.index, stats);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::VecReader;
    use crate::sender::MemorySender;
    use crate::transforms::TransformerConfig;
    use serde_json::json;

    fn config(transforms: Vec<serde_json::Value>) -> RunnerConfig {
        RunnerConfig {
            name: "test".into(),
            transforms: transforms
                .into_iter()
                .map(|t| TransformerConfig::from_value(t).unwrap())
                .collect(),
            ..Default::default()
        }
    }

    fn runner(config: &RunnerConfig) -> Runner {
        Runner::new(
            config,
            &Registry::builtin().unwrap(),
            Box::new(VecReader::default()),
            Box::new(MemorySender::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_stages_split_by_position() {
        let config = config(vec![
            json!({"type": "domain", "key": "request", "newfield": "domain"}),
            json!({"type": "replace", "old": "http:", "new": "https:"}),
        ]);
        let runner = runner(&config);
        assert_eq!(runner.chain.before.len(), 1);
        assert_eq!(runner.chain.before[0].index, 1);
        assert_eq!(runner.chain.after.len(), 1);
        assert_eq!(runner.chain.after[0].index, 0);
        assert_eq!(runner.status().snapshot().stages.len(), 2);
    }

    #[test]
    fn test_process_lines_keeps_failed_records() {
        let config = config(vec![
            json!({"type": "domain", "key": "request", "newfield": "domain"}),
        ]);
        let mut runner = runner(&config);

        let records = runner.process_lines(vec![
            r#"{"request": "https://orangleliu.info/name/cc"}"#.to_string(),
            r#"{"request": 7}"#.to_string(),
        ]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["domain"], "orangleliu.info");
        assert!(!records[1].contains_key("domain"));

        let status = runner.status().snapshot();
        assert_eq!(status.lines_read, 2);
        assert_eq!(status.stages[0].processed, 2);
        assert_eq!(status.stages[0].failed, 1);
        assert!(status.stages[0].last_error.contains("1 of 2 records failed"));
    }
}

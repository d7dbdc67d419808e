// tests/runner_tests.rs - Runner lifecycle from reader to sender

use async_trait::async_trait;
use logweir::{
    ConstructionError, MemorySender, ReadOutcome, Reader, Record, Registry, Runner, RunnerConfig,
    RunnerError, RunnerState, ShutdownPolicy, TransformerConfig, VecReader,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tokio::sync::watch;

/// Hands out its lines, then waits forever like a quiet socket.
struct StallingReader {
    lines: VecDeque<String>,
}

impl StallingReader {
    fn new(lines: &[&str]) -> Self {
        StallingReader {
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Reader for StallingReader {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn read_line(&mut self) -> io::Result<ReadOutcome> {
        match self.lines.pop_front() {
            Some(line) => Ok(ReadOutcome::Line(line)),
            None => std::future::pending().await,
        }
    }
}

/// Each line takes `delay` to arrive.
struct SlowReader {
    lines: VecDeque<String>,
    delay: Duration,
}

#[async_trait]
impl Reader for SlowReader {
    fn name(&self) -> &str {
        "slow"
    }

    async fn read_line(&mut self) -> io::Result<ReadOutcome> {
        tokio::time::sleep(self.delay).await;
        match self.lines.pop_front() {
            Some(line) => Ok(ReadOutcome::Line(line)),
            None => std::future::pending().await,
        }
    }
}

fn config(batch_len: usize, transforms: Vec<Value>) -> RunnerConfig {
    RunnerConfig {
        name: "web".into(),
        batch_len,
        transforms: transforms
            .into_iter()
            .map(|t| TransformerConfig::from_value(t).unwrap())
            .collect(),
        ..Default::default()
    }
}

fn domain() -> Value {
    json!({"type": "domain", "key": "request", "newfield": "domain"})
}

fn request_lines(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!(r#"{{"request": "http://host{}.example/path", "seq": {}}}"#, i, i))
        .collect()
}

fn domains(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["domain"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_runs_to_end_of_input() {
    let sender = MemorySender::new();
    let runner = Runner::new(
        &config(3, vec![domain()]),
        &Registry::builtin().unwrap(),
        Box::new(VecReader::new(request_lines(7))),
        Box::new(sender.clone()),
    )
    .unwrap();

    let (_stop_tx, stop_rx) = watch::channel(false);
    let status = runner.run(stop_rx).await.unwrap();

    let sizes: Vec<usize> = sender.batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(domains(&sender.records())[6], "host6.example");

    assert_eq!(status.state, RunnerState::Stopped);
    assert_eq!(status.lines_read, 7);
    assert_eq!(status.parse.parsed, 7);
    assert_eq!(status.stages[0].processed, 7);
    assert_eq!(status.delivery.batches_delivered, 3);
    assert_eq!(status.delivery.records_delivered, 7);
}

#[tokio::test(start_paused = true)]
async fn test_failed_records_are_still_delivered() {
    let sender = MemorySender::new();
    let lines = vec![
        r#"{"request": "https://orangleliu.info/name/cc"}"#.to_string(),
        r#"{"request": 12345}"#.to_string(),
        "not json".to_string(),
    ];
    let runner = Runner::new(
        &config(10, vec![domain()]),
        &Registry::builtin().unwrap(),
        Box::new(VecReader::new(lines)),
        Box::new(sender.clone()),
    )
    .unwrap();

    let (_stop_tx, stop_rx) = watch::channel(false);
    let status = runner.run(stop_rx).await.unwrap();

    let records = sender.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["domain"], "orangleliu.info");
    assert_eq!(records[1]["request"], 12345);
    assert_eq!(status.parse.failed, 1);
    assert_eq!(status.stages[0].failed, 1);
    assert!(status.stages[0].last_error.contains("not string"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_through_runner() {
    let sender = MemorySender::new();
    sender.fail_next(2, "503 service unavailable");
    let runner = Runner::new(
        &config(10, vec![]),
        &Registry::builtin().unwrap(),
        Box::new(VecReader::new(request_lines(4))),
        Box::new(sender.clone()),
    )
    .unwrap();

    let (_stop_tx, stop_rx) = watch::channel(false);
    let status = runner.run(stop_rx).await.unwrap();

    assert_eq!(sender.records().len(), 4);
    assert_eq!(status.delivery.batches_delivered, 1);
    assert_eq!(status.delivery.send_attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_batch_is_reported() {
    let sender = MemorySender::new();
    sender.fail_next(10, "503 service unavailable");
    let runner = Runner::new(
        &config(10, vec![]),
        &Registry::builtin().unwrap(),
        Box::new(VecReader::new(request_lines(4))),
        Box::new(sender.clone()),
    )
    .unwrap();

    let (_stop_tx, stop_rx) = watch::channel(false);
    let status = runner.run(stop_rx).await.unwrap();

    assert!(sender.records().is_empty());
    assert_eq!(sender.attempts(), 3);
    assert_eq!(status.delivery.batches_dropped, 1);
    assert_eq!(status.delivery.records_delivered, 0);
    assert!(status.delivery.last_send_error.contains("503"));
    assert!(status.delivery.last_send_error_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_interval_flushes_quiet_input() {
    let sender = MemorySender::new();
    let config = RunnerConfig {
        batch_interval: 5,
        ..config(100, vec![domain()])
    };
    let runner = Runner::new(
        &config,
        &Registry::builtin().unwrap(),
        Box::new(StallingReader::new(&[
            r#"{"request": "http://a.example/"}"#,
            r#"{"request": "http://b.example/"}"#,
        ])),
        Box::new(sender.clone()),
    )
    .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(stop_rx));

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(sender.batches().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(domains(&sender.records()), vec!["a.example", "b.example"]);

    stop_tx.send(true).unwrap();
    let status = handle.await.unwrap().unwrap();
    assert_eq!(status.delivery.batches_delivered, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_pending_lines() {
    let sender = MemorySender::new();
    let runner = Runner::new(
        &config(100, vec![domain()]),
        &Registry::builtin().unwrap(),
        Box::new(StallingReader::new(&[
            r#"{"request": "http://a.example/"}"#,
            r#"{"request": "http://b.example/"}"#,
        ])),
        Box::new(sender.clone()),
    )
    .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(stop_rx));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sender.batches().is_empty());

    stop_tx.send(true).unwrap();
    let status = handle.await.unwrap().unwrap();

    assert_eq!(domains(&sender.records()), vec!["a.example", "b.example"]);
    assert_eq!(status.state, RunnerState::Stopped);
    assert_eq!(status.delivery.records_discarded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_with_discard_sends_nothing() {
    let sender = MemorySender::new();
    let config = RunnerConfig {
        shutdown: ShutdownPolicy::Discard,
        ..config(100, vec![domain()])
    };
    let runner = Runner::new(
        &config,
        &Registry::builtin().unwrap(),
        Box::new(StallingReader::new(&[
            r#"{"request": "http://a.example/"}"#,
            r#"{"request": "http://b.example/"}"#,
        ])),
        Box::new(sender.clone()),
    )
    .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(stop_rx));
    tokio::time::sleep(Duration::from_secs(1)).await;

    stop_tx.send(true).unwrap();
    let status = handle.await.unwrap().unwrap();

    assert!(sender.batches().is_empty());
    assert_eq!(sender.attempts(), 0);
    assert_eq!(status.delivery.batches_delivered, 0);
    assert_eq!(status.delivery.records_discarded, 2);
    assert_eq!(status.state, RunnerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_size_threshold_fires_on_slow_input() {
    let sender = MemorySender::new();
    let config = RunnerConfig {
        batch_size: 50,
        ..config(100, vec![])
    };
    let reader = SlowReader {
        lines: (0..2)
            .map(|i| json!({"request": format!("http://host{}.example/{}", i, "p".repeat(60))}))
            .map(|line| line.to_string())
            .collect(),
        delay: Duration::from_secs(1),
    };
    let runner = Runner::new(
        &config,
        &Registry::builtin().unwrap(),
        Box::new(reader),
        Box::new(sender.clone()),
    )
    .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(stop_rx));

    // Each record alone is over batch_size; neither count nor interval is near
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(sender.batches().len(), 1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sender.batches().len(), 2);

    stop_tx.send(true).unwrap();
    let status = handle.await.unwrap().unwrap();
    assert_eq!(status.delivery.records_delivered, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_abandons_pending_retry_with_flush() {
    let sender = MemorySender::new();
    sender.fail_next(100, "503 service unavailable");
    let config = RunnerConfig {
        retry_delay_ms: 20_000,
        batch_try_times: 5,
        ..config(2, vec![])
    };
    let runner = Runner::new(
        &config,
        &Registry::builtin().unwrap(),
        Box::new(StallingReader::new(&[r#"{"n": 1}"#, r#"{"n": 2}"#])),
        Box::new(sender.clone()),
    )
    .unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(stop_rx));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sender.attempts(), 1);

    let stopped_at = tokio::time::Instant::now();
    stop_tx.send(true).unwrap();
    let status = handle.await.unwrap().unwrap();

    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert_eq!(sender.attempts(), 1);
    assert_eq!(status.delivery.batches_aborted, 1);
    assert_eq!(status.delivery.batches_dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_reader_forwards_what_it_has() {
    let sender = MemorySender::new();
    let reader = VecReader::with_outcomes(vec![
        ReadOutcome::Line(r#"{"request": "http://a.example/"}"#.to_string()),
        ReadOutcome::Idle,
        ReadOutcome::Line(r#"{"request": "http://b.example/"}"#.to_string()),
    ]);
    let runner = Runner::new(
        &config(10, vec![domain()]),
        &Registry::builtin().unwrap(),
        Box::new(reader),
        Box::new(sender.clone()),
    )
    .unwrap();

    let start = tokio::time::Instant::now();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let status = runner.run(stop_rx).await.unwrap();

    // Idle is a pause, not the end of input
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(domains(&sender.records()), vec!["a.example", "b.example"]);
    assert_eq!(status.lines_read, 2);
    // Both lines went through the stage, in separate calls
    assert_eq!(status.stages[0].processed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runners_share_one_registry() {
    let registry = Registry::builtin().unwrap();
    let mut handles = Vec::new();
    let mut senders = Vec::new();

    for n in 1..=3 {
        let sender = MemorySender::new();
        let config = RunnerConfig {
            name: format!("runner-{}", n),
            ..config(4, vec![domain()])
        };
        let runner = Runner::new(
            &config,
            &registry,
            Box::new(VecReader::new(request_lines(n * 5))),
            Box::new(sender.clone()),
        )
        .unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        handles.push(tokio::spawn(async move {
            let _keep = stop_tx;
            runner.run(stop_rx).await
        }));
        senders.push(sender);
    }

    for (n, handle) in handles.into_iter().enumerate() {
        let status = handle.await.unwrap().unwrap();
        assert_eq!(status.name, format!("runner-{}", n + 1));
        assert_eq!(status.delivery.records_delivered, ((n + 1) * 5) as u64);
    }
    for (n, sender) in senders.iter().enumerate() {
        let records = sender.records();
        assert_eq!(records.len(), (n + 1) * 5);
        assert!(records.iter().all(|r| r.contains_key("domain")));
    }
}

#[test]
fn test_missing_option_fails_before_run() {
    let config = config(10, vec![json!({"type": "domain", "key": "request"})]);
    let result = Runner::new(
        &config,
        &Registry::builtin().unwrap(),
        Box::new(VecReader::default()),
        Box::new(MemorySender::new()),
    );

    match result {
        Err(RunnerError::Construction(ConstructionError::ConfigValidation { stage, message })) => {
            assert_eq!(stage, "domain");
            assert!(message.contains("newfield"));
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("runner should not build"),
    }
}

#[test]
fn test_failing_sample_log_fails_before_run() {
    let mut transform = domain();
    transform["sampleLog"] = json!(r#"{"request": 42}"#);
    let result = Runner::new(
        &config(10, vec![transform]),
        &Registry::builtin().unwrap(),
        Box::new(VecReader::default()),
        Box::new(MemorySender::new()),
    );

    assert!(matches!(
        result,
        Err(RunnerError::Construction(ConstructionError::SampleRejected { .. }))
    ));
}

#[test]
fn test_huge_interval_fails_before_run() {
    let config = RunnerConfig::from_text("batch_interval: 18446744073709551615", false).unwrap();
    let result = Runner::new(
        &config,
        &Registry::builtin().unwrap(),
        Box::new(VecReader::default()),
        Box::new(MemorySender::new()),
    );
    let err = result.err().unwrap();
    assert!(matches!(
        err,
        RunnerError::Construction(ConstructionError::ConfigValidation { .. })
    ));
    assert!(err.to_string().contains("batch_interval must be at most"));
}

#[test]
fn test_zero_batch_len_fails_before_run() {
    let result = Runner::new(
        &config(0, vec![]),
        &Registry::builtin().unwrap(),
        Box::new(VecReader::default()),
        Box::new(MemorySender::new()),
    );
    let err = result.err().unwrap();
    assert!(err.to_string().contains("batch_len"));
}

// src/pipeline.rs
//! Runner orchestration: reader → pre-parse stages → parser → post-parse
//! stages → batch controller → sender.

pub mod batch;
pub mod config;
pub mod runner;
pub mod status;

pub use batch::{
    deliver, Accumulator, Batch, BatchController, BatchSpec, BatchState, DeliveryOutcome,
    FlushReason, RetryPolicy,
};
pub use config::{RunnerConfig, ShutdownPolicy};
pub use runner::Runner;
pub use status::{DeliveryStats, ParseStats, RunnerState, RunnerStatus, StatusHandle};

use tokio::sync::watch;

/// Resolves once the watched flag is true. If every sender is gone the flag
/// can no longer change, so this never resolves.
pub(crate) async fn stop_requested(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// src/lib.rs
pub mod error;
pub mod field_path;
pub mod input_format;
pub mod logging;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod sender;
pub mod stats;
pub mod transforms;

pub use error::*;
pub use field_path::{FieldPath, Segment};
pub use input_format::{
    CsvParser, InputFormat, JsonlParser, LineParser, LogfmtParser, Parsed, RawParser,
};
pub use pipeline::{
    BatchController, BatchSpec, BatchState, DeliveryOutcome, RetryPolicy, Runner, RunnerConfig,
    RunnerState, RunnerStatus, ShutdownPolicy, StatusHandle,
};
pub use reader::{LineReader, ReadOutcome, Reader, VecReader};
pub use record::{Record, Value};
pub use sender::{JsonLinesSender, MemorySender, Sender};
pub use stats::StatsInfo;
pub use transforms::{Registry, RegistryBuilder, Stage, Transformer, TransformerConfig};

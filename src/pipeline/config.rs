use crate::error::{ConstructionError, RunnerError};
use crate::input_format::InputFormat;
use crate::pipeline::batch::{BatchSpec, RetryPolicy};
use crate::transforms::TransformerConfig;
use serde::{de, Deserialize, Deserializer};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BATCH_LEN: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 2 * 1024 * 1024;
pub const DEFAULT_BATCH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_BATCH_TRY_TIMES: u32 = 3;
pub const DEFAULT_MAX_INFLIGHT: usize = 2;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// What happens to the open batch when a runner is stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Give the open batch and every queued batch one send attempt.
    /// Pending retries are abandoned.
    #[default]
    Flush,
    /// Drop the open batch and queued batches; abandon pending retries.
    Discard,
}

/// Configuration of one runner.
///
/// Numeric thresholds accept numbers or numeric strings, so
/// `batch_len: "3"` and `batch_len: 3` mean the same.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_batch_len", deserialize_with = "lenient")]
    pub batch_len: usize,
    /// Bytes
    #[serde(default = "default_batch_size", deserialize_with = "lenient")]
    pub batch_size: usize,
    /// Seconds
    #[serde(default = "default_batch_interval", deserialize_with = "lenient")]
    pub batch_interval: u64,
    #[serde(default = "default_batch_try_times", deserialize_with = "lenient")]
    pub batch_try_times: u32,
    /// Finished batches allowed to wait for the sender before intake blocks
    #[serde(default = "default_max_inflight", deserialize_with = "lenient")]
    pub max_inflight_batches: usize,
    /// Seconds, per send attempt
    #[serde(default = "default_send_timeout", deserialize_with = "lenient")]
    pub send_timeout: u64,
    #[serde(default = "default_retry_delay", deserialize_with = "lenient")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
    #[serde(default)]
    pub parser: InputFormat,
    #[serde(default)]
    pub transforms: Vec<TransformerConfig>,
}

fn default_name() -> String {
    "runner".to_string()
}
fn default_batch_len() -> usize {
    DEFAULT_BATCH_LEN
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_batch_interval() -> u64 {
    DEFAULT_BATCH_INTERVAL_SECS
}
fn default_batch_try_times() -> u32 {
    DEFAULT_BATCH_TRY_TIMES
}
fn default_max_inflight() -> usize {
    DEFAULT_MAX_INFLIGHT
}
fn default_send_timeout() -> u64 {
    DEFAULT_SEND_TIMEOUT_SECS
}
fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText<T> {
    Number(T),
    Text(String),
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match NumberOrText::<T>::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(text) => text
            .trim()
            .parse()
            .map_err(|e| de::Error::custom(format!("invalid number '{}': {}", text, e))),
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            name: default_name(),
            batch_len: DEFAULT_BATCH_LEN,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_interval: DEFAULT_BATCH_INTERVAL_SECS,
            batch_try_times: DEFAULT_BATCH_TRY_TIMES,
            max_inflight_batches: DEFAULT_MAX_INFLIGHT,
            send_timeout: DEFAULT_SEND_TIMEOUT_SECS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            shutdown: ShutdownPolicy::default(),
            parser: InputFormat::default(),
            transforms: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Load from a file: `.json` is read as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        Self::from_text(&text, is_json)
    }

    pub fn from_text(text: &str, is_json: bool) -> Result<Self, RunnerError> {
        if is_json {
            Ok(serde_json::from_str(text)?)
        } else {
            Ok(serde_yaml::from_str(text)?)
        }
    }

    pub fn batch_spec(&self) -> Result<BatchSpec, ConstructionError> {
        let spec = BatchSpec {
            max_records: self.batch_len,
            max_bytes: self.batch_size,
            max_interval: Duration::from_secs(self.batch_interval),
            max_attempts: self.batch_try_times,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.batch_try_times,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: MAX_RETRY_DELAY,
            send_timeout: Duration::from_secs(self.send_timeout),
        }
    }

    pub fn max_inflight(&self) -> Result<usize, ConstructionError> {
        if self.max_inflight_batches == 0 {
            return Err(ConstructionError::config(
                &self.name,
                "max_inflight_batches must be at least 1",
            ));
        }
        Ok(self.max_inflight_batches)
    }
}

// src/transforms.rs
//! The pluggable stage contract and the built-in stage types.

pub mod domain;
pub mod mapping;
pub mod options;
pub mod registry;
pub mod rename;
pub mod replace;

use crate::error::{RecordFieldError, StageError};
use crate::record::Record;
use crate::stats::{CallSummary, StatsInfo};
use options::OptionDescriptor;
use serde::Serialize;

pub use options::{DecodedOptions, OptionKind, TransformerConfig};
pub use registry::{Factory, Registry, RegistryBuilder, TransformerDescription};

/// Where in the pipeline a stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// On raw lines, before the parser.
    BeforeParse,
    /// On structured records, after the parser.
    AfterParse,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BeforeParse => "before_parse",
            Stage::AfterParse => "after_parse",
        }
    }
}

/// Main trait for pipeline stages.
///
/// Both entry points mutate the given slice in place, so a call can never
/// change the number of lines or records. A record that fails is left as it
/// was in the failing respect; the call's failures come back as one
/// aggregate [`StageError`] next to the otherwise complete output.
pub trait Transformer: Send {
    fn type_name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    fn config_options(&self) -> Vec<OptionDescriptor>;

    fn description(&self) -> &'static str;

    fn sample_config(&self) -> &'static str;

    /// Raw-line entry point. Record-oriented stages reject it.
    fn raw_transform(&mut self, _lines: &mut [String]) -> Result<(), StageError> {
        Err(StageError::Unsupported {
            stage: self.type_name().to_string(),
        })
    }

    fn transform(&mut self, records: &mut [Record]) -> Result<(), StageError>;

    fn stats(&self) -> StatsInfo;

    /// Fold the text of the last call's error into the cumulative stats.
    fn set_stats(&mut self, last_error: &str) -> StatsInfo;
}

/// Run `apply` on every record in isolation and fold the outcomes into
/// `stats`. Used by every record-oriented stage.
pub fn apply_each<T, F>(
    stage: &str,
    items: &mut [T],
    stats: &mut StatsInfo,
    mut apply: F,
) -> Result<(), StageError>
where
    F: FnMut(&mut T) -> Result<(), RecordFieldError>,
{
    let outcomes: Vec<Result<(), RecordFieldError>> = items.iter_mut().map(&mut apply).collect();
    let summary = CallSummary::fold(stage, &outcomes);
    stats.absorb(&summary);
    summary.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldErrorKind;
    use serde_json::json;

    #[test]
    fn test_apply_each_keeps_every_record() {
        let mut records: Vec<Record> = (0..5)
            .map(|i| {
                let mut r = Record::new();
                r.insert("n".into(), json!(i));
                r
            })
            .collect();
        let mut stats = StatsInfo::new("test");

        let result = apply_each("test", &mut records, &mut stats, |r| {
            let n = r["n"].as_i64().unwrap_or(0);
            if n % 2 == 0 {
                r.insert("even".into(), json!(true));
                Ok(())
            } else {
                Err(RecordFieldError {
                    kind: FieldErrorKind::General,
                    key: "n".into(),
                    message: format!("{} is odd", n),
                })
            }
        });

        assert_eq!(records.len(), 5);
        assert_eq!(records.iter().filter(|r| r.contains_key("even")).count(), 3);
        assert_eq!(stats.processed, 5);
        assert_eq!(stats.failed, 2);

        let err = result.unwrap_err();
        assert_eq!(err.failed(), 2);
        assert!(err.to_string().contains("3 is odd"));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::BeforeParse.as_str(), "before_parse");
        assert_eq!(Stage::AfterParse.as_str(), "after_parse");
    }
}

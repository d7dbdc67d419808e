// src/transforms/replace.rs
use super::options::{OptionDescriptor, OptionKind};
use super::registry::Factory;
use super::{apply_each, DecodedOptions, Stage, Transformer};
use crate::error::{ConstructionError, RecordFieldError, StageError};
use crate::field_path::FieldPath;
use crate::record::{type_name, Record, Value};
use crate::stats::StatsInfo;
use regex::Regex;
use std::borrow::Cow;

pub const TYPE: &str = "replace";

const DESCRIPTION: &str =
    "replaces every match of a regular expression, on raw lines before parsing or on a string field after it";

const SAMPLE_CONFIG: &str = r#"{
    "type": "replace",
    "stage": "before_parse",
    "old": "password=\\S+",
    "new": "password=***"
}"#;

fn options() -> Vec<OptionDescriptor> {
    vec![
        OptionDescriptor::optional(
            "stage",
            OptionKind::String,
            "before_parse",
            "where the stage runs",
        )
            .one_of(&["before_parse", "after_parse"]),
        OptionDescriptor::required("old", OptionKind::String, "regular expression to search for"),
        OptionDescriptor::optional(
            "new",
            OptionKind::String,
            "",
            "replacement text ($1 refers to groups)",
        ),
        OptionDescriptor::optional(
            "key",
            OptionKind::String,
            "",
            "field path to rewrite (after_parse only)",
        ),
    ]
}

pub fn factory() -> Factory {
    Factory {
        default_stage: Stage::BeforeParse,
        description: DESCRIPTION,
        sample_config: SAMPLE_CONFIG,
        options,
        build: |decoded| Ok(Box::new(Replace::from_options(decoded)?)),
    }
}

/// Regex replacement. Lines never fail; a record fails when its field is
/// missing or not a string.
pub struct Replace {
    stage: Stage,
    pattern: Regex,
    replacement: String,
    key: Option<FieldPath>,
    stats: StatsInfo,
}

impl Replace {
    pub fn from_options(options: &DecodedOptions) -> Result<Self, ConstructionError> {
        let stage = match options.str("stage") {
            Some("after_parse") => Stage::AfterParse,
            _ => Stage::BeforeParse,
        };
        let old = options.string("old")?;
        let pattern = Regex::new(&old)
            .map_err(|e| {
                ConstructionError::config(TYPE, format!("invalid regex '{}': {}", old, e))
            })?;

        let key = match options.str("key") {
            Some(raw) if !raw.is_empty() => Some(options.field_path("key")?),
            _ => None,
        };
        if stage == Stage::AfterParse && key.is_none() {
            return Err(ConstructionError::config(
                TYPE,
                "option 'key' is required when stage is after_parse",
            ));
        }

        Ok(Replace {
            stage,
            pattern,
            replacement: options.str("new").unwrap_or_default().to_string(),
            key,
            stats: StatsInfo::new(TYPE),
        })
    }
}

impl Transformer for Replace {
    fn type_name(&self) -> &'static str {
        TYPE
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn config_options(&self) -> Vec<OptionDescriptor> {
        options()
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn sample_config(&self) -> &'static str {
        SAMPLE_CONFIG
    }

    fn raw_transform(&mut self, lines: &mut [String]) -> Result<(), StageError> {
        let Replace {
            pattern,
            replacement,
            stats,
            ..
        } = self;

        apply_each(TYPE, lines, stats, |line| {
            let replaced = match pattern.replace_all(line.as_str(), replacement.as_str()) {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            if let Some(replaced) = replaced {
                *line = replaced;
            }
            Ok(())
        })
    }

    fn transform(&mut self, records: &mut [Record]) -> Result<(), StageError> {
        let Replace {
            pattern,
            replacement,
            key,
            stats,
            ..
        } = self;
        let Some(key) = key else {
            return Ok(());
        };

        apply_each(TYPE, records, stats, |record| {
            let value = key
                .resolve(record)
                .map_err(|e| RecordFieldError::get(&*key, e))?;
            let text = value.as_str().ok_or_else(|| {
                RecordFieldError::general(
                    &*key,
                    format!("expected string, got {}", type_name(value)),
                )
            })?;

            let replaced = pattern.replace_all(text, replacement.as_str()).into_owned();
            key.assign(record, Value::String(replaced), false)
                .map_err(|e| RecordFieldError::set(&*key, e))
        })
    }

    fn stats(&self) -> StatsInfo {
        self.stats.clone()
    }

    fn set_stats(&mut self, last_error: &str) -> StatsInfo {
        self.stats.set_last_error(last_error);
        self.stats.clone()
    }
}

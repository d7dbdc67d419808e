// src/transforms/domain.rs
use super::options::{OptionDescriptor, OptionKind, KEY_OPTION};
use super::registry::Factory;
use super::{apply_each, DecodedOptions, Stage, Transformer};
use crate::error::{ConstructionError, RecordFieldError, StageError};
use crate::field_path::FieldPath;
use crate::record::{type_name, Record, Value};
use crate::stats::StatsInfo;

pub const TYPE: &str = "domain";

const DESCRIPTION: &str =
    "extracts the host of a URL-shaped field into a new field: http://sss.com/api/name gives sss.com";

const SAMPLE_CONFIG: &str = r#"{
    "type": "domain",
    "key": "request",
    "newfield": "domain"
}"#;

fn options() -> Vec<OptionDescriptor> {
    vec![
        KEY_OPTION,
        OptionDescriptor::required("newfield", OptionKind::String, "field that receives the host"),
    ]
}

pub fn factory() -> Factory {
    Factory {
        default_stage: Stage::AfterParse,
        description: DESCRIPTION,
        sample_config: SAMPLE_CONFIG,
        options,
        build: |decoded| Ok(Box::new(Domain::from_options(decoded)?)),
    }
}

/// Writes the host component of the string at `key` into `newfield`.
///
/// Failure policy: a missing source field or a non-string value counts as a
/// failed record. A value that does not parse as a URL is not a failure; the
/// stage writes an empty host instead.
pub struct Domain {
    key: FieldPath,
    new_field: FieldPath,
    stats: StatsInfo,
}

impl Domain {
    pub fn new(key: FieldPath, new_field: FieldPath) -> Self {
        Domain {
            key,
            new_field,
            stats: StatsInfo::new(TYPE),
        }
    }

    pub fn from_options(options: &DecodedOptions) -> Result<Self, ConstructionError> {
        Ok(Self::new(
            options.field_path("key")?,
            options.field_path("newfield")?,
        ))
    }
}

/// Host of `uri`, or an empty string when it is not an absolute URL.
pub fn fetch_domain(uri: &str) -> String {
    match url::Url::parse(uri.trim()) {
        Ok(parsed) => parsed
            .host_str()
            .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

impl Transformer for Domain {
    fn type_name(&self) -> &'static str {
        TYPE
    }

    fn stage(&self) -> Stage {
        Stage::AfterParse
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

    fn transform(&mut self, records: &mut [Record]) -> Result<(), StageError> {
        let Domain {
            key,
            new_field,
            stats,
        } = self;

        apply_each(TYPE, records, stats, |record| {
            let value = key
                .resolve(record)
                .map_err(|e| RecordFieldError::get(&*key, e))?;
            let text = value.as_str().ok_or_else(|| {
                RecordFieldError::general(
                    &*key,
                    format!("transform key {} data type is {}, not string", key, type_name(value)),
                )
            })?;

            let host = fetch_domain(text);
            new_field
                .assign(record, Value::String(host), false)
                .map_err(|e| RecordFieldError::set(&*new_field, e))
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

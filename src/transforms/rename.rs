// src/transforms/rename.rs
use super::options::{OptionDescriptor, OptionKind, KEY_OPTION};
use super::registry::Factory;
use super::{apply_each, DecodedOptions, Stage, Transformer};
use crate::error::{ConstructionError, FieldErrorKind, PathError, RecordFieldError, StageError};
use crate::field_path::FieldPath;
use crate::record::Record;
use crate::stats::StatsInfo;

pub const TYPE: &str = "rename";

const DESCRIPTION: &str =
    "moves a field to a new name; an existing destination field is never overwritten";

const SAMPLE_CONFIG: &str = r#"{
    "type": "rename",
    "key": "src_ip",
    "new_key_name": "client.ip"
}"#;

fn options() -> Vec<OptionDescriptor> {
    vec![
        KEY_OPTION,
        OptionDescriptor::required("new_key_name", OptionKind::String, "destination field path"),
    ]
}

pub fn factory() -> Factory {
    Factory {
        default_stage: Stage::AfterParse,
        description: DESCRIPTION,
        sample_config: SAMPLE_CONFIG,
        options,
        build: |decoded| Ok(Box::new(Rename::from_options(decoded)?)),
    }
}

pub struct Rename {
    key: FieldPath,
    new_key: FieldPath,
    stats: StatsInfo,
}

impl Rename {
    pub fn new(key: FieldPath, new_key: FieldPath) -> Result<Self, ConstructionError> {
        if key.is_prefix_of(&new_key) || new_key.is_prefix_of(&key) {
            return Err(ConstructionError::config(
                TYPE,
                format!("'{}' and '{}' overlap", key, new_key),
            ));
        }
        Ok(Rename {
            key,
            new_key,
            stats: StatsInfo::new(TYPE),
        })
    }

    pub fn from_options(options: &DecodedOptions) -> Result<Self, ConstructionError> {
        Self::new(options.field_path("key")?, options.field_path("new_key_name")?)
    }
}

impl Transformer for Rename {
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
        let Rename {
            key,
            new_key,
            stats,
        } = self;

        apply_each(TYPE, records, stats, |record| {
            let value = key
                .resolve(record)
                .map_err(|e| RecordFieldError::get(&*key, e))?
                .clone();

            match new_key.resolve(record) {
                Err(PathError::NotFound { .. }) => {}
                Ok(_) => {
                    return Err(RecordFieldError {
                        kind: FieldErrorKind::SetErr,
                        key: new_key.to_string(),
                        message: "destination field already exists".to_string(),
                    })
                }
                Err(e) => return Err(RecordFieldError::set(&*new_key, e)),
            }

            // Write first: a failed write leaves the record untouched
            new_key
                .assign(record, value, true)
                .map_err(|e| RecordFieldError::set(&*new_key, e))?;
            key.remove(record)
                .map(|_| ())
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

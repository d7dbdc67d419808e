// src/transforms/mapping.rs
use super::options::{OptionDescriptor, OptionKind, KEY_OPTION};
use super::registry::Factory;
use super::{apply_each, DecodedOptions, Stage, Transformer};
use crate::error::{ConstructionError, RecordFieldError, StageError};
use crate::field_path::FieldPath;
use crate::record::{type_name, Record, Value};
use crate::stats::StatsInfo;
use std::collections::HashMap;
use std::path::Path;

pub const TYPE: &str = "mapping";

const DESCRIPTION: &str =
    "looks the value of a field up in a two-column CSV table (from,to) and writes the mapped value";

const SAMPLE_CONFIG: &str = r#"{
    "type": "mapping",
    "key": "status",
    "new": "status_text",
    "data_path": "/etc/logweir/status.csv"
}"#;

fn options() -> Vec<OptionDescriptor> {
    vec![
        KEY_OPTION,
        OptionDescriptor::optional(
            "new",
            OptionKind::String,
            "",
            "destination field (defaults to key)",
        ),
        OptionDescriptor::required("data_path", OptionKind::String, "CSV file of from,to rows"),
    ]
}

pub fn factory() -> Factory {
    Factory {
        default_stage: Stage::AfterParse,
        description: DESCRIPTION,
        sample_config: SAMPLE_CONFIG,
        options,
        build: |decoded| Ok(Box::new(Mapping::from_options(decoded)?)),
    }
}

/// Table lookup on one field.
///
/// Failure policy: a missing field or a mapping/sequence value fails the
/// record. A value with no row in the table is left alone and is not a
/// failure.
pub struct Mapping {
    key: FieldPath,
    new_field: FieldPath,
    table: HashMap<String, String>,
    stats: StatsInfo,
}

impl Mapping {
    pub fn new(key: FieldPath, new_field: FieldPath, table: HashMap<String, String>) -> Self {
        Mapping {
            key,
            new_field,
            table,
            stats: StatsInfo::new(TYPE),
        }
    }

    pub fn from_options(options: &DecodedOptions) -> Result<Self, ConstructionError> {
        let key = options.field_path("key")?;
        let new_field = match options.str("new") {
            Some(raw) if !raw.is_empty() => options.field_path("new")?,
            _ => key.clone(),
        };
        let table = load_table(Path::new(&options.string("data_path")?))?;
        Ok(Self::new(key, new_field, table))
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }
}

/// Read a headerless `from,to` CSV file. Extra columns are ignored.
pub fn load_table(path: &Path) -> Result<HashMap<String, String>, ConstructionError> {
    let load_error = |message: String| ConstructionError::ResourceLoad {
        stage: TYPE.to_string(),
        path: path.display().to_string(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| load_error(e.to_string()))?;

    let mut table = HashMap::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|e| load_error(e.to_string()))?;
        match (row.get(0), row.get(1)) {
            (Some(from), Some(to)) => {
                table.insert(from.to_string(), to.to_string());
            }
            _ if row.iter().all(str::is_empty) => continue,
            _ => return Err(load_error(format!("row {} has fewer than two columns", index + 1))),
        }
    }
    Ok(table)
}

fn lookup_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

impl Transformer for Mapping {
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
        let Mapping {
            key,
            new_field,
            table,
            stats,
        } = self;

        apply_each(TYPE, records, stats, |record| {
            let value = key
                .resolve(record)
                .map_err(|e| RecordFieldError::get(&*key, e))?;
            let lookup = lookup_key(value).ok_or_else(|| {
                RecordFieldError::general(&*key, format!("cannot map a {}", type_name(value)))
            })?;

            let Some(mapped) = table.get(&lookup) else {
                return Ok(());
            };
            new_field
                .assign(record, Value::String(mapped.clone()), true)
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

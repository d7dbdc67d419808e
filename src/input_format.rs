// src/input_format.rs - Parser boundary: raw lines in, records out

use crate::error::{ConstructionError, ParseError, StageError};
use crate::record::{type_name, Record, Value};
use serde::Deserialize;

/// Parser configuration, tagged by `type`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputFormat {
    #[default]
    Jsonl,
    Logfmt,
    Csv {
        /// Comma-separated `name type` pairs, e.g. `host string, status long`
        schema: String,
        #[serde(default = "default_splitter")]
        splitter: String,
    },
    Raw,
}

fn default_splitter() -> String {
    ",".to_string()
}

impl InputFormat {
    pub fn build(&self) -> Result<Box<dyn LineParser>, ConstructionError> {
        Ok(match self {
            InputFormat::Jsonl => Box::new(JsonlParser::new()),
            InputFormat::Logfmt => Box::new(LogfmtParser::new()),
            InputFormat::Csv { schema, splitter } => Box::new(CsvParser::new(schema, splitter)?),
            InputFormat::Raw => Box::new(RawParser::new()),
        })
    }
}

/// Result of parsing one chunk of lines. Failed lines are reported, the
/// rest still come through as records.
#[derive(Debug, Default)]
pub struct Parsed {
    pub records: Vec<Record>,
    pub errors: Vec<ParseError>,
}

impl Parsed {
    /// Lines that were attempted (blank lines are not counted).
    pub fn total(&self) -> usize {
        self.records.len() + self.errors.len()
    }

    /// The aggregate error of this chunk, if any line failed.
    pub fn aggregate(&self, parser: &str) -> Result<(), StageError> {
        match self.errors.last() {
            Some(last) => Err(StageError::Records {
                stage: parser.to_string(),
                failed: self.errors.len(),
                total: self.total(),
                last: last.to_string(),
            }),
            None => Ok(()),
        }
    }
}

pub trait LineParser: Send {
    fn name(&self) -> &'static str;

    fn parse_line(&self, line: &str) -> Result<Record, String>;

    /// Parse a chunk of lines. `first_line` is the line number of `lines[0]`.
    fn parse(&self, lines: &[String], first_line: usize) -> Parsed {
        let mut parsed = Parsed::default();
        for (offset, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match self.parse_line(line) {
                Ok(record) => parsed.records.push(record),
                Err(message) => parsed.errors.push(ParseError {
                    line: first_line + offset,
                    message,
                }),
            }
        }
        parsed
    }
}

#[derive(Debug, Default)]
pub struct JsonlParser;

impl JsonlParser {
    pub fn new() -> Self {
        Self
    }
}

impl LineParser for JsonlParser {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn parse_line(&self, line: &str) -> Result<Record, String> {
        let value: Value =
            serde_json::from_str(line.trim()).map_err(|e| format!("Failed to parse JSONL: {}", e))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(format!("expected a JSON object, got {}", type_name(&other))),
        }
    }
}

#[derive(Debug, Default)]
pub struct RawParser;

impl RawParser {
    pub fn new() -> Self {
        Self
    }
}

impl LineParser for RawParser {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn parse_line(&self, line: &str) -> Result<Record, String> {
        let mut record = Record::new();
        record.insert("raw".to_string(), Value::String(line.to_string()));
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Long,
    Float,
    Bool,
}

impl ColumnType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ColumnType::String),
            "long" => Some(ColumnType::Long),
            "float" => Some(ColumnType::Float),
            "bool" => Some(ColumnType::Bool),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Long => "long",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
        }
    }

    fn convert(&self, raw: &str) -> Result<Value, String> {
        let bad = || format!("cannot parse '{}' as {}", raw, self.as_str());
        match self {
            ColumnType::String => Ok(Value::String(raw.to_string())),
            ColumnType::Long => raw.trim().parse::<i64>().map(Value::from).map_err(|_| bad()),
            ColumnType::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(bad),
            ColumnType::Bool => match raw.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(bad()),
            },
        }
    }
}

/// Delimited lines checked against a fixed schema of typed columns.
#[derive(Debug)]
pub struct CsvParser {
    columns: Vec<(String, ColumnType)>,
    delimiter: u8,
}

impl CsvParser {
    pub fn new(schema: &str, splitter: &str) -> Result<Self, ConstructionError> {
        let invalid = |message: String| ConstructionError::config("csv", message);

        let delimiter = match splitter.as_bytes() {
            [byte] => *byte,
            _ => return Err(invalid(format!("splitter must be one byte, got '{}'", splitter))),
        };

        let mut columns = Vec::new();
        for field in schema.split(',').filter(|f| !f.trim().is_empty()) {
            let parts: Vec<&str> = field.split_whitespace().collect();
            let column = match parts.as_slice() {
                [name, kind] => ColumnType::from_name(kind).map(|kind| (name.to_string(), kind)),
                _ => None,
            };
            let column = column.ok_or_else(|| {
                invalid(format!(
                    "bad schema field '{}', expected 'name string|long|float|bool'",
                    field.trim()
                ))
            })?;
            columns.push(column);
        }

        if columns.is_empty() {
            return Err(invalid("schema cannot be empty".to_string()));
        }
        Ok(CsvParser { columns, delimiter })
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }
}

impl LineParser for CsvParser {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn parse_line(&self, line: &str) -> Result<Record, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .from_reader(line.as_bytes());

        let row = match reader.records().next() {
            Some(row) => row.map_err(|e| format!("Failed to parse CSV: {}", e))?,
            None => return Err("empty CSV line".to_string()),
        };

        if row.len() != self.columns.len() {
            return Err(format!(
                "CSV line has {} fields but schema has {}",
                row.len(),
                self.columns.len()
            ));
        }

        let mut record = Record::new();
        for ((name, kind), raw) in self.columns.iter().zip(row.iter()) {
            let value = kind.convert(raw).map_err(|e| format!("{}: {}", name, e))?;
            record.insert(name.clone(), value);
        }
        Ok(record)
    }
}

#[derive(Debug, Default)]
pub struct LogfmtParser;

impl LogfmtParser {
    pub fn new() -> Self {
        Self
    }

    // Parse logfmt line: key1=value1 key2="value with spaces" key3=value3
    fn parse_logfmt_pairs(&self, line: &str) -> Result<Vec<(String, String)>, String> {
        let mut pairs = Vec::new();
        let mut chars = line.chars().peekable();

        loop {
            while matches!(chars.peek(), Some(' ') | Some('\t')) {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            while let Some(&ch) = chars.peek() {
                match ch {
                    '=' => break,
                    ' ' | '\t' => return Err(format!("Expected '=' after key '{}'", key)),
                    _ => {
                        key.push(ch);
                        chars.next();
                    }
                }
            }

            if key.is_empty() {
                return Err("Empty key found".to_string());
            }
            if chars.next() != Some('=') {
                return Err(format!("Expected '=' after key '{}'", key));
            }

            let mut value = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some('r') => value.push('\r'),
                            Some('\\') => value.push('\\'),
                            Some('"') => value.push('"'),
                            Some(other) => {
                                value.push('\\');
                                value.push(other);
                            }
                            None => break,
                        },
                        _ => value.push(ch),
                    }
                }
                if !closed {
                    return Err(format!("Unclosed quote in value of '{}'", key));
                }
            } else {
                while let Some(&ch) = chars.peek() {
                    if ch == ' ' || ch == '\t' {
                        break;
                    }
                    value.push(ch);
                    chars.next();
                }
            }

            pairs.push((key, value));
        }

        Ok(pairs)
    }
}

impl LineParser for LogfmtParser {
    fn name(&self) -> &'static str {
        "logfmt"
    }

    fn parse_line(&self, line: &str) -> Result<Record, String> {
        let mut record = Record::new();
        for (key, value) in self.parse_logfmt_pairs(line.trim())? {
            record.insert(key, Value::String(value));
        }
        Ok(record)
    }
}

// src/transforms/options.rs
//! Option descriptors and the decode step that turns an untyped
//! transformer configuration into validated, typed option values.

use crate::error::ConstructionError;
use crate::field_path::FieldPath;
use crate::record::{type_name, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Map;

pub const KEY_TYPE: &str = "type";
pub const KEY_SAMPLE_LOG: &str = "sampleLog";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    String,
    Integer,
    Bool,
}

/// Declares one configuration option of a stage type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionDescriptor {
    pub name: &'static str,
    pub kind: OptionKind,
    pub default: Option<&'static str>,
    pub required: bool,
    pub allowed: &'static [&'static str],
    pub description: &'static str,
}

impl OptionDescriptor {
    pub const fn required(name: &'static str, kind: OptionKind, description: &'static str) -> Self {
        OptionDescriptor {
            name,
            kind,
            default: None,
            required: true,
            allowed: &[],
            description,
        }
    }

    pub const fn optional(
        name: &'static str,
        kind: OptionKind,
        default: &'static str,
        description: &'static str,
    ) -> Self {
        OptionDescriptor {
            name,
            kind,
            default: Some(default),
            required: false,
            allowed: &[],
            description,
        }
    }

    /// Restrict the option to a fixed set of values.
    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }
}

/// The source field most stages read from.
pub const KEY_OPTION: OptionDescriptor =
    OptionDescriptor::required(
        "key",
        OptionKind::String,
        "field path to read (e.g. request or a.b[0])",
    );

/// Untyped configuration of one transformer instance, as written in the
/// runner configuration. `type` names the registry entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TransformerConfig(Map<String, Value>);

impl TransformerConfig {
    pub fn new(map: Map<String, Value>) -> Self {
        TransformerConfig(map)
    }

    pub fn from_value(value: Value) -> Result<Self, ConstructionError> {
        match value {
            Value::Object(map) => Ok(TransformerConfig(map)),
            other => Err(ConstructionError::config(
                "transformer",
                format!("expected a mapping, got {}", type_name(&other)),
            )),
        }
    }

    pub fn type_name(&self) -> Result<&str, ConstructionError> {
        match self.0.get(KEY_TYPE) {
            Some(Value::String(name)) if !name.trim().is_empty() => Ok(name.trim()),
            Some(other) => Err(ConstructionError::config(
                "transformer",
                format!("'type' must be a non-empty string, got {}", other),
            )),
            None => Err(ConstructionError::config("transformer", "missing required option 'type'")),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The representative input used to validate this configuration.
    /// Accepts a JSON string or an inline mapping/sequence.
    pub fn sample_log(&self) -> Option<String> {
        match self.0.get(KEY_SAMPLE_LOG)? {
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => Some(text.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Validate and convert the options declared by a stage type.
    pub fn decode(
        &self,
        stage: &str,
        options: &[OptionDescriptor],
    ) -> Result<DecodedOptions, ConstructionError> {
        let mut values = IndexMap::new();

        for option in options {
            let raw = self.0.get(option.name).filter(|v| !is_blank(v));
            let value = match raw {
                Some(raw) => convert(stage, option, raw)?,
                None if option.required => {
                    return Err(ConstructionError::config(
                        stage,
                        format!("missing required option '{}'", option.name),
                    ))
                }
                None => match option.default {
                    Some(default) => convert(stage, option, &Value::String(default.to_string()))?,
                    None => continue,
                },
            };

            if !option.allowed.is_empty() {
                let text = value.as_str().unwrap_or_default();
                if !option.allowed.contains(&text) {
                    return Err(ConstructionError::config(
                        stage,
                        format!(
                            "option '{}' must be one of [{}], got '{}'",
                            option.name,
                            option.allowed.join(", "),
                            text
                        ),
                    ));
                }
            }

            values.insert(option.name, value);
        }

        for key in self.0.keys() {
            let known = key == KEY_TYPE
                || key == KEY_SAMPLE_LOG
                || options.iter().any(|o| o.name == key.as_str());
            if !known {
                tracing::warn!(
                    stage = %stage,
                    option = %key,
                    "ignoring unknown transformer option"
                );
            }
        }

        Ok(DecodedOptions {
            stage: stage.to_string(),
            values,
        })
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn convert(
    stage: &str,
    option: &OptionDescriptor,
    raw: &Value,
) -> Result<Value, ConstructionError> {
    let mismatch = || {
        ConstructionError::config(
            stage,
            format!(
                "option '{}' expects {:?}, got {} ({})",
                option.name,
                option.kind,
                type_name(raw),
                raw
            ),
        )
    };

    match option.kind {
        OptionKind::String => match raw {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        OptionKind::Integer => match raw {
            Value::Number(n) if n.is_i64() => Ok(raw.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        OptionKind::Bool => match raw {
            Value::Bool(_) => Ok(raw.clone()),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
    }
}

/// Option values after validation, keyed by option name.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedOptions {
    stage: String,
    values: IndexMap<&'static str, Value>,
}

impl DecodedOptions {
    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn string(&self, name: &str) -> Result<String, ConstructionError> {
        self.str(name)
            .map(str::to_string)
            .ok_or_else(|| self.unset(name))
    }

    pub fn integer(&self, name: &str) -> Result<i64, ConstructionError> {
        self.values
            .get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| self.unset(name))
    }

    pub fn boolean(&self, name: &str) -> Result<bool, ConstructionError> {
        self.values
            .get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| self.unset(name))
    }

    pub fn field_path(&self, name: &str) -> Result<FieldPath, ConstructionError> {
        let raw = self.string(name)?;
        FieldPath::parse(&raw).map_err(|e| ConstructionError::config(&self.stage, e.to_string()))
    }

    fn unset(&self, name: &str) -> ConstructionError {
        ConstructionError::config(&self.stage, format!("option '{}' is not set", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OPTIONS: &[OptionDescriptor] = &[
        KEY_OPTION,
        OptionDescriptor::optional("limit", OptionKind::Integer, "10", "max items"),
        OptionDescriptor::optional("strict", OptionKind::Bool, "false", "strict mode"),
        OptionDescriptor::optional("mode", OptionKind::String, "fast", "mode")
            .one_of(&["fast", "slow"]),
        OptionDescriptor::optional("note", OptionKind::String, "", "free text"),
    ];

    fn config(value: Value) -> TransformerConfig {
        TransformerConfig::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let decoded = config(json!({"type": "x", "key": "a.b"}))
            .decode("x", OPTIONS)
            .unwrap();
        assert_eq!(decoded.string("key").unwrap(), "a.b");
        assert_eq!(decoded.integer("limit").unwrap(), 10);
        assert!(!decoded.boolean("strict").unwrap());
        assert_eq!(decoded.str("mode"), Some("fast"));
        assert_eq!(decoded.field_path("key").unwrap().depth(), 2);
    }

    #[test]
    fn test_string_values_are_converted() {
        let decoded = config(json!({"key": "k", "limit": "25", "strict": "TRUE"}))
            .decode("x", OPTIONS)
            .unwrap();
        assert_eq!(decoded.integer("limit").unwrap(), 25);
        assert!(decoded.boolean("strict").unwrap());
    }

    #[test]
    fn test_missing_required_option() {
        let err = config(json!({"type": "x"})).decode("x", OPTIONS).unwrap_err();
        assert_eq!(
            err,
            ConstructionError::config("x", "missing required option 'key'")
        );

        // Blank values count as missing
        assert!(config(json!({"key": "  "})).decode("x", OPTIONS).is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let err = config(json!({"key": "k", "limit": "many"}))
            .decode("x", OPTIONS)
            .unwrap_err();
        assert!(err.to_string().contains("'limit'"));

        assert!(config(json!({"key": {"nested": 1}})).decode("x", OPTIONS).is_err());
    }

    #[test]
    fn test_allowed_values_enforced() {
        let err = config(json!({"key": "k", "mode": "warp"}))
            .decode("x", OPTIONS)
            .unwrap_err();
        assert!(err.to_string().contains("must be one of [fast, slow]"));
    }

    #[test]
    fn test_invalid_field_path_is_config_error() {
        let decoded = config(json!({"key": "a..b"})).decode("x", OPTIONS).unwrap();
        assert!(matches!(
            decoded.field_path("key"),
            Err(ConstructionError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_type_name_and_sample() {
        let cfg = config(json!({"type": " domain ", "sampleLog": {"request": "http://a.com"}}));
        assert_eq!(cfg.type_name().unwrap(), "domain");
        assert_eq!(cfg.sample_log().unwrap(), r#"{"request":"http://a.com"}"#);

        assert!(config(json!({"key": "a"})).type_name().is_err());
        assert!(TransformerConfig::from_value(json!([1])).is_err());
    }
}

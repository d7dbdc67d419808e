//! Addressing nested values inside a record by a dotted/indexed path.
//!
//! Examples:
//! - `request` → top-level field `request`
//! - `user.name` → `{"user": {"name": ...}}`
//! - `items[1].id` or `items.1.id` → second element of the `items` sequence

use crate::error::PathError;
use crate::record::{type_name, Record, Value};
use serde_json::map::Entry;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", key),
            Segment::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// A parsed address into a record's nested structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    root: String,
    rest: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let invalid = |reason: &str| PathError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if path.trim().is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            // Split "items[0][1]" into the key and its bracketed indexes
            let (key, mut brackets) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };

            if key.is_empty() && (brackets.is_empty() || segments.is_empty()) {
                return Err(invalid("empty key"));
            }
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }

            while !brackets.is_empty() {
                if !brackets.starts_with('[') {
                    return Err(invalid("unexpected text after ']'"));
                }
                let close = brackets.find(']').ok_or_else(|| invalid("unclosed '['"))?;
                let index = brackets[1..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(Segment::Index(index));
                brackets = &brackets[close + 1..];
            }
        }

        // A record is a mapping, so the first segment is always a key
        let mut segments = segments.into_iter();
        let root = match segments.next() {
            Some(Segment::Key(key)) => key,
            _ => return Err(invalid("path must start with a key")),
        };

        Ok(FieldPath {
            raw: path.to_string(),
            root,
            rest: segments.collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Top-level field name.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Number of segments, including the root key.
    pub fn depth(&self) -> usize {
        self.rest.len() + 1
    }

    /// True if `other` addresses this path or something nested under it.
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        self.root == other.root
            && self.rest.len() <= other.rest.len()
            && self.rest.iter().zip(&other.rest).all(|(a, b)| a == b)
    }

    pub fn resolve<'a>(&self, record: &'a Record) -> Result<&'a Value, PathError> {
        let mut current = record
            .get(&self.root)
            .ok_or_else(|| self.not_found(&self.root))?;

        for segment in &self.rest {
            current = self.step(current, segment)?;
        }
        Ok(current)
    }

    /// Write `value` at this path.
    ///
    /// With `create_intermediate`, missing intermediate mappings are created;
    /// otherwise a missing intermediate fails with `NotFound`. Existing values
    /// are replaced outright, whatever their type.
    pub fn assign(
        &self,
        record: &mut Record,
        value: Value,
        create_intermediate: bool,
    ) -> Result<(), PathError> {
        let Some((last, parents)) = self.rest.split_last() else {
            record.insert(self.root.clone(), value);
            return Ok(());
        };

        let mut current = match record.entry(self.root.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) if create_intermediate => {
                entry.insert(Value::Object(Record::new()))
            }
            Entry::Vacant(_) => return Err(self.not_found(&self.root)),
        };

        for segment in parents {
            current = self.step_mut(current, segment, create_intermediate)?;
        }
        self.set_child(current, last, value)
    }

    /// Remove and return the value at this path.
    pub fn remove(&self, record: &mut Record) -> Result<Value, PathError> {
        let Some((last, parents)) = self.rest.split_last() else {
            return record
                .remove(&self.root)
                .ok_or_else(|| self.not_found(&self.root));
        };

        let mut current = record
            .get_mut(&self.root)
            .ok_or_else(|| self.not_found(&self.root))?;
        for segment in parents {
            current = self.step_mut(current, segment, false)?;
        }

        match current {
            Value::Object(map) => {
                let key = segment_key(last);
                map.remove(&key).ok_or_else(|| self.not_found(&key))
            }
            Value::Array(items) => {
                let index = self.sequence_index(last, items.len())?;
                Ok(items.remove(index))
            }
            other => Err(self.type_mismatch(last, other)),
        }
    }

    fn step<'a>(&self, current: &'a Value, segment: &Segment) -> Result<&'a Value, PathError> {
        match current {
            Value::Object(map) => {
                let key = segment_key(segment);
                map.get(&key).ok_or_else(|| self.not_found(&key))
            }
            Value::Array(items) => {
                let index = self.sequence_index(segment, items.len())?;
                Ok(&items[index])
            }
            other => Err(self.type_mismatch(segment, other)),
        }
    }

    fn step_mut<'a>(
        &self,
        current: &'a mut Value,
        segment: &Segment,
        create: bool,
    ) -> Result<&'a mut Value, PathError> {
        match current {
            Value::Object(map) => {
                let key = segment_key(segment);
                match map.entry(key) {
                    Entry::Occupied(entry) => Ok(entry.into_mut()),
                    Entry::Vacant(entry) if create => {
                        Ok(entry.insert(Value::Object(Record::new())))
                    }
                    Entry::Vacant(entry) => Err(self.not_found(entry.key())),
                }
            }
            Value::Array(items) => {
                let index = self.sequence_index(segment, items.len())?;
                Ok(&mut items[index])
            }
            other => Err(self.type_mismatch(segment, other)),
        }
    }

    fn set_child(
        &self,
        parent: &mut Value,
        segment: &Segment,
        value: Value,
    ) -> Result<(), PathError> {
        match parent {
            Value::Object(map) => {
                map.insert(segment_key(segment), value);
                Ok(())
            }
            Value::Array(items) => {
                let index = self.sequence_index(segment, items.len())?;
                items[index] = value;
                Ok(())
            }
            other => Err(self.type_mismatch(segment, other)),
        }
    }

    /// Position addressed by `segment` in a sequence of length `len`.
    /// Keys are accepted when they are integers (`items.0`).
    fn sequence_index(&self, segment: &Segment, len: usize) -> Result<usize, PathError> {
        let index = match segment {
            Segment::Index(index) => *index,
            Segment::Key(key) => key.parse::<usize>().map_err(|_| self.not_found(key))?,
        };
        if index >= len {
            return Err(PathError::IndexOutOfRange {
                path: self.raw.clone(),
                index,
                len,
            });
        }
        Ok(index)
    }

    fn not_found(&self, segment: &str) -> PathError {
        PathError::NotFound {
            path: self.raw.clone(),
            segment: segment.to_string(),
        }
    }

    fn type_mismatch(&self, segment: &Segment, found: &Value) -> PathError {
        PathError::TypeMismatch {
            path: self.raw.clone(),
            segment: segment.to_string(),
            found: type_name(found),
        }
    }
}

// Index segments address mappings by their decimal key
fn segment_key(segment: &Segment) -> String {
    match segment {
        Segment::Key(key) => key.clone(),
        Segment::Index(index) => index.to_string(),
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

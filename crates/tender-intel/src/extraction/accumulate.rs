//! Folding extraction fragments into a single aggregate record
//!
//! Merge rules are chosen from the field kind declared on the record shape:
//!
//! - lists: union, first-seen order, duplicates by JSON equality
//! - mappings: shallow merge, new keys win
//! - booleans: logical OR
//! - scalars: a non-empty value replaces the existing one when that is empty,
//!   when it renders to strictly longer text, or when the fragment's
//!   confidence is strictly higher than the aggregate's
//!
//! Empty values (null, blank strings, empty lists and mappings) never
//! overwrite anything.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::types::SemanticTenderDetail;

use super::schema::{conform, empty_value, text_of, FieldKind, RecordShape, SchemaCompiler};

/// One decoded, partial extraction result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionFragment(Map<String, Value>);

impl ExtractionFragment {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Accept a JSON object; anything else is a decode error
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(Error::decode(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| Error::decode(format!("invalid JSON arguments: {}", e)))?;
        Self::from_value(value)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Running merge target for one tender's extraction
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate(Map<String, Value>);

impl Aggregate {
    pub fn from_skeleton(skeleton: Map<String, Value>) -> Self {
        Self(skeleton)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Indented JSON snapshot embedded in prompts
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }

    /// Conform to `shape` and deserialize into the typed record
    pub fn materialize<T: DeserializeOwned>(&self, shape: &RecordShape) -> Result<T> {
        let conformed = conform(shape, &self.0);
        serde_json::from_value(Value::Object(conformed))
            .map_err(|e| Error::schema(format!("aggregate does not fit {}: {}", shape.name(), e)))
    }
}

/// Merges fragments according to a record shape
#[derive(Debug, Clone)]
pub struct AccumulationEngine {
    shape: RecordShape,
    confidence_field: String,
}

impl AccumulationEngine {
    pub fn new(shape: RecordShape) -> Self {
        Self {
            shape,
            confidence_field: SemanticTenderDetail::CONFIDENCE_FIELD.to_string(),
        }
    }

    pub fn with_confidence_field(mut self, field: impl Into<String>) -> Self {
        self.confidence_field = field.into();
        self
    }

    pub fn shape(&self) -> &RecordShape {
        &self.shape
    }

    /// Empty starting aggregate
    pub fn skeleton(&self) -> Aggregate {
        Aggregate(SchemaCompiler::skeleton(&self.shape))
    }

    /// Confidence recorded on a fragment or aggregate, 0.0 when absent
    pub fn confidence_of(&self, fields: &Map<String, Value>) -> f64 {
        fields
            .get(&self.confidence_field)
            .and_then(as_number)
            .unwrap_or(0.0)
    }

    /// Fold `fragment` into `aggregate`, returning the new snapshot
    pub fn merge(&self, fragment: &ExtractionFragment, aggregate: &Aggregate) -> Aggregate {
        let fragment_confidence = self.confidence_of(fragment.as_map());
        let aggregate_confidence = self.confidence_of(aggregate.as_map());
        let more_confident = fragment_confidence > aggregate_confidence;

        let mut merged = merge_record(&self.shape, fragment.as_map(), aggregate.as_map(), more_confident);

        if let Some(value) = fragment.get(&self.confidence_field) {
            if as_number(value).is_some() && self.shape.get(&self.confidence_field).is_some() {
                merged.insert(
                    self.confidence_field.clone(),
                    json!(fragment_confidence.max(aggregate_confidence)),
                );
            }
        }

        tracing::trace!(
            "Merged fragment with {} keys (confidence {} vs {})",
            fragment.as_map().len(),
            fragment_confidence,
            aggregate_confidence
        );
        Aggregate(merged)
    }
}

fn merge_record(
    shape: &RecordShape,
    fragment: &Map<String, Value>,
    existing: &Map<String, Value>,
    more_confident: bool,
) -> Map<String, Value> {
    let mut merged = existing.clone();

    for (key, new_value) in fragment {
        let Some(field) = shape.get(key) else {
            tracing::trace!("Ignoring undeclared field {} in {}", key, shape.name());
            continue;
        };

        let current = merged
            .remove(key)
            .unwrap_or_else(|| empty_value(&field.kind));
        let value = merge_field(&field.kind, current, new_value, more_confident);
        merged.insert(key.clone(), value);
    }

    merged
}

fn merge_field(kind: &FieldKind, current: Value, new_value: &Value, more_confident: bool) -> Value {
    if is_empty(new_value) {
        return current;
    }

    match kind {
        FieldKind::List(_) => union(current, new_value),
        FieldKind::Mapping => {
            let mut map = match current {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            match new_value {
                Value::Object(new_map) => {
                    for (k, v) in new_map {
                        map.insert(k.clone(), v.clone());
                    }
                }
                other => tracing::debug!("Ignoring non-object value for mapping field: {}", other),
            }
            Value::Object(map)
        }
        FieldKind::Nested(shape) => match new_value {
            Value::Object(new_map) => {
                let existing = match current {
                    Value::Object(map) => map,
                    _ => SchemaCompiler::skeleton(shape),
                };
                Value::Object(merge_record(shape, new_map, &existing, more_confident))
            }
            _ => current,
        },
        FieldKind::Boolean => Value::Bool(truthy(&current) || truthy(new_value)),
        FieldKind::String | FieldKind::Integer | FieldKind::Number | FieldKind::Enumeration(_) => {
            let replace = is_empty(&current)
                || text_len(new_value) > text_len(&current)
                || more_confident;
            if replace {
                new_value.clone()
            } else {
                current
            }
        }
    }
}

fn union(current: Value, new_value: &Value) -> Value {
    let mut items = match current {
        Value::Array(items) => items,
        other if is_empty(&other) => Vec::new(),
        other => vec![other],
    };

    let incoming: Vec<&Value> = match new_value {
        Value::Array(values) => values.iter().collect(),
        single => vec![single],
    };
    for item in incoming {
        if !is_empty(item) && !items.contains(item) {
            items.push(item.clone());
        }
    }

    Value::Array(items)
}

/// Null, blank strings, empty lists and empty mappings
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

fn text_len(value: &Value) -> usize {
    text_of(value).chars().count()
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

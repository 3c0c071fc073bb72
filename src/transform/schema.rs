// Schema-driven validate/transform rules for JSON object payloads.
//
// Rules run in a fixed order: insert defaults, check required columns,
// rename, delete, cast. Renames see the payload after defaults were inserted,
// so a default may be given under the pre-rename name.

use super::{TransformFailure, Transformer};
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CastType {
    #[serde(rename = "str", alias = "string")]
    Str,
    #[serde(rename = "int", alias = "integer")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "bool", alias = "boolean")]
    Bool,
}

/// Transform rules for one process, as loaded from its schema file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    #[serde(default)]
    pub insert_value_if_column_missing: Map<String, Value>,
    #[serde(default)]
    pub required_columns: Vec<String>,
    #[serde(default)]
    pub rename_columns: Map<String, Value>,
    #[serde(default)]
    pub delete_columns: Vec<String>,
    #[serde(default)]
    pub cast_values: serde_json::Map<String, Value>,
}

impl Schema {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, SchemaError> {
        let schema: Schema = serde_json::from_str(content)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Checks the parts serde cannot: rename targets and cast types must be strings
    /// naming something meaningful.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (old, new) in &self.rename_columns {
            let Some(new) = new.as_str() else {
                return Err(SchemaError::InvalidRule(format!(
                    "rename_columns.{old} must map to a string"
                )));
            };
            if new.is_empty() || old.is_empty() {
                return Err(SchemaError::InvalidRule(
                    "rename_columns entries must not be empty".to_string(),
                ));
            }
            if old.split('.').count() > 2 {
                return Err(SchemaError::InvalidRule(format!(
                    "rename_columns.{old}: only one level of nesting is supported"
                )));
            }
        }
        for column in self.cast_values.keys() {
            self.cast_type(column)?;
        }
        Ok(())
    }

    fn cast_type(&self, column: &str) -> Result<CastType, SchemaError> {
        let value = self.cast_values.get(column).cloned().unwrap_or(Value::Null);
        serde_json::from_value::<CastType>(value).map_err(|e| {
            SchemaError::InvalidRule(format!("cast_values.{column}: {e}"))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.insert_value_if_column_missing.is_empty()
            && self.required_columns.is_empty()
            && self.rename_columns.is_empty()
            && self.delete_columns.is_empty()
            && self.cast_values.is_empty()
    }
}

/// Default [`Transformer`] for processes with `validateAndTransform` enabled.
#[derive(Debug, Clone, Default)]
pub struct SchemaTransformer {
    schema: Schema,
    casts: Vec<(String, CastType)>,
}

impl SchemaTransformer {
    pub fn new(schema: Schema) -> Result<Self, SchemaError> {
        schema.validate()?;
        let casts = schema
            .cast_values
            .keys()
            .map(|column| schema.cast_type(column).map(|cast| (column.clone(), cast)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { schema, casts })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn apply(&self, mut object: Map<String, Value>) -> Result<Map<String, Value>, TransformFailure> {
        for (column, default) in &self.schema.insert_value_if_column_missing {
            if !object.contains_key(column) {
                object.insert(column.clone(), default.clone());
            }
        }

        for column in &self.schema.required_columns {
            if !object.contains_key(column) {
                return Err(TransformFailure::Validation(format!(
                    "missing required column \"{column}\""
                )));
            }
        }

        for (old, new) in &self.schema.rename_columns {
            let new = new.as_str().unwrap_or_default();
            let value = match old.split_once('.') {
                Some((outer, inner)) => object
                    .get_mut(outer)
                    .and_then(Value::as_object_mut)
                    .and_then(|nested| nested.shift_remove(inner)),
                None => object.shift_remove(old.as_str()),
            };
            match value {
                Some(value) => {
                    object.insert(new.to_string(), value);
                }
                None => {
                    return Err(TransformFailure::Transform(format!(
                        "did not find column \"{old}\" to rename"
                    )));
                }
            }
        }

        for column in &self.schema.delete_columns {
            if object.shift_remove(column.as_str()).is_none() {
                return Err(TransformFailure::Transform(format!(
                    "did not find column \"{column}\" to delete"
                )));
            }
        }

        for (column, cast) in &self.casts {
            let Some(value) = object.get_mut(column.as_str()) else {
                return Err(TransformFailure::Transform(format!(
                    "did not find column \"{column}\" to cast"
                )));
            };
            *value = cast_value(value, *cast).map_err(|reason| {
                TransformFailure::Transform(format!("cannot cast \"{column}\": {reason}"))
            })?;
        }

        Ok(object)
    }
}

impl Transformer for SchemaTransformer {
    fn transform(&self, payload: &[u8]) -> Result<Vec<u8>, TransformFailure> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| TransformFailure::Validation(format!("malformed JSON: {e}")))?;
        let Value::Object(object) = value else {
            return Err(TransformFailure::Validation(
                "payload is not a JSON object".to_string(),
            ));
        };

        let transformed = self.apply(object)?;

        let mut out = serde_json::to_vec(&Value::Object(transformed))
            .map_err(|e| TransformFailure::Transform(format!("serialization failed: {e}")))?;
        out.push(b'\n');
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "schema"
    }
}

fn cast_value(value: &Value, cast: CastType) -> Result<Value, String> {
    match (cast, value) {
        (CastType::Str, Value::String(_)) => Ok(value.clone()),
        (CastType::Str, other) => Ok(Value::String(other.to_string())),

        (CastType::Int, Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::from(u))
            } else {
                let f = n.as_f64().ok_or("not a finite number")?;
                if !f.is_finite() || f.trunc().abs() > i64::MAX as f64 {
                    return Err(format!("{f} is out of integer range"));
                }
                Ok(Value::from(f.trunc() as i64))
            }
        }
        (CastType::Int, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("\"{s}\" is not an integer")),
        (CastType::Int, Value::Bool(b)) => Ok(Value::from(i64::from(*b))),

        (CastType::Float, Value::Number(n)) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("{n} is not a finite float")),
        (CastType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("\"{s}\" is not a float")),
        (CastType::Float, Value::Bool(b)) => Ok(Value::from(if *b { 1.0 } else { 0.0 })),

        (CastType::Bool, Value::Bool(_)) => Ok(value.clone()),
        (CastType::Bool, Value::Number(n)) => Ok(Value::Bool(n.as_f64() != Some(0.0))),
        (CastType::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(format!("\"{s}\" is not a boolean")),
        },

        (_, Value::Null) => Err("null cannot be cast".to_string()),
        (_, other) => Err(format!("unsupported value {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transformer(schema: Value) -> SchemaTransformer {
        let schema = Schema::from_json_str(&schema.to_string()).unwrap();
        SchemaTransformer::new(schema).unwrap()
    }

    fn run(t: &SchemaTransformer, payload: Value) -> Result<Value, TransformFailure> {
        let out = t.transform(payload.to_string().as_bytes())?;
        assert_eq!(out.last(), Some(&b'\n'));
        Ok(serde_json::from_slice(&out).unwrap())
    }

    #[test]
    fn test_rules_apply_in_order() {
        let t = transformer(json!({
            "insert_value_if_column_missing": {"currency": "MXN"},
            "required_columns": ["id", "amount"],
            "rename_columns": {"amount": "total", "meta.source": "source"},
            "delete_columns": ["debug"],
            "cast_values": {"total": "float", "id": "str"}
        }));

        let out = run(
            &t,
            json!({"id": 7, "amount": "12.5", "debug": true, "meta": {"source": "pos"}}),
        )
        .unwrap();

        assert_eq!(
            out,
            json!({"id": "7", "meta": {}, "currency": "MXN", "total": 12.5, "source": "pos"})
        );
    }

    #[test]
    fn test_missing_required_column_is_validation_failure() {
        let t = transformer(json!({"required_columns": ["id"]}));
        let err = run(&t, json!({"other": 1})).unwrap_err();
        assert!(matches!(err, TransformFailure::Validation(_)));
    }

    #[test]
    fn test_default_satisfies_required_column() {
        let t = transformer(json!({
            "insert_value_if_column_missing": {"id": 0},
            "required_columns": ["id"]
        }));
        assert_eq!(run(&t, json!({})).unwrap(), json!({"id": 0}));
    }

    #[test]
    fn test_malformed_and_non_object_payloads_are_validation_failures() {
        let t = SchemaTransformer::default();
        assert!(matches!(
            t.transform(b"{not json"),
            Err(TransformFailure::Validation(_))
        ));
        assert!(matches!(
            t.transform(b"[1, 2]"),
            Err(TransformFailure::Validation(_))
        ));
    }

    #[test]
    fn test_missing_rename_delete_cast_are_transform_failures() {
        let rename = transformer(json!({"rename_columns": {"a": "b"}}));
        assert!(matches!(run(&rename, json!({})), Err(TransformFailure::Transform(_))));

        let delete = transformer(json!({"delete_columns": ["a"]}));
        assert!(matches!(run(&delete, json!({})), Err(TransformFailure::Transform(_))));

        let cast = transformer(json!({"cast_values": {"a": "int"}}));
        assert!(matches!(run(&cast, json!({})), Err(TransformFailure::Transform(_))));
        assert!(matches!(
            run(&cast, json!({"a": "seven"})),
            Err(TransformFailure::Transform(_))
        ));
    }

    #[test]
    fn test_casts() {
        let t = transformer(json!({
            "cast_values": {"i": "int", "f": "float", "b": "bool", "s": "str", "t": "int"}
        }));
        let out = run(&t, json!({"i": 3.9, "f": "2", "b": "No", "s": false, "t": true})).unwrap();
        assert_eq!(out, json!({"i": 3, "f": 2.0, "b": false, "s": "false", "t": 1}));
    }

    #[test]
    fn test_schema_rejects_unknown_rules() {
        assert!(Schema::from_json_str(r#"{"drop_columns": ["a"]}"#).is_err());
        assert!(Schema::from_json_str(r#"{"cast_values": {"a": "datetime"}}"#).is_err());
        assert!(Schema::from_json_str(r#"{"rename_columns": {"a": 1}}"#).is_err());
        assert!(Schema::from_json_str(r#"{"rename_columns": {"a.b.c": "d"}}"#).is_err());
    }

    #[test]
    fn test_empty_schema_keeps_object_unchanged() {
        let t = SchemaTransformer::default();
        assert!(t.schema().is_empty());
        let out = t.transform(br#"{"b":1,"a":2}"#).unwrap();
        assert_eq!(out, b"{\"b\":1,\"a\":2}\n".to_vec());
    }
}

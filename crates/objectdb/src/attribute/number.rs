//! Number attribute class: a single `f64` value per object, filtered
//! with the usual comparison operators.

use serde_json::Value;

use super::AttributeType;
use crate::error::{Error, Result};
use crate::txn::WriteTx;

use super::scalar::{self, ScalarClass};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberAttribute {
    pub value: f64,
}

pub fn create(tx: &WriteTx<'_>, name: &str, key: &str) -> Result<ScalarClass> {
    scalar::create(tx, name, key, AttributeType::Number)
}

pub(crate) fn value_of(fragment: &Value) -> f64 {
    fragment.get("value").and_then(Value::as_f64).unwrap_or(0.0)
}

pub(crate) fn fragment(attr: &NumberAttribute) -> Value {
    serde_json::json!({ "value": attr.value })
}

pub fn parse(fragment: &Value) -> Result<NumberAttribute> {
    let value = fragment
        .get("value")
        .ok_or_else(|| Error::SchemaViolation {
            detail: "number attribute fragment missing value".into(),
        })?;
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(|value| NumberAttribute { value })
            .ok_or_else(|| Error::TypeMismatch {
                expected: "f64-representable number".into(),
                found: value.to_string(),
            }),
        Value::Null => Ok(NumberAttribute { value: 0.0 }),
        other => Err(Error::TypeMismatch {
            expected: "number".into(),
            found: other.to_string(),
        }),
    }
}

pub fn build_query(class: &ScalarClass, op: &str, value: &Value) -> Result<String> {
    let n = value.as_f64().ok_or_else(|| Error::TypeMismatch {
        expected: "number".into(),
        found: value.to_string(),
    })?;
    let column = format!("data ->> '{}'", class.meta.value_path.sql_path());
    let expr = match op {
        "eq" => format!("{column} = {n}"),
        "neq" => format!("{column} <> {n}"),
        "gt" => format!("{column} > {n}"),
        "gte" => format!("{column} >= {n}"),
        "lt" => format!("{column} < {n}"),
        "lte" => format!("{column} <= {n}"),
        other => {
            return Err(Error::Unsupported {
                class: class.base.id.to_string(),
                op: other.to_string(),
            })
        }
    };
    Ok(expr)
}

//! Text attribute class: a single string value per object, filtered
//! with `eq`/`neq`/`like`/`unlike`.

use serde_json::Value;

use super::AttributeType;
use crate::error::{Error, Result};
use crate::txn::WriteTx;

use super::scalar::{self, ScalarClass};

#[derive(Debug, Clone, PartialEq)]
pub struct TextAttribute {
    pub value: String,
}

pub fn create(tx: &WriteTx<'_>, name: &str, key: &str) -> Result<ScalarClass> {
    scalar::create(tx, name, key, AttributeType::Text)
}

pub(crate) fn value_of(fragment: &Value) -> String {
    fragment
        .get("value")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn fragment(attr: &TextAttribute) -> Value {
    serde_json::json!({ "value": attr.value })
}

pub fn parse(fragment: &Value) -> Result<TextAttribute> {
    let value = fragment
        .get("value")
        .ok_or_else(|| Error::SchemaViolation {
            detail: "text attribute fragment missing value".into(),
        })?;
    match value {
        Value::String(s) => Ok(TextAttribute { value: s.clone() }),
        Value::Null => Ok(TextAttribute { value: String::new() }),
        other => Err(Error::TypeMismatch {
            expected: "string".into(),
            found: other.to_string(),
        }),
    }
}

pub fn build_query(class: &ScalarClass, op: &str, value: &Value) -> Result<String> {
    let needle = value.as_str().ok_or_else(|| Error::TypeMismatch {
        expected: "string".into(),
        found: value.to_string(),
    })?;
    let column = format!("data ->> '{}'", class.meta.value_path.sql_path());
    let literal = escape_sql_literal(needle);
    let expr = match op {
        "eq" => format!("{column} = '{literal}'"),
        "neq" => format!("{column} <> '{literal}'"),
        "like" => format!("{column} LIKE '%{literal}%'"),
        "unlike" => format!("{column} NOT LIKE '%{literal}%'"),
        other => {
            return Err(Error::Unsupported {
                class: class.base.id.to_string(),
                op: other.to_string(),
            })
        }
    };
    Ok(expr)
}

fn escape_sql_literal(s: &str) -> String {
    s.replace('\'', "''")
}

//! JSON-path addressing and JSON-map (de)serialization.
//!
//! Attribute fragments are shallow (`{"value": ...}`, `{"value": ..., "idx": ...}`),
//! so unlike a general JSON-pointer implementation we only need to address a
//! single top-level field by name. [`ValuePath`] keeps that addressing at
//! arm's length from raw strings so SQL-injection-shaped bugs (an attacker-
//! controlled path reaching `->>'<path>'`) show up as a type error instead of
//! a string concatenation bug.

use std::fmt;

use serde_json::Map;
use serde_json::Value;

/// A single field name inside a JSON fragment, e.g. `value` or `idx`.
/// Rendered into SQL as `data ->> '$.<segment1>.<segment2>...'`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePath(Vec<String>);

impl ValuePath {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> ValuePath {
        ValuePath(segments.into_iter().map(Into::into).collect())
    }

    pub fn field(name: impl Into<String>) -> ValuePath {
        ValuePath(vec![name.into()])
    }

    /// Renders as a SQLite JSON path expression, e.g. `$.value`.
    pub fn sql_path(&self) -> String {
        let mut out = String::from("$");
        for seg in &self.0 {
            out.push('.');
            out.push_str(seg);
        }
        out
    }

    pub fn get<'v>(&self, doc: &'v Value) -> Option<&'v Value> {
        let mut cur = doc;
        for seg in &self.0 {
            cur = cur.as_object()?.get(seg)?;
        }
        Some(cur)
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_path())
    }
}

/// A free-form JSON object used for attribute-class/table metadata. Stored
/// as serialized bytes in a `JSONB`-typed column; an empty map persists as
/// SQL `NULL` rather than the literal `{}` so "never configured" and
/// "explicitly emptied" both read back as nothing.
pub type JsonMap = Map<String, Value>;

pub fn map_to_sql(map: &JsonMap) -> rusqlite::Result<Option<Vec<u8>>> {
    if map.is_empty() {
        return Ok(None);
    }
    serde_json::to_vec(map)
        .map(Some)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

pub fn map_from_sql(bytes: Option<Vec<u8>>) -> rusqlite::Result<JsonMap> {
    match bytes {
        None => Ok(JsonMap::new()),
        Some(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                bytes.len(),
                rusqlite::types::Type::Blob,
                Box::new(e),
            )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sql_path_renders_dotted() {
        assert_eq!(ValuePath::field("value").sql_path(), "$.value");
        assert_eq!(
            ValuePath::new(["value", "nested"]).sql_path(),
            "$.value.nested"
        );
    }

    #[test]
    fn get_walks_nested_objects() {
        let doc = json!({"value": {"nested": 3}});
        let path = ValuePath::new(["value", "nested"]);
        assert_eq!(path.get(&doc), Some(&json!(3)));
        assert_eq!(ValuePath::field("missing").get(&doc), None);
    }

    #[test]
    fn empty_map_round_trips_through_null() {
        let empty = JsonMap::new();
        let sql = map_to_sql(&empty).unwrap();
        assert!(sql.is_none());
        assert_eq!(map_from_sql(sql).unwrap(), empty);
    }
}

//! Filter-tree and order-spec compiler: turns a view's persisted
//! JSON filter/order into the `WHERE`/`ORDER BY` fragments a table's query
//! assembles into one `SELECT`.

use serde_json::Value;

use crate::attribute;
use crate::error::{Error, Result};
use crate::id::AttributeClassId;
use crate::txn::Tx;

/// A parsed filter tree. Kept as a sum type rather
/// than compiled eagerly, so `compile` can be unit-tested against fixed
/// trees independent of parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Vec<Filter>),
    Fts { search: String },
    Attr { class_id: AttributeClassId, op: String, value: Value },
}

/// Parses a JSON filter document into a [`Filter`] tree. `{}` (no keys)
/// parses to an always-true `And([])`.
pub fn parse_filter(doc: &Value) -> Result<Filter> {
    let obj = doc.as_object().ok_or_else(|| Error::SchemaViolation {
        detail: "filter must be a JSON object".into(),
    })?;
    if obj.is_empty() {
        return Ok(Filter::And(Vec::new()));
    }
    if obj.len() != 1 {
        return Err(Error::SchemaViolation {
            detail: "filter object must have exactly one key".into(),
        });
    }
    let (key, value) = obj.iter().next().unwrap();
    match key.as_str() {
        "$and" => Ok(Filter::And(parse_children(value)?)),
        "$or" => Ok(Filter::Or(parse_children(value)?)),
        "$not" => Ok(Filter::Not(parse_children(value)?)),
        "$fts" => {
            let search = value
                .get("search")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::SchemaViolation {
                    detail: "$fts requires a string \"search\" field".into(),
                })?
                .to_string();
            Ok(Filter::Fts { search })
        }
        class_id => {
            let class_id: AttributeClassId = class_id.parse()?;
            let pred = value.as_object().ok_or_else(|| Error::SchemaViolation {
                detail: "attribute predicate must be a JSON object".into(),
            })?;
            if pred.len() != 1 {
                return Err(Error::SchemaViolation {
                    detail: "attribute predicate must have exactly one operator".into(),
                });
            }
            let (op, value) = pred.iter().next().unwrap();
            Ok(Filter::Attr {
                class_id,
                op: op.clone(),
                value: value.clone(),
            })
        }
    }
}

fn parse_children(value: &Value) -> Result<Vec<Filter>> {
    value
        .as_array()
        .ok_or_else(|| Error::SchemaViolation {
            detail: "connective value must be an array of filters".into(),
        })?
        .iter()
        .map(parse_filter)
        .collect()
}

/// Compiles a [`Filter`] tree into a `WHERE`-clause-ready SQL fragment
/// (without the leading `WHERE`). An empty `And([])` compiles to `1` so
/// callers can always embed the result without special-casing "no filter".
pub fn compile_filter<'a, 'd>(tx: impl Into<Tx<'a, 'd>>, filter: &Filter) -> Result<String> {
    compile_filter_inner(tx.into(), filter)
}

fn compile_filter_inner(tx: Tx<'_, '_>, filter: &Filter) -> Result<String> {
    match filter {
        Filter::And(children) => compile_connective(tx, children, "AND", "1"),
        Filter::Or(children) => compile_connective(tx, children, "OR", "0"),
        Filter::Not(children) => {
            let joined = compile_connective(tx, children, "AND", "1")?;
            Ok(format!("NOT ({joined})"))
        }
        Filter::Fts { search } => Ok(compile_fts(search)),
        Filter::Attr { class_id, op, value } => {
            let class = attribute::open(tx, *class_id)?;
            class.build_query(op, value)
        }
    }
}

fn compile_connective(tx: Tx<'_, '_>, children: &[Filter], joiner: &str, empty: &str) -> Result<String> {
    if children.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = children
        .iter()
        .map(|child| compile_filter_inner(tx, child))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts
        .into_iter()
        .map(|p| format!("({p})"))
        .collect::<Vec<_>>()
        .join(&format!(" {joiner} ")))
}

fn compile_fts(search: &str) -> String {
    let words: Vec<&str> = search.split_whitespace().collect();
    if words.is_empty() {
        return "1".to_string();
    }
    words
        .iter()
        .map(|w| format!("idx LIKE '%{}%'", escape(w)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

/// One entry of an order spec.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderField {
    pub class_id: AttributeClassId,
    pub mode: String,
}

pub fn parse_order(doc: &Value) -> Result<Vec<OrderField>> {
    doc.as_array()
        .ok_or_else(|| Error::SchemaViolation {
            detail: "order must be a JSON array".into(),
        })?
        .iter()
        .map(|entry| {
            let field = entry
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::SchemaViolation {
                    detail: "order entry missing \"field\"".into(),
                })?;
            let mode = entry
                .get("mode")
                .and_then(Value::as_str)
                .unwrap_or("asc")
                .to_string();
            Ok(OrderField {
                class_id: field.parse()?,
                mode,
            })
        })
        .collect()
}

/// Compiles an order spec into an `ORDER BY`-ready fragment (without the
/// leading `ORDER BY`), or `None` if the spec is empty.
pub fn compile_order<'a, 'd>(tx: impl Into<Tx<'a, 'd>>, fields: &[OrderField]) -> Result<Option<String>> {
    if fields.is_empty() {
        return Ok(None);
    }
    let tx = tx.into();
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        let class = attribute::open(tx, field.class_id)?;
        parts.push(class.build_sort(&field.mode)?);
    }
    Ok(Some(parts.join(", ")))
}

//! Shared machinery behind the text and number attribute classes:
//! both store a single JSON-primitive `value` in their fragment and
//! differ only in the primitive's type, the operators their filters accept,
//! and how the value renders into a sort/idx string. That shared shape lives
//! here; `text.rs`/`number.rs` hold only what actually differs.

use rusqlite::params;
use serde_json::Value;

use super::{AttributeType, ClassBase};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::id::{AttributeClassId, ObjectId};
use crate::json_path::{JsonMap, ValuePath};
use crate::txn::WriteTx;

#[derive(Debug, Clone)]
pub struct ScalarMeta {
    /// Path from a table row's (or object's) `data` column down to the
    /// scalar, e.g. `$.<class_id>.value`.
    pub value_path: ValuePath,
    pub updated_table: String,
    /// Path to the value within the fragment alone, always `value`.
    pub gjson_value_path: ValuePath,
    /// Path within the fragment feeding a table's `idx` column, always
    /// `value` for scalars.
    pub gjson_idx_path: ValuePath,
}

#[derive(Debug, Clone)]
pub struct ScalarClass {
    pub base: ClassBase,
    pub meta: ScalarMeta,
}

impl ScalarMeta {
    fn to_json_map(&self, class_id: AttributeClassId) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert(
            "json_value_path".into(),
            Value::String(format!("$.{class_id}.value")),
        );
        map.insert("updated_table".into(), Value::String(self.updated_table.clone()));
        map.insert("gjson_value_path".into(), Value::String("value".into()));
        map.insert("gjson_idx_path".into(), Value::String("value".into()));
        map
    }

    pub fn from_json_map(map: &JsonMap) -> Result<ScalarMeta> {
        let updated_table = map
            .get("updated_table")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::SchemaViolation {
                detail: "scalar attribute class meta missing updated_table".into(),
            })?
            .to_string();
        let json_value_path = map
            .get("json_value_path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::SchemaViolation {
                detail: "scalar attribute class meta missing json_value_path".into(),
            })?;
        if map.get("gjson_value_path").and_then(Value::as_str).is_none() {
            return Err(Error::SchemaViolation {
                detail: "scalar attribute class meta missing gjson_value_path".into(),
            });
        }
        if map.get("gjson_idx_path").and_then(Value::as_str).is_none() {
            return Err(Error::SchemaViolation {
                detail: "scalar attribute class meta missing gjson_idx_path".into(),
            });
        }
        let segments: Vec<String> = json_value_path
            .trim_start_matches('$')
            .trim_start_matches('.')
            .split('.')
            .map(str::to_string)
            .collect();
        Ok(ScalarMeta {
            value_path: ValuePath::new(segments),
            updated_table,
            gjson_value_path: ValuePath::field("value"),
            gjson_idx_path: ValuePath::field("value"),
        })
    }
}

impl ScalarClass {
    pub fn from_meta(base: ClassBase, map: JsonMap) -> Result<ScalarClass> {
        Ok(ScalarClass {
            meta: ScalarMeta::from_json_map(&map)?,
            base,
        })
    }
}

fn updated_table_name(attr_type: AttributeType, class_id: AttributeClassId) -> String {
    format!("{}_{class_id}", attr_type.as_str())
}

/// Creates a new text or number attribute class: allocates an id, creates
/// its per-class update table, and persists the `attribute_classes` row.
pub fn create(
    tx: &WriteTx<'_>,
    name: &str,
    key: &str,
    attr_type: AttributeType,
) -> Result<ScalarClass> {
    let id = AttributeClassId::generate();
    let updated_table = updated_table_name(attr_type, id);
    tx.execute_batch(&format!(
        "CREATE TABLE \"{updated_table}\" (
            object_id BLOB PRIMARY KEY REFERENCES objects(object_id) ON DELETE CASCADE,
            updated   BLOB NOT NULL
        );"
    ))?;
    let base = ClassBase {
        id,
        name: name.to_string(),
        key: key.to_string(),
    };
    let meta = ScalarMeta {
        value_path: ValuePath::new([id.to_string(), "value".to_string()]),
        updated_table,
        gjson_value_path: ValuePath::field("value"),
        gjson_idx_path: ValuePath::field("value"),
    };
    super::persist_new(tx, &base, attr_type, &meta.to_json_map(id))?;
    tracing::info!(class_id = %id, %name, "created attribute class");
    Ok(ScalarClass { base, meta })
}

pub fn insert(class: &ScalarClass, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<Value> {
    let fragment = serde_json::json!({ "value": Value::Null });
    super::attach_fragment(db, tx, oid, class.base.id, fragment.clone())?;
    super::mark_attached(tx, oid, class.base.id)?;
    super::touch_update_table(tx, &class.meta.updated_table, oid)?;
    Ok(fragment)
}

pub fn update(
    class: &ScalarClass,
    db: &Database,
    tx: &WriteTx<'_>,
    oid: ObjectId,
    fragment: Value,
) -> Result<()> {
    super::attach_fragment(db, tx, oid, class.base.id, fragment)?;
    super::touch_update_table(tx, &class.meta.updated_table, oid)?;
    Ok(())
}

pub fn delete(class: &ScalarClass, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<()> {
    super::detach_fragment(db, tx, oid, class.base.id)?;
    super::mark_detached(tx, oid, class.base.id)?;
    super::untouch_update_table(tx, &class.meta.updated_table, oid)?;
    Ok(())
}

pub fn set(class: &mut ScalarClass, _db: &Database, tx: &WriteTx<'_>, patch: JsonMap) -> Result<()> {
    let mut map = class.meta.to_json_map(class.base.id);
    for (k, v) in patch {
        map.insert(k, v);
    }
    let meta = ScalarMeta::from_json_map(&map)?;
    tx.execute(
        "UPDATE attribute_classes SET attribute_meta_info = ? WHERE class_id = ?",
        params![crate::json_path::map_to_sql(&map)?, class.base.id],
    )?;
    class.meta = meta;
    Ok(())
}

pub fn build_sort(class: &ScalarClass, mode: &str) -> Result<String> {
    let dir = match mode {
        "asc" => "ASC",
        "desc" => "DESC",
        other => {
            return Err(Error::Unsupported {
                class: class.base.id.to_string(),
                op: other.to_string(),
            })
        }
    };
    Ok(format!("data ->> '{}' {dir}", class.meta.value_path.sql_path()))
}

pub fn drop_class(class: ScalarClass, db: &Database, tx: &WriteTx<'_>) -> Result<()> {
    super::scrub_from_all_objects(db, tx, class.base.id)?;
    for table_id in super::tables_carrying(tx, class.base.id)? {
        crate::table::unattach_class(tx, table_id, class.base.id)?;
    }
    tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\";", class.meta.updated_table))?;
    tx.execute(
        "DELETE FROM attribute_classes WHERE class_id = ?",
        params![class.base.id],
    )?;
    db.hooks().unregister_attr(class.base.id);
    tracing::info!(class_id = %class.base.id, "dropped attribute class");
    Ok(())
}

//! Attribute-class registry & base: polymorphic dispatch over the
//! three built-in attribute types, persisted metadata, and the hook
//! invocation wrapper every mutating operation goes through.
//!
//! Rather than a `dyn` trait object per class, attribute classes are a
//! tagged union (`AttributeClass`) over one struct per type, the way this
//! crate's design notes describe: a type tag plus type-specific metadata,
//! with a small lookup from the persisted `attribute_type` string to the
//! right variant. This keeps hot-path dispatch a `match` instead of a vtable
//! call and keeps each type's `meta` shape checked at compile time.

pub mod link;
pub mod number;
pub mod scalar;
pub mod text;

use std::collections::HashMap;

use rusqlite::params;
use serde_json::Value;

use crate::database::Database;
use crate::error::{Error, NotFoundKind, Result};
use crate::hooks::{Op, OpKind};
use crate::id::{AttributeClassId, ObjectId};
use crate::json_path::JsonMap;
use crate::object::Object;
use crate::txn::{Tx, WriteTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Text,
    Number,
    Link,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Text => "text",
            AttributeType::Number => "number",
            AttributeType::Link => "link",
        }
    }

    pub fn parse(s: &str) -> Result<AttributeType> {
        match s {
            "text" => Ok(AttributeType::Text),
            "number" => Ok(AttributeType::Number),
            "link" => Ok(AttributeType::Link),
            other => Err(Error::SchemaViolation {
                detail: format!("unknown attribute type {other:?}"),
            }),
        }
    }
}

/// Fields shared by every attribute class, independent of type.
#[derive(Debug, Clone)]
pub struct ClassBase {
    pub id: AttributeClassId,
    pub name: String,
    pub key: String,
}

/// A value attached to one object. Each variant's `value` is exactly the
/// shape described for its type's JSON fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Text(text::TextAttribute),
    Number(number::NumberAttribute),
    Link(link::LinkAttribute),
}

impl Attribute {
    /// The stringification used both by link display-string caching and by
    /// a table's `idx` column.
    pub fn string(&self) -> String {
        match self {
            Attribute::Text(a) => a.value.clone(),
            Attribute::Number(a) => format_number(a.value),
            Attribute::Link(a) => a.idx_string(),
        }
    }
}

fn as_string(value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::TypeMismatch {
            expected: "string".into(),
            found: value.to_string(),
        })
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// A tagged union over the three built-in attribute classes. An
/// `AttributeType → {create, parse}` registry is realized here as
/// `AttributeType::parse` plus this `match` —
/// there is currently no runtime path for registering a fourth type, but the
/// tag keeps that door open without forcing `dyn` dispatch on every call.
#[derive(Debug, Clone)]
pub enum AttributeClass {
    Text(scalar::ScalarClass),
    Number(scalar::ScalarClass),
    Link(link::LinkClass),
}

impl AttributeClass {
    pub fn id(&self) -> AttributeClassId {
        match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => c.base.id,
            AttributeClass::Link(c) => c.base.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => &c.base.name,
            AttributeClass::Link(c) => &c.base.name,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => &c.base.key,
            AttributeClass::Link(c) => &c.base.key,
        }
    }

    pub fn attr_type(&self) -> AttributeType {
        match self {
            AttributeClass::Text(_) => AttributeType::Text,
            AttributeClass::Number(_) => AttributeType::Number,
            AttributeClass::Link(_) => AttributeType::Link,
        }
    }

    pub fn updated_table(&self) -> &str {
        match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => &c.meta.updated_table,
            AttributeClass::Link(c) => &c.meta.updated_table,
        }
    }

    /// The `data ->> '<path>'` path a table B-tree index is built over for
    /// this class.
    pub fn index_path(&self) -> crate::json_path::ValuePath {
        match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => c.meta.value_path.clone(),
            AttributeClass::Link(c) => {
                crate::json_path::ValuePath::new([c.base.id.to_string(), "idx".to_string()])
            }
        }
    }

    pub fn insert(&self, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<Attribute> {
        let op = Op {
            class_id: self.id(),
            object: oid,
            kind: OpKind::Insert,
        };
        with_attr_hooks(db, tx, &op, || match self {
            AttributeClass::Text(c) => scalar::insert(c, db, tx, oid).map(|v| {
                Attribute::Text(text::TextAttribute { value: text::value_of(&v) })
            }),
            AttributeClass::Number(c) => scalar::insert(c, db, tx, oid).map(|v| {
                Attribute::Number(number::NumberAttribute {
                    value: number::value_of(&v),
                })
            }),
            AttributeClass::Link(c) => link::insert(c, db, tx, oid),
        })
    }

    pub fn find<'a, 'd>(&self, tx: impl Into<Tx<'a, 'd>>, oid: ObjectId) -> Result<Attribute> {
        let tx = tx.into();
        let obj = crate::object::open(tx, oid)?;
        self.from_object(&obj)
    }

    pub fn from_object(&self, obj: &Object) -> Result<Attribute> {
        let frag = obj
            .data
            .as_object()
            .and_then(|m| m.get(&self.id().to_string()))
            .ok_or_else(|| Error::not_found(NotFoundKind::Attribute, self.id()))?;
        match self {
            AttributeClass::Text(_) => text::parse(frag).map(Attribute::Text),
            AttributeClass::Number(_) => number::parse(frag).map(Attribute::Number),
            AttributeClass::Link(_) => link::parse(frag).map(Attribute::Link),
        }
    }

    pub fn update(
        &self,
        db: &Database,
        tx: &WriteTx<'_>,
        oid: ObjectId,
        attr: &Attribute,
    ) -> Result<()> {
        let op = Op {
            class_id: self.id(),
            object: oid,
            kind: OpKind::Update,
        };
        with_attr_hooks(db, tx, &op, || match (self, attr) {
            (AttributeClass::Text(c), Attribute::Text(a)) => {
                scalar::update(c, db, tx, oid, text::fragment(a))
            }
            (AttributeClass::Number(c), Attribute::Number(a)) => {
                scalar::update(c, db, tx, oid, number::fragment(a))
            }
            (AttributeClass::Link(c), Attribute::Link(a)) => link::update(c, db, tx, oid, a),
            _ => Err(Error::TypeMismatch {
                expected: self.attr_type().as_str().into(),
                found: "mismatched attribute variant".into(),
            }),
        })
    }

    pub fn delete(&self, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<()> {
        let op = Op {
            class_id: self.id(),
            object: oid,
            kind: OpKind::Delete,
        };
        with_attr_hooks(db, tx, &op, || match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => scalar::delete(c, db, tx, oid),
            AttributeClass::Link(c) => link::delete(c, db, tx, oid),
        })
    }

    /// Applies a metadata patch. `name`/`key` are base fields shared
    /// by every type and are persisted here directly; anything else is
    /// type-specific and delegated to the concrete class's own `set`.
    pub fn set(&mut self, db: &Database, tx: &WriteTx<'_>, mut patch: JsonMap) -> Result<()> {
        if let Some(name) = patch.remove("name") {
            let name = as_string(&name)?;
            tx.execute(
                "UPDATE attribute_classes SET attribute_name = ? WHERE class_id = ?",
                params![name, self.id()],
            )?;
            self.base_mut().name = name;
        }
        if let Some(key) = patch.remove("key") {
            let key = as_string(&key)?;
            tx.execute(
                "UPDATE attribute_classes SET attribute_key = ? WHERE class_id = ?",
                params![key, self.id()],
            )?;
            self.base_mut().key = key;
        }
        if patch.is_empty() {
            return Ok(());
        }
        match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => scalar::set(c, db, tx, patch),
            AttributeClass::Link(c) => link::set(c, db, tx, patch),
        }
    }

    fn base_mut(&mut self) -> &mut ClassBase {
        match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => &mut c.base,
            AttributeClass::Link(c) => &mut c.base,
        }
    }

    pub fn build_query(&self, op: &str, value: &Value) -> Result<String> {
        match self {
            AttributeClass::Text(c) => text::build_query(c, op, value),
            AttributeClass::Number(c) => number::build_query(c, op, value),
            AttributeClass::Link(_) => Err(Error::Unsupported {
                class: self.id().to_string(),
                op: op.to_string(),
            }),
        }
    }

    pub fn build_sort(&self, mode: &str) -> Result<String> {
        match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => scalar::build_sort(c, mode),
            AttributeClass::Link(_) => Err(Error::Unsupported {
                class: self.id().to_string(),
                op: mode.to_string(),
            }),
        }
    }

    /// The string contributed to a table's `idx` column by this class's
    /// fragment on `data`. Empty if the object does not carry this
    /// class.
    pub fn idx_contribution(&self, data: &Value) -> String {
        let frag = match data.as_object().and_then(|m| m.get(&self.id().to_string())) {
            Some(frag) => frag,
            None => return String::new(),
        };
        let gjson_idx_path = match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => &c.meta.gjson_idx_path,
            AttributeClass::Link(c) => &c.meta.gjson_idx_path,
        };
        gjson_idx_path
            .get(frag)
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    }

    /// Drops this class (and, for link classes, its paired class):
    /// unattaches from every table, scrubs the key from every
    /// object, drops side tables, removes the `attribute_classes` row(s).
    pub fn drop_class(self, db: &Database, tx: &WriteTx<'_>) -> Result<()> {
        match self {
            AttributeClass::Text(c) | AttributeClass::Number(c) => scalar::drop_class(c, db, tx),
            AttributeClass::Link(c) => link::drop_pair(c, db, tx),
        }
    }
}

fn with_attr_hooks<T>(
    db: &Database,
    tx: &WriteTx<'_>,
    op: &Op,
    body: impl FnOnce() -> Result<T>,
) -> Result<T> {
    db.hooks().fire_pre_attr(db, tx, op)?;
    let result = body()?;
    db.hooks().fire_after_attr(db, tx, op)?;
    Ok(result)
}

/// Persists a freshly-created class's row in `attribute_classes`.
pub(crate) fn persist_new(
    tx: &WriteTx<'_>,
    base: &ClassBase,
    attr_type: AttributeType,
    meta: &JsonMap,
) -> Result<()> {
    tx.execute(
        "INSERT INTO attribute_classes
            (class_id, attribute_name, attribute_key, attribute_type, attribute_meta_info)
         VALUES (?, ?, ?, ?, ?)",
        params![
            base.id,
            base.name,
            base.key,
            attr_type.as_str(),
            crate::json_path::map_to_sql(meta)?,
        ],
    )?;
    Ok(())
}

/// Loads an attribute class's row and dispatches to the right type's meta
/// parser.
pub fn open<'a, 'd>(tx: impl Into<Tx<'a, 'd>>, id: AttributeClassId) -> Result<AttributeClass> {
    let tx = tx.into();
    let row: (String, String, String, Option<Vec<u8>>) = tx
        .query_row(
            "SELECT attribute_name, attribute_key, attribute_type, attribute_meta_info
             FROM attribute_classes WHERE class_id = ?",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .map_err(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => {
                Error::not_found(NotFoundKind::AttributeClass, id)
            }
            other => Error::from(other),
        })?;
    let (name, key, type_str, meta_bytes) = row;
    let meta = crate::json_path::map_from_sql(meta_bytes)?;
    let base = ClassBase { id, name, key };
    match AttributeType::parse(&type_str)? {
        AttributeType::Text => Ok(AttributeClass::Text(scalar::ScalarClass::from_meta(base, meta)?)),
        AttributeType::Number => {
            Ok(AttributeClass::Number(scalar::ScalarClass::from_meta(base, meta)?))
        }
        AttributeType::Link => Ok(AttributeClass::Link(link::LinkClass::from_meta(base, meta)?)),
    }
}

/// Loads every attribute class id currently carried by `table_id`, in
/// field order; the order fields were attached is preserved.
pub fn ids_for_table<'a, 'd>(
    tx: impl Into<Tx<'a, 'd>>,
    table_id: crate::id::TableId,
) -> Result<Vec<AttributeClassId>> {
    let tx = tx.into();
    let mut stmt = tx.prepare(
        "SELECT class_id FROM table_to_attribute_classes WHERE table_id = ? ORDER BY rowid",
    )?;
    let ids = stmt
        .query_map(params![table_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub(crate) fn touch_update_table(tx: &WriteTx<'_>, table: &str, oid: ObjectId) -> Result<()> {
    tx.execute(
        &format!(
            "INSERT INTO \"{table}\" (object_id, updated) VALUES (?, randomblob(16))
             ON CONFLICT(object_id) DO UPDATE SET updated = excluded.updated"
        ),
        params![oid],
    )?;
    Ok(())
}

pub(crate) fn untouch_update_table(tx: &WriteTx<'_>, table: &str, oid: ObjectId) -> Result<()> {
    tx.execute(&format!("DELETE FROM \"{table}\" WHERE object_id = ?"), params![oid])?;
    Ok(())
}

/// Merges `fragment` into object `oid`'s document under `class_id` and
/// persists through [`crate::object::update`], so object-level hooks
/// (table `idx` rebuild, link display refresh) see the change.
pub(crate) fn attach_fragment(
    db: &Database,
    tx: &WriteTx<'_>,
    oid: ObjectId,
    class_id: AttributeClassId,
    fragment: Value,
) -> Result<()> {
    let obj = crate::object::open(tx, oid)?;
    let mut map = obj.data.as_object().cloned().unwrap_or_default();
    map.insert(class_id.to_string(), fragment);
    crate::object::update(db, tx, oid, Value::Object(map))
}

/// Removes `class_id`'s key from object `oid`'s document.
pub(crate) fn detach_fragment(
    db: &Database,
    tx: &WriteTx<'_>,
    oid: ObjectId,
    class_id: AttributeClassId,
) -> Result<()> {
    let obj = crate::object::open(tx, oid)?;
    let mut map = obj.data.as_object().cloned().unwrap_or_default();
    if map.remove(&class_id.to_string()).is_none() {
        return Ok(());
    }
    crate::object::update(db, tx, oid, Value::Object(map))
}

/// Scrubs `class_id`'s key from every object known to carry it, used when a
/// class is dropped.
pub(crate) fn scrub_from_all_objects(
    db: &Database,
    tx: &WriteTx<'_>,
    class_id: AttributeClassId,
) -> Result<()> {
    let object_ids: Vec<ObjectId> = {
        let mut stmt =
            tx.prepare("SELECT object_id FROM object_to_attribute_classes WHERE class_id = ?")?;
        stmt.query_map(params![class_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    for oid in object_ids {
        detach_fragment(db, tx, oid, class_id)?;
        tx.execute(
            "DELETE FROM object_to_attribute_classes WHERE object_id = ? AND class_id = ?",
            params![oid, class_id],
        )?;
    }
    Ok(())
}

pub(crate) fn mark_attached(tx: &WriteTx<'_>, oid: ObjectId, class_id: AttributeClassId) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO object_to_attribute_classes (object_id, class_id) VALUES (?, ?)",
        params![oid, class_id],
    )?;
    Ok(())
}

pub(crate) fn mark_detached(tx: &WriteTx<'_>, oid: ObjectId, class_id: AttributeClassId) -> Result<()> {
    tx.execute(
        "DELETE FROM object_to_attribute_classes WHERE object_id = ? AND class_id = ?",
        params![oid, class_id],
    )?;
    Ok(())
}

/// Every table that currently carries `class_id` as a field, used when
/// dropping a class to unattach it and rebuild indexes.
pub(crate) fn tables_carrying(
    tx: &WriteTx<'_>,
    class_id: AttributeClassId,
) -> Result<Vec<crate::id::TableId>> {
    let mut stmt =
        tx.prepare("SELECT table_id FROM table_to_attribute_classes WHERE class_id = ?")?;
    let ids = stmt
        .query_map(params![class_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub type ClassCache = HashMap<AttributeClassId, AttributeClass>;

//! Bidirectional link attribute: the most involved of the three
//! built-in types. A link class is always created in a mutually-paired pair;
//! each side's after-hook is what keeps the pair's `raw` lists (and the
//! display strings derived from `dep_attribute`) in sync with the other
//! side's edits.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::params;
use serde_json::Value;

use super::{Attribute, AttributeClass, AttributeType, ClassBase};
use crate::database::Database;
use crate::error::{Error, NotFoundKind, Result};
use crate::hooks::{AttrHook, Op, OpKind};
use crate::id::{AttributeClassId, ObjectId, TableId};
use crate::json_path::{JsonMap, ValuePath};
use crate::txn::WriteTx;

const ZWJ: char = '\u{200D}';

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinkAttribute {
    pub raw: Vec<ObjectId>,
    pub show: HashMap<ObjectId, String>,
}

impl LinkAttribute {
    pub fn idx_string(&self) -> String {
        self.raw
            .iter()
            .map(|oid| self.show.get(oid).cloned().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(&ZWJ.to_string())
    }

    fn value_map(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for oid in &self.raw {
            map.insert(oid.to_string(), Value::String(self.show.get(oid).cloned().unwrap_or_default()));
        }
        map
    }
}

#[derive(Debug, Clone)]
pub struct LinkMeta {
    pub updated_table: String,
    pub link_obj_table: String,
    pub ref_link_attribute: AttributeClassId,
    pub dep_attribute: Vec<AttributeClassId>,
    pub ref_table: Option<TableId>,
    pub gjson_idx_path: ValuePath,
}

#[derive(Debug, Clone)]
pub struct LinkClass {
    pub base: ClassBase,
    pub meta: LinkMeta,
}

impl LinkMeta {
    fn to_json_map(&self) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("updated_table".into(), Value::String(self.updated_table.clone()));
        map.insert("link_obj_table".into(), Value::String(self.link_obj_table.clone()));
        map.insert(
            "ref_link_attribute".into(),
            Value::String(self.ref_link_attribute.to_string()),
        );
        map.insert(
            "dep_attribute".into(),
            Value::Array(
                self.dep_attribute
                    .iter()
                    .map(|id| Value::String(id.to_string()))
                    .collect(),
            ),
        );
        if let Some(ref_table) = self.ref_table {
            map.insert("ref_table".into(), Value::String(ref_table.to_string()));
        }
        map
    }

    pub fn from_json_map(map: &JsonMap) -> Result<LinkMeta> {
        let required = |key: &str| -> Result<String> {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::SchemaViolation {
                    detail: format!("link attribute class meta missing {key}"),
                })
        };
        let updated_table = required("updated_table")?;
        let link_obj_table = required("link_obj_table")?;
        let ref_link_attribute = required("ref_link_attribute")?.parse()?;
        let dep_attribute = map
            .get("dep_attribute")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::SchemaViolation {
                detail: "link attribute class meta missing dep_attribute".into(),
            })?
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| Error::SchemaViolation {
                        detail: "dep_attribute entry is not a string".into(),
                    })
                    .and_then(|s| s.parse().map_err(Error::from))
            })
            .collect::<Result<Vec<_>>>()?;
        let ref_table = map
            .get("ref_table")
            .and_then(Value::as_str)
            .map(str::parse)
            .transpose()?;
        Ok(LinkMeta {
            updated_table,
            link_obj_table,
            ref_link_attribute,
            dep_attribute,
            ref_table,
            gjson_idx_path: ValuePath::field("idx"),
        })
    }
}

impl LinkClass {
    pub fn from_meta(base: ClassBase, map: JsonMap) -> Result<LinkClass> {
        Ok(LinkClass {
            meta: LinkMeta::from_json_map(&map)?,
            base,
        })
    }
}

struct Side<'a> {
    name: &'a str,
    key: &'a str,
    ref_table: Option<TableId>,
    dep_attribute: Vec<AttributeClassId>,
}

pub struct PairSpec<'a> {
    pub a_name: &'a str,
    pub a_key: &'a str,
    pub a_ref_table: Option<TableId>,
    pub a_dep_attribute: Vec<AttributeClassId>,
    pub b_name: &'a str,
    pub b_key: &'a str,
    pub b_ref_table: Option<TableId>,
    pub b_dep_attribute: Vec<AttributeClassId>,
}

/// Creates both classes of a link pair atomically: each's `ref_link_attribute`
/// points at the other, and each registers its own after-hook.
pub fn create_pair(db: &Database, tx: &WriteTx<'_>, spec: PairSpec<'_>) -> Result<(LinkClass, LinkClass)> {
    let a = Side {
        name: spec.a_name,
        key: spec.a_key,
        ref_table: spec.a_ref_table,
        dep_attribute: spec.a_dep_attribute,
    };
    let b = Side {
        name: spec.b_name,
        key: spec.b_key,
        ref_table: spec.b_ref_table,
        dep_attribute: spec.b_dep_attribute,
    };
    let id_a = AttributeClassId::generate();
    let id_b = AttributeClassId::generate();

    let class_a = build_and_persist(tx, id_a, &a, id_b)?;
    let class_b = build_and_persist(tx, id_b, &b, id_a)?;

    db.hooks().register_after_attr(id_a, make_hook(id_a));
    db.hooks().register_after_attr(id_b, make_hook(id_b));

    tracing::info!(a = %id_a, b = %id_b, "created link attribute class pair");
    Ok((class_a, class_b))
}

fn build_and_persist(
    tx: &WriteTx<'_>,
    id: AttributeClassId,
    side: &Side<'_>,
    paired: AttributeClassId,
) -> Result<LinkClass> {
    let updated_table = format!("link_{id}");
    let link_obj_table = format!("link_ref_{id}");
    tx.execute_batch(&format!(
        "CREATE TABLE \"{updated_table}\" (
            object_id BLOB PRIMARY KEY REFERENCES objects(object_id) ON DELETE CASCADE,
            updated   BLOB NOT NULL
        );
        CREATE TABLE \"{link_obj_table}\" (
            object_id     BLOB NOT NULL REFERENCES objects(object_id) ON DELETE CASCADE,
            ref_object_id BLOB NOT NULL REFERENCES objects(object_id) ON DELETE CASCADE,
            PRIMARY KEY (object_id, ref_object_id)
        );
        CREATE INDEX \"idx_{link_obj_table}_ref\" ON \"{link_obj_table}\"(ref_object_id, object_id);"
    ))?;
    let base = ClassBase {
        id,
        name: side.name.to_string(),
        key: side.key.to_string(),
    };
    let meta = LinkMeta {
        updated_table,
        link_obj_table,
        ref_link_attribute: paired,
        dep_attribute: side.dep_attribute.clone(),
        ref_table: side.ref_table,
        gjson_idx_path: ValuePath::field("idx"),
    };
    super::persist_new(tx, &base, AttributeType::Link, &meta.to_json_map())?;
    Ok(LinkClass { base, meta })
}

fn make_hook(own_class_id: AttributeClassId) -> AttrHook {
    Arc::new(move |db, tx, op| {
        let class = super::open(tx, own_class_id)?;
        let lc = match class {
            AttributeClass::Link(lc) => lc,
            _ => return Ok(()),
        };
        if op.class_id == lc.base.id {
            if op.kind == OpKind::Delete {
                // link::delete already scrubbed back-pointers using the
                // pre-delete raw list; by the time this fires that state is
                // gone, so there is nothing left to do.
                return Ok(());
            }
            refresh_link(&lc, db, tx, op)
        } else if lc.meta.dep_attribute.contains(&op.class_id) {
            refresh_ref_link(&lc, db, tx, op)
        } else {
            Ok(())
        }
    })
}

/// A direct edit of `lc` on `op.object`: for every oid it now references,
/// make sure the paired class points back.
fn refresh_link(lc: &LinkClass, db: &Database, tx: &WriteTx<'_>, op: &Op) -> Result<()> {
    let attr = match find(lc, tx, op.object) {
        Ok(a) => a,
        Err(Error::NotFound { .. }) => return Ok(()),
        Err(err) => return Err(err),
    };
    let ref_class = super::open(tx, lc.meta.ref_link_attribute)?;
    for r in &attr.raw {
        let existing = match ref_class.find(tx, *r) {
            Ok(Attribute::Link(a)) => Some(a),
            Ok(_) => unreachable!(),
            Err(Error::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        let mut back = match existing {
            Some(back) => back,
            None => {
                ref_class.insert(db, tx, *r)?;
                LinkAttribute::default()
            }
        };
        if back.raw.contains(&op.object) {
            continue;
        }
        back.raw.push(op.object);
        ref_class.update(db, tx, *r, &Attribute::Link(back))?;
    }
    Ok(())
}

/// An edit of one of `lc`'s dependency classes. Walk back-edges (objects
/// that point at `op.object` via the paired class) and refresh or drop the
/// cached display string they hold for it.
fn refresh_ref_link(lc: &LinkClass, db: &Database, tx: &WriteTx<'_>, op: &Op) -> Result<()> {
    let paired = super::open(tx, lc.meta.ref_link_attribute)?;
    let back_edges = match paired.find(tx, op.object) {
        Ok(Attribute::Link(a)) => a.raw,
        Ok(_) => unreachable!(),
        Err(Error::NotFound { .. }) => return Ok(()),
        Err(err) => return Err(err),
    };
    for r in back_edges {
        let attr = match find(lc, tx, r) {
            Ok(a) => a,
            Err(Error::NotFound { .. }) => continue,
            Err(err) => return Err(err),
        };
        // `update` recomputes `show` for every raw id from `dep_attribute`,
        // so this refreshes (or, once the value is gone, blanks) the display
        // cached for `op.object` without touching it directly here.
        update(lc, db, tx, r, &attr)?;
    }
    Ok(())
}

/// Reads and parses `class`'s current value on `oid`.
pub fn find<'a, 'd>(class: &LinkClass, tx: impl Into<crate::txn::Tx<'a, 'd>>, oid: ObjectId) -> Result<LinkAttribute> {
    let tx = tx.into();
    let obj = crate::object::open(tx, oid)?;
    let frag = obj
        .data
        .as_object()
        .and_then(|m| m.get(&class.base.id.to_string()))
        .ok_or_else(|| Error::not_found(NotFoundKind::Attribute, class.base.id))?;
    parse(frag)
}

/// Joins the string forms of `dep_attribute` values on `target` with U+200D.
/// A dependency class that no longer exists is fatal; a dependency the
/// object simply doesn't carry contributes an empty segment.
fn update_object_show(
    tx: &WriteTx<'_>,
    target: ObjectId,
    dep_attribute: &[AttributeClassId],
) -> Result<String> {
    let obj = crate::object::open(tx, target)?;
    let mut parts = Vec::with_capacity(dep_attribute.len());
    for dep_id in dep_attribute {
        let class = super::open(tx, *dep_id)?;
        let part = match class.from_object(&obj) {
            Ok(attr) => attr.string(),
            Err(Error::NotFound { kind: NotFoundKind::Attribute, .. }) => String::new(),
            Err(err) => return Err(err),
        };
        parts.push(part);
    }
    Ok(parts.join(&ZWJ.to_string()))
}

pub fn insert(class: &LinkClass, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<Attribute> {
    let attr = refresh_show(tx, &LinkAttribute::default(), &class.meta.dep_attribute)?;
    write_fragment(class, db, tx, oid, &attr)?;
    super::mark_attached(tx, oid, class.base.id)?;
    super::touch_update_table(tx, &class.meta.updated_table, oid)?;
    Ok(Attribute::Link(attr))
}

/// Recomputes `show` for every id in `attr.raw` from `dep_attribute`, so the
/// persisted display cache reflects each referenced object's current
/// dependency values rather than whatever the caller passed in.
fn refresh_show(tx: &WriteTx<'_>, attr: &LinkAttribute, dep_attribute: &[AttributeClassId]) -> Result<LinkAttribute> {
    let mut attr = attr.clone();
    for r in attr.raw.clone() {
        let display = update_object_show(tx, r, dep_attribute)?;
        attr.show.insert(r, display);
    }
    Ok(attr)
}

pub fn parse(fragment: &Value) -> Result<LinkAttribute> {
    let value = fragment
        .get("value")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::SchemaViolation {
            detail: "link attribute fragment missing value".into(),
        })?;
    let mut raw = Vec::with_capacity(value.len());
    let mut show = HashMap::with_capacity(value.len());
    for (oid_str, display) in value {
        let oid: ObjectId = oid_str.parse()?;
        let display = display.as_str().unwrap_or_default().to_string();
        raw.push(oid);
        show.insert(oid, display);
    }
    Ok(LinkAttribute { raw, show })
}

pub fn update(class: &LinkClass, db: &Database, tx: &WriteTx<'_>, oid: ObjectId, attr: &LinkAttribute) -> Result<()> {
    let attr = refresh_show(tx, attr, &class.meta.dep_attribute)?;
    write_fragment(class, db, tx, oid, &attr)?;
    super::touch_update_table(tx, &class.meta.updated_table, oid)?;
    Ok(())
}

fn write_fragment(
    class: &LinkClass,
    db: &Database,
    tx: &WriteTx<'_>,
    oid: ObjectId,
    attr: &LinkAttribute,
) -> Result<()> {
    let fragment = serde_json::json!({
        "value": Value::Object(attr.value_map()),
        "idx": attr.idx_string(),
    });
    super::attach_fragment(db, tx, oid, class.base.id, fragment)?;
    tx.execute(
        &format!("DELETE FROM \"{}\" WHERE object_id = ?", class.meta.link_obj_table),
        params![oid],
    )?;
    for r in &attr.raw {
        tx.execute(
            &format!(
                "INSERT INTO \"{}\" (object_id, ref_object_id) VALUES (?, ?)",
                class.meta.link_obj_table
            ),
            params![oid, r],
        )?;
    }
    Ok(())
}

pub fn delete(class: &LinkClass, db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<()> {
    let old = match find(class, tx, oid) {
        Ok(a) => a,
        Err(Error::NotFound { .. }) => LinkAttribute::default(),
        Err(err) => return Err(err),
    };
    let ref_class = super::open(tx, class.meta.ref_link_attribute)?;
    for r in &old.raw {
        if let Ok(Attribute::Link(mut back)) = ref_class.find(tx, *r) {
            if let Some(pos) = back.raw.iter().position(|id| *id == oid) {
                back.raw.remove(pos);
                back.show.remove(&oid);
                ref_class.update(db, tx, *r, &Attribute::Link(back))?;
            }
        }
    }
    super::detach_fragment(db, tx, oid, class.base.id)?;
    tx.execute(
        &format!("DELETE FROM \"{}\" WHERE object_id = ?", class.meta.link_obj_table),
        params![oid],
    )?;
    super::mark_detached(tx, oid, class.base.id)?;
    super::untouch_update_table(tx, &class.meta.updated_table, oid)?;
    Ok(())
}

pub fn set(class: &mut LinkClass, db: &Database, tx: &WriteTx<'_>, patch: JsonMap) -> Result<()> {
    let mut map = class.meta.to_json_map();
    for (k, v) in patch {
        map.insert(k, v);
    }
    let new_meta = LinkMeta::from_json_map(&map)?;
    let dep_changed = new_meta.dep_attribute != class.meta.dep_attribute;
    tx.execute(
        "UPDATE attribute_classes SET attribute_name = ?, attribute_key = ?, attribute_meta_info = ?
         WHERE class_id = ?",
        params![class.base.name, class.base.key, crate::json_path::map_to_sql(&map)?, class.base.id],
    )?;
    class.meta = new_meta;
    if dep_changed {
        db.hooks().register_after_attr(class.base.id, make_hook(class.base.id));
    }
    Ok(())
}

/// Drops both classes of the pair: unattaches from every table,
/// scrubs keys from every object, drops side tables, removes both rows.
pub fn drop_pair(class: LinkClass, db: &Database, tx: &WriteTx<'_>) -> Result<()> {
    let paired_id = class.meta.ref_link_attribute;
    drop_one(&class, db, tx)?;
    if let Ok(AttributeClass::Link(paired)) = super::open(tx, paired_id) {
        drop_one(&paired, db, tx)?;
    }
    Ok(())
}

fn drop_one(class: &LinkClass, db: &Database, tx: &WriteTx<'_>) -> Result<()> {
    super::scrub_from_all_objects(db, tx, class.base.id)?;
    for table_id in super::tables_carrying(tx, class.base.id)? {
        crate::table::unattach_class(tx, table_id, class.base.id)?;
    }
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS \"{}\"; DROP TABLE IF EXISTS \"{}\";",
        class.meta.updated_table, class.meta.link_obj_table
    ))?;
    tx.execute("DELETE FROM attribute_classes WHERE class_id = ?", params![class.base.id])?;
    db.hooks().unregister_attr(class.base.id);
    tracing::info!(class_id = %class.base.id, "dropped link attribute class");
    Ok(())
}

/// Re-registers the `after_attr` hook for every link attribute class
/// persisted in `attribute_classes`. The hook registry lives in memory only
/// in the process, so every fresh [`Database::open`](crate::database::Database::open)
/// has to rebuild it from what was actually persisted rather than relying on
/// `create_pair` having run in this process.
pub(crate) fn rehydrate_hooks(db: &Database, conn: &rusqlite::Connection) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT class_id FROM attribute_classes WHERE attribute_type = 'link'")?;
    let ids: Vec<AttributeClassId> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);
    for id in ids {
        db.hooks().register_after_attr(id, make_hook(id));
    }
    Ok(())
}

/// Called from `after_delete_obj` on object deletion: prunes
/// dangling `raw`/`show` entries and edge rows for every link class that
/// held `deleted` on either side.
pub fn prune_on_object_delete(db: &Database, tx: &WriteTx<'_>, deleted: ObjectId) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT class_id FROM attribute_classes WHERE attribute_type = 'link'",
    )?;
    let class_ids: Vec<AttributeClassId> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);
    for class_id in class_ids {
        let class = match super::open(tx, class_id) {
            Ok(AttributeClass::Link(lc)) => lc,
            _ => continue,
        };
        let referencing: Vec<ObjectId> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT object_id FROM \"{}\" WHERE ref_object_id = ?",
                class.meta.link_obj_table
            ))?;
            stmt.query_map(params![deleted], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        for owner in referencing {
            if owner == deleted {
                continue;
            }
            if let Ok(mut attr) = find(&class, tx, owner) {
                if let Some(pos) = attr.raw.iter().position(|id| *id == deleted) {
                    attr.raw.remove(pos);
                    attr.show.remove(&deleted);
                    update(&class, db, tx, owner, &attr)?;
                }
            }
        }
        tx.execute(
            &format!("DELETE FROM \"{}\" WHERE object_id = ? OR ref_object_id = ?", class.meta.link_obj_table),
            params![deleted, deleted],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;

    fn make_pair(db: &Database, tx: &WriteTx<'_>) -> (LinkClass, LinkClass) {
        create_pair(
            db,
            tx,
            PairSpec {
                a_name: "Parent",
                a_key: "parent",
                a_ref_table: None,
                a_dep_attribute: vec![],
                b_name: "Child",
                b_key: "child",
                b_ref_table: None,
                b_dep_attribute: vec![],
            },
        )
        .unwrap()
    }

    /// Exercises the pair through [`AttributeClass::insert`]/`update` rather
    /// than this module's free functions directly, since the back-reference
    /// bookkeeping lives in the `after_attr` hook those entry points fire.
    #[test]
    fn linking_two_objects_is_visible_from_both_sides() {
        let db = test_db();
        let tx = db.write_tx().unwrap();
        let (parent_class, child_class) = make_pair(&db, &tx);
        let parent_class = AttributeClass::Link(parent_class);
        let child_class = AttributeClass::Link(child_class);
        let parent = crate::object::create(&tx).unwrap();
        let child = crate::object::create(&tx).unwrap();

        parent_class.insert(&db, &tx, parent.id).unwrap();
        let mut attr = LinkAttribute::default();
        attr.raw.push(child.id);
        attr.show.insert(child.id, "child-display".into());
        parent_class
            .update(&db, &tx, parent.id, &Attribute::Link(attr))
            .unwrap();

        let back = match child_class.find(&tx, child.id).unwrap() {
            Attribute::Link(a) => a,
            _ => unreachable!(),
        };
        assert_eq!(back.raw, vec![parent.id]);
        assert_eq!(back.show.get(&parent.id).map(String::as_str), Some("child-display"));
    }

    #[test]
    fn deleting_owner_prunes_dangling_back_reference() {
        let db = test_db();
        let tx = db.write_tx().unwrap();
        let (parent_class, child_class) = make_pair(&db, &tx);
        let parent_class = AttributeClass::Link(parent_class);
        let child_class = AttributeClass::Link(child_class);
        let parent = crate::object::create(&tx).unwrap();
        let child = crate::object::create(&tx).unwrap();

        parent_class.insert(&db, &tx, parent.id).unwrap();
        let mut attr = LinkAttribute::default();
        attr.raw.push(child.id);
        parent_class
            .update(&db, &tx, parent.id, &Attribute::Link(attr))
            .unwrap();

        let back = match child_class.find(&tx, child.id).unwrap() {
            Attribute::Link(a) => a,
            _ => unreachable!(),
        };
        assert_eq!(back.raw, vec![parent.id]);

        // Simulates a bare object deletion that skipped per-attribute
        // teardown; `prune_on_object_delete` is the safety net for that case.
        crate::object::delete(&db, &tx, parent.id).unwrap();
        prune_on_object_delete(&db, &tx, parent.id).unwrap();

        let back = match child_class.find(&tx, child.id).unwrap() {
            Attribute::Link(a) => a,
            _ => unreachable!(),
        };
        assert!(back.raw.is_empty());
    }
}

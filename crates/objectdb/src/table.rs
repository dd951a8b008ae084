//! Table: a named, ordered subset of attribute classes materialized
//! as a per-object denormalized row (`data`, `idx`) in its own
//! `table_<table_id>` side table.
//!
//! A table's field list mutates rarely compared to how often objects in it
//! are read or updated, so mutation is guarded by one mutex scoped to the
//! field list alone, not the whole database — mirroring how this
//! codebase scopes its own in-process mutable projections to the smallest
//! critical section that needs one.

use std::sync::Mutex;

use rusqlite::params;
use serde_json::Value;

use crate::attribute;
use crate::database::Database;
use crate::error::{Error, NotFoundKind, Result};
use crate::id::{AttributeClassId, ObjectId, TableId};
use crate::txn::WriteTx;

pub struct Table {
    pub id: TableId,
    pub name: String,
    data_table: String,
    fields: Mutex<Vec<AttributeClassId>>,
}

fn data_table_name(id: TableId) -> String {
    format!("table_{id}")
}

impl Table {
    pub fn fields(&self) -> Vec<AttributeClassId> {
        self.fields.lock().unwrap().clone()
    }

    /// Creates a new table: allocates an id, creates its `table_<id>` side
    /// table, and persists the `tables` row.
    #[tracing::instrument(level = "info", skip(tx))]
    pub fn create(tx: &WriteTx<'_>, name: &str) -> Result<Table> {
        let id = TableId::generate();
        let data_table = data_table_name(id);
        tx.execute_batch(&format!(
            "CREATE TABLE \"{data_table}\" (
                object_id BLOB PRIMARY KEY REFERENCES objects(object_id) ON DELETE CASCADE,
                data      JSONB NOT NULL,
                idx       BLOB DEFAULT ''
            );"
        ))?;
        tx.execute(
            "INSERT INTO tables (table_id, table_name, meta_info, version) VALUES (?, ?, NULL, 0)",
            params![id, name],
        )?;
        tracing::info!(table_id = %id, %name, "created table");
        Ok(Table {
            id,
            name: name.to_string(),
            data_table,
            fields: Mutex::new(Vec::new()),
        })
    }

    pub fn open<'a, 'd>(tx: impl Into<crate::txn::Tx<'a, 'd>>, id: TableId) -> Result<Table> {
        let tx = tx.into();
        let name: String = tx
            .query_row("SELECT table_name FROM tables WHERE table_id = ?", params![id], |row| {
                row.get(0)
            })
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Error::not_found(NotFoundKind::Table, id),
                other => Error::from(other),
            })?;
        let fields = attribute::ids_for_table(tx, id)?;
        Ok(Table {
            id,
            name,
            data_table: data_table_name(id),
            fields: Mutex::new(fields),
        })
    }

    pub fn data_table(&self) -> &str {
        &self.data_table
    }

    /// Copies each oid's current document into `table_<id>`, records
    /// membership, and rebuilds its `idx`.
    pub fn insert(&self, tx: &WriteTx<'_>, oids: &[ObjectId]) -> Result<()> {
        for &oid in oids {
            let obj = crate::object::open(tx, oid)?;
            tx.execute(
                &format!(
                    "INSERT INTO \"{}\" (object_id, data, idx) VALUES (?, ?, '')
                     ON CONFLICT(object_id) DO UPDATE SET data = excluded.data",
                    self.data_table
                ),
                params![oid, obj.data],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO object_to_tables (object_id, table_id) VALUES (?, ?)",
                params![oid, self.id],
            )?;
            self.rebuild_row(tx, oid, &obj.data)?;
        }
        Ok(())
    }

    pub fn delete(&self, tx: &WriteTx<'_>, oids: &[ObjectId]) -> Result<()> {
        for &oid in oids {
            tx.execute(
                &format!("DELETE FROM \"{}\" WHERE object_id = ?", self.data_table),
                params![oid],
            )?;
            tx.execute(
                "DELETE FROM object_to_tables WHERE object_id = ? AND table_id = ?",
                params![oid, self.id],
            )?;
        }
        Ok(())
    }

    pub fn find(&self, tx: &WriteTx<'_>, oids: &[ObjectId]) -> Result<Vec<(ObjectId, Value)>> {
        let mut out = Vec::with_capacity(oids.len());
        for &oid in oids {
            let data: Option<Value> = tx
                .query_row(
                    &format!("SELECT data FROM \"{}\" WHERE object_id = ?", self.data_table),
                    params![oid],
                    |row| row.get(0),
                )
                .ok();
            if let Some(data) = data {
                out.push((oid, data));
            }
        }
        Ok(out)
    }

    /// Appends `class` to the field list (idempotent), indexes it, and
    /// rebuilds every row's `idx`.
    pub fn add_attribute_class(&self, tx: &WriteTx<'_>, class: &attribute::AttributeClass) -> Result<()> {
        {
            let mut fields = self.fields.lock().unwrap();
            if fields.contains(&class.id()) {
                return Ok(());
            }
            fields.push(class.id());
        }
        tx.execute(
            "INSERT OR IGNORE INTO table_to_attribute_classes (table_id, class_id) VALUES (?, ?)",
            params![self.id, class.id()],
        )?;
        tx.execute_batch(&format!(
            "CREATE INDEX \"{}\" ON \"{}\" (data ->> '{}' DESC);",
            index_name(self.id, class.id()),
            self.data_table,
            class.index_path().sql_path(),
        ))?;
        self.rebuild_all_idx(tx)?;
        Ok(())
    }

    /// Inverse of [`Table::add_attribute_class`], keyed by id so callers
    /// dropping a class (which may no longer have a live `AttributeClass`
    /// value) can still unattach it cleanly.
    pub fn delete_attribute_class(&self, tx: &WriteTx<'_>, class_id: AttributeClassId) -> Result<()> {
        {
            let mut fields = self.fields.lock().unwrap();
            fields.retain(|id| *id != class_id);
        }
        tx.execute(
            "DELETE FROM table_to_attribute_classes WHERE table_id = ? AND class_id = ?",
            params![self.id, class_id],
        )?;
        tx.execute_batch(&format!(
            "DROP INDEX IF EXISTS \"{}\";",
            index_name(self.id, class_id)
        ))?;
        self.rebuild_all_idx(tx)?;
        Ok(())
    }

    pub fn drop_table(self, tx: &WriteTx<'_>) -> Result<()> {
        tx.execute("DELETE FROM tables WHERE table_id = ?", params![self.id])?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\";", self.data_table))?;
        tracing::info!(table_id = %self.id, "dropped table");
        Ok(())
    }

    /// Recomputes `idx` (and refreshes the denormalized `data` copy) for one
    /// row, given the object's current document. Called from the
    /// `after_update_obj` hook registered on [`Database`].
    pub fn rebuild_row(&self, tx: &WriteTx<'_>, oid: ObjectId, data: &Value) -> Result<()> {
        let fields = self.fields();
        let idx = compute_idx(tx, &fields, data)?;
        tx.execute(
            &format!("UPDATE \"{}\" SET data = ?, idx = ? WHERE object_id = ?", self.data_table),
            params![data, idx, oid],
        )?;
        Ok(())
    }

    fn rebuild_all_idx(&self, tx: &WriteTx<'_>) -> Result<()> {
        let fields = self.fields();
        let rows: Vec<(ObjectId, Value)> = {
            let mut stmt = tx.prepare(&format!("SELECT object_id, data FROM \"{}\"", self.data_table))?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        for (oid, data) in rows {
            let idx = compute_idx(tx, &fields, &data)?;
            tx.execute(
                &format!("UPDATE \"{}\" SET idx = ? WHERE object_id = ?", self.data_table),
                params![idx, oid],
            )?;
        }
        Ok(())
    }
}

fn compute_idx(tx: &WriteTx<'_>, fields: &[AttributeClassId], data: &Value) -> Result<String> {
    let mut idx = String::new();
    for class_id in fields {
        let class = attribute::open(tx, *class_id)?;
        idx.push_str(&class.idx_contribution(data));
    }
    Ok(idx)
}

fn index_name(table_id: TableId, class_id: AttributeClassId) -> String {
    format!("idx_{table_id}_{class_id}")
}

/// Called when an attribute class is dropped: removes it from every table
/// that carries it. Loads the table fresh rather than going through
/// [`Database`]'s cache, since the caller may not hold a `&Database` here.
pub(crate) fn unattach_class(tx: &WriteTx<'_>, table_id: TableId, class_id: AttributeClassId) -> Result<()> {
    let table = Table::open(tx, table_id)?;
    table.delete_attribute_class(tx, class_id)
}

/// Registered as an `after_update_obj` hook on [`Database`]: for
/// every table the object belongs to, rebuild its denormalized row.
pub(crate) fn refresh_object_in_all_tables(_db: &Database, tx: &WriteTx<'_>, oid: ObjectId) -> Result<()> {
    let obj = crate::object::open(tx, oid)?;
    let table_ids: Vec<TableId> = {
        let mut stmt = tx.prepare("SELECT table_id FROM object_to_tables WHERE object_id = ?")?;
        stmt.query_map(params![oid], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    for table_id in table_ids {
        let table = Table::open(tx, table_id)?;
        table.rebuild_row(tx, oid, &obj.data)?;
    }
    Ok(())
}

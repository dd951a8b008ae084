//! Object store: CRUD over `objects(object_id, data)`, dispatching the
//! object-level hooks that keep tables and link attributes consistent.

use rusqlite::params;
use serde_json::Value;

use crate::database::Database;
use crate::error::{Error, NotFoundKind, Result};
use crate::id::ObjectId;
use crate::txn::{Tx, WriteTx};

#[derive(Debug, Clone)]
pub struct Object {
    pub id: ObjectId,
    pub data: Value,
}

/// Allocates a new object id and inserts an empty document.
#[tracing::instrument(level = "debug", skip(tx))]
pub fn create(tx: &WriteTx<'_>) -> Result<Object> {
    let id = ObjectId::generate();
    let data = Value::Object(Default::default());
    tx.execute(
        "INSERT INTO objects (object_id, data) VALUES (?, ?)",
        params![id, data],
    )?;
    Ok(Object { id, data })
}

/// Opens an object by id under either a read or write handle.
pub fn open<'a, 'd>(tx: impl Into<Tx<'a, 'd>>, id: ObjectId) -> Result<Object> {
    let tx = tx.into();
    let data: Value = tx
        .query_row(
            "SELECT data FROM objects WHERE object_id = ?",
            params![id],
            |row| row.get(0),
        )
        .map_err(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => {
                Error::not_found(NotFoundKind::Object, id)
            }
            other => Error::from(other),
        })?;
    Ok(Object { id, data })
}

/// Replaces an object's document, firing `pre_update_obj`/`after_update_obj`
/// inside the same transaction. `after_update_obj` is where tables
/// rebuild their denormalized row and link attributes refresh dependents.
#[tracing::instrument(level = "debug", skip(db, tx, new_data))]
pub fn update(db: &Database, tx: &WriteTx<'_>, id: ObjectId, new_data: Value) -> Result<()> {
    db.hooks().fire_pre_update_obj(db, tx, id)?;
    let affected = tx.execute(
        "UPDATE objects SET data = ? WHERE object_id = ?",
        params![new_data, id],
    )?;
    if affected == 0 {
        return Err(Error::not_found(NotFoundKind::Object, id));
    }
    db.hooks().fire_after_update_obj(db, tx, id)?;
    Ok(())
}

/// Deletes an object. Firing `pre_delete_obj` before the row disappears and
/// `after_delete_obj` once it (and everything FK-cascaded from it) is gone.
#[tracing::instrument(level = "debug", skip(db, tx))]
pub fn delete(db: &Database, tx: &WriteTx<'_>, id: ObjectId) -> Result<()> {
    db.hooks().fire_pre_delete_obj(db, tx, id)?;
    let affected = tx.execute("DELETE FROM objects WHERE object_id = ?", params![id])?;
    if affected == 0 {
        return Err(Error::not_found(NotFoundKind::Object, id));
    }
    db.hooks().fire_after_delete_obj(db, tx, id)?;
    Ok(())
}

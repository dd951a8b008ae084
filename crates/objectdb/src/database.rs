//! The database façade: owns the single writer connection,
//! opens fresh read connections on demand, and wires up the object-level
//! hooks that keep tables and link attributes consistent.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::attribute::link;
use crate::config::{OpenOptions, StorePath};
use crate::error::{Error, Result};
use crate::functions;
use crate::hooks::HookRegistry;
use crate::schema;
use crate::table;
use crate::txn::{ReadTx, WriteTx};

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
enum Store {
    File(PathBuf),
    /// A `file:...?mode=memory&cache=shared` URI unique to this `Database`
    /// instance, so every connection opened against it (the writer, and
    /// each fresh reader) sees the same in-memory database rather than each
    /// getting its own private one (the plain `:memory:` behavior).
    Memory(String),
}

/// The embedded object database. One `Database` owns one SQLite file
/// (or one shared in-memory database) and the in-process hook registry that
/// keeps it consistent; cloning is not supported — share a `Database` behind
/// an `Arc` if multiple owners are needed.
pub struct Database {
    writer: Mutex<Connection>,
    store: Store,
    busy_timeout: Duration,
    hooks: HookRegistry,
}

fn open_connection(store: &Store, busy_timeout: Duration, create_if_missing: bool) -> Result<Connection> {
    let conn = match store {
        Store::File(path) => {
            if !create_if_missing && !path.exists() {
                return Err(Error::SchemaViolation {
                    detail: format!("database file not found: {}", path.display()),
                });
            }
            Connection::open(path)?
        }
        Store::Memory(uri) => Connection::open_with_flags(
            uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?,
    };
    conn.busy_timeout(busy_timeout)?;
    // `journal_mode` is a query-style pragma (it returns the mode that was
    // actually set), unlike `foreign_keys` below, so it needs the
    // row-consuming variant.
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_row| Ok(()))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // SQLite keeps in-memory (including shared-cache) databases in `memory`
    // journal mode regardless of what is requested, so only a file-backed
    // database's journal mode is a fatal mismatch.
    if matches!(store, Store::File(_)) {
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            return Err(Error::Fatal(format!(
                "journal_mode did not take effect: got {journal_mode:?}"
            )));
        }
    }
    let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(Error::Fatal("foreign_keys pragma did not take effect".into()));
    }

    functions::install(&conn)?;
    Ok(conn)
}

impl Database {
    /// Opens (and, per `options.create_if_missing`, creates) a database,
    /// runs schema migration, and re-registers the in-process hooks every
    /// persisted link attribute class needs — the hook registry
    /// itself is not persisted, so every open has to rebuild it from
    /// `attribute_classes`.
    #[tracing::instrument(level = "info", skip(options))]
    pub fn open(options: OpenOptions) -> Result<Database> {
        let store = match options.path {
            StorePath::File(path) => Store::File(path),
            StorePath::Memory => {
                let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
                Store::Memory(format!("file:objectdb-mem-{n}?mode=memory&cache=shared"))
            }
        };
        let writer = open_connection(&store, options.busy_timeout, options.create_if_missing)?;
        schema::init(&writer)?;

        let db = Database {
            writer: Mutex::new(writer),
            store,
            busy_timeout: options.busy_timeout,
            hooks: HookRegistry::default(),
        };

        db.hooks
            .push_after_update_obj(Arc::new(table::refresh_object_in_all_tables));
        db.hooks
            .push_after_delete_obj(Arc::new(link::prune_on_object_delete));
        {
            let writer = db.writer.lock().unwrap();
            link::rehydrate_hooks(&db, &writer)?;
        }

        tracing::info!("database opened");
        Ok(db)
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Begins a write transaction. Blocks until any other in-flight write
    /// transaction on this `Database` commits or rolls back (single writer).
    pub fn write_tx(&self) -> Result<WriteTx<'_>> {
        let guard = self.writer.lock().unwrap();
        WriteTx::begin(guard)
    }

    /// Opens a fresh connection for reading. Safe to call while a write
    /// transaction is in flight: WAL mode lets readers proceed against the
    /// last-committed snapshot.
    pub fn read_tx(&self) -> Result<ReadTx> {
        let conn = open_connection(&self.store, self.busy_timeout, true)?;
        Ok(ReadTx { conn })
    }

    /// Drops every registered hook. Test-only: lets a suite reuse one
    /// `Database` across cases without one case's hooks leaking into the
    /// next.
    #[cfg(any(test, feature = "test-support"))]
    pub fn reset_for_test(&self) {
        self.hooks.reset();
        self.hooks
            .push_after_update_obj(Arc::new(table::refresh_object_in_all_tables));
        self.hooks
            .push_after_delete_obj(Arc::new(link::prune_on_object_delete));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;

    #[test]
    fn write_then_read_back_through_separate_connections() {
        let db = test_db();
        let tx = db.write_tx().unwrap();
        let obj = crate::object::create(&tx).unwrap();
        tx.commit().unwrap();

        let read = db.read_tx().unwrap();
        let reopened = crate::object::open(&read, obj.id).unwrap();
        assert_eq!(reopened.id, obj.id);
    }

    #[test]
    fn link_hooks_survive_a_fresh_open_against_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objectdb.sqlite3");

        {
            let db = Database::open(OpenOptions::file(&path)).unwrap();
            let tx = db.write_tx().unwrap();
            let (parent_class, _child_class) = link::create_pair(
                &db,
                &tx,
                link::PairSpec {
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
            .unwrap();
            tx.commit().unwrap();
            drop(parent_class);
        }

        // Reopen: the hook registry starts empty again, so this only works
        // if `open` rehydrates it from the persisted link classes.
        let db = Database::open(OpenOptions::file(&path)).unwrap();
        let tx = db.write_tx().unwrap();
        let classes = {
            let mut stmt = tx
                .prepare("SELECT class_id FROM attribute_classes WHERE attribute_type = 'link'")
                .unwrap();
            stmt.query_map([], |row| row.get::<_, crate::id::AttributeClassId>(0))
                .unwrap()
                .collect::<std::result::Result<Vec<_>, _>>()
                .unwrap()
        };
        let parent_id = classes[0];
        let parent_class = crate::attribute::open(&tx, parent_id).unwrap();
        let child_id = classes[1];
        let child_class = crate::attribute::open(&tx, child_id).unwrap();

        let parent = crate::object::create(&tx).unwrap();
        let child = crate::object::create(&tx).unwrap();
        parent_class.insert(&db, &tx, parent.id).unwrap();
        let mut attr = link::LinkAttribute::default();
        attr.raw.push(child.id);
        parent_class
            .update(&db, &tx, parent.id, &crate::attribute::Attribute::Link(attr))
            .unwrap();

        let back = match child_class.find(&tx, child.id).unwrap() {
            crate::attribute::Attribute::Link(a) => a,
            _ => unreachable!(),
        };
        assert_eq!(back.raw, vec![parent.id]);
    }
}

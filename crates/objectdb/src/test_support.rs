//! Test-only helpers shared across this crate's unit and integration tests.

use serde_json::Value;

use crate::config::OpenOptions;
use crate::database::Database;

/// A fresh, empty, in-memory database with schema already initialized.
pub fn test_db() -> Database {
    Database::open(OpenOptions::memory()).expect("open in-memory test database")
}

/// Dumps every row of `table` (a raw SQLite table name, not a
/// [`crate::table::Table`]) as a JSON array of objects, for asserting on
/// side-table contents in tests without hand-writing `SELECT`s everywhere.
pub fn dump_table(db: &Database, table: &str) -> Value {
    let tx = db.read_tx().expect("read_tx");
    let mut stmt = tx
        .prepare(&format!("SELECT * FROM \"{table}\""))
        .unwrap_or_else(|err| panic!("prepare dump of {table}: {err}"));
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt
        .query_map([], |row| {
            let mut obj = serde_json::Map::new();
            for (idx, name) in column_names.iter().enumerate() {
                let value: Value = row.get(idx).unwrap_or(Value::Null);
                obj.insert(name.clone(), value);
            }
            Ok(Value::Object(obj))
        })
        .unwrap_or_else(|err| panic!("query dump of {table}: {err}"))
        .collect::<std::result::Result<Vec<_>, _>>()
        .unwrap_or_else(|err| panic!("collect dump of {table}: {err}"));
    Value::Array(rows)
}

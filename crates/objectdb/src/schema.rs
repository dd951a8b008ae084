//! Backing-store schema: the fixed set of core tables, created once per
//! database file. Per-table and per-attribute-class side tables are created
//! later by [`crate::table::Table`] and the attribute classes themselves.

use rusqlite::Connection;

use crate::error::Result;

const CORE_SCHEMA: &str = "
CREATE TABLE tables (
    table_id    BLOB PRIMARY KEY,
    table_name  TEXT NOT NULL,
    meta_info   JSONB,
    version     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE table_views (
    table_id    BLOB NOT NULL REFERENCES tables(table_id) ON DELETE CASCADE,
    view_id     BLOB PRIMARY KEY,
    query       JSONB NOT NULL
);
CREATE INDEX idx_table_views_table_id ON table_views(table_id);

CREATE TABLE objects (
    key         INTEGER PRIMARY KEY,
    object_id   BLOB NOT NULL UNIQUE,
    data        JSONB NOT NULL
);

CREATE TABLE attribute_classes (
    class_id              BLOB PRIMARY KEY,
    attribute_name        TEXT NOT NULL,
    attribute_key         TEXT NOT NULL UNIQUE,
    attribute_type        TEXT NOT NULL,
    attribute_meta_info   JSONB
);

CREATE TABLE table_to_attribute_classes (
    table_id    BLOB NOT NULL REFERENCES tables(table_id) ON DELETE CASCADE,
    class_id    BLOB NOT NULL REFERENCES attribute_classes(class_id) ON DELETE CASCADE,
    PRIMARY KEY (table_id, class_id)
);
CREATE INDEX idx_ttac_table_id ON table_to_attribute_classes(table_id);
CREATE INDEX idx_ttac_class_id ON table_to_attribute_classes(class_id);

CREATE TABLE object_to_attribute_classes (
    object_id   BLOB NOT NULL REFERENCES objects(object_id) ON DELETE CASCADE,
    class_id    BLOB NOT NULL REFERENCES attribute_classes(class_id) ON DELETE CASCADE,
    PRIMARY KEY (object_id, class_id)
);
CREATE INDEX idx_otac_object_id ON object_to_attribute_classes(object_id);
CREATE INDEX idx_otac_class_id ON object_to_attribute_classes(class_id);

CREATE TABLE object_to_tables (
    object_id   BLOB NOT NULL REFERENCES objects(object_id) ON DELETE CASCADE,
    table_id    BLOB NOT NULL REFERENCES tables(table_id) ON DELETE CASCADE,
    PRIMARY KEY (object_id, table_id)
);
CREATE INDEX idx_ott_object_table ON object_to_tables(object_id, table_id);
CREATE INDEX idx_ott_table_object ON object_to_tables(table_id, object_id);
";

/// Runs the core schema DDL if `tables` does not already exist. Idempotent:
/// safe to call on every open.
#[tracing::instrument(level = "info", skip(conn))]
pub fn init(conn: &Connection) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'tables')",
        [],
        |row| row.get(0),
    )?;
    if exists {
        return Ok(());
    }
    tracing::info!("initializing core schema");
    conn.execute_batch(CORE_SCHEMA)?;
    Ok(())
}

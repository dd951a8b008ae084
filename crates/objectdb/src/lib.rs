//! `objectdb`: an embedded, schema-flexible object database backed by a
//! single SQLite file.
//!
//! Objects are free-form JSON documents. Structure is layered on top
//! by **attribute classes** — typed, named slots (text, number, or
//! bidirectional link) that an object may or may not carry — and **tables**,
//! which group a subset of attribute classes into a denormalized,
//! indexable, queryable projection. **Views** save a filter/order/
//! paging spec against a table and compile it into SQL.
//!
//! Consistency across these layers (a table's `idx` column, a link's paired
//! back-reference, a link's cached display string) is driven by hooks fired
//! from inside the same write transaction as the mutation that triggered
//! them, rather than by foreign-key triggers in the schema itself —
//! SQLite's own `ON DELETE CASCADE` handles only the leaf-level row
//! deletions; everything that has to *read* other rows to stay consistent
//! goes through [`hooks`].

pub mod attribute;
pub mod config;
pub mod database;
pub mod error;
pub mod functions;
pub mod hooks;
pub mod id;
pub mod json_path;
pub mod object;
pub mod query;
pub mod schema;
pub mod table;
pub mod txn;
pub mod view;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use attribute::{Attribute, AttributeClass, AttributeType};
pub use config::{OpenOptions, StorePath};
pub use database::Database;
pub use error::{Error, Result};
pub use id::{AttributeClassId, AttributeId, Id, ObjectId, TableId, ViewId};
pub use object::Object;
pub use query::{Filter, OrderField};
pub use table::Table;
pub use view::{TableResult, View};

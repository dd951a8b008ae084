//! View & query compiler: a saved filter+order+paging spec against
//! one table, persisted in `table_views`, compiled through [`crate::query`]
//! into a single `SELECT` against the table's `table_<id>` side table.

use rusqlite::params;
use serde_json::Value;

use crate::error::{Error, NotFoundKind, Result};
use crate::id::{AttributeClassId, ObjectId, TableId, ViewId};
use crate::query::{self, Filter, OrderField};
use crate::table::Table;
use crate::txn::{Tx, WriteTx};

const DEFAULT_LIMIT: i64 = 100;

/// The part of a view's spec that round-trips through `table_views.query`
/// `limit`/`offset` are deliberately not members of this shape — they
/// live only on the in-memory [`View`] and are supplied fresh to each
/// `query()` call.
#[derive(Debug, Clone)]
struct PersistedSpec {
    fields: Vec<AttributeClassId>,
    dep_fields: Vec<AttributeClassId>,
    filter: Value,
    order: Value,
}

impl PersistedSpec {
    fn new() -> Self {
        PersistedSpec {
            fields: Vec::new(),
            dep_fields: Vec::new(),
            filter: serde_json::json!({}),
            order: serde_json::json!([]),
        }
    }

    fn to_json(&self) -> Value {
        serde_json::json!({
            "fields": self.fields.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "dep_fields": self.dep_fields.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "filter": self.filter,
            "order": self.order,
        })
    }

    fn from_json(doc: &Value) -> Result<Self> {
        Ok(PersistedSpec {
            fields: parse_class_ids(doc.get("fields"))?,
            dep_fields: parse_class_ids(doc.get("dep_fields"))?,
            filter: doc.get("filter").cloned().unwrap_or_else(|| serde_json::json!({})),
            order: doc.get("order").cloned().unwrap_or_else(|| serde_json::json!([])),
        })
    }
}

fn parse_class_ids(value: Option<&Value>) -> Result<Vec<AttributeClassId>> {
    let array = match value {
        None => return Ok(Vec::new()),
        Some(v) => v.as_array().ok_or_else(|| Error::SchemaViolation {
            detail: "expected an array of attribute-class ids".into(),
        })?,
    };
    array
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .ok_or_else(|| Error::SchemaViolation {
                    detail: "attribute-class id must be a string".into(),
                })
                .and_then(|s| s.parse().map_err(Error::from))
        })
        .collect()
}

/// A saved filter+order+paging spec against one table. Moves
/// through `New → (Filter|SortBy|Limit|Offset)* → Query`: each
/// setter is idempotent and, apart from `limit`/`offset`, persists
/// immediately to `table_views`.
pub struct View {
    pub id: ViewId,
    pub table_id: TableId,
    spec: PersistedSpec,
    limit: i64,
    offset: i64,
}

impl View {
    /// Creates a new, empty view against `table_id` and persists its
    /// (empty) spec row.
    pub fn create(tx: &WriteTx<'_>, table_id: TableId) -> Result<View> {
        let id = ViewId::generate();
        let spec = PersistedSpec::new();
        tx.execute(
            "INSERT INTO table_views (table_id, view_id, query) VALUES (?, ?, ?)",
            params![table_id, id, spec.to_json()],
        )?;
        Ok(View {
            id,
            table_id,
            spec,
            limit: DEFAULT_LIMIT,
            offset: 0,
        })
    }

    /// Reopens a persisted view by id. `limit`/`offset` reset to their
    /// defaults, since they are not part of the persisted spec.
    pub fn open<'a, 'd>(tx: impl Into<Tx<'a, 'd>>, id: ViewId) -> Result<View> {
        let tx = tx.into();
        let (table_id, query): (TableId, Value) = tx
            .query_row(
                "SELECT table_id, query FROM table_views WHERE view_id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Error::not_found(NotFoundKind::View, id),
                other => Error::from(other),
            })?;
        let spec = PersistedSpec::from_json(&query)?;
        Ok(View {
            id,
            table_id,
            spec,
            limit: DEFAULT_LIMIT,
            offset: 0,
        })
    }

    fn persist(&self, tx: &WriteTx<'_>) -> Result<()> {
        tx.execute(
            "UPDATE table_views SET query = ? WHERE view_id = ?",
            params![self.spec.to_json(), self.id],
        )?;
        Ok(())
    }

    /// Sets the filter tree, validating its shape eagerly so a malformed
    /// filter is rejected at setter time rather than at `query()`.
    pub fn filter(&mut self, tx: &WriteTx<'_>, filter: Value) -> Result<&mut Self> {
        query::parse_filter(&filter)?;
        self.spec.filter = filter;
        self.persist(tx)?;
        Ok(self)
    }

    pub fn sort(&mut self, tx: &WriteTx<'_>, order: Value) -> Result<&mut Self> {
        query::parse_order(&order)?;
        self.spec.order = order;
        self.persist(tx)?;
        Ok(self)
    }

    /// Sets the fields marshalled into each result row by `TableResult::marshal`.
    pub fn fields(&mut self, tx: &WriteTx<'_>, fields: Vec<AttributeClassId>) -> Result<&mut Self> {
        self.spec.fields = fields;
        self.persist(tx)?;
        Ok(self)
    }

    /// Sets the dependency fields this view's results are sensitive to
    /// (informational only; consistency is driven by each link class's own
    /// `dep_attribute`, not by this list).
    pub fn dep_fields(&mut self, tx: &WriteTx<'_>, dep_fields: Vec<AttributeClassId>) -> Result<&mut Self> {
        self.spec.dep_fields = dep_fields;
        self.persist(tx)?;
        Ok(self)
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = limit;
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.offset = offset;
        self
    }

    /// Compiles and runs this view's filter/order/limit/offset against its
    /// table's `table_<id>` side table.
    pub fn query<'a, 'd>(&self, tx: impl Into<Tx<'a, 'd>>) -> Result<TableResult> {
        let tx = tx.into();
        let filter = query::parse_filter(&self.spec.filter)?;
        let order = query::parse_order(&self.spec.order)?;
        let where_sql = query::compile_filter(tx, &filter)?;
        let order_sql = query::compile_order(tx, &order)?;
        let table = Table::open(tx, self.table_id)?;

        let mut sql = format!(
            "SELECT object_id, json(data) FROM \"{}\" WHERE {where_sql}",
            table.data_table()
        );
        if let Some(order_sql) = order_sql {
            sql.push_str(&format!(" ORDER BY {order_sql}"));
        }
        sql.push_str(" LIMIT ? OFFSET ?");

        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt
            .query_map(params![self.limit, self.offset], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<(ObjectId, Value)>, _>>()?;
        Ok(TableResult {
            fields: self.spec.fields.clone(),
            rows,
        })
    }
}

/// The result of running a [`View`]'s query: the
/// matched rows plus the field list to marshal them against.
pub struct TableResult {
    pub fields: Vec<AttributeClassId>,
    pub rows: Vec<(ObjectId, Value)>,
}

impl TableResult {
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.rows.iter().map(|(oid, _)| *oid).collect()
    }

    /// Produces `{"object_id": "...", "<ac_id>": <attr_json>, ...}` per row,
    /// invoking each field's `from_object` against the row's denormalized
    /// document.
    pub fn marshal<'a, 'd>(&self, tx: impl Into<Tx<'a, 'd>>) -> Result<Vec<Value>> {
        let tx = tx.into();
        let classes = self
            .fields
            .iter()
            .map(|id| crate::attribute::open(tx, *id))
            .collect::<Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(self.rows.len());
        for (oid, data) in &self.rows {
            let obj = crate::object::Object { id: *oid, data: data.clone() };
            let mut row = serde_json::Map::new();
            row.insert("object_id".into(), Value::String(oid.to_string()));
            for class in &classes {
                let attr = match class.from_object(&obj) {
                    Ok(attr) => attr,
                    Err(Error::NotFound { kind: NotFoundKind::Attribute, .. }) => continue,
                    Err(err) => return Err(err),
                };
                row.insert(class.id().to_string(), attr_to_json(&attr));
            }
            out.push(Value::Object(row));
        }
        Ok(out)
    }
}

fn attr_to_json(attr: &crate::attribute::Attribute) -> Value {
    use crate::attribute::Attribute;
    match attr {
        Attribute::Text(a) => crate::attribute::text::fragment(a),
        Attribute::Number(a) => crate::attribute::number::fragment(a),
        Attribute::Link(a) => {
            let mut value = serde_json::Map::new();
            for oid in &a.raw {
                value.insert(
                    oid.to_string(),
                    Value::String(a.show.get(oid).cloned().unwrap_or_default()),
                );
            }
            serde_json::json!({ "value": Value::Object(value), "idx": a.idx_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;
    use serde_json::json;

    #[test]
    fn filter_and_sort_round_trip_through_table_views() {
        let db = test_db();
        let tx = db.write_tx().unwrap();
        let table = Table::create(&tx, "People").unwrap();
        let name_class = crate::attribute::text::create(&tx, "Name", "name").unwrap();
        table
            .add_attribute_class(&tx, &crate::attribute::AttributeClass::Text(name_class.clone()))
            .unwrap();

        let mut view = View::create(&tx, table.id).unwrap();
        view.filter(&tx, json!({name_class.base.id.to_string(): {"like": "a"}}))
            .unwrap();
        view.fields(&tx, vec![name_class.base.id]).unwrap();
        let view_id = view.id;
        tx.commit().unwrap();

        let tx = db.read_tx().unwrap();
        let reopened = View::open(&tx, view_id).unwrap();
        assert_eq!(reopened.spec.fields, vec![name_class.base.id]);
        assert_eq!(
            reopened.spec.filter,
            json!({name_class.base.id.to_string(): {"like": "a"}})
        );
    }

    #[test]
    fn query_returns_objects_matching_filter_and_marshals_fields() {
        let db = test_db();
        let tx = db.write_tx().unwrap();
        let table = Table::create(&tx, "People").unwrap();
        let name_class = crate::attribute::text::create(&tx, "Name", "name").unwrap();
        let name_attr = crate::attribute::AttributeClass::Text(name_class.clone());
        table
            .add_attribute_class(&tx, &name_attr)
            .unwrap();

        let ada = crate::object::create(&tx).unwrap();
        name_attr.insert(&db, &tx, ada.id).unwrap();
        name_attr
            .update(
                &db,
                &tx,
                ada.id,
                &crate::attribute::Attribute::Text(crate::attribute::text::TextAttribute {
                    value: "Ada".into(),
                }),
            )
            .unwrap();

        let grace = crate::object::create(&tx).unwrap();
        name_attr.insert(&db, &tx, grace.id).unwrap();
        name_attr
            .update(
                &db,
                &tx,
                grace.id,
                &crate::attribute::Attribute::Text(crate::attribute::text::TextAttribute {
                    value: "Grace".into(),
                }),
            )
            .unwrap();

        table.insert(&tx, &[ada.id, grace.id]).unwrap();

        let mut view = View::create(&tx, table.id).unwrap();
        view.filter(&tx, json!({name_class.base.id.to_string(): {"like": "ra"}}))
            .unwrap();
        view.fields(&tx, vec![name_class.base.id]).unwrap();

        let result = view.query(&tx).unwrap();
        assert_eq!(result.object_ids(), vec![grace.id]);

        let marshalled = result.marshal(&tx).unwrap();
        assert_eq!(marshalled.len(), 1);
        assert_eq!(marshalled[0]["object_id"], json!(grace.id.to_string()));
        assert_eq!(
            marshalled[0][name_class.base.id.to_string()]["value"],
            json!("Grace")
        );
    }

    #[test]
    fn default_limit_and_offset_apply_when_unset() {
        let db = test_db();
        let tx = db.write_tx().unwrap();
        let table = Table::create(&tx, "Widgets").unwrap();
        let view = View::create(&tx, table.id).unwrap();
        let result = view.query(&tx).unwrap();
        assert!(result.rows.is_empty());
    }
}

//! SQLite document store
//!
//! Implements the collection-scoped document store that blackboards run
//! against: CRUD, predicate evaluation, server-side sort and limit, an
//! atomic update-and-fetch, and an atomic fetch-and-increment for counters.
//!
//! ## Predicates
//!
//! [`Query`] compiles to a SQL `WHERE` clause over the JSON body:
//!
//! - equality / "contains all of" use `json_each` membership, so a scalar
//!   attribute behaves like a one-element set
//! - "contains none of" is a `NOT EXISTS` over `json_each`
//! - existence uses `json_type`, which is NULL only for a missing path
//! - id conditions compare the `id` column directly

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{BlackboardError, Result};
use crate::models::{Document, DocumentId, ObjectId, ID_FIELD};
use crate::storage::query::{FieldPredicate, Query, SortOrder, Update};
use crate::storage::schema::{init_schema, needs_init};
use crate::storage::stream::{DocumentStream, FindOptions};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a SQLite-backed document store
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        Self::configure(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Collections ====================

    /// Register a collection; returns false if it already existed
    pub fn create_collection(&self, name: &str) -> Result<bool> {
        let conn = self.lock();
        let created = register_collection(&conn, name)?;
        Ok(created)
    }

    /// Remove a collection and all its documents
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM collections WHERE name = ?", params![name])?;
        Ok(removed > 0)
    }

    pub fn collection_exists(&self, name: &str) -> Result<bool> {
        let conn = self.lock();
        let exists = conn
            .prepare("SELECT 1 FROM collections WHERE name = ?")?
            .exists(params![name])?;
        Ok(exists)
    }

    /// Names of all collections, sorted
    pub fn collection_names(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    // ==================== Indexes ====================

    /// Index `field` within `collection`; returns false if the index
    /// already existed
    ///
    /// A partial expression index on the attribute's JSON path, limited to
    /// the collection's rows. `_id` is the primary key and never needs one.
    pub fn ensure_index(&self, collection: &str, field: &str) -> Result<bool> {
        if field == ID_FIELD {
            return Ok(false);
        }
        let path = json_path(field)?;
        let name = index_name(collection, field);

        let conn = self.lock();
        let exists = conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?")?
            .exists(params![name])?;
        if exists {
            return Ok(false);
        }

        // CREATE INDEX takes no bound parameters
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON documents (json_extract(body, {})) WHERE collection = {}",
            quote_identifier(&name),
            quote_literal(&path),
            quote_literal(collection),
        ))?;
        trace!(collection, field, "Created index");
        Ok(true)
    }

    /// Attributes indexed within `collection`, sorted
    pub fn indexed_fields(&self, collection: &str) -> Result<Vec<String>> {
        let prefix = index_name(collection, "");
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'documents' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    // ==================== Documents ====================

    /// Insert a document; the collection is created on first insert
    ///
    /// Fails if the document has no id or the id is already taken.
    pub fn insert(&self, collection: &str, doc: &Document) -> Result<()> {
        let id = doc.id.as_ref().ok_or_else(|| {
            BlackboardError::invalid(format!("Cannot insert into '{}' without an id", collection))
        })?;
        let body = serde_json::to_string(&doc.fields)?;

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        register_collection(&tx, collection)?;
        tx.execute(
            "INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)",
            params![collection, id, body],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Open a lazy result stream
    pub fn find(&self, collection: &str, query: &Query, options: FindOptions) -> DocumentStream {
        DocumentStream::new(self.clone(), collection, query.clone(), options)
    }

    /// First document matching `query` in `sort` order
    pub fn find_one(&self, collection: &str, query: &Query, sort: SortOrder) -> Result<Option<Document>> {
        Ok(self.find_page(collection, query, sort, None, 1)?.into_iter().next())
    }

    /// Fetch one page of matching documents
    ///
    /// `after` is the id of the last document of the previous page; a
    /// `limit` of 0 means no limit.
    pub fn find_page(
        &self,
        collection: &str,
        query: &Query,
        sort: SortOrder,
        after: Option<&DocumentId>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let mut filter = compile(collection, query)?;
        if let Some(last) = after {
            filter.push(
                if sort.is_ascending() { "id > ?" } else { "id < ?" },
                vec![id_to_sql(last)],
            );
        }

        let sql = format!(
            "SELECT id, body FROM documents WHERE {} ORDER BY id {} LIMIT {}",
            filter.clauses.join(" AND "),
            if sort.is_ascending() { "ASC" } else { "DESC" },
            if limit == 0 { -1 } else { limit as i64 },
        );
        trace!(collection, %sql, "find_page");

        let rows = {
            let conn = self.lock();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(filter.params.iter()), |row| {
                    Ok((row.get::<_, DocumentId>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        rows.into_iter()
            .map(|(id, body)| hydrate(id, &body))
            .collect()
    }

    /// Count matching documents
    pub fn count(&self, collection: &str, query: &Query) -> Result<u64> {
        let filter = compile(collection, query)?;
        let sql = format!(
            "SELECT COUNT(*) FROM documents WHERE {}",
            filter.clauses.join(" AND ")
        );
        let conn = self.lock();
        let count: i64 = conn.query_row(&sql, params_from_iter(filter.params.iter()), |row| {
            row.get(0)
        })?;
        Ok(count.max(0) as u64)
    }

    /// Atomically apply `update` to one document and return the result
    ///
    /// Returns `None` if no document has this id.
    pub fn update(&self, collection: &str, id: &DocumentId, update: &Update) -> Result<Option<Document>> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let body: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE collection = ? AND id = ?",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(body) = body else {
            return Ok(None);
        };

        let mut doc = hydrate(id.clone(), &body)?;
        update.apply(&mut doc);

        tx.execute(
            "UPDATE documents SET body = ? WHERE collection = ? AND id = ?",
            params![serde_json::to_string(&doc.fields)?, collection, id],
        )?;
        tx.commit()?;
        Ok(Some(doc))
    }

    /// Permanently remove a document
    pub fn delete(&self, collection: &str, id: &DocumentId) -> Result<bool> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            params![collection, id],
        )?;
        Ok(removed > 0)
    }

    /// Return the integer at `field` of record `record` and store it + 1
    ///
    /// Runs as a single `UPDATE ... RETURNING` statement inside an
    /// immediate transaction, so concurrent callers (also on other
    /// connections) never observe the same value.
    /// A missing field starts at 1.
    pub fn fetch_and_increment(&self, collection: &str, record: &DocumentId, field: &str) -> Result<i64> {
        let path = json_path(field)?;
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value: Option<i64> = tx
            .query_row(
                r#"
                UPDATE documents
                SET body = json_set(body, ?3, COALESCE(json_extract(body, ?3), 1) + 1)
                WHERE collection = ?1 AND id = ?2
                RETURNING json_extract(body, ?3) - 1
                "#,
                params![collection, record, path],
                |row| row.get(0),
            )
            .optional()?;
        tx.commit()?;

        value.ok_or_else(|| BlackboardError::CounterNotFound {
            collection: collection.to_string(),
            record: record.to_string(),
        })
    }
}

fn register_collection(conn: &Connection, name: &str) -> Result<bool> {
    let created = conn.execute(
        "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)",
        params![name, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(created > 0)
}

fn index_name(collection: &str, field: &str) -> String {
    format!("ix:{}:{}", collection, field)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn hydrate(id: DocumentId, body: &str) -> Result<Document> {
    let fields: Map<String, Value> = serde_json::from_str(body)?;
    Ok(Document {
        id: Some(id),
        fields,
    })
}

// ==================== Predicate compilation ====================

struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl SqlFilter {
    fn push(&mut self, clause: impl Into<String>, params: Vec<SqlValue>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }
}

fn compile(collection: &str, query: &Query) -> Result<SqlFilter> {
    let mut filter = SqlFilter {
        clauses: Vec::new(),
        params: Vec::new(),
    };
    filter.push("collection = ?", vec![SqlValue::Text(collection.to_string())]);

    if let Some(id) = &query.id.eq {
        filter.push("id = ?", vec![id_to_sql(id)]);
    }
    if let Some(id) = &query.id.gte {
        filter.push("id >= ?", vec![id_to_sql(id)]);
    }
    if let Some(id) = &query.id.lt {
        filter.push("id < ?", vec![id_to_sql(id)]);
    }

    for (name, predicate) in &query.fields {
        if name == ID_FIELD {
            compile_id_field(&mut filter, predicate)?;
        } else {
            compile_field(&mut filter, name, predicate)?;
        }
    }

    Ok(filter)
}

fn compile_id_field(filter: &mut SqlFilter, predicate: &FieldPredicate) -> Result<()> {
    if predicate.eq.is_some() || predicate.has_membership() {
        return Err(BlackboardError::invalid(format!(
            "Only existence predicates are supported on '{}' as a field",
            ID_FIELD
        )));
    }
    if predicate.exists == Some(false) {
        filter.push("0", Vec::new());
    }
    Ok(())
}

fn compile_field(filter: &mut SqlFilter, name: &str, predicate: &FieldPredicate) -> Result<()> {
    let path = SqlValue::Text(json_path(name)?);

    if let Some(value) = &predicate.eq {
        match value {
            Value::Null => filter.push(
                "(json_type(body, ?) IS NULL OR json_type(body, ?) = 'null')",
                vec![path.clone(), path.clone()],
            ),
            Value::Array(_) | Value::Object(_) => filter.push(
                "json_extract(body, ?) = json(?)",
                vec![path.clone(), SqlValue::Text(value.to_string())],
            ),
            scalar => filter.push(
                "EXISTS (SELECT 1 FROM json_each(body, ?) AS je WHERE je.value = ?)",
                vec![path.clone(), json_to_sql(scalar)],
            ),
        }
    }

    match predicate.exists {
        Some(true) => filter.push("json_type(body, ?) IS NOT NULL", vec![path.clone()]),
        Some(false) => filter.push("json_type(body, ?) IS NULL", vec![path.clone()]),
        None => {}
    }

    for value in &predicate.all {
        filter.push(
            "EXISTS (SELECT 1 FROM json_each(body, ?) AS je WHERE je.value = ?)",
            vec![path.clone(), json_to_sql(value)],
        );
    }

    if !predicate.none.is_empty() {
        let placeholders = vec!["?"; predicate.none.len()].join(", ");
        let mut params = vec![path.clone()];
        params.extend(predicate.none.iter().map(json_to_sql));
        filter.push(
            format!(
                "NOT EXISTS (SELECT 1 FROM json_each(body, ?) AS je WHERE je.value IN ({}))",
                placeholders
            ),
            params,
        );
    }

    Ok(())
}

/// JSON path for an attribute name; dots address nested attributes
fn json_path(name: &str) -> Result<String> {
    let mut path = String::from("$");
    for segment in name.split('.') {
        if segment.is_empty() || segment.contains('"') {
            return Err(BlackboardError::invalid(format!(
                "Invalid attribute name: '{}'",
                name
            )));
        }
        path.push_str(".\"");
        path.push_str(segment);
        path.push('"');
    }
    Ok(path)
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn id_to_sql(id: &DocumentId) -> SqlValue {
    match id {
        DocumentId::Int(n) => SqlValue::Integer(*n),
        DocumentId::Object(oid) => SqlValue::Blob(oid.bytes().to_vec()),
        DocumentId::Key(key) => SqlValue::Text(key.clone()),
    }
}

impl ToSql for DocumentId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(id_to_sql(self)))
    }
}

impl FromSql for DocumentId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(n) => Ok(DocumentId::Int(n)),
            ValueRef::Text(text) => std::str::from_utf8(text)
                .map(|key| DocumentId::Key(key.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Blob(bytes) => <[u8; 12]>::try_from(bytes)
                .map(|raw| DocumentId::Object(ObjectId::from_bytes(raw)))
                .map_err(|_| FromSqlError::InvalidBlobSize {
                    expected_size: 12,
                    blob_size: bytes.len(),
                }),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

//! Storage layer
//!
//! A collection-scoped JSON document store on top of SQLite.
//!
//! ## Architecture
//!
//! - **Collections**: named groups of documents, enumerable by name
//! - **Documents**: JSON bodies keyed by `(collection, id)`, ordered by id
//! - **Queries**: conjunctions of attribute predicates compiled to SQL
//!
//! Blackboards, their tag catalogs and counter records are all plain
//! collections in this store.

pub mod query;
pub mod schema;
pub mod sqlite;
pub mod stream;

pub use query::{FieldPredicate, IdPredicate, Query, SortOrder, Update};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteStore;
pub use stream::{DocumentStream, FindOptions, DEFAULT_BATCH_SIZE};

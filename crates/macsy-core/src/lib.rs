//! MACSY Core Library
//!
//! This crate provides blackboards: named stores of annotated documents
//! shared by independent agents. Agents read documents by tag, date and
//! attribute, write attributes back, and tag documents to hand work to
//! each other.
//!
//! # Architecture
//!
//! - **SQLite**: documents are JSON bodies in named collections
//! - **Counter collection**: per-blackboard id sequences and settings
//! - **Tag collection**: tag names, control and inheritable flags
//!
//! A blackboard is either *standard* (one collection, integer ids) or
//! *date-based* (one collection per year, time-encoded ids).
//!
//! # Quick Start
//!
//! ```text
//! let api = BlackboardApi::open(Access::Standard)?;
//! let feeds = api.load_blackboard("FEED")?;
//!
//! // Documents tagged 11 but not 12, newest first
//! let filter = Filter::builder().tag(11).without_tags([12]).build()?;
//! for doc in feeds.find(&filter)? {
//!     let doc = doc?;
//!     feeds.add_tag(doc.id.as_ref().unwrap(), "POST>Done")?;
//! }
//! ```
//!
//! # Modules
//!
//! - `api`: Opens the store and attaches blackboards (main entry point)
//! - `blackboard`: Per-blackboard facade over tags, counters and documents
//! - `documents`: Standard and year-sharded storage strategies
//! - `filter`: Filter construction and translation to store queries
//! - `cursor`: Result iteration across shards
//! - `tags`: Tag catalog
//! - `counter`: Id sequences and blackboard settings
//! - `storage`: SQLite document store
//! - `models`: Documents, ids and tags
//! - `config`: Application configuration
//! - `logging`: Subscriber setup

pub mod api;
pub mod blackboard;
pub mod config;
pub mod counter;
pub mod cursor;
pub mod documents;
pub mod error;
pub mod filter;
pub mod logging;
pub mod models;
pub mod storage;
pub mod tags;

pub use api::{Access, BlackboardApi};
pub use blackboard::Blackboard;
pub use config::Config;
pub use counter::{BlackboardSettings, BlackboardType, HashSettings, IdentityCounter, Sequence};
pub use cursor::MergeCursor;
pub use documents::{DocumentStorage, DocumentStore, Extremity, ShardedDocumentStore, TagOp};
pub use error::{BlackboardError, ErrorKind, Result};
pub use filter::{Filter, FilterBuilder, FilterTranslator};
pub use models::{Document, DocumentId, ObjectId, Tag, TagRef};
pub use storage::{Query, SortOrder, SqliteStore};
pub use tags::TagCatalog;

//! Nestdb – an embeddable, in-memory, schema-less object database.
//!
//! A [`collection::Collection`] keeps an ordered sequence of records, each a
//! [`datatype::Value`] object under an identity assigned on insertion. On top
//! of the records it offers:
//! * ad-hoc boolean queries built from `(field, operator, value)` conditions
//!   joined with `and`/`or`,
//! * unique indexes, hashes (groups of records in sub-collections) and views
//!   (filtered sub-collections), all kept up to date on every mutation,
//! * transformations (filter, limit, sort, distinct, diff, intersect, join,
//!   split, grouping) returning new collections, and aggregate statistics,
//! * insert, update and remove hooks able to veto the operation they guard,
//! * saving and loading through pluggable formats (JSON and SQLite built in).
//!
//! ## Modules
//! * [`datatype`] – The [`datatype::Value`] model with nested paths and loose ordering.
//! * [`construct`] – Identities, the [`construct::Index`] and the [`construct::Hashtray`].
//! * [`comparator`] – Per-field comparators shared by sorting and ordering filters.
//! * [`filter`] – Field selectors, operators and predicate construction.
//! * [`query`] – The [`query::QueryBuilder`] combining conditions into one predicate.
//! * [`collection`] – The collection itself and its derived structures.
//! * [`transform`] – Transformations and aggregates.
//! * [`settings`] – Update policy and other settings, loadable through `config`.
//! * [`persist`] – Serialized form and storage formats.
//! * [`interface`] – A lock around a collection for multi-threaded hosts.
//!
//! ## Quick Start
//! ```
//! use nestdb::collection::Collection;
//! use serde_json::json;
//!
//! let mut db = Collection::new();
//! db.insert(json!({"name": "ann", "age": 31})).unwrap();
//! db.insert(json!({"name": "bob", "age": 25})).unwrap();
//! let adults = db.select("age", ">", 30).unwrap().fetch();
//! assert_eq!(adults.len(), 1);
//! ```
//!
//! ## Concurrency
//! Everything runs synchronously to completion. Hosts sharing a collection
//! between threads wrap it in an [`interface::SharedCollection`]; only the
//! save and load adapters have asynchronous variants.

pub mod error;
pub mod datatype;
pub mod construct;
pub mod comparator;
pub mod filter;
pub mod query;
pub mod collection;
pub mod transform;
pub mod settings;
pub mod persist;
pub mod interface;

pub use collection::Collection;
pub use datatype::Value;
pub use error::{NestError, Result};

//! Typegraph: the storage core of a typed graph database.
//!
//! Schema types (entity, relation, role and attribute types) and their
//! instances are mapped onto an ordered key-value store. Each transaction
//! works through a [`graph::GraphManager`] holding a schema graph and a data
//! graph; writes are buffered in memory and land in the store atomically on
//! commit. Attribute vertices are content-addressed and deduplicated, and
//! instance statistics stay consistent through a count-job log reconciled
//! after commit.
//!
//! ```no_run
//! use typegraph::{Database, GraphOptions, Label, TypeEncoding};
//!
//! # fn main() -> typegraph::Result<()> {
//! let db = Database::open_in_memory(GraphOptions::default())?;
//! let graph = db.write()?;
//! let person = graph.schema().create(TypeEncoding::Entity, Label::new("person"))?;
//! graph.data().create(person, false)?;
//! db.commit(graph)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod database;
pub mod encoding;
pub mod error;
pub mod graph;
pub mod primitives;
pub mod storage;

pub use database::Database;
pub use encoding::iid::{RuleIid, ThingIid, TypeIid};
pub use encoding::value::Value;
pub use encoding::{Status, ThingEdge, TypeEdge, TypeEncoding, ValueType};
pub use error::{ErrorKind, GraphError, Result};
pub use graph::{
    CommitReport, Conclusion, CountJobReport, DataGraph, GraphManager, Label, RuleBody, RuleRef,
    SchemaGraph, ThingRef, Transitivity, TypeRef,
};
pub use storage::{GraphMetrics, GraphOptions};

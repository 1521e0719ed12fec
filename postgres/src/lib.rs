//! PostgreSQL support for relq
//!
//! Values, column and table definitions, the query descriptor with its
//! compiler, and the relation graph.

pub mod columns;
pub mod common;
pub mod expr;
pub mod query;
pub mod relations;
pub mod table;
pub mod values;

pub use columns::{Column, ColumnType};
pub use common::{PostgresTransactionType, TransactionOptions};
pub use query::{Query, Record, ReturnType, Upsert};
pub use relations::{RelationDecl, RelationKind, Schema, TableId};
pub use table::TableDef;
pub use values::{FromValue, PostgresValue};

/// SQL fragment carrying Postgres values.
pub type PostgresSQL = relq_core::SQL<PostgresValue>;

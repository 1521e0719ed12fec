//! # relq
//!
//! A composable PostgreSQL query builder with a relation graph, nested writes
//! and single-statement upserts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use relq::{
//!     Adapter, AdapterConfig, Column, Orm, RelationDecl, Schema, TableDef,
//!     adapter::tokio_postgres::TokioPostgresDriver, record,
//! };
//!
//! # async fn run() -> relq::Result<()> {
//! let schema = Schema::builder()
//!     .table(
//!         TableDef::new("users")
//!             .column(Column::serial("id").primary_key())
//!             .column(Column::text("email"))
//!             .relation(RelationDecl::has_many("posts", "posts", ["id"], ["author_id"])),
//!     )
//!     .table(
//!         TableDef::new("posts")
//!             .column(Column::serial("id").primary_key())
//!             .column(Column::integer("author_id"))
//!             .column(Column::text("title")),
//!     )
//!     .build()?;
//!
//! let config = AdapterConfig::from_url("postgres://postgres@localhost/app")
//!     .map_err(|err| relq::Error::Transaction(err.to_string()))?;
//! let orm = Orm::new(Adapter::new(TokioPostgresDriver, config), schema);
//!
//! let users = orm.table("users")?;
//! let user = orm
//!     .or_create(users.find_by([("email", "ann@example.com")]), record! { "email" => "ann@example.com" })
//!     .await?;
//! let titles: Vec<String> = orm
//!     .pluck(&orm.related("users", &user.row, "posts")?.pluck("title"))
//!     .await?;
//! # let _ = titles;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! | Crate           | Contents                                              |
//! |-----------------|-------------------------------------------------------|
//! | `relq-core`     | SQL fragments, quoting, errors, tracing macros        |
//! | `relq-postgres` | values, tables, the query compiler, relations         |
//! | `relq`          | adapter, transactions, hooks, the [`Orm`] runner      |

pub mod adapter;
pub mod config;
pub mod hooks;
pub mod orm;
pub mod retry;
pub mod row;

pub use adapter::{Adapter, CommitHook, Driver, Session};
pub use config::{AdapterConfig, ConfigError, ConfigOverrides};
pub use hooks::{HookContext, HookKind, Hooks};
pub use orm::{Orm, Output, Upserted};
pub use retry::ConnectRetry;
pub use row::{QueryResult, Row, RowSet};

pub use relq_core::{CompileError, Error, QueryError, QueryErrorKind, Result, SQL, Statement, quote_ident};
pub use relq_postgres::{
    Column, ColumnType, FromValue, PostgresTransactionType, PostgresValue, Query, Record, RelationDecl,
    RelationKind, ReturnType, Schema, TableDef, TableId, TransactionOptions, Upsert, expr, query, record,
    relations,
};

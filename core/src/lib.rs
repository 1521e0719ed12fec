//! Dialect-free building blocks for relq: SQL fragments, quoting, errors and tracing.
//!
//! Everything in this crate is synchronous and free of I/O. Dialect crates build
//! statements out of [`SQL`] fragments and render them with [`SQL::build`], which
//! numbers placeholders in a single left-to-right pass.

pub mod error;
pub mod quote;
pub mod sql;
pub mod trace;
pub mod traits;

pub use error::{CompileError, Error, QueryError, QueryErrorKind, Result};
pub use quote::{quote_bytea, quote_ident, quote_literal};
pub use sql::*;
pub use traits::*;

//! Driver over [`tokio_postgres`].
//!
//! ```no_run
//! use relq::{Adapter, AdapterConfig, adapter::tokio_postgres::TokioPostgresDriver};
//!
//! # async fn run() -> relq::Result<()> {
//! let config = AdapterConfig::from_url("postgres://postgres@localhost/app").unwrap();
//! let adapter = Adapter::new(TokioPostgresDriver, config);
//! let result = adapter.query("SELECT 1 AS one", &[]).await?;
//! assert_eq!(result.rows[0].get::<i32>("one")?, 1);
//! # Ok(())
//! # }
//! ```

use futures_util::{TryStreamExt, future::BoxFuture, pin_mut};
use relq_core::{Error, QueryError, Result};
use relq_postgres::PostgresValue;
use tokio_postgres::{Client, NoTls, error::ErrorPosition, types::ToSql};

use super::{Driver, Session};
use crate::{config::AdapterConfig, row::RowSet};

/// Connects with [`tokio_postgres::connect`] without TLS. The connection
/// future is spawned on the current runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPostgresDriver;

impl Driver for TokioPostgresDriver {
    fn connect<'a>(&'a self, config: &'a AdapterConfig) -> BoxFuture<'a, Result<Box<dyn Session>>> {
        Box::pin(async move {
            let (client, connection) = tokio_postgres::connect(&config.connection_string(), NoTls)
                .await
                .map_err(|err| {
                    let mut target = QueryError::connection(err.to_string());
                    assign_error(&mut target, &err);
                    Error::Query(target)
                })?;

            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %err, "postgres connection closed");
                    #[cfg(not(feature = "tracing"))]
                    let _ = err;
                }
            });
            Ok(Box::new(TokioPostgresSession { client }) as Box<dyn Session>)
        })
    }
}

struct TokioPostgresSession {
    client: Client,
}

impl Session for TokioPostgresSession {
    fn query<'a>(&'a mut self, text: &'a str, values: &'a [PostgresValue]) -> BoxFuture<'a, Result<RowSet>> {
        Box::pin(async move {
            let statement = self.client.prepare(text).await.map_err(query_error)?;
            let fields: Vec<String> = statement
                .columns()
                .iter()
                .map(|column| column.name().to_owned())
                .collect();

            let params = values.iter().map(|value| value as &(dyn ToSql + Sync));
            let stream = self
                .client
                .query_raw(&statement, params)
                .await
                .map_err(query_error)?;
            pin_mut!(stream);

            let mut rows = Vec::new();
            while let Some(row) = stream.try_next().await.map_err(query_error)? {
                let values = (0..row.len())
                    .map(|index| row.try_get::<_, PostgresValue>(index))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|err| Error::Mapping(err.to_string()))?;
                rows.push(values);
            }

            let mut set = RowSet::new(fields, rows);
            if set.fields.is_empty() {
                set.row_count = stream.rows_affected().unwrap_or_default();
            }
            Ok(set)
        })
    }

    fn batch<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.client.batch_execute(text).await.map_err(query_error) })
    }

    fn is_open(&self) -> bool {
        !self.client.is_closed()
    }
}

fn query_error(err: tokio_postgres::Error) -> Error {
    let mut target = QueryError::new(err.to_string());
    assign_error(&mut target, &err);
    Error::Query(target)
}

/// Copies what the driver reports about `err` onto `target`.
///
/// Server errors carry the full field set. A closed connection is tagged
/// with SQLSTATE `08006` so it classifies as a connection error.
pub fn assign_error(target: &mut QueryError, err: &tokio_postgres::Error) {
    let Some(db) = err.as_db_error() else {
        if err.is_closed() {
            target.code = Some("08006".to_owned());
        }
        return;
    };
    target.message = db.message().to_owned();
    target.code = Some(db.code().code().to_owned());
    target.severity = Some(db.severity().to_owned());
    target.detail = db.detail().map(str::to_owned);
    target.hint = db.hint().map(str::to_owned);
    target.schema = db.schema().map(str::to_owned);
    target.table = db.table().map(str::to_owned);
    target.column = db.column().map(str::to_owned);
    target.datatype = db.datatype().map(str::to_owned);
    target.constraint = db.constraint().map(str::to_owned);
    target.position = match db.position() {
        Some(ErrorPosition::Original(position)) => Some(*position),
        Some(ErrorPosition::Internal { position, .. }) => Some(*position),
        None => None,
    };
    target.file = db.file().map(str::to_owned);
    target.line = db.line();
    target.routine = db.routine().map(str::to_owned);
}

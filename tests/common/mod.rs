#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use relq::{
    Adapter, AdapterConfig, Column, ConnectRetry, Driver, Error, HookContext, HookKind, Hooks, PostgresValue,
    QueryError, RelationDecl, Result, RowSet, Schema, Session, TableDef, relations::JoinTable,
};

/// A statement as the driver saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Logged {
    pub session: usize,
    pub text: String,
    pub values: Vec<PostgresValue>,
}

type Handler = Arc<dyn Fn(&str, &[PostgresValue]) -> Result<RowSet> + Send + Sync>;

/// In-memory driver that records every statement and answers from a script.
#[derive(Clone)]
pub struct MockDriver {
    log: Arc<Mutex<Vec<Logged>>>,
    handler: Arc<Mutex<Handler>>,
    failing_connects: Arc<AtomicU32>,
    connects: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            handler: Arc::new(Mutex::new(Arc::new(|_: &str, _: &[PostgresValue]| Ok(RowSet::affected(0))))),
            failing_connects: Arc::default(),
            connects: Arc::default(),
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
            latency: None,
        }
    }

    /// Answers every statement with `handler`.
    pub fn respond(self, handler: impl Fn(&str, &[PostgresValue]) -> Result<RowSet> + Send + Sync + 'static) -> Self {
        *self.handler.lock() = Arc::new(handler);
        self
    }

    /// The next `count` connection attempts fail with a connection error.
    pub fn failing_connects(self, count: u32) -> Self {
        self.failing_connects.store(count, Ordering::SeqCst);
        self
    }

    /// Every statement sleeps this long before answering.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn adapter(&self) -> Adapter {
        Adapter::new(self.clone(), config())
    }

    pub fn logged(&self) -> Vec<Logged> {
        self.log.lock().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().iter().map(|logged| logged.text.clone()).collect()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Driver for MockDriver {
    fn connect<'a>(&'a self, _config: &'a AdapterConfig) -> BoxFuture<'a, Result<Box<dyn Session>>> {
        Box::pin(async move {
            let failing = self.failing_connects.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_connects.store(failing - 1, Ordering::SeqCst);
                return Err(Error::Query(QueryError::connection("connection refused")));
            }
            let id = self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                id,
                driver: self.clone(),
            }) as Box<dyn Session>)
        })
    }
}

struct MockSession {
    id: usize,
    driver: MockDriver,
}

impl MockSession {
    fn record(&self, text: &str, values: &[PostgresValue]) {
        self.driver.log.lock().push(Logged {
            session: self.id,
            text: text.to_owned(),
            values: values.to_vec(),
        });
    }
}

impl Session for MockSession {
    fn query<'a>(&'a mut self, text: &'a str, values: &'a [PostgresValue]) -> BoxFuture<'a, Result<RowSet>> {
        Box::pin(async move {
            self.record(text, values);
            let now = self.driver.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.driver.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(latency) = self.driver.latency {
                tokio::time::sleep(latency).await;
            }
            let handler = self.driver.handler.lock().clone();
            let result = handler(text, values);
            self.driver.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn batch<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(text, &[]);
            Ok(())
        })
    }
}

pub fn config() -> AdapterConfig {
    AdapterConfig {
        database: "app".into(),
        connect_retry: ConnectRetry::none(),
        ..AdapterConfig::default()
    }
}

/// A result set with the given columns.
pub fn rows<const N: usize>(fields: [&str; N], rows: Vec<[PostgresValue; N]>) -> RowSet {
    RowSet::new(
        fields.iter().map(|field| field.to_string()).collect(),
        rows.into_iter().map(Vec::from).collect(),
    )
}

pub fn int(value: i32) -> PostgresValue {
    PostgresValue::Integer(value)
}

pub fn text(value: &str) -> PostgresValue {
    PostgresValue::Text(value.to_owned())
}

/// users, posts, profiles, tags and their join table.
pub fn schema() -> Arc<Schema> {
    Schema::builder()
        .table(
            TableDef::new("users")
                .column(Column::serial("id").primary_key())
                .column(Column::text("name"))
                .column(Column::integer("visits"))
                .relation(RelationDecl::has_many("posts", "posts", ["id"], ["user_id"]))
                .relation(RelationDecl::has_one("profile", "profiles", ["id"], ["user_id"])),
        )
        .table(
            TableDef::new("posts")
                .column(Column::serial("id").primary_key())
                .column(Column::integer("user_id"))
                .column(Column::text("title"))
                .soft_delete("deleted_at")
                .relation(RelationDecl::belongs_to("author", "users", ["user_id"], ["id"]))
                .relation(RelationDecl::habtm(
                    "tags",
                    "tags",
                    JoinTable::new("post_tags", ["id"], ["post_id"], ["id"], ["tag_id"]),
                )),
        )
        .table(
            TableDef::new("profiles")
                .column(Column::serial("id").primary_key())
                .column(Column::integer("user_id"))
                .column(Column::text("bio")),
        )
        .table(
            TableDef::new("tags")
                .column(Column::serial("id").primary_key())
                .column(Column::text("name")),
        )
        .table(
            TableDef::new("post_tags")
                .column(Column::integer("post_id"))
                .column(Column::integer("tag_id")),
        )
        .build()
        .unwrap()
}

pub type Events = Arc<Mutex<Vec<&'static str>>>;

/// Hooks of every kind that log their kind. Commit hooks also check that
/// `COMMIT` was the last statement the driver saw.
pub fn recorder(events: &Events, driver: &MockDriver) -> Hooks {
    HookKind::ALL.iter().fold(Hooks::new(), |hooks, &kind| {
        let (events, driver) = (events.clone(), driver.clone());
        hooks.on(kind, move |context: HookContext| {
            let (events, driver) = (events.clone(), driver.clone());
            async move {
                if context.kind.is_commit() {
                    assert_eq!(driver.statements().last().map(String::as_str), Some("COMMIT"));
                }
                events.lock().push(context.kind.name());
                Ok(())
            }
        })
    })
}

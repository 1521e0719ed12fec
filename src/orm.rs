//! Runs compiled queries and fires table hooks.

use std::{future::Future, sync::Arc};

use futures_util::future::BoxFuture;
use hashbrown::HashMap;
use relq_core::{Error, Result, relq_trace_write};
use relq_postgres::{
    FromValue, PostgresValue, Query, Record, ReturnType, Schema, TableId, TransactionOptions, Upsert,
    query::{FOUND_COLUMN, UpsertKind},
    relations::{CreateData, CreatePlan, NestedStep, NestedUpdate},
};

use crate::{
    adapter::Adapter,
    hooks::{HookContext, HookKind, Hooks},
    row::{Row, RowSet},
};

/// A query result shaped by the query's [`ReturnType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Value(Option<PostgresValue>),
    Pluck(Vec<PostgresValue>),
    Arrays(RowSet),
    Affected(u64),
}

/// The row an upsert or `or_create` returned, and which branch produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    /// `row` shaped by the query's return type: a row, or a value for
    /// queries built from `get`.
    pub output: Output,
    pub row: Row,
    pub created: bool,
}

impl Upserted {
    /// The selected value, for upserts built from `get`.
    pub fn value<T: FromValue>(&self) -> Result<T> {
        match &self.output {
            Output::Value(value) => T::from_value(value.clone().unwrap_or_default()),
            other => Err(Error::Mapping(format!("expected a value, got {other:?}"))),
        }
    }
}

struct Inner {
    adapter: Adapter,
    schema: Arc<Schema>,
    hooks: HashMap<TableId, Hooks>,
}

/// A schema bound to an adapter.
#[derive(Clone)]
pub struct Orm {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orm")
            .field("adapter", &self.inner.adapter)
            .field("hooks", &self.inner.hooks.len())
            .finish()
    }
}

impl Orm {
    pub fn new(adapter: Adapter, schema: Arc<Schema>) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                schema,
                hooks: HashMap::new(),
            }),
        }
    }

    /// Registers the hooks of `table`, replacing earlier ones.
    pub fn with_hooks(self, table: &str, hooks: Hooks) -> Result<Self> {
        let id = self.inner.schema.table_id(table)?;
        let mut map = self.inner.hooks.clone();
        map.insert(id, hooks);
        Ok(Self {
            inner: Arc::new(Inner {
                adapter: self.inner.adapter.clone(),
                schema: self.inner.schema.clone(),
                hooks: map,
            }),
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.inner.adapter
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    /// A query over `table`.
    pub fn table(&self, table: &str) -> Result<Query> {
        Ok(self.inner.schema.query(table)?)
    }

    /// Rows of `relation` belonging to the loaded row `owner` of `table`.
    pub fn related(&self, table: &str, owner: &Row, relation: &str) -> Result<Query> {
        Ok(self.table(table)?.related(relation, &owner.to_record())?)
    }

    /// See [`Adapter::transaction`].
    pub async fn transaction<F, Fut, T>(&self, options: TransactionOptions, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.inner.adapter.transaction(options, body).await
    }

    fn hooks(&self, query: &Query) -> Option<&Hooks> {
        query
            .meta()
            .and_then(|meta| self.inner.hooks.get(&meta.id))
            .filter(|hooks| !hooks.is_empty())
    }

    async fn raw(&self, query: &Query) -> Result<RowSet> {
        let statement = query.build()?;
        self.inner.adapter.execute(&statement).await
    }

    fn parse(query: &Query, rows: Vec<Row>) -> Vec<Row> {
        match query.table_def() {
            Some(def) if def.columns.iter().any(|column| column.parser.is_some()) => {
                rows.into_iter().map(|row| row.parse_with(def)).collect()
            }
            _ => rows,
        }
    }

    /// Runs `query` and returns every row, whatever its return type.
    pub async fn all(&self, query: &Query) -> Result<Vec<Row>> {
        let rows = self.raw(query).await?.into_rows();
        Ok(Self::parse(query, rows))
    }

    /// Runs `query` and shapes the result by its return type.
    pub async fn fetch(&self, query: &Query) -> Result<Output> {
        let return_type = query.return_type();
        if return_type == ReturnType::Void {
            return Ok(Output::Affected(self.raw(query).await?.row_count));
        }
        if return_type == ReturnType::Rows {
            return Ok(Output::Arrays(self.raw(query).await?));
        }

        Self::shape(return_type, self.all(query).await?)
    }

    /// Shapes loaded rows by a return type other than `Rows` and `Void`.
    fn shape(return_type: ReturnType, rows: Vec<Row>) -> Result<Output> {
        let mut rows = rows.into_iter();
        Ok(match return_type {
            ReturnType::One => Output::Row(rows.next()),
            ReturnType::OneOrThrow => Output::Row(Some(rows.next().ok_or(Error::NotFound)?)),
            ReturnType::Value => Output::Value(rows.next().and_then(|row| row.into_values().into_iter().next())),
            ReturnType::ValueOrThrow => {
                let row = rows.next().ok_or(Error::NotFound)?;
                Output::Value(row.into_values().into_iter().next())
            }
            ReturnType::Pluck => Output::Pluck(
                rows.filter_map(|row| row.into_values().into_iter().next())
                    .collect(),
            ),
            _ => Output::Rows(rows.collect()),
        })
    }

    /// First row; `None` when there is none, unless the query demands one.
    pub async fn one(&self, query: &Query) -> Result<Option<Row>> {
        match self.fetch(query).await? {
            Output::Row(row) => Ok(row),
            Output::Rows(rows) => Ok(rows.into_iter().next()),
            other => Err(Error::Mapping(format!("expected a row, got {other:?}"))),
        }
    }

    /// First column of the first row. A missing row decodes as NULL unless
    /// the query demands one (`get`, `count`).
    pub async fn value<T: FromValue>(&self, query: &Query) -> Result<T> {
        match self.fetch(query).await? {
            Output::Value(value) => T::from_value(value.unwrap_or_default()),
            other => Err(Error::Mapping(format!("expected a value, got {other:?}"))),
        }
    }

    /// Runs a query built with [`Query::exists`].
    pub async fn exists(&self, query: &Query) -> Result<bool> {
        Ok(self.value::<Option<bool>>(query).await?.unwrap_or(false))
    }

    pub async fn pluck<T: FromValue>(&self, query: &Query) -> Result<Vec<T>> {
        match self.fetch(query).await? {
            Output::Pluck(values) => values.into_iter().map(T::from_value).collect(),
            other => Err(Error::Mapping(format!("expected a column, got {other:?}"))),
        }
    }

    /// Runs `query` for its affected row count.
    pub async fn exec(&self, query: &Query) -> Result<u64> {
        Ok(self.raw(query).await?.row_count)
    }

    /// Queues the commit hooks of `kind`, if any.
    async fn after_commit(&self, hooks: &Hooks, context: HookContext) -> Result<()> {
        if !hooks.has(context.kind) {
            return Ok(());
        }
        let hooks = hooks.clone();
        self.inner
            .adapter
            .after_commit(move || async move { hooks.run(context).await })
            .await
    }

    /// Runs `body` in a transaction when `needed`, else directly.
    async fn atomically<Fut, T>(&self, needed: bool, body: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if needed {
            self.inner.adapter.transaction(TransactionOptions::default(), || body).await
        } else {
            body.await
        }
    }

    fn context(query: &Query, kind: HookKind, rows: &[Row], data: Option<Arc<Record>>) -> HookContext {
        HookContext {
            table: query.table_name().to_owned().into(),
            kind,
            rows: rows.into(),
            data,
        }
    }

    /// Fires `before`, runs `statement`, fires `after` and queues `commit`.
    async fn write(
        &self,
        query: &Query,
        statement: Query,
        data: Option<Arc<Record>>,
        [before, after, commit]: [HookKind; 3],
    ) -> Result<Vec<Row>> {
        let hooks = self.hooks(query);
        self.atomically(hooks.is_some(), async {
            if let Some(hooks) = hooks {
                hooks.run(Self::context(query, before, &[], data.clone())).await?;
            }
            let rows = self.all(&statement).await?;
            if let Some(hooks) = hooks {
                hooks.run(Self::context(query, after, &rows, data.clone())).await?;
                self.after_commit(hooks, Self::context(query, commit, &rows, data)).await?;
            }
            Ok(rows)
        })
        .await
    }

    /// Inserts one row with its nested relation writes and returns it.
    ///
    /// `belongs_to` targets are written inside the same statement; other
    /// relations follow once the row exists. Everything runs in one
    /// transaction when there is more than one statement or hooks are
    /// registered.
    pub async fn create(&self, query: Query, data: impl Into<CreateData>) -> Result<Row> {
        let data = data.into();
        let values = Arc::new(data.values.clone());
        let hooks = self.hooks(&query);
        let mut plan = query.clone().plan_create(data)?;
        if plan.insert.selection().is_none() {
            plan.insert = plan.insert.returning_all();
        }

        self.atomically(hooks.is_some() || !plan.pending.is_empty(), async {
            if let Some(hooks) = hooks {
                hooks
                    .run(Self::context(&query, HookKind::BeforeCreate, &[], Some(values.clone())))
                    .await?;
            }
            let row = self.run_plan(plan).await?.ok_or(Error::NotFound)?;
            if let Some(hooks) = hooks {
                let rows = [row.clone()];
                hooks
                    .run(Self::context(&query, HookKind::AfterCreate, &rows, Some(values.clone())))
                    .await?;
                self.after_commit(
                    hooks,
                    Self::context(&query, HookKind::AfterCreateCommit, &rows, Some(values)),
                )
                .await?;
            }
            Ok(row)
        })
        .await
    }

    fn run_plan(&self, plan: CreatePlan) -> BoxFuture<'_, Result<Option<Row>>> {
        Box::pin(async move {
            let CreatePlan { insert, pending } = plan;
            let row = self.all(&insert).await?.into_iter().next();
            if !pending.is_empty() {
                let owner = row.as_ref().ok_or(Error::NotFound)?.to_record();
                for write in &pending {
                    for step in write.steps(&self.inner.schema, &owner)? {
                        self.run_step(step).await?;
                    }
                }
            }
            Ok(row)
        })
    }

    fn run_step(&self, step: NestedStep) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match step {
                NestedStep::Execute(query) => self.exec(&query).await.map(drop),
                NestedStep::ExecuteOne(query) => match self.exec(&query).await? {
                    0 => Err(Error::NotFound),
                    _ => Ok(()),
                },
                NestedStep::Create(plan) => self.run_plan(plan).await.map(drop),
            }
        })
    }

    /// Inserts several rows and returns them.
    pub async fn create_many(&self, query: Query, records: Vec<Record>) -> Result<Vec<Row>> {
        let statement = query.clone().insert_many(records).returning_all();
        self.write(
            &query,
            statement,
            None,
            [HookKind::BeforeCreate, HookKind::AfterCreate, HookKind::AfterCreateCommit],
        )
        .await
    }

    /// Updates the rows matched by `query` and returns them.
    pub async fn update(&self, query: Query, data: Record) -> Result<Vec<Row>> {
        let values = Arc::new(data.clone());
        let statement = match query.selection() {
            Some(_) => query.clone().update(data),
            None => query.clone().update(data).returning_all(),
        };
        self.write(
            &query,
            statement,
            Some(values),
            [HookKind::BeforeUpdate, HookKind::AfterUpdate, HookKind::AfterUpdateCommit],
        )
        .await
    }

    /// Deletes (or soft-deletes) the rows matched by `query` and returns them.
    pub async fn delete(&self, query: Query) -> Result<Vec<Row>> {
        let statement = match query.selection() {
            Some(_) => query.clone().delete(),
            None => query.clone().delete().returning_all(),
        };
        self.write(
            &query,
            statement,
            None,
            [HookKind::BeforeDelete, HookKind::AfterDelete, HookKind::AfterDeleteCommit],
        )
        .await
    }

    /// Applies a nested change to `relation` of the loaded row `owner`.
    pub async fn update_relation(&self, table: &str, owner: &Row, relation: &str, update: NestedUpdate) -> Result<()> {
        let (schema, relation) = self.table(table)?.find_relation(relation)?;
        let steps = relation.nested_update(&schema, &owner.to_record(), update)?;
        let atomic = steps.len() > 1 || steps.iter().any(|step| matches!(step, NestedStep::Create(_)));
        self.atomically(atomic, async {
            for step in steps {
                self.run_step(step).await?;
            }
            Ok(())
        })
        .await
    }

    /// The row matched by `query`, created from `create` when none matches.
    ///
    /// One statement either way. Create hooks fire only when the row was
    /// created.
    pub async fn or_create(&self, query: Query, create: Record) -> Result<Upserted> {
        let upsert = query.clone().or_create(create)?;
        self.run_upsert(&query, upsert).await
    }

    /// Updates the row matched by `query`, or creates it from `create` when
    /// none matches. Update hooks fire for an update, create hooks for a
    /// create, never both.
    pub async fn upsert(&self, query: Query, update: Record, create: Record) -> Result<Upserted> {
        let upsert = query.clone().upsert(update, create)?;
        self.run_upsert(&query, upsert).await
    }

    async fn run_upsert(&self, query: &Query, upsert: Upsert) -> Result<Upserted> {
        let hooks = self.hooks(query);
        self.atomically(hooks.is_some(), async {
            let mut found = Vec::new();
            let mut created = Vec::new();
            for mut row in self.raw(upsert.query()).await?.into_rows() {
                match row.take(FOUND_COLUMN) {
                    Some(PostgresValue::Boolean(true)) => found.push(row),
                    _ => created.push(row),
                }
            }
            if found.len() > 1 {
                return Err(Error::MoreThanOneRow { count: found.len() });
            }

            let (row, was_created) = match (found.pop(), created.pop()) {
                (Some(row), _) => (row, false),
                (None, Some(row)) => (row, true),
                (None, None) => return Err(Error::NotFound),
            };
            let row = match query.table_def() {
                Some(def) => row.parse_with(def),
                None => row,
            };

            let kinds = match (was_created, upsert.kind()) {
                (true, _) => Some((
                    [HookKind::BeforeCreate, HookKind::AfterCreate, HookKind::AfterCreateCommit],
                    upsert.create_data(),
                )),
                (false, UpsertKind::Upsert) => upsert.update_data().map(|data| {
                    (
                        [HookKind::BeforeUpdate, HookKind::AfterUpdate, HookKind::AfterUpdateCommit],
                        data,
                    )
                }),
                (false, UpsertKind::OrCreate) => None,
            };
            if let (Some(hooks), Some(([before, after, commit], data))) = (hooks, kinds) {
                relq_trace_write!("upsert_hooks", query.table_name(), was_created);

                let data = Some(Arc::new(data.clone()));
                let rows = [row.clone()];
                hooks.run(Self::context(query, before, &rows, data.clone())).await?;
                hooks.run(Self::context(query, after, &rows, data.clone())).await?;
                self.after_commit(hooks, Self::context(query, commit, &rows, data)).await?;
            }

            Ok(Upserted {
                output: Self::shape(upsert.return_type(), vec![row.clone()])?,
                row,
                created: was_created,
            })
        })
        .await
    }
}

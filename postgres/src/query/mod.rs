//! The query descriptor.
//!
//! A [`Query`] is a value: every builder method consumes it and returns the next
//! step. Clause lists live behind `Arc`s, so cloning a query is cheap and a
//! step only copies the list it appends to.

mod compile;
mod mutation;
mod upsert;

pub(crate) use compile::typed;
pub use mutation::*;
pub use upsert::*;

use std::{borrow::Cow, sync::Arc};

use crate::{
    PostgresSQL,
    expr::{
        ColumnRef, Expr, IntoExpr, IntoOperand, OrderItem, SelectItem, WhereItem, WindowSpec,
        count_all, eq, in_query, not,
    },
    relations::{Schema, TableId},
    table::TableDef,
};

/// Result shape of a query, independent of its SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    /// Every row
    #[default]
    All,
    /// First row, if any
    One,
    /// First row; no rows is an error
    OneOrThrow,
    /// First column of the first row, if any
    Value,
    /// First column of the first row; no rows is an error
    ValueOrThrow,
    /// First column of every row
    Pluck,
    /// Rows as tuples
    Rows,
    /// Affected row count only
    Void,
}

impl ReturnType {
    pub fn is_single_row(&self) -> bool {
        matches!(
            self,
            ReturnType::One | ReturnType::OneOrThrow | ReturnType::Value | ReturnType::ValueOrThrow
        )
    }
}

/// Link from a query to the schema its table belongs to.
#[derive(Clone)]
pub struct TableMeta {
    pub schema: Arc<Schema>,
    pub id: TableId,
}

impl TableMeta {
    pub fn def(&self) -> &TableDef {
        self.schema.table_def(self.id)
    }
}

impl core::fmt::Debug for TableMeta {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TableMeta")
            .field("table", &self.def().name)
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum FromSource {
    Table,
    Query(Arc<Query>),
    Raw(PostgresSQL),
    /// `SELECT` without a FROM clause
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone)]
pub enum JoinTarget {
    Table {
        name: Cow<'static, str>,
        schema: Option<Cow<'static, str>>,
        alias: Option<Cow<'static, str>>,
    },
    Query {
        query: Box<Query>,
        alias: Cow<'static, str>,
    },
    /// A named relation of the query's table, resolved when compiled
    Relation(Cow<'static, str>),
}

#[derive(Debug, Clone)]
pub struct JoinItem {
    pub kind: JoinKind,
    pub lateral: bool,
    pub target: JoinTarget,
    pub on: Vec<WhereItem>,
}

#[derive(Debug, Clone)]
pub enum CteBody {
    Query(Box<Query>),
    Raw(PostgresSQL),
}

/// `WITH [RECURSIVE] "name"(columns) AS [NOT] MATERIALIZED (body)`
#[derive(Debug, Clone)]
pub struct CteEntry {
    pub name: Cow<'static, str>,
    pub columns: Vec<Cow<'static, str>>,
    pub recursive: bool,
    pub materialized: Option<bool>,
    pub body: CteBody,
}

impl CteEntry {
    pub fn new(name: impl Into<Cow<'static, str>>, query: Query) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            recursive: false,
            materialized: None,
            body: CteBody::Query(Box::new(query)),
        }
    }

    pub fn raw(name: impl Into<Cow<'static, str>>, sql: PostgresSQL) -> Self {
        Self {
            body: CteBody::Raw(sql),
            ..Self::new(name, Query::table("_"))
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn materialized(mut self, materialized: bool) -> Self {
        self.materialized = Some(materialized);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone)]
pub struct SetOp {
    pub kind: SetOpKind,
    pub all: bool,
    pub query: Box<Query>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrength {
    Update,
    NoKeyUpdate,
    Share,
    KeyShare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockWait {
    #[default]
    Wait,
    NoWait,
    SkipLocked,
}

/// `FOR UPDATE [OF ...] [NOWAIT | SKIP LOCKED]`
#[derive(Debug, Clone)]
pub struct LockClause {
    pub strength: LockStrength,
    pub of: Vec<Cow<'static, str>>,
    pub wait: LockWait,
}

#[derive(Debug, Clone)]
pub(crate) enum QueryKind {
    Select,
    Insert(Arc<InsertData>),
    Update(Arc<UpdateData>),
    Delete,
}

/// A copy-on-write query descriptor.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) table: Cow<'static, str>,
    pub(crate) schema: Option<Cow<'static, str>>,
    pub(crate) alias: Option<Cow<'static, str>>,
    pub(crate) only: bool,
    pub(crate) from: FromSource,
    pub(crate) meta: Option<TableMeta>,
    pub(crate) kind: QueryKind,
    pub(crate) distinct: Option<Arc<Vec<Expr>>>,
    pub(crate) select: Option<Arc<Vec<SelectItem>>>,
    pub(crate) wheres: Arc<Vec<WhereItem>>,
    pub(crate) joins: Arc<Vec<JoinItem>>,
    pub(crate) with: Arc<Vec<CteEntry>>,
    pub(crate) group: Arc<Vec<Expr>>,
    pub(crate) having: Arc<Vec<WhereItem>>,
    pub(crate) windows: Arc<Vec<(Cow<'static, str>, WindowSpec)>>,
    pub(crate) set_ops: Arc<Vec<SetOp>>,
    pub(crate) order: Arc<Vec<OrderItem>>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) lock: Option<LockClause>,
    pub(crate) return_type: ReturnType,
    pub(crate) include_deleted: bool,
    pub(crate) unconditional: bool,
}

impl Query {
    // ==================== constructors ====================

    /// A query over a table that is not part of a [`Schema`].
    pub fn table(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            table: name.into(),
            schema: None,
            alias: None,
            only: false,
            from: FromSource::Table,
            meta: None,
            kind: QueryKind::Select,
            distinct: None,
            select: None,
            wheres: Arc::default(),
            joins: Arc::default(),
            with: Arc::default(),
            group: Arc::default(),
            having: Arc::default(),
            windows: Arc::default(),
            set_ops: Arc::default(),
            order: Arc::default(),
            limit: None,
            offset: None,
            lock: None,
            return_type: ReturnType::All,
            include_deleted: false,
            unconditional: false,
        }
    }

    /// A query over a schema table; relation methods and soft delete are
    /// available.
    pub(crate) fn for_table(schema: Arc<Schema>, id: TableId) -> Self {
        let def = schema.table_def(id);
        let mut query = Query::table(def.name.clone());
        query.schema = def.schema.clone();
        query.meta = Some(TableMeta { schema, id });
        query
    }

    /// `SELECT ... FROM (query) AS "alias"`
    pub fn from_query(query: Query, alias: impl Into<Cow<'static, str>>) -> Self {
        let alias = alias.into();
        let mut outer = Query::table(alias.clone());
        outer.from = FromSource::Query(Arc::new(query));
        outer
    }

    /// `SELECT ... FROM <sql> AS "alias"`, e.g. a set-returning function
    pub fn from_raw(sql: PostgresSQL, alias: impl Into<Cow<'static, str>>) -> Self {
        let mut outer = Query::table(alias);
        outer.from = FromSource::Raw(sql);
        outer
    }

    /// `SELECT items` without a FROM clause. Columns render unqualified.
    pub fn projection<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SelectItem>,
    {
        let mut query = Query::table("");
        query.from = FromSource::Nothing;
        query.select(items)
    }

    /// A query over the same table with no clauses.
    pub(crate) fn blank(&self) -> Query {
        match &self.meta {
            Some(meta) => Query::for_table(meta.schema.clone(), meta.id),
            None => {
                let mut query = Query::table(self.table.clone());
                query.schema = self.schema.clone();
                query
            }
        }
    }

    // ==================== accessors ====================

    /// The name unqualified columns are qualified with: the alias, else the table.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    pub fn meta(&self) -> Option<&TableMeta> {
        self.meta.as_ref()
    }

    pub fn table_def(&self) -> Option<&TableDef> {
        self.meta.as_ref().map(TableMeta::def)
    }

    pub fn is_select(&self) -> bool {
        matches!(self.kind, QueryKind::Select)
    }

    pub fn is_insert(&self) -> bool {
        matches!(self.kind, QueryKind::Insert(_))
    }

    pub fn is_update(&self) -> bool {
        matches!(self.kind, QueryKind::Update(_))
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.kind, QueryKind::Delete)
    }

    pub fn conditions(&self) -> &[WhereItem] {
        &self.wheres
    }

    pub fn selection(&self) -> Option<&[SelectItem]> {
        self.select.as_deref().map(Vec::as_slice)
    }

    pub fn lock_clause(&self) -> Option<&LockClause> {
        self.lock.as_ref()
    }

    pub fn ctes(&self) -> &[CteEntry] {
        &self.with
    }

    /// Primary key column names, `id` when the table is unknown.
    pub fn primary_keys(&self) -> Vec<Cow<'static, str>> {
        let keys: Vec<_> = self
            .table_def()
            .map(|def| def.primary_keys().map(|c| c.name.clone()).collect())
            .unwrap_or_default();
        if keys.is_empty() {
            vec![Cow::Borrowed("id")]
        } else {
            keys
        }
    }

    // ==================== FROM ====================

    pub fn alias(mut self, alias: impl Into<Cow<'static, str>>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// `FROM ONLY`, excluding inheriting tables
    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    // ==================== SELECT ====================

    pub fn select<I>(mut self, items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SelectItem>,
    {
        let list = Arc::make_mut(self.select.get_or_insert_with(Arc::default));
        list.extend(items.into_iter().map(Into::into));
        self
    }

    /// `expr AS "alias"`; `expr` may be a sub-query.
    pub fn select_as(self, alias: impl Into<Cow<'static, str>>, expr: impl IntoExpr) -> Self {
        self.select([SelectItem::Aliased(alias.into(), expr.into_expr())])
    }

    /// Load a relation as JSON through a lateral join: an array for
    /// many-relations, an object (or null) for single ones.
    pub fn select_relation(self, relation: impl Into<Cow<'static, str>>) -> Self {
        self.select([SelectItem::Relation(relation.into())])
    }

    /// Replace the selection.
    pub fn reselect<I>(mut self, items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SelectItem>,
    {
        self.select = None;
        self.select(items)
    }

    /// `SELECT DISTINCT`
    pub fn distinct(mut self) -> Self {
        self.distinct.get_or_insert_with(Arc::default);
        self
    }

    /// `SELECT DISTINCT ON (columns)`
    pub fn distinct_on<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoOperand,
    {
        let list = Arc::make_mut(self.distinct.get_or_insert_with(Arc::default));
        list.extend(columns.into_iter().map(IntoOperand::into_operand));
        self
    }

    // ==================== WHERE ====================

    pub fn r#where(mut self, condition: WhereItem) -> Self {
        Arc::make_mut(&mut self.wheres).push(condition);
        self
    }

    /// `"column" = value`
    pub fn where_eq(self, column: impl IntoOperand, value: impl IntoExpr) -> Self {
        self.r#where(eq(column, value))
    }

    pub fn where_not(self, condition: WhereItem) -> Self {
        self.r#where(not(condition))
    }

    /// ORs `condition` with everything added so far.
    pub fn or_where(mut self, condition: WhereItem) -> Self {
        let previous = core::mem::take(Arc::make_mut(&mut self.wheres));
        let left = match previous.len() {
            0 => return self.r#where(condition),
            1 => previous.into_iter().next().unwrap_or(WhereItem::And(Vec::new())),
            _ => WhereItem::And(previous),
        };
        self.r#where(left.or(condition))
    }

    /// `column IN (sub-query)`
    pub fn where_in(self, column: impl IntoOperand, query: Query) -> Self {
        self.r#where(in_query(column, query))
    }

    /// `EXISTS` over a relation of this table.
    pub fn where_exists(self, relation: impl Into<Cow<'static, str>>) -> Self {
        self.where_exists_with(relation, [])
    }

    /// `EXISTS` over a relation, with extra conditions on the related rows.
    pub fn where_exists_with(
        self,
        relation: impl Into<Cow<'static, str>>,
        conditions: impl IntoIterator<Item = WhereItem>,
    ) -> Self {
        self.r#where(WhereItem::RelationExists {
            relation: relation.into(),
            conditions: conditions.into_iter().collect(),
        })
    }

    /// Lift the soft-delete filter.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    // ==================== JOIN ====================

    pub fn join_item(mut self, join: JoinItem) -> Self {
        Arc::make_mut(&mut self.joins).push(join);
        self
    }

    fn join_table(
        self,
        kind: JoinKind,
        table: impl Into<Cow<'static, str>>,
        on: Vec<WhereItem>,
    ) -> Self {
        self.join_item(JoinItem {
            kind,
            lateral: false,
            target: JoinTarget::Table {
                name: table.into(),
                schema: None,
                alias: None,
            },
            on,
        })
    }

    pub fn inner_join(self, table: impl Into<Cow<'static, str>>, on: WhereItem) -> Self {
        self.join_table(JoinKind::Inner, table, vec![on])
    }

    pub fn left_join(self, table: impl Into<Cow<'static, str>>, on: WhereItem) -> Self {
        self.join_table(JoinKind::Left, table, vec![on])
    }

    pub fn right_join(self, table: impl Into<Cow<'static, str>>, on: WhereItem) -> Self {
        self.join_table(JoinKind::Right, table, vec![on])
    }

    pub fn full_join(self, table: impl Into<Cow<'static, str>>, on: WhereItem) -> Self {
        self.join_table(JoinKind::Full, table, vec![on])
    }

    pub fn cross_join(self, table: impl Into<Cow<'static, str>>) -> Self {
        self.join_table(JoinKind::Cross, table, Vec::new())
    }

    /// `JOIN LATERAL (query) AS "alias" ON TRUE`
    pub fn join_lateral(self, kind: JoinKind, query: Query, alias: impl Into<Cow<'static, str>>) -> Self {
        self.join_item(JoinItem {
            kind,
            lateral: true,
            target: JoinTarget::Query {
                query: Box::new(query),
                alias: alias.into(),
            },
            on: Vec::new(),
        })
    }

    /// Inner join on a relation of this table; the related table is aliased
    /// by the relation name.
    pub fn join_relation(self, relation: impl Into<Cow<'static, str>>) -> Self {
        self.join_item(JoinItem {
            kind: JoinKind::Inner,
            lateral: false,
            target: JoinTarget::Relation(relation.into()),
            on: Vec::new(),
        })
    }

    pub fn left_join_relation(self, relation: impl Into<Cow<'static, str>>) -> Self {
        self.join_item(JoinItem {
            kind: JoinKind::Left,
            lateral: false,
            target: JoinTarget::Relation(relation.into()),
            on: Vec::new(),
        })
    }

    // ==================== WITH ====================

    pub fn with_cte(mut self, cte: CteEntry) -> Self {
        Arc::make_mut(&mut self.with).push(cte);
        self
    }

    pub fn with(self, name: impl Into<Cow<'static, str>>, query: Query) -> Self {
        self.with_cte(CteEntry::new(name, query))
    }

    pub fn with_raw(self, name: impl Into<Cow<'static, str>>, sql: PostgresSQL) -> Self {
        self.with_cte(CteEntry::raw(name, sql))
    }

    /// A CTE name not yet used by this query: `base`, `base2`, `base3`, ...
    pub fn unique_cte_name(&self, base: &str) -> String {
        let taken = |name: &str| self.with.iter().any(|cte| cte.name == name);
        if !taken(base) {
            return base.to_owned();
        }
        (2..)
            .map(|n| format!("{base}{n}"))
            .find(|name| !taken(name))
            .unwrap_or_else(|| base.to_owned())
    }

    /// Adds `query` as a CTE under a fresh name (`q`, `q2`, ...) and returns it.
    pub fn with_unique(self, query: Query) -> (Self, String) {
        let name = self.unique_cte_name("q");
        (self.with(name.clone(), query), name)
    }

    // ==================== GROUP / HAVING / WINDOW ====================

    pub fn group_by<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoOperand,
    {
        Arc::make_mut(&mut self.group).extend(columns.into_iter().map(IntoOperand::into_operand));
        self
    }

    pub fn having(mut self, condition: WhereItem) -> Self {
        Arc::make_mut(&mut self.having).push(condition);
        self
    }

    /// Named window: `WINDOW "name" AS (...)`
    pub fn window(mut self, name: impl Into<Cow<'static, str>>, spec: WindowSpec) -> Self {
        Arc::make_mut(&mut self.windows).push((name.into(), spec));
        self
    }

    // ==================== set operations ====================

    fn set_op(mut self, kind: SetOpKind, all: bool, query: Query) -> Self {
        Arc::make_mut(&mut self.set_ops).push(SetOp {
            kind,
            all,
            query: Box::new(query),
        });
        self
    }

    pub fn union(self, query: Query) -> Self {
        self.set_op(SetOpKind::Union, false, query)
    }

    pub fn union_all(self, query: Query) -> Self {
        self.set_op(SetOpKind::Union, true, query)
    }

    pub fn intersect(self, query: Query) -> Self {
        self.set_op(SetOpKind::Intersect, false, query)
    }

    pub fn intersect_all(self, query: Query) -> Self {
        self.set_op(SetOpKind::Intersect, true, query)
    }

    pub fn except(self, query: Query) -> Self {
        self.set_op(SetOpKind::Except, false, query)
    }

    pub fn except_all(self, query: Query) -> Self {
        self.set_op(SetOpKind::Except, true, query)
    }

    // ==================== ORDER / LIMIT ====================

    pub fn order_by(mut self, order: impl Into<OrderItem>) -> Self {
        Arc::make_mut(&mut self.order).push(order.into());
        self
    }

    pub fn order_by_desc(self, column: impl IntoOperand) -> Self {
        self.order_by(OrderItem::desc(column))
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    // ==================== locking ====================

    fn lock_with(mut self, strength: LockStrength) -> Self {
        let lock = self.lock.get_or_insert(LockClause {
            strength,
            of: Vec::new(),
            wait: LockWait::Wait,
        });
        lock.strength = strength;
        self
    }

    pub fn for_update(self) -> Self {
        self.lock_with(LockStrength::Update)
    }

    pub fn for_no_key_update(self) -> Self {
        self.lock_with(LockStrength::NoKeyUpdate)
    }

    pub fn for_share(self) -> Self {
        self.lock_with(LockStrength::Share)
    }

    pub fn for_key_share(self) -> Self {
        self.lock_with(LockStrength::KeyShare)
    }

    /// Restrict the lock to the given tables. Has no effect without a lock.
    pub fn lock_of<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        if let Some(lock) = &mut self.lock {
            lock.of.extend(tables.into_iter().map(Into::into));
        }
        self
    }

    pub fn no_wait(mut self) -> Self {
        if let Some(lock) = &mut self.lock {
            lock.wait = LockWait::NoWait;
        }
        self
    }

    pub fn skip_locked(mut self) -> Self {
        if let Some(lock) = &mut self.lock {
            lock.wait = LockWait::SkipLocked;
        }
        self
    }

    // ==================== return types ====================

    fn returns(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Every row. On update and delete, also allows running without WHERE.
    pub fn all(mut self) -> Self {
        self.unconditional = true;
        if self.is_select() {
            self.return_type = ReturnType::All;
        }
        self
    }

    /// First row; none is an error.
    pub fn take(self) -> Self {
        self.limit(1).returns(ReturnType::OneOrThrow)
    }

    pub fn take_optional(self) -> Self {
        self.limit(1).returns(ReturnType::One)
    }

    /// Row by primary key; none is an error.
    pub fn find(self, key: impl IntoExpr) -> Self {
        let pk = self.primary_keys().swap_remove(0);
        self.r#where(eq(ColumnRef::new(pk), key)).take()
    }

    pub fn find_optional(self, key: impl IntoExpr) -> Self {
        let pk = self.primary_keys().swap_remove(0);
        self.r#where(eq(ColumnRef::new(pk), key)).take_optional()
    }

    /// Row matching all the given column values; none is an error.
    pub fn find_by<I, C, V>(self, conditions: I) -> Self
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<ColumnRef>,
        V: IntoExpr,
    {
        self.where_columns(conditions).take()
    }

    pub fn find_by_optional<I, C, V>(self, conditions: I) -> Self
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<ColumnRef>,
        V: IntoExpr,
    {
        self.where_columns(conditions).take_optional()
    }

    /// `"a" = $1 AND "b" = $2 ...`
    pub fn where_columns<I, C, V>(self, conditions: I) -> Self
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<ColumnRef>,
        V: IntoExpr,
    {
        let pairs = conditions
            .into_iter()
            .map(|(column, value)| (column.into(), value.into_expr()))
            .collect();
        self.r#where(WhereItem::ColumnsEqual(pairs))
    }

    /// Single value of the first row; none is an error.
    pub fn get(self, column: impl IntoOperand) -> Self {
        self.reselect([SelectItem::Expr(column.into_operand())])
            .limit(1)
            .returns(ReturnType::ValueOrThrow)
    }

    pub fn get_optional(self, column: impl IntoOperand) -> Self {
        self.reselect([SelectItem::Expr(column.into_operand())])
            .limit(1)
            .returns(ReturnType::Value)
    }

    /// Single column of every row.
    pub fn pluck(self, column: impl IntoOperand) -> Self {
        self.reselect([SelectItem::Expr(column.into_operand())])
            .returns(ReturnType::Pluck)
    }

    /// `SELECT count(*)` as a value.
    pub fn count(mut self) -> Self {
        self.order = Arc::default();
        self.reselect([count_all()]).returns(ReturnType::ValueOrThrow)
    }

    /// `SELECT true ... LIMIT 1`; no row means false.
    pub fn exists(self) -> Self {
        self.reselect([Expr::raw("true")])
            .limit(1)
            .returns(ReturnType::Value)
    }

    pub fn rows(self) -> Self {
        self.returns(ReturnType::Rows)
    }

    /// Affected row count only.
    pub fn exec(self) -> Self {
        self.returns(ReturnType::Void)
    }

    /// Override the return type directly.
    pub fn return_as(self, return_type: ReturnType) -> Self {
        self.returns(return_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::gt;

    #[test]
    fn steps_share_untouched_clause_lists() {
        let base = Query::table("users")
            .r#where(gt("age", 18))
            .order_by("name");
        let next = base.clone().r#where(eq("active", true));

        assert!(Arc::ptr_eq(&base.order, &next.order));
        assert!(!Arc::ptr_eq(&base.wheres, &next.wheres));
        assert_eq!(base.wheres.len(), 1);
        assert_eq!(next.wheres.len(), 2);
    }

    #[test]
    fn return_type_switches() {
        let q = Query::table("users");
        assert_eq!(q.clone().take().return_type(), ReturnType::OneOrThrow);
        assert_eq!(q.clone().take().limit, Some(1));
        assert_eq!(q.clone().find(1).return_type(), ReturnType::OneOrThrow);
        assert_eq!(q.clone().get_optional("name").return_type(), ReturnType::Value);
        assert_eq!(q.clone().pluck("id").return_type(), ReturnType::Pluck);
        assert_eq!(q.clone().exec().return_type(), ReturnType::Void);
        assert!(q.count().return_type().is_single_row());
    }

    #[test]
    fn unique_cte_names() {
        let (q, first) = Query::table("t").with_unique(Query::table("a"));
        let (q, second) = q.with_unique(Query::table("b"));
        assert_eq!(first, "q");
        assert_eq!(second, "q2");
        assert_eq!(q.unique_cte_name("q"), "q3");
    }

    #[test]
    fn or_where_groups_previous_conditions() {
        let q = Query::table("t")
            .r#where(eq("a", 1))
            .r#where(eq("b", 2))
            .or_where(eq("c", 3));
        assert_eq!(q.wheres.len(), 1);
        assert!(matches!(&q.wheres[0], WhereItem::Or(items) if items.len() == 2));
    }
}

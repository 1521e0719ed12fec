//! Expressions, conditions, aggregates and ordering.
//!
//! Strings passed where a column is expected name a column (`"name"` or
//! `"table.name"`); strings passed where a value is expected are bound as text
//! parameters.

use std::borrow::Cow;

use relq_core::{CompileError, Token};

use crate::{PostgresSQL, query::Query, values::PostgresValue};

//------------------------------------------------------------------------------
// Columns
//------------------------------------------------------------------------------

/// A column reference, qualified or not.
///
/// Unqualified references are qualified with the alias (or table name) of the
/// query they are compiled in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: Option<Cow<'static, str>>,
    pub name: Cow<'static, str>,
}

impl ColumnRef {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(
        table: impl Into<Cow<'static, str>>,
        name: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }
}

impl From<&'static str> for ColumnRef {
    fn from(value: &'static str) -> Self {
        match value.split_once('.') {
            Some((table, name)) => ColumnRef::qualified(table, name),
            None => ColumnRef::new(value),
        }
    }
}

impl From<String> for ColumnRef {
    fn from(value: String) -> Self {
        match value.split_once('.') {
            Some((table, name)) => ColumnRef::qualified(table.to_owned(), name.to_owned()),
            None => ColumnRef::new(value),
        }
    }
}

impl From<&String> for ColumnRef {
    fn from(value: &String) -> Self {
        ColumnRef::from(value.clone())
    }
}

/// Column expression: `col("users.id")`.
pub fn col(column: impl Into<ColumnRef>) -> Expr {
    Expr::Column(column.into())
}

//------------------------------------------------------------------------------
// Expressions
//------------------------------------------------------------------------------

/// A scalar expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Column(ColumnRef),
    /// A bound parameter
    Value(PostgresValue),
    /// Raw SQL, possibly with its own bound values
    Raw(PostgresSQL),
    Func {
        name: Cow<'static, str>,
        args: Vec<Expr>,
    },
    Aggregate(Box<Aggregate>),
    Binary {
        left: Box<Expr>,
        op: Token,
        right: Box<Expr>,
    },
    Cast(Box<Expr>, Cow<'static, str>),
    /// Scalar sub-select, parenthesized when rendered
    Subquery(Box<Query>),
    /// `*` or `"table".*`
    Star(Option<Cow<'static, str>>),
    /// `DEFAULT` inside an insert row
    Default,
    /// `excluded."column"` inside `ON CONFLICT DO UPDATE`
    Excluded(Cow<'static, str>),
}

impl Expr {
    pub fn value(value: impl Into<PostgresValue>) -> Self {
        Expr::Value(value.into())
    }

    pub fn raw(text: impl Into<Cow<'static, str>>) -> Self {
        Expr::Raw(PostgresSQL::raw(text))
    }

    /// Raw SQL with local `$1..$n` placeholders bound to `values`.
    pub fn template(
        text: &str,
        values: impl IntoIterator<Item = PostgresValue>,
    ) -> Result<Self, CompileError> {
        PostgresSQL::template(text, values).map(Expr::Raw)
    }

    pub fn func(name: impl Into<Cow<'static, str>>, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Func {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn now() -> Self {
        Expr::func("now", [])
    }

    pub fn excluded(column: impl Into<Cow<'static, str>>) -> Self {
        Expr::Excluded(column.into())
    }

    pub fn cast(self, ty: impl Into<Cow<'static, str>>) -> Self {
        Expr::Cast(Box::new(self), ty.into())
    }

    pub fn plus(self, rhs: impl IntoExpr) -> Self {
        self.binary(Token::PLUS, rhs)
    }

    pub fn minus(self, rhs: impl IntoExpr) -> Self {
        self.binary(Token::MINUS, rhs)
    }

    pub fn concat(self, rhs: impl IntoExpr) -> Self {
        self.binary(Token::CONCAT, rhs)
    }

    fn binary(self, op: Token, rhs: impl IntoExpr) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(rhs.into_expr()),
        }
    }

    /// `self AS "alias"` in a select list.
    pub fn alias(self, alias: impl Into<Cow<'static, str>>) -> SelectItem {
        SelectItem::Aliased(alias.into(), self)
    }

    /// The name Postgres gives this expression's output column, if any.
    pub(crate) fn output_name(&self) -> Option<&str> {
        match self {
            Expr::Column(column) => Some(&column.name),
            Expr::Func { name, .. } => Some(name),
            Expr::Aggregate(agg) => Some(&agg.func),
            Expr::Cast(inner, _) => inner.output_name(),
            _ => None,
        }
    }
}

/// Conversion into an expression. Values become bound parameters.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for ColumnRef {
    fn into_expr(self) -> Expr {
        Expr::Column(self)
    }
}

impl IntoExpr for PostgresValue {
    fn into_expr(self) -> Expr {
        Expr::Value(self)
    }
}

impl IntoExpr for PostgresSQL {
    fn into_expr(self) -> Expr {
        Expr::Raw(self)
    }
}

impl IntoExpr for Query {
    fn into_expr(self) -> Expr {
        Expr::Subquery(Box::new(self))
    }
}

impl IntoExpr for Aggregate {
    fn into_expr(self) -> Expr {
        Expr::Aggregate(Box::new(self))
    }
}

impl<T: Into<PostgresValue>> IntoExpr for Option<T> {
    fn into_expr(self) -> Expr {
        Expr::Value(self.into())
    }
}

macro_rules! impl_into_expr_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoExpr for $ty {
                #[inline]
                fn into_expr(self) -> Expr {
                    Expr::Value(self.into())
                }
            }
        )*
    };
}

impl_into_expr_value!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    &str,
    &String,
    Vec<u8>,
    serde_json::Value,
    Vec<i32>,
    Vec<i64>,
    Vec<String>,
);

#[cfg(feature = "uuid")]
impl_into_expr_value!(uuid::Uuid);

#[cfg(feature = "chrono")]
impl_into_expr_value!(
    chrono::NaiveDate,
    chrono::NaiveDateTime,
    chrono::DateTime<chrono::Utc>,
);

/// Conversion into the left-hand side of a condition. Strings name columns.
pub trait IntoOperand {
    fn into_operand(self) -> Expr;
}

impl IntoOperand for &'static str {
    fn into_operand(self) -> Expr {
        col(self)
    }
}

impl IntoOperand for String {
    fn into_operand(self) -> Expr {
        col(self)
    }
}

impl IntoOperand for ColumnRef {
    fn into_operand(self) -> Expr {
        Expr::Column(self)
    }
}

impl IntoOperand for Expr {
    fn into_operand(self) -> Expr {
        self
    }
}

impl IntoOperand for Aggregate {
    fn into_operand(self) -> Expr {
        Expr::Aggregate(Box::new(self))
    }
}

//------------------------------------------------------------------------------
// Aggregates and windows
//------------------------------------------------------------------------------

/// An aggregate call with its options:
/// `func(DISTINCT args ORDER BY ...) FILTER (WHERE ...) OVER (...)`.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub func: Cow<'static, str>,
    pub args: Vec<Expr>,
    pub distinct: bool,
    pub order: Vec<OrderItem>,
    pub filter: Vec<WhereItem>,
    pub over: Option<Over>,
}

/// Window reference for `OVER`.
#[derive(Debug, Clone)]
pub enum Over {
    Named(Cow<'static, str>),
    Spec(WindowSpec),
}

/// `PARTITION BY ... ORDER BY ...`
#[derive(Debug, Clone, Default)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
}

/// Creates an empty window specification
pub fn window() -> WindowSpec {
    WindowSpec::default()
}

impl WindowSpec {
    pub fn partition_by(mut self, expr: impl IntoOperand) -> Self {
        self.partition_by.push(expr.into_operand());
        self
    }

    pub fn order_by(mut self, order: impl Into<OrderItem>) -> Self {
        self.order_by.push(order.into());
        self
    }
}

impl Aggregate {
    pub fn new(func: impl Into<Cow<'static, str>>, args: impl IntoIterator<Item = Expr>) -> Self {
        Self {
            func: func.into(),
            args: args.into_iter().collect(),
            distinct: false,
            order: Vec::new(),
            filter: Vec::new(),
            over: None,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn order_by(mut self, order: impl Into<OrderItem>) -> Self {
        self.order.push(order.into());
        self
    }

    pub fn filter(mut self, condition: WhereItem) -> Self {
        self.filter.push(condition);
        self
    }

    /// `OVER "name"`, referring to a window defined on the query.
    pub fn over(mut self, window: impl Into<Cow<'static, str>>) -> Self {
        self.over = Some(Over::Named(window.into()));
        self
    }

    pub fn over_window(mut self, spec: WindowSpec) -> Self {
        self.over = Some(Over::Spec(spec));
        self
    }

    pub fn alias(self, alias: impl Into<Cow<'static, str>>) -> SelectItem {
        SelectItem::Aliased(alias.into(), self.into_expr())
    }
}

/// `count(*)`
pub fn count_all() -> Aggregate {
    Aggregate::new("count", [Expr::Star(None)])
}

pub fn count(expr: impl IntoOperand) -> Aggregate {
    Aggregate::new("count", [expr.into_operand()])
}

pub fn count_distinct(expr: impl IntoOperand) -> Aggregate {
    count(expr).distinct()
}

pub fn sum(expr: impl IntoOperand) -> Aggregate {
    Aggregate::new("sum", [expr.into_operand()])
}

pub fn avg(expr: impl IntoOperand) -> Aggregate {
    Aggregate::new("avg", [expr.into_operand()])
}

pub fn min(expr: impl IntoOperand) -> Aggregate {
    Aggregate::new("min", [expr.into_operand()])
}

pub fn max(expr: impl IntoOperand) -> Aggregate {
    Aggregate::new("max", [expr.into_operand()])
}

pub fn string_agg(expr: impl IntoOperand, delimiter: impl Into<String>) -> Aggregate {
    Aggregate::new(
        "string_agg",
        [expr.into_operand(), Expr::value(delimiter.into())],
    )
}

pub fn json_agg(expr: impl IntoOperand) -> Aggregate {
    Aggregate::new("json_agg", [expr.into_operand()])
}

pub fn bool_and(expr: impl IntoOperand) -> Aggregate {
    Aggregate::new("bool_and", [expr.into_operand()])
}

pub fn bool_or(expr: impl IntoOperand) -> Aggregate {
    Aggregate::new("bool_or", [expr.into_operand()])
}

/// `row_number()`, only meaningful with `over`.
pub fn row_number() -> Aggregate {
    Aggregate::new("row_number", [])
}

pub fn rank() -> Aggregate {
    Aggregate::new("rank", [])
}

//------------------------------------------------------------------------------
// Conditions
//------------------------------------------------------------------------------

/// One entry of a WHERE/HAVING list. Entries of a list are joined with AND.
#[derive(Debug, Clone)]
pub enum WhereItem {
    /// `"a" = $1 AND "b" = $2`
    ColumnsEqual(Vec<(ColumnRef, Expr)>),
    ColumnOp {
        left: Expr,
        op: CmpOp,
    },
    Raw(PostgresSQL),
    Exists(Box<Query>),
    /// `EXISTS` over a named relation of the query's table, resolved when compiled
    RelationExists {
        relation: Cow<'static, str>,
        conditions: Vec<WhereItem>,
    },
    And(Vec<WhereItem>),
    Or(Vec<WhereItem>),
    Not(Box<WhereItem>),
}

/// Comparison operator with its right-hand side.
#[derive(Debug, Clone)]
pub enum CmpOp {
    Eq(Expr),
    Ne(Expr),
    Lt(Expr),
    Lte(Expr),
    Gt(Expr),
    Gte(Expr),
    In(Vec<Expr>),
    NotIn(Vec<Expr>),
    InQuery(Box<Query>),
    NotInQuery(Box<Query>),
    Like(Expr),
    ILike(Expr),
    IsNull,
    IsNotNull,
    Between(Expr, Expr),
}

impl WhereItem {
    pub fn raw(text: impl Into<Cow<'static, str>>) -> Self {
        WhereItem::Raw(PostgresSQL::raw(text))
    }

    /// Raw condition with local `$1..$n` placeholders bound to `values`.
    pub fn template(
        text: &str,
        values: impl IntoIterator<Item = PostgresValue>,
    ) -> Result<Self, CompileError> {
        PostgresSQL::template(text, values).map(WhereItem::Raw)
    }

    pub fn and(self, other: WhereItem) -> Self {
        match self {
            WhereItem::And(mut items) => {
                items.push(other);
                WhereItem::And(items)
            }
            item => WhereItem::And(vec![item, other]),
        }
    }

    pub fn or(self, other: WhereItem) -> Self {
        match self {
            WhereItem::Or(mut items) => {
                items.push(other);
                WhereItem::Or(items)
            }
            item => WhereItem::Or(vec![item, other]),
        }
    }
}

fn op(left: impl IntoOperand, op: CmpOp) -> WhereItem {
    WhereItem::ColumnOp {
        left: left.into_operand(),
        op,
    }
}

pub fn eq(left: impl IntoOperand, right: impl IntoExpr) -> WhereItem {
    op(left, CmpOp::Eq(right.into_expr()))
}

pub fn neq(left: impl IntoOperand, right: impl IntoExpr) -> WhereItem {
    op(left, CmpOp::Ne(right.into_expr()))
}

pub fn lt(left: impl IntoOperand, right: impl IntoExpr) -> WhereItem {
    op(left, CmpOp::Lt(right.into_expr()))
}

pub fn lte(left: impl IntoOperand, right: impl IntoExpr) -> WhereItem {
    op(left, CmpOp::Lte(right.into_expr()))
}

pub fn gt(left: impl IntoOperand, right: impl IntoExpr) -> WhereItem {
    op(left, CmpOp::Gt(right.into_expr()))
}

pub fn gte(left: impl IntoOperand, right: impl IntoExpr) -> WhereItem {
    op(left, CmpOp::Gte(right.into_expr()))
}

pub fn in_list<I>(left: impl IntoOperand, values: I) -> WhereItem
where
    I: IntoIterator,
    I::Item: IntoExpr,
{
    op(left, CmpOp::In(values.into_iter().map(IntoExpr::into_expr).collect()))
}

pub fn not_in<I>(left: impl IntoOperand, values: I) -> WhereItem
where
    I: IntoIterator,
    I::Item: IntoExpr,
{
    op(
        left,
        CmpOp::NotIn(values.into_iter().map(IntoExpr::into_expr).collect()),
    )
}

pub fn in_query(left: impl IntoOperand, query: Query) -> WhereItem {
    op(left, CmpOp::InQuery(Box::new(query)))
}

pub fn not_in_query(left: impl IntoOperand, query: Query) -> WhereItem {
    op(left, CmpOp::NotInQuery(Box::new(query)))
}

pub fn like(left: impl IntoOperand, pattern: impl IntoExpr) -> WhereItem {
    op(left, CmpOp::Like(pattern.into_expr()))
}

pub fn ilike(left: impl IntoOperand, pattern: impl IntoExpr) -> WhereItem {
    op(left, CmpOp::ILike(pattern.into_expr()))
}

pub fn is_null(left: impl IntoOperand) -> WhereItem {
    op(left, CmpOp::IsNull)
}

pub fn is_not_null(left: impl IntoOperand) -> WhereItem {
    op(left, CmpOp::IsNotNull)
}

pub fn between(left: impl IntoOperand, low: impl IntoExpr, high: impl IntoExpr) -> WhereItem {
    op(left, CmpOp::Between(low.into_expr(), high.into_expr()))
}

pub fn exists(query: Query) -> WhereItem {
    WhereItem::Exists(Box::new(query))
}

pub fn not(item: WhereItem) -> WhereItem {
    WhereItem::Not(Box::new(item))
}

pub fn and(items: impl IntoIterator<Item = WhereItem>) -> WhereItem {
    WhereItem::And(items.into_iter().collect())
}

pub fn or(items: impl IntoIterator<Item = WhereItem>) -> WhereItem {
    WhereItem::Or(items.into_iter().collect())
}

//------------------------------------------------------------------------------
// Ordering and selection
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nulls {
    First,
    Last,
}

/// ORDER BY entry
#[derive(Debug, Clone)]
pub struct OrderItem {
    pub expr: Expr,
    pub direction: Option<Direction>,
    pub nulls: Option<Nulls>,
}

impl OrderItem {
    pub fn asc(expr: impl IntoOperand) -> Self {
        Self {
            expr: expr.into_operand(),
            direction: Some(Direction::Asc),
            nulls: None,
        }
    }

    pub fn desc(expr: impl IntoOperand) -> Self {
        Self {
            expr: expr.into_operand(),
            direction: Some(Direction::Desc),
            nulls: None,
        }
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls = Some(Nulls::First);
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = Some(Nulls::Last);
        self
    }
}

impl<T: IntoOperand> From<T> for OrderItem {
    fn from(value: T) -> Self {
        Self {
            expr: value.into_operand(),
            direction: None,
            nulls: None,
        }
    }
}

/// One entry of a select (or RETURNING) list.
#[derive(Debug, Clone)]
pub enum SelectItem {
    Expr(Expr),
    Aliased(Cow<'static, str>, Expr),
    /// JSON of a named relation, loaded through a lateral join
    Relation(Cow<'static, str>),
}

impl SelectItem {
    /// Output column name, when known
    pub(crate) fn output_name(&self) -> Option<&str> {
        match self {
            SelectItem::Expr(expr) => expr.output_name(),
            SelectItem::Aliased(alias, _) | SelectItem::Relation(alias) => Some(alias),
        }
    }
}

impl From<&'static str> for SelectItem {
    fn from(value: &'static str) -> Self {
        match value {
            "*" => SelectItem::Expr(Expr::Star(None)),
            other => match other.strip_suffix(".*") {
                Some(table) => SelectItem::Expr(Expr::Star(Some(table.into()))),
                None => SelectItem::Expr(col(other)),
            },
        }
    }
}

impl From<String> for SelectItem {
    fn from(value: String) -> Self {
        SelectItem::Expr(col(value))
    }
}

impl From<Expr> for SelectItem {
    fn from(value: Expr) -> Self {
        SelectItem::Expr(value)
    }
}

impl From<ColumnRef> for SelectItem {
    fn from(value: ColumnRef) -> Self {
        SelectItem::Expr(Expr::Column(value))
    }
}

impl From<Aggregate> for SelectItem {
    fn from(value: Aggregate) -> Self {
        SelectItem::Expr(value.into_expr())
    }
}

//! Descriptor to SQL.
//!
//! Every clause is rendered into one flat [`PostgresSQL`] chunk list. Bound
//! values stay inline as chunks until [`SQL::build`] numbers them, so values
//! of sub-queries spliced anywhere in the statement keep their textual order.

use std::{borrow::Cow, sync::Arc};

use relq_core::{CompileError, SQL, Statement, Token};

use super::{
    ConflictAction, CteBody, FromSource, InsertData, InsertSource, JoinItem, JoinKind, JoinTarget,
    LockStrength, LockWait, Query, QueryKind, ReturnType, SetOpKind, UpdateData,
};
use crate::{
    PostgresSQL,
    expr::{
        Aggregate, CmpOp, ColumnRef, Direction, Expr, Nulls, OrderItem, Over, SelectItem, WhereItem,
        WindowSpec, is_null,
    },
    relations::{ResolvedRelation, Schema},
    table::TableDef,
    values::PostgresValue,
};

/// Output column of a relation loaded through a lateral join.
const RELATION_COLUMN: &str = "r";
/// Alias of the rows aggregated inside that lateral join.
const RELATION_ROWS: &str = "__rows";

impl Query {
    /// Compiles the descriptor. The result is deterministic and holds the
    /// bound values in placeholder order.
    pub fn to_sql(&self) -> Result<PostgresSQL, CompileError> {
        self.check_shape()?;
        let ctx = Ctx::new(self);
        match &self.kind {
            QueryKind::Select => ctx.select(),
            QueryKind::Insert(data) => ctx.insert(data),
            QueryKind::Update(data) => ctx.update(data),
            QueryKind::Delete => ctx.delete(),
        }
    }

    /// Compiles into `{text, values}`.
    pub fn build(&self) -> Result<Statement<PostgresValue>, CompileError> {
        Ok(self.to_sql()?.build())
    }

    /// Value and pluck queries need exactly one selected expression; no
    /// select list means `*`, which is never a single column.
    fn check_shape(&self) -> Result<(), CompileError> {
        let count = self.select.as_ref().map_or(0, |items| items.len());
        match self.return_type {
            ReturnType::Value | ReturnType::ValueOrThrow if count != 1 => {
                Err(CompileError::ValueWithMultipleColumns { count })
            }
            ReturnType::Pluck if count != 1 => Err(CompileError::PluckWithMultipleColumns { count }),
            _ => Ok(()),
        }
    }

    /// `"col" IS NULL` for soft-delete tables, unless lifted.
    pub(crate) fn soft_delete_filter(&self) -> Option<WhereItem> {
        if self.include_deleted || self.is_insert() {
            return None;
        }
        let column = self.table_def()?.soft_delete.clone()?;
        Some(is_null(ColumnRef::new(column)))
    }

    /// User conditions followed by the soft-delete filter.
    pub(crate) fn effective_conditions(&self) -> Vec<WhereItem> {
        let mut conditions = self.wheres.as_ref().clone();
        conditions.extend(self.soft_delete_filter());
        conditions
    }

    /// Needs parentheses when used as an operand of a set operation.
    fn is_compound(&self) -> bool {
        !self.order.is_empty()
            || self.limit.is_some()
            || self.offset.is_some()
            || self.lock.is_some()
            || !self.set_ops.is_empty()
            || !self.with.is_empty()
    }
}

pub(crate) fn table_ident(schema: Option<&Cow<'static, str>>, table: &Cow<'static, str>) -> PostgresSQL {
    match schema {
        Some(schema) => SQL::qualified(schema.clone(), table.clone()),
        None => SQL::ident(table.clone()),
    }
}

fn ident_list(names: &[Cow<'static, str>]) -> PostgresSQL {
    SQL::join(names.iter().map(|name| SQL::ident(name.clone())), Token::COMMA)
}

/// Casts a literal to the column's type, falling back to the value's own
/// type when the column is unknown.
pub(crate) fn typed(def: Option<&TableDef>, column: &str, value: &Expr) -> Expr {
    let ty = def
        .and_then(|def| def.find_column(column))
        .map(|column| column.ty.cast_name())
        .or(match value {
            Expr::Value(value) => value.sql_type(),
            _ => None,
        });
    match (value, ty) {
        (Expr::Default, _) | (_, None) => value.clone(),
        (value, Some(ty)) => value.clone().cast(ty),
    }
}

/// Compilation context of one query level.
pub(crate) struct Ctx<'q> {
    pub(crate) query: &'q Query,
    /// Qualifier for unqualified columns; `None` renders them bare
    qualifier: Option<&'q str>,
}

impl<'q> Ctx<'q> {
    pub(crate) fn new(query: &'q Query) -> Self {
        let qualifier = match query.from {
            FromSource::Nothing => None,
            _ => Some(query.qualifier()),
        };
        Self { query, qualifier }
    }

    fn unqualified(query: &'q Query) -> Self {
        Self {
            query,
            qualifier: None,
        }
    }

    fn relation(&self, name: &str) -> Result<(&'q Arc<Schema>, &'q Arc<ResolvedRelation>), CompileError> {
        let unknown = || CompileError::UnknownRelation {
            table: self.query.table.to_string(),
            relation: name.to_owned(),
        };
        let meta = self.query.meta.as_ref().ok_or_else(unknown)?;
        let relation = meta.schema.relation(meta.id, name).ok_or_else(unknown)?;
        Ok((&meta.schema, relation))
    }

    /// The related rows of `name`, correlated with this query and aliased by
    /// the relation name.
    fn relation_query(&self, name: &Cow<'static, str>) -> Result<(Query, bool), CompileError> {
        let (schema, relation) = self.relation(name)?;
        let target = relation.query(schema).alias(name.clone());
        Ok((relation.join_query(schema, self.query, target), relation.is_many()))
    }

    // ==================== expressions ====================

    fn column(&self, column: &ColumnRef) -> PostgresSQL {
        match (&column.table, self.qualifier) {
            (Some(table), _) => SQL::qualified(table.clone(), column.name.clone()),
            (None, Some(qualifier)) => SQL::qualified(qualifier.to_owned(), column.name.clone()),
            (None, None) => SQL::ident(column.name.clone()),
        }
    }

    pub(crate) fn expr(&self, expr: &Expr) -> Result<PostgresSQL, CompileError> {
        Ok(match expr {
            Expr::Column(column) => self.column(column),
            Expr::Value(value) => SQL::param(value.clone()),
            Expr::Raw(sql) => sql.clone(),
            Expr::Func { name, args } => SQL::func(name.clone(), self.expr_list(args)?),
            Expr::Aggregate(aggregate) => self.aggregate(aggregate)?,
            Expr::Binary { left, op, right } => self
                .operand(left)?
                .push(*op)
                .append(self.operand(right)?),
            Expr::Cast(inner, ty) => self
                .operand(inner)?
                .push(Token::CAST)
                .append(SQL::raw(ty.clone())),
            Expr::Subquery(query) => query.to_sql()?.parens(),
            Expr::Star(None) => SQL::token(Token::STAR),
            Expr::Star(Some(table)) => SQL::ident(table.clone()).push(Token::DOT).push(Token::STAR),
            Expr::Default => SQL::token(Token::DEFAULT),
            Expr::Excluded(column) => SQL::raw("excluded").push(Token::DOT).append(SQL::ident(column.clone())),
        })
    }

    /// Nested binary expressions are parenthesized.
    fn operand(&self, expr: &Expr) -> Result<PostgresSQL, CompileError> {
        let sql = self.expr(expr)?;
        Ok(match expr {
            Expr::Binary { .. } => sql.parens(),
            _ => sql,
        })
    }

    fn expr_list(&self, exprs: &[Expr]) -> Result<PostgresSQL, CompileError> {
        let parts = exprs.iter().map(|expr| self.expr(expr)).collect::<Result<Vec<_>, _>>()?;
        Ok(SQL::join(parts, Token::COMMA))
    }

    fn aggregate(&self, aggregate: &Aggregate) -> Result<PostgresSQL, CompileError> {
        let mut args = PostgresSQL::empty();
        if aggregate.distinct {
            args.push_mut(Token::DISTINCT);
        }
        args.append_mut(self.expr_list(&aggregate.args)?);
        if !aggregate.order.is_empty() {
            args.push_mut(Token::ORDER);
            args.push_mut(Token::BY);
            args.append_mut(self.order_list(&aggregate.order, false)?);
        }

        let mut sql = SQL::raw(aggregate.func.clone())
            .push(Token::LPAREN)
            .append(args)
            .push(Token::RPAREN);
        if !aggregate.filter.is_empty() {
            sql.push_mut(Token::FILTER);
            sql.append_mut(
                SQL::token(Token::WHERE)
                    .append(self.conditions(&aggregate.filter)?)
                    .parens(),
            );
        }
        match &aggregate.over {
            Some(Over::Named(name)) => {
                sql.push_mut(Token::OVER);
                sql.append_mut(SQL::ident(name.clone()));
            }
            Some(Over::Spec(spec)) => {
                sql.push_mut(Token::OVER);
                sql.append_mut(self.window_spec(spec)?.parens());
            }
            None => {}
        }
        Ok(sql)
    }

    fn window_spec(&self, spec: &WindowSpec) -> Result<PostgresSQL, CompileError> {
        let mut sql = PostgresSQL::empty();
        if !spec.partition_by.is_empty() {
            sql.push_mut(Token::PARTITION);
            sql.push_mut(Token::BY);
            sql.append_mut(self.expr_list(&spec.partition_by)?);
        }
        if !spec.order_by.is_empty() {
            sql.push_mut(Token::ORDER);
            sql.push_mut(Token::BY);
            sql.append_mut(self.order_list(&spec.order_by, false)?);
        }
        Ok(sql)
    }

    // ==================== conditions ====================

    /// Entries joined with AND; compound entries are parenthesized when
    /// there is more than one.
    pub(crate) fn conditions(&self, items: &[WhereItem]) -> Result<PostgresSQL, CompileError> {
        self.combine(items, Token::AND)
    }

    fn combine(&self, items: &[WhereItem], separator: Token) -> Result<PostgresSQL, CompileError> {
        match items {
            [] => Ok(SQL::token(if separator == Token::AND {
                Token::TRUE
            } else {
                Token::FALSE
            })),
            [item] => self.condition(item),
            items => {
                let parts = items
                    .iter()
                    .map(|item| self.grouped(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SQL::join(parts, separator))
            }
        }
    }

    fn grouped(&self, item: &WhereItem) -> Result<PostgresSQL, CompileError> {
        let sql = self.condition(item)?;
        let compound = match item {
            WhereItem::And(items) | WhereItem::Or(items) => items.len() > 1,
            WhereItem::ColumnsEqual(pairs) => pairs.len() > 1,
            WhereItem::Raw(_) => true,
            _ => false,
        };
        Ok(if compound { sql.parens() } else { sql })
    }

    fn condition(&self, item: &WhereItem) -> Result<PostgresSQL, CompileError> {
        match item {
            WhereItem::ColumnsEqual(pairs) => {
                let parts = pairs
                    .iter()
                    .map(|(column, value)| {
                        self.comparison(self.column(column), &CmpOp::Eq(value.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SQL::join(parts, Token::AND))
            }
            WhereItem::ColumnOp { left, op } => self.comparison(self.operand(left)?, op),
            WhereItem::Raw(sql) => Ok(sql.clone()),
            WhereItem::Exists(query) => Ok(SQL::token(Token::EXISTS).append(query.to_sql()?.parens())),
            WhereItem::RelationExists {
                relation,
                conditions,
            } => {
                let (query, _) = self.relation_query(relation)?;
                let query = conditions
                    .iter()
                    .cloned()
                    .fold(query.reselect([Expr::raw("1")]), Query::r#where);
                Ok(SQL::token(Token::EXISTS).append(query.to_sql()?.parens()))
            }
            WhereItem::And(items) => self.combine(items, Token::AND),
            WhereItem::Or(items) => self.combine(items, Token::OR),
            WhereItem::Not(item) => {
                let inner = self.condition(item)?;
                Ok(match **item {
                    WhereItem::Exists(_) | WhereItem::RelationExists { .. } => {
                        SQL::token(Token::NOT).append(inner)
                    }
                    _ => SQL::token(Token::NOT).append(inner.parens()),
                })
            }
        }
    }

    fn comparison(&self, left: PostgresSQL, op: &CmpOp) -> Result<PostgresSQL, CompileError> {
        let binary = |token: Token, right: &Expr| -> Result<PostgresSQL, CompileError> {
            Ok(left.clone().push(token).append(self.operand(right)?))
        };
        let is_null = |expr: &Expr| matches!(expr, Expr::Value(PostgresValue::Null));

        match op {
            CmpOp::Eq(right) if is_null(right) => Ok(left.push(Token::IS).push(Token::NULL)),
            CmpOp::Ne(right) if is_null(right) => Ok(left.push(Token::IS).push(Token::NOT).push(Token::NULL)),
            CmpOp::Eq(right) => binary(Token::EQ, right),
            CmpOp::Ne(right) => binary(Token::NE, right),
            CmpOp::Lt(right) => binary(Token::LT, right),
            CmpOp::Lte(right) => binary(Token::LE, right),
            CmpOp::Gt(right) => binary(Token::GT, right),
            CmpOp::Gte(right) => binary(Token::GE, right),
            CmpOp::Like(right) => binary(Token::LIKE, right),
            CmpOp::ILike(right) => binary(Token::ILIKE, right),
            CmpOp::In(values) if values.is_empty() => Ok(SQL::token(Token::FALSE)),
            CmpOp::NotIn(values) if values.is_empty() => Ok(SQL::token(Token::TRUE)),
            CmpOp::In(values) => Ok(left.push(Token::IN).append(self.expr_list(values)?.parens())),
            CmpOp::NotIn(values) => Ok(left
                .push(Token::NOT)
                .push(Token::IN)
                .append(self.expr_list(values)?.parens())),
            CmpOp::InQuery(query) => Ok(left.push(Token::IN).append(query.to_sql()?.parens())),
            CmpOp::NotInQuery(query) => Ok(left
                .push(Token::NOT)
                .push(Token::IN)
                .append(query.to_sql()?.parens())),
            CmpOp::IsNull => Ok(left.push(Token::IS).push(Token::NULL)),
            CmpOp::IsNotNull => Ok(left.push(Token::IS).push(Token::NOT).push(Token::NULL)),
            CmpOp::Between(low, high) => Ok(left
                .push(Token::BETWEEN)
                .append(self.operand(low)?)
                .push(Token::AND)
                .append(self.operand(high)?)),
        }
    }

    // ==================== select lists and ordering ====================

    /// Output names of aliased select items. Unqualified references to them
    /// in ORDER BY and GROUP BY are left bare.
    fn is_output_alias(&self, column: &ColumnRef) -> bool {
        column.table.is_none()
            && self.query.select.as_ref().is_some_and(|items| {
                items.iter().any(|item| {
                    matches!(item, SelectItem::Aliased(..) | SelectItem::Relation(_))
                        && item.output_name() == Some(column.name.as_ref())
                })
            })
    }

    fn output_expr(&self, expr: &Expr, bare: bool) -> Result<PostgresSQL, CompileError> {
        match expr {
            Expr::Column(column) if bare || self.is_output_alias(column) => {
                Ok(match &column.table {
                    Some(table) => SQL::qualified(table.clone(), column.name.clone()),
                    None => SQL::ident(column.name.clone()),
                })
            }
            expr => self.expr(expr),
        }
    }

    fn order_list(&self, items: &[OrderItem], bare: bool) -> Result<PostgresSQL, CompileError> {
        let parts = items
            .iter()
            .map(|item| {
                let mut sql = self.output_expr(&item.expr, bare)?;
                match item.direction {
                    Some(Direction::Asc) => sql.push_mut(Token::ASC),
                    Some(Direction::Desc) => sql.push_mut(Token::DESC),
                    None => {}
                }
                match item.nulls {
                    Some(Nulls::First) => {
                        sql.push_mut(Token::NULLS);
                        sql.push_mut(Token::FIRST);
                    }
                    Some(Nulls::Last) => {
                        sql.push_mut(Token::NULLS);
                        sql.push_mut(Token::LAST);
                    }
                    None => {}
                }
                Ok(sql)
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        Ok(SQL::join(parts, Token::COMMA))
    }

    fn select_item(&self, item: &SelectItem, star: &PostgresSQL) -> Result<PostgresSQL, CompileError> {
        match item {
            SelectItem::Expr(Expr::Star(None)) => Ok(star.clone()),
            SelectItem::Expr(expr) => self.expr(expr),
            SelectItem::Aliased(alias, expr) => Ok(self.expr(expr)?.alias(alias.clone())),
            SelectItem::Relation(name) => {
                Ok(SQL::qualified(name.clone(), RELATION_COLUMN).alias(name.clone()))
            }
        }
    }

    /// `*`, or `"table".*` once other tables are joined in.
    fn star(&self) -> PostgresSQL {
        let joined = !self.query.joins.is_empty()
            || self.query.select.as_ref().is_some_and(|items| {
                items.iter().any(|item| matches!(item, SelectItem::Relation(_)))
            });
        match (joined, self.qualifier) {
            (true, Some(qualifier)) => SQL::ident(qualifier.to_owned()).push(Token::DOT).push(Token::STAR),
            _ => SQL::token(Token::STAR),
        }
    }

    fn select_list(&self) -> Result<PostgresSQL, CompileError> {
        let star = self.star();
        match self.query.select.as_deref() {
            None => Ok(star),
            Some(items) => {
                let parts = items
                    .iter()
                    .map(|item| self.select_item(item, &star))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SQL::join(parts, Token::COMMA))
            }
        }
    }

    pub(crate) fn returning(&self) -> Result<PostgresSQL, CompileError> {
        let Some(items) = self.query.select.as_deref() else {
            return Ok(PostgresSQL::empty());
        };
        let star = SQL::token(Token::STAR);
        let parts = items
            .iter()
            .map(|item| match item {
                SelectItem::Relation(name) => Err(CompileError::NestedWriteUnsupported {
                    relation: name.to_string(),
                    operation: "returning",
                }),
                item => self.select_item(item, &star),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SQL::token(Token::RETURNING).append(SQL::join(parts, Token::COMMA)))
    }

    // ==================== clauses ====================

    fn with_clause(&self) -> Result<PostgresSQL, CompileError> {
        let ctes = &self.query.with;
        if ctes.is_empty() {
            return Ok(PostgresSQL::empty());
        }
        let mut sql = SQL::token(Token::WITH);
        if ctes.iter().any(|cte| cte.recursive) {
            sql.push_mut(Token::RECURSIVE);
        }
        let parts = ctes
            .iter()
            .map(|cte| {
                let mut part = SQL::ident(cte.name.clone());
                if !cte.columns.is_empty() {
                    part.append_mut(ident_list(&cte.columns).parens());
                }
                part.push_mut(Token::AS);
                match cte.materialized {
                    Some(true) => part.push_mut(Token::MATERIALIZED),
                    Some(false) => {
                        part.push_mut(Token::NOT);
                        part.push_mut(Token::MATERIALIZED);
                    }
                    None => {}
                }
                let body = match &cte.body {
                    CteBody::Query(query) => query.to_sql()?,
                    CteBody::Raw(sql) => sql.clone(),
                };
                part.append_mut(body.parens());
                Ok(part)
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        sql.append_mut(SQL::join(parts, Token::COMMA));
        Ok(sql)
    }

    fn from_clause(&self) -> Result<PostgresSQL, CompileError> {
        let query = self.query;
        let mut sql = SQL::token(Token::FROM);
        match &query.from {
            FromSource::Table => {
                if query.only {
                    sql.push_mut(Token::ONLY);
                }
                sql.append_mut(table_ident(query.schema.as_ref(), &query.table));
                if let Some(alias) = &query.alias {
                    sql.append_mut(SQL::token(Token::AS).append(SQL::ident(alias.clone())));
                }
            }
            FromSource::Query(inner) => {
                sql.append_mut(inner.to_sql()?.parens().alias(query.qualifier().to_owned()));
            }
            FromSource::Raw(raw) => {
                sql.append_mut(raw.clone().alias(query.qualifier().to_owned()));
            }
            FromSource::Nothing => return Ok(PostgresSQL::empty()),
        }
        Ok(sql)
    }

    fn join(&self, join: &JoinItem) -> Result<PostgresSQL, CompileError> {
        let mut sql = match join.kind {
            JoinKind::Inner => SQL::token(Token::JOIN),
            JoinKind::Left => SQL::token(Token::LEFT).push(Token::JOIN),
            JoinKind::Right => SQL::token(Token::RIGHT).push(Token::JOIN),
            JoinKind::Full => SQL::token(Token::FULL).push(Token::JOIN),
            JoinKind::Cross => SQL::token(Token::CROSS).push(Token::JOIN),
        };
        if join.lateral {
            sql.push_mut(Token::LATERAL);
        }

        let on = join.on.clone();
        match &join.target {
            JoinTarget::Table { name, schema, alias } => {
                sql.append_mut(table_ident(schema.as_ref(), name));
                if let Some(alias) = alias {
                    sql.append_mut(SQL::token(Token::AS).append(SQL::ident(alias.clone())));
                }
            }
            JoinTarget::Query { query, alias } => {
                sql.append_mut(query.to_sql()?.parens().alias(alias.clone()));
            }
            JoinTarget::Relation(name) => {
                let (target, _) = self.relation_query(name)?;
                sql.append_mut(table_ident(target.schema.as_ref(), &target.table));
                sql.append_mut(SQL::token(Token::AS).append(SQL::ident(name.clone())));
                let target_ctx = Ctx::new(&target);
                let mut conditions = target.effective_conditions();
                conditions.extend(on);
                sql.push_mut(Token::ON);
                sql.append_mut(target_ctx.conditions(&conditions)?);
                return Ok(sql);
            }
        }

        if join.kind != JoinKind::Cross {
            sql.push_mut(Token::ON);
            if on.is_empty() {
                sql.push_mut(Token::TRUE);
            } else {
                sql.append_mut(self.conditions(&on)?);
            }
        }
        Ok(sql)
    }

    /// `LEFT JOIN LATERAL (SELECT <json> AS "r" FROM (<related>) AS "__rows") AS "name" ON TRUE`
    fn relation_join(&self, name: &Cow<'static, str>) -> Result<PostgresSQL, CompileError> {
        let (related, many) = self.relation_query(name)?;
        let (related, open, close) = if many {
            (related, "COALESCE(json_agg(row_to_json(", ")), '[]')")
        } else {
            (related.limit(1), "row_to_json(", ")")
        };
        let json = SQL::raw(open)
            .append(SQL::ident(RELATION_ROWS))
            .push(Token::DOT)
            .push(Token::STAR)
            .append(SQL::raw(close));

        let lateral = SQL::token(Token::SELECT)
            .append(json.alias(RELATION_COLUMN))
            .push(Token::FROM)
            .append(related.to_sql()?.parens().alias(RELATION_ROWS))
            .parens();
        Ok(SQL::token(Token::LEFT)
            .push(Token::JOIN)
            .push(Token::LATERAL)
            .append(lateral.alias(name.clone()))
            .push(Token::ON)
            .push(Token::TRUE))
    }

    fn where_clause(&self, conditions: &[WhereItem]) -> Result<PostgresSQL, CompileError> {
        if conditions.is_empty() {
            return Ok(PostgresSQL::empty());
        }
        Ok(SQL::token(Token::WHERE).append(self.conditions(conditions)?))
    }

    fn lock_clause(&self) -> PostgresSQL {
        let Some(lock) = &self.query.lock else {
            return PostgresSQL::empty();
        };
        let mut sql = SQL::token(Token::FOR);
        match lock.strength {
            LockStrength::Update => sql.push_mut(Token::UPDATE),
            LockStrength::NoKeyUpdate => {
                sql.push_mut(Token::NO);
                sql.push_mut(Token::KEY);
                sql.push_mut(Token::UPDATE);
            }
            LockStrength::Share => sql.push_mut(Token::SHARE),
            LockStrength::KeyShare => {
                sql.push_mut(Token::KEY);
                sql.push_mut(Token::SHARE);
            }
        }
        if !lock.of.is_empty() {
            sql.push_mut(Token::OF);
            sql.append_mut(ident_list(&lock.of));
        }
        match lock.wait {
            LockWait::Wait => {}
            LockWait::NoWait => sql.push_mut(Token::NOWAIT),
            LockWait::SkipLocked => {
                sql.push_mut(Token::SKIP);
                sql.push_mut(Token::LOCKED);
            }
        }
        sql
    }

    // ==================== statements ====================

    fn select(&self) -> Result<PostgresSQL, CompileError> {
        let query = self.query;
        let mut sql = self.with_clause()?;

        sql.push_mut(Token::SELECT);
        if let Some(distinct) = &query.distinct {
            sql.push_mut(Token::DISTINCT);
            if !distinct.is_empty() {
                sql.push_mut(Token::ON);
                sql.append_mut(self.expr_list(distinct)?.parens());
            }
        }
        sql.append_mut(self.select_list()?);
        sql.append_mut(self.from_clause()?);

        for join in query.joins.iter() {
            sql.append_mut(self.join(join)?);
        }
        for item in query.select.iter().flat_map(|items| items.iter()) {
            if let SelectItem::Relation(name) = item {
                sql.append_mut(self.relation_join(name)?);
            }
        }

        sql.append_mut(self.where_clause(&query.effective_conditions())?);

        if !query.group.is_empty() {
            let parts = query
                .group
                .iter()
                .map(|expr| self.output_expr(expr, false))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_mut(Token::GROUP);
            sql.push_mut(Token::BY);
            sql.append_mut(SQL::join(parts, Token::COMMA));
        }
        if !query.having.is_empty() {
            sql.push_mut(Token::HAVING);
            sql.append_mut(self.conditions(&query.having)?);
        }
        if !query.windows.is_empty() {
            let parts = query
                .windows
                .iter()
                .map(|(name, spec)| {
                    Ok(SQL::ident(name.clone())
                        .push(Token::AS)
                        .append(self.window_spec(spec)?.parens()))
                })
                .collect::<Result<Vec<_>, CompileError>>()?;
            sql.push_mut(Token::WINDOW);
            sql.append_mut(SQL::join(parts, Token::COMMA));
        }

        for op in query.set_ops.iter() {
            sql.push_mut(match op.kind {
                SetOpKind::Union => Token::UNION,
                SetOpKind::Intersect => Token::INTERSECT,
                SetOpKind::Except => Token::EXCEPT,
            });
            if op.all {
                sql.push_mut(Token::ALL);
            }
            let operand = op.query.to_sql()?;
            sql.append_mut(if op.query.is_compound() { operand.parens() } else { operand });
        }

        if !query.order.is_empty() {
            sql.push_mut(Token::ORDER);
            sql.push_mut(Token::BY);
            sql.append_mut(self.order_list(&query.order, !query.set_ops.is_empty())?);
        }
        if let Some(limit) = query.limit {
            sql.push_mut(Token::LIMIT);
            sql.append_mut(SQL::number(limit));
        }
        if let Some(offset) = query.offset {
            sql.push_mut(Token::OFFSET);
            sql.append_mut(SQL::number(offset));
        }
        sql.append_mut(self.lock_clause());
        Ok(sql)
    }

    fn insert(&self, data: &InsertData) -> Result<PostgresSQL, CompileError> {
        let query = self.query;
        let table = || query.table.to_string();
        let mut sql = self.with_clause()?;
        sql.push_mut(Token::INSERT);
        sql.push_mut(Token::INTO);
        sql.append_mut(table_ident(query.schema.as_ref(), &query.table));

        let bare = Ctx::unqualified(query);
        let column_list = |columns: &[Cow<'static, str>]| ident_list(columns).parens();

        let inserted: Vec<Cow<'static, str>> = match &data.source {
            InsertSource::Values { columns, rows } => {
                match (columns.is_empty(), rows.len()) {
                    (_, 0) => return Err(CompileError::EmptyInsert(table())),
                    (true, 1) => {
                        sql.push_mut(Token::DEFAULT);
                        sql.push_mut(Token::VALUES);
                    }
                    (true, _) => return Err(CompileError::EmptyInsert(table())),
                    (false, _) => {
                        sql.append_mut(column_list(columns));
                        sql.push_mut(Token::VALUES);
                        let rows = rows
                            .iter()
                            .map(|row| Ok(bare.expr_list(row)?.parens()))
                            .collect::<Result<Vec<_>, CompileError>>()?;
                        sql.append_mut(SQL::join(rows, Token::COMMA));
                    }
                }
                columns.clone()
            }
            InsertSource::Select { columns, query: source } => {
                if !columns.is_empty() {
                    sql.append_mut(column_list(columns));
                }
                sql.append_mut(source.to_sql()?);
                columns.clone()
            }
            InsertSource::SelectWithValues { query: source, values } => {
                let (columns, batch) = self.batch_values(source, values)?;
                sql.append_mut(column_list(&columns));
                sql.append_mut(batch);
                columns
            }
        };

        if let Some(conflict) = &data.on_conflict {
            sql.push_mut(Token::ON);
            sql.push_mut(Token::CONFLICT);
            if !conflict.target.is_empty() {
                sql.append_mut(column_list(&conflict.target));
            }
            let assignments: Vec<(Cow<'static, str>, Expr)> = match &conflict.action {
                ConflictAction::Nothing => Vec::new(),
                ConflictAction::Update(set) => set.clone(),
                ConflictAction::Merge => inserted
                    .iter()
                    .filter(|column| !conflict.target.contains(column))
                    .map(|column| (column.clone(), Expr::excluded(column.clone())))
                    .collect(),
            };
            sql.push_mut(Token::DO);
            if assignments.is_empty() {
                sql.push_mut(Token::NOTHING);
            } else {
                sql.push_mut(Token::UPDATE);
                sql.append_mut(self.assignments(&assignments)?);
            }
        }

        sql.append_mut(self.returning()?);
        Ok(sql)
    }

    /// `SELECT "q".*, "v".* FROM (<source>) AS "q", (VALUES ...) "v"(columns)`,
    /// returning the full insert column list.
    fn batch_values(
        &self,
        source: &Query,
        values: &[crate::query::Record],
    ) -> Result<(Vec<Cow<'static, str>>, PostgresSQL), CompileError> {
        let Some(first) = values.first() else {
            return Err(CompileError::EmptyInsert(self.query.table.to_string()));
        };
        let value_columns: Vec<Cow<'static, str>> = first.columns().cloned().collect();
        let expected: Vec<String> = value_columns.iter().map(|c| c.to_string()).collect();
        for record in &values[1..] {
            let same = record.len() == value_columns.len()
                && value_columns.iter().all(|column| record.contains(column));
            if !same {
                return Err(CompileError::MismatchedBatchColumns {
                    expected,
                    found: record.columns().map(|c| c.to_string()).collect(),
                });
            }
        }

        let mut columns = Vec::new();
        for item in source.select.iter().flat_map(|items| items.iter()) {
            let name = item.output_name().ok_or_else(|| CompileError::UnknownColumn {
                table: source.table.to_string(),
                column: "*".to_owned(),
            })?;
            columns.push(Cow::Owned(name.to_owned()));
        }
        if columns.is_empty() {
            return Err(CompileError::UnknownColumn {
                table: source.table.to_string(),
                column: "*".to_owned(),
            });
        }

        let def = self.query.table_def();
        let bare = Ctx::unqualified(self.query);
        let rows = values
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let row: Vec<Expr> = value_columns
                    .iter()
                    .map(|column| {
                        let value = record.get(column).cloned().unwrap_or(Expr::Default);
                        if index == 0 { typed(def, column, &value) } else { value }
                    })
                    .collect();
                Ok(bare.expr_list(&row)?.parens())
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        let sql = SQL::token(Token::SELECT)
            .append(SQL::ident("q").push(Token::DOT).push(Token::STAR))
            .push(Token::COMMA)
            .append(SQL::ident("v").push(Token::DOT).push(Token::STAR))
            .push(Token::FROM)
            .append(source.to_sql()?.parens().alias("q"))
            .push(Token::COMMA)
            .append(SQL::token(Token::VALUES).append(SQL::join(rows, Token::COMMA)).parens())
            .append(SQL::ident("v"))
            .append(ident_list(&value_columns).parens());

        columns.extend(value_columns);
        Ok((columns, sql))
    }

    fn assignments(&self, set: &[(Cow<'static, str>, Expr)]) -> Result<PostgresSQL, CompileError> {
        let parts = set
            .iter()
            .map(|(column, value)| {
                Ok(SQL::ident(column.clone())
                    .push(Token::EQ)
                    .append(self.expr(value)?))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        Ok(SQL::token(Token::SET).append(SQL::join(parts, Token::COMMA)))
    }

    fn mutation_target(&self) -> PostgresSQL {
        let query = self.query;
        let mut sql = PostgresSQL::empty();
        if query.only {
            sql.push_mut(Token::ONLY);
        }
        sql.append_mut(table_ident(query.schema.as_ref(), &query.table));
        if let Some(alias) = &query.alias {
            sql.append_mut(SQL::token(Token::AS).append(SQL::ident(alias.clone())));
        }
        sql
    }

    fn guarded_conditions(&self, statement: &'static str) -> Result<Vec<WhereItem>, CompileError> {
        if self.query.wheres.is_empty() && !self.query.unconditional {
            return Err(CompileError::UnconditionalMutation(statement));
        }
        Ok(self.query.effective_conditions())
    }

    fn update(&self, data: &UpdateData) -> Result<PostgresSQL, CompileError> {
        if data.set.is_empty() {
            return Err(CompileError::EmptyInsert(self.query.table.to_string()));
        }
        let conditions = self.guarded_conditions("update")?;
        Ok(self
            .with_clause()?
            .push(Token::UPDATE)
            .append(self.mutation_target())
            .append(self.assignments(&data.set)?)
            .append(self.where_clause(&conditions)?)
            .append(self.returning()?))
    }

    fn delete(&self) -> Result<PostgresSQL, CompileError> {
        let conditions = self.guarded_conditions("delete")?;
        Ok(self
            .with_clause()?
            .push(Token::DELETE)
            .push(Token::FROM)
            .append(self.mutation_target())
            .append(self.where_clause(&conditions)?)
            .append(self.returning()?))
    }
}

use std::{borrow::Cow, sync::Arc};

use super::{JoinTable, RelationKind, Schema, Scope, TableId};
use crate::{
    expr::{ColumnRef, Expr, WhereItem, col, eq, exists},
    query::{Query, Record},
    values::PostgresValue,
};

/// How the owner and target rows of a resolved relation are linked.
#[derive(Debug, Clone)]
pub enum RelationLink {
    /// `target.target_keys = owner.owner_keys`
    Direct {
        owner_keys: Vec<Cow<'static, str>>,
        target_keys: Vec<Cow<'static, str>>,
    },
    JoinTable(JoinTable),
    Through {
        through: Arc<ResolvedRelation>,
        source: Arc<ResolvedRelation>,
    },
}

/// The owner side of a correlation: a query's table (by qualifier) or a
/// loaded row.
#[derive(Debug, Clone, Copy)]
pub enum OwnerRef<'a> {
    Table(&'a str),
    Row(&'a Record),
}

impl OwnerRef<'_> {
    fn key(&self, key: &Cow<'static, str>) -> Expr {
        match self {
            OwnerRef::Table(qualifier) => col(ColumnRef::qualified(qualifier.to_string(), key.clone())),
            OwnerRef::Row(record) => record
                .get(key)
                .cloned()
                .unwrap_or(Expr::Value(PostgresValue::Null)),
        }
    }
}

/// A relation after resolution, stored on its owner table in the [`Schema`].
#[derive(Clone)]
pub struct ResolvedRelation {
    pub name: Cow<'static, str>,
    pub kind: RelationKind,
    pub owner: TableId,
    pub target: TableId,
    pub link: RelationLink,
    pub scope: Option<Scope>,
    pub required: bool,
}

impl core::fmt::Debug for ResolvedRelation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResolvedRelation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("target", &self.target)
            .field("link", &self.link)
            .field("scope", &self.scope.is_some())
            .field("required", &self.required)
            .finish()
    }
}

impl ResolvedRelation {
    pub fn is_many(&self) -> bool {
        self.kind.is_many()
    }

    pub fn is_through(&self) -> bool {
        matches!(self.link, RelationLink::Through { .. })
    }

    /// Owner and target key columns of a direct relation.
    pub fn direct_keys(&self) -> Option<(&[Cow<'static, str>], &[Cow<'static, str>])> {
        match &self.link {
            RelationLink::Direct {
                owner_keys,
                target_keys,
            } => Some((owner_keys, target_keys)),
            _ => None,
        }
    }

    fn apply_scope(&self, query: Query) -> Query {
        match &self.scope {
            Some(scope) => scope(query),
            None => query,
        }
    }

    /// A query over the target table with the relation's scope applied.
    pub fn query(&self, schema: &Arc<Schema>) -> Query {
        let query = schema.query_for(self.target);
        match &self.link {
            RelationLink::Through { source, .. } => self.apply_scope(source.apply_scope(query)),
            _ => self.apply_scope(query),
        }
    }

    /// Conditions that hold when the row of `target` is related to `owner`.
    ///
    /// Direct relations compare keys, join tables and through-relations
    /// correlate with `EXISTS`.
    pub fn correlate(&self, schema: &Arc<Schema>, owner: OwnerRef<'_>, target: &str) -> Vec<WhereItem> {
        match &self.link {
            RelationLink::Direct {
                owner_keys,
                target_keys,
            } => owner_keys
                .iter()
                .zip(target_keys)
                .map(|(owner_key, target_key)| {
                    eq(
                        ColumnRef::qualified(target.to_owned(), target_key.clone()),
                        owner.key(owner_key),
                    )
                })
                .collect(),
            RelationLink::JoinTable(join) => {
                let mut link = Query::table(join.table.clone()).select([Expr::raw("1")]);
                for (key, join_key) in join.target_keys.iter().zip(&join.join_target_keys) {
                    link = link.r#where(eq(
                        ColumnRef::qualified(join.table.clone(), join_key.clone()),
                        ColumnRef::qualified(target.to_owned(), key.clone()),
                    ));
                }
                for (key, join_key) in join.owner_keys.iter().zip(&join.join_owner_keys) {
                    link = link.r#where(eq(
                        ColumnRef::qualified(join.table.clone(), join_key.clone()),
                        owner.key(key),
                    ));
                }
                vec![exists(link)]
            }
            RelationLink::Through { through, source } => {
                let middle = format!("{target}_{}", through.name);
                let mut link = through
                    .apply_scope(schema.query_for(through.target))
                    .alias(middle.clone())
                    .select([Expr::raw("1")]);
                for condition in through.correlate(schema, owner, &middle) {
                    link = link.r#where(condition);
                }
                for condition in source.correlate(schema, OwnerRef::Table(&middle), target) {
                    link = link.r#where(condition);
                }
                vec![exists(link)]
            }
        }
    }

    /// Adds to `to` (a query over the target) the predicate linking it to
    /// the rows of `from`.
    pub fn join_query(&self, schema: &Arc<Schema>, from: &Query, to: Query) -> Query {
        let conditions = self.correlate(schema, OwnerRef::Table(from.qualifier()), to.qualifier());
        conditions.into_iter().fold(to, Query::r#where)
    }

    /// Adds to `from` (a query over the owner) the predicate linking it to
    /// the rows of `to`. Used when the relation is read from the target side
    /// as a correlated sub-query.
    pub fn reverse_join(&self, schema: &Arc<Schema>, to: &Query, from: Query) -> Query {
        let conditions = self.correlate(schema, OwnerRef::Table(from.qualifier()), to.qualifier());
        conditions.into_iter().fold(from, Query::r#where)
    }

    /// Related rows of one loaded owner row.
    pub fn for_record(&self, schema: &Arc<Schema>, owner: &Record) -> Query {
        let query = self.query(schema);
        let conditions = self.correlate(schema, OwnerRef::Row(owner), query.qualifier());
        let query = conditions.into_iter().fold(query, Query::r#where);
        if self.is_many() { query } else { query.take_optional() }
    }
}

//! Relation declarations and the resolved relation graph.
//!
//! Tables declare relations by target *name*. Nothing is looked up until
//! [`SchemaBuilder::build`] runs a single resolution pass over every
//! registered table, so declarations may refer forward, to themselves, or to
//! each other.

mod nested;
mod resolve;
mod resolved;

pub use nested::*;
pub use resolve::*;
pub use resolved::*;

use std::{borrow::Cow, sync::Arc};

use crate::query::Query;

/// Kind of a direct relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Foreign key on the owner table points at the target
    BelongsTo,
    /// Foreign key on the target table points at the owner; at most one row
    HasOne,
    /// Foreign key on the target table points at the owner
    HasMany,
    /// Rows are linked through a join table
    HasAndBelongsToMany,
}

impl RelationKind {
    pub const fn is_many(&self) -> bool {
        matches!(self, RelationKind::HasMany | RelationKind::HasAndBelongsToMany)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::HasAndBelongsToMany => "has_and_belongs_to_many",
        }
    }
}

/// Transform applied to every query of a relation's target.
pub type Scope = Arc<dyn Fn(Query) -> Query + Send + Sync>;

type Name = Cow<'static, str>;

/// The join table of a has-and-belongs-to-many relation.
#[derive(Debug, Clone)]
pub struct JoinTable {
    pub table: Name,
    /// Owner columns referenced by the join table
    pub owner_keys: Vec<Name>,
    /// Join table columns pointing at the owner
    pub join_owner_keys: Vec<Name>,
    /// Target columns referenced by the join table
    pub target_keys: Vec<Name>,
    /// Join table columns pointing at the target
    pub join_target_keys: Vec<Name>,
}

impl JoinTable {
    pub fn new<const N: usize, const M: usize>(
        table: impl Into<Name>,
        owner_keys: [&'static str; N],
        join_owner_keys: [&'static str; N],
        target_keys: [&'static str; M],
        join_target_keys: [&'static str; M],
    ) -> Self {
        Self {
            table: table.into(),
            owner_keys: names(owner_keys),
            join_owner_keys: names(join_owner_keys),
            target_keys: names(target_keys),
            join_target_keys: names(join_target_keys),
        }
    }
}

fn names<const N: usize>(keys: [&'static str; N]) -> Vec<Name> {
    keys.into_iter().map(Cow::Borrowed).collect()
}

#[derive(Debug, Clone)]
pub enum RelationSpec {
    /// `target.target_keys = owner.owner_keys`
    Direct {
        kind: RelationKind,
        target: Name,
        owner_keys: Vec<Name>,
        target_keys: Vec<Name>,
        join_table: Option<JoinTable>,
    },
    /// Relation `source` of the target of relation `through`
    Through { through: Name, source: Name },
}

/// A relation as declared on a table, before resolution.
#[derive(Clone)]
pub struct RelationDecl {
    pub name: Name,
    pub spec: RelationSpec,
    pub scope: Option<Scope>,
    pub required: bool,
}

impl RelationDecl {
    fn direct<const N: usize>(
        name: impl Into<Name>,
        kind: RelationKind,
        target: impl Into<Name>,
        owner_keys: [&'static str; N],
        target_keys: [&'static str; N],
    ) -> Self {
        Self {
            name: name.into(),
            spec: RelationSpec::Direct {
                kind,
                target: target.into(),
                owner_keys: names(owner_keys),
                target_keys: names(target_keys),
                join_table: None,
            },
            scope: None,
            required: false,
        }
    }

    /// `columns` on this table reference `references` on `target`.
    pub fn belongs_to<const N: usize>(
        name: impl Into<Name>,
        target: impl Into<Name>,
        columns: [&'static str; N],
        references: [&'static str; N],
    ) -> Self {
        Self::direct(name, RelationKind::BelongsTo, target, columns, references)
    }

    /// `foreign_keys` on `target` reference `primary_keys` on this table.
    pub fn has_one<const N: usize>(
        name: impl Into<Name>,
        target: impl Into<Name>,
        primary_keys: [&'static str; N],
        foreign_keys: [&'static str; N],
    ) -> Self {
        Self::direct(name, RelationKind::HasOne, target, primary_keys, foreign_keys)
    }

    pub fn has_many<const N: usize>(
        name: impl Into<Name>,
        target: impl Into<Name>,
        primary_keys: [&'static str; N],
        foreign_keys: [&'static str; N],
    ) -> Self {
        Self::direct(name, RelationKind::HasMany, target, primary_keys, foreign_keys)
    }

    pub fn habtm(name: impl Into<Name>, target: impl Into<Name>, join_table: JoinTable) -> Self {
        Self {
            name: name.into(),
            spec: RelationSpec::Direct {
                kind: RelationKind::HasAndBelongsToMany,
                target: target.into(),
                owner_keys: join_table.owner_keys.clone(),
                target_keys: join_table.target_keys.clone(),
                join_table: Some(join_table),
            },
            scope: None,
            required: false,
        }
    }

    /// Relation `source` reached through this table's relation `through`.
    pub fn through(
        name: impl Into<Name>,
        through: impl Into<Name>,
        source: impl Into<Name>,
    ) -> Self {
        Self {
            name: name.into(),
            spec: RelationSpec::Through {
                through: through.into(),
                source: source.into(),
            },
            scope: None,
            required: false,
        }
    }

    pub fn scope(mut self, scope: impl Fn(Query) -> Query + Send + Sync + 'static) -> Self {
        self.scope = Some(Arc::new(scope));
        self
    }

    /// Creating an owner row requires this relation to be provided.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl core::fmt::Debug for RelationDecl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RelationDecl")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("scope", &self.scope.is_some())
            .field("required", &self.required)
            .finish()
    }
}

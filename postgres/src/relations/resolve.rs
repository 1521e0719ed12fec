//! Relation graph resolution.

use std::{borrow::Cow, sync::Arc};

use hashbrown::HashMap;
use relq_core::{CompileError, relq_trace_relation};

use super::{RelationDecl, RelationKind, RelationSpec, ResolvedRelation, RelationLink};
use crate::{query::Query, table::TableDef};

/// Index of a table inside its [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub(crate) usize);

/// Registered tables plus their resolved relations. Read-only once built.
#[derive(Debug)]
pub struct Schema {
    tables: Vec<Arc<TableDef>>,
    relations: Vec<HashMap<String, Arc<ResolvedRelation>>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn table_def(&self, id: TableId) -> &TableDef {
        &self.tables[id.0]
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableId, &TableDef)> {
        self.tables
            .iter()
            .enumerate()
            .map(|(index, def)| (TableId(index), def.as_ref()))
    }

    /// Looks a table up by `name` or `schema.name`.
    pub fn table_id(&self, name: &str) -> Result<TableId, CompileError> {
        match find_tables(&self.tables, name).as_slice() {
            [id] => Ok(*id),
            [] => Err(CompileError::UnknownTable(name.to_owned())),
            _ => Err(CompileError::DuplicateTable(name.to_owned())),
        }
    }

    pub fn relation(&self, table: TableId, name: &str) -> Option<&Arc<ResolvedRelation>> {
        self.relations.get(table.0)?.get(name)
    }

    pub fn relations(&self, table: TableId) -> impl Iterator<Item = &Arc<ResolvedRelation>> {
        self.relations.get(table.0).into_iter().flat_map(HashMap::values)
    }

    /// A fresh query over a registered table.
    pub fn query(self: &Arc<Self>, name: &str) -> Result<Query, CompileError> {
        Ok(self.query_for(self.table_id(name)?))
    }

    pub fn query_for(self: &Arc<Self>, id: TableId) -> Query {
        Query::for_table(Arc::clone(self), id)
    }
}

fn find_tables(tables: &[Arc<TableDef>], name: &str) -> Vec<TableId> {
    let qualified = name.contains('.');
    tables
        .iter()
        .enumerate()
        .filter(|(_, def)| {
            if qualified {
                def.qualified_name() == name
            } else {
                def.name == name
            }
        })
        .map(|(index, _)| TableId(index))
        .collect()
}

/// Collects table definitions, then resolves every declared relation at once.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: Vec<TableDef>,
}

type Key = (TableId, String);

struct Resolver<'a> {
    tables: &'a [Arc<TableDef>],
    resolved: Vec<HashMap<String, Arc<ResolvedRelation>>>,
    /// Pending through-relations, keyed by the relation they wait for
    deferred: HashMap<Key, Vec<(TableId, usize)>>,
    /// Reverse of `deferred`: what each pending relation waits for
    blocked_on: HashMap<Key, Key>,
}

impl SchemaBuilder {
    pub fn table(mut self, def: TableDef) -> Self {
        self.tables.push(def);
        self
    }

    pub fn tables(mut self, defs: impl IntoIterator<Item = TableDef>) -> Self {
        self.tables.extend(defs);
        self
    }

    /// Resolves the relation graph.
    ///
    /// Direct relations resolve in one pass. Through-relations whose
    /// prerequisites are not resolved yet wait in a deferred map and are
    /// retried whenever the relation they wait for resolves. Anything still
    /// pending afterwards is reported, as a cycle when the chain loops.
    pub fn build(self) -> Result<Arc<Schema>, CompileError> {
        let tables: Vec<Arc<TableDef>> = self.tables.into_iter().map(Arc::new).collect();
        for (index, def) in tables.iter().enumerate() {
            let name = def.qualified_name();
            if tables[..index].iter().any(|other| other.qualified_name() == name) {
                return Err(CompileError::DuplicateTable(name));
            }
        }

        let mut resolver = Resolver {
            tables: &tables,
            resolved: vec![HashMap::new(); tables.len()],
            deferred: HashMap::new(),
            blocked_on: HashMap::new(),
        };

        for (index, def) in tables.iter().enumerate() {
            let owner = TableId(index);
            for decl in &def.relations {
                if let RelationSpec::Direct { .. } = decl.spec {
                    let relation = resolver.resolve_direct(owner, decl)?;
                    resolver.insert(owner, relation);
                }
            }
        }

        for (index, def) in tables.iter().enumerate() {
            let owner = TableId(index);
            for position in 0..def.relations.len() {
                if let RelationSpec::Through { .. } = def.relations[position].spec {
                    resolver.try_through(owner, position);
                }
            }
        }

        resolver.finish()?;
        let relations = resolver.resolved;
        Ok(Arc::new(Schema { tables, relations }))
    }
}

impl Resolver<'_> {
    fn target_of(&self, owner: TableId, decl: &RelationDecl, target: &str) -> Result<TableId, CompileError> {
        match find_tables(self.tables, target).as_slice() {
            [id] => Ok(*id),
            [] => Err(CompileError::UnknownTable(target.to_owned())),
            candidates => Err(CompileError::AmbiguousRelationTarget {
                table: self.tables[owner.0].name.to_string(),
                relation: decl.name.to_string(),
                target: target.to_owned(),
                candidates: candidates.len(),
            }),
        }
    }

    fn check_columns(&self, table: TableId, columns: &[Cow<'static, str>]) -> Result<(), CompileError> {
        let def = &self.tables[table.0];
        match columns.iter().find(|column| def.find_column(column).is_none()) {
            Some(column) => Err(CompileError::UnknownColumn {
                table: def.name.to_string(),
                column: column.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn resolve_direct(&self, owner: TableId, decl: &RelationDecl) -> Result<ResolvedRelation, CompileError> {
        let RelationSpec::Direct {
            kind,
            target,
            owner_keys,
            target_keys,
            join_table,
        } = &decl.spec
        else {
            return Err(CompileError::UnknownRelation {
                table: self.tables[owner.0].name.to_string(),
                relation: decl.name.to_string(),
            });
        };

        let target = self.target_of(owner, decl, target)?;
        self.check_columns(owner, owner_keys)?;
        self.check_columns(target, target_keys)?;

        let link = match (kind, join_table) {
            (RelationKind::HasAndBelongsToMany, Some(join_table)) => RelationLink::JoinTable(join_table.clone()),
            _ => RelationLink::Direct {
                owner_keys: owner_keys.clone(),
                target_keys: target_keys.clone(),
            },
        };

        Ok(ResolvedRelation {
            name: decl.name.clone(),
            kind: *kind,
            owner,
            target,
            link,
            scope: decl.scope.clone(),
            required: decl.required,
        })
    }

    fn insert(&mut self, owner: TableId, relation: ResolvedRelation) {
        relq_trace_relation!("resolved", self.tables[owner.0].name, relation.name);
        let name = relation.name.to_string();
        self.resolved[owner.0].insert(name.clone(), Arc::new(relation));

        let key = (owner, name);
        self.blocked_on.remove(&key);
        if let Some(waiting) = self.deferred.remove(&key) {
            for (table, position) in waiting {
                self.try_through(table, position);
            }
        }
    }

    fn defer(&mut self, owner: TableId, position: usize, waits_for: Key) {
        let tables = self.tables;
        let decl = &tables[owner.0].relations[position];
        relq_trace_relation!("deferred", tables[owner.0].name, decl.name);
        self.blocked_on
            .insert((owner, decl.name.to_string()), waits_for.clone());
        self.deferred.entry(waits_for).or_default().push((owner, position));
    }

    fn try_through(&mut self, owner: TableId, position: usize) {
        let tables = self.tables;
        let decl = &tables[owner.0].relations[position];
        let RelationSpec::Through { through, source } = &decl.spec else {
            return;
        };

        let Some(through) = self.resolved[owner.0].get(through.as_ref()).cloned() else {
            self.defer(owner, position, (owner, through.to_string()));
            return;
        };
        let Some(source) = self.resolved[through.target.0].get(source.as_ref()).cloned() else {
            self.defer(owner, position, (through.target, source.to_string()));
            return;
        };

        let kind = if through.kind.is_many() || source.kind.is_many() {
            RelationKind::HasMany
        } else {
            RelationKind::HasOne
        };
        let relation = ResolvedRelation {
            name: decl.name.clone(),
            kind,
            owner,
            target: source.target,
            link: RelationLink::Through { through, source },
            scope: decl.scope.clone(),
            required: decl.required,
        };
        self.insert(owner, relation);
    }

    fn label(&self, key: &Key) -> String {
        format!("{}.{}", self.tables[key.0.0].name, key.1)
    }

    fn finish(&self) -> Result<(), CompileError> {
        if self.blocked_on.is_empty() {
            return Ok(());
        }

        let mut pending: Vec<&Key> = self.blocked_on.keys().collect();
        pending.sort();

        for start in &pending {
            let mut chain = vec![(*start).clone()];
            let mut current = *start;
            while let Some(next) = self.blocked_on.get(current) {
                if let Some(position) = chain.iter().position(|key| key == next) {
                    let mut cycle: Vec<String> = chain[position..].iter().map(|key| self.label(key)).collect();
                    cycle.push(self.label(next));
                    return Err(CompileError::CyclicThrough(cycle));
                }
                chain.push(next.clone());
                current = next;
            }
        }

        Err(CompileError::UnresolvedRelation(
            pending.into_iter().map(|key| self.label(key)).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::Column;

    fn users() -> TableDef {
        TableDef::new("users")
            .column(Column::serial("id").primary_key())
            .column(Column::text("name"))
            .relation(RelationDecl::has_many("posts", "posts", ["id"], ["user_id"]))
            .relation(RelationDecl::has_one("profile", "profiles", ["id"], ["user_id"]))
    }

    fn posts() -> TableDef {
        TableDef::new("posts")
            .column(Column::serial("id").primary_key())
            .column(Column::integer("user_id"))
            .relation(RelationDecl::belongs_to("author", "users", ["user_id"], ["id"]))
    }

    fn profiles() -> TableDef {
        TableDef::new("profiles")
            .column(Column::serial("id").primary_key())
            .column(Column::integer("user_id"))
    }

    #[test]
    fn mutual_references_resolve_in_either_order() {
        for schema in [
            Schema::builder().table(users()).table(posts()).table(profiles()),
            Schema::builder().table(posts()).table(profiles()).table(users()),
        ] {
            let schema = schema.build().unwrap();
            let users = schema.table_id("users").unwrap();
            let posts = schema.table_id("posts").unwrap();

            let has_many = schema.relation(users, "posts").unwrap();
            assert_eq!(has_many.kind, RelationKind::HasMany);
            assert_eq!(has_many.target, posts);

            let belongs_to = schema.relation(posts, "author").unwrap();
            assert_eq!(belongs_to.kind, RelationKind::BelongsTo);
            assert_eq!(belongs_to.target, users);
        }
    }

    #[test]
    fn through_waits_for_later_prerequisite() {
        // `posts.author_profile` needs `users.profile`, declared on a table
        // registered after `posts`.
        let posts = posts().relation(RelationDecl::through("author_profile", "author", "profile"));
        let schema = Schema::builder()
            .table(posts)
            .table(profiles())
            .table(users())
            .build()
            .unwrap();

        let posts = schema.table_id("posts").unwrap();
        let relation = schema.relation(posts, "author_profile").unwrap();
        assert_eq!(relation.kind, RelationKind::HasOne);
        assert_eq!(relation.target, schema.table_id("profiles").unwrap());
    }

    #[test]
    fn chained_through_relations_resolve() {
        let users = users().relation(RelationDecl::through("post_authors", "posts", "author"));
        let profiles = profiles()
            .relation(RelationDecl::belongs_to("user", "users", ["user_id"], ["id"]))
            .relation(RelationDecl::through("coauthors", "user", "post_authors"));
        let schema = Schema::builder()
            .table(profiles)
            .table(posts())
            .table(users)
            .build()
            .unwrap();

        let profiles = schema.table_id("profiles").unwrap();
        let relation = schema.relation(profiles, "coauthors").unwrap();
        assert!(relation.is_many());
    }

    #[test]
    fn unresolved_through_is_reported() {
        let posts = posts().relation(RelationDecl::through("missing", "author", "nope"));
        let err = Schema::builder()
            .table(users())
            .table(posts)
            .table(profiles())
            .build()
            .unwrap_err();
        assert_eq!(err, CompileError::UnresolvedRelation(vec!["posts.missing".into()]));
    }

    #[test]
    fn cyclic_through_is_detected() {
        let a = TableDef::new("a")
            .column(Column::serial("id").primary_key())
            .relation(RelationDecl::through("x", "y", "id"));
        let a = a.relation(RelationDecl::through("y", "x", "id"));
        let err = Schema::builder().table(a).build().unwrap_err();
        assert!(matches!(err, CompileError::CyclicThrough(chain) if chain.len() == 3));
    }

    #[test]
    fn ambiguous_target_fails() {
        let audit = |schema: &'static str| {
            TableDef::new("logs")
                .in_schema(schema)
                .column(Column::serial("id").primary_key())
        };
        let users = users().relation(RelationDecl::has_many("logs", "logs", ["id"], ["id"]));
        let err = Schema::builder()
            .table(users)
            .table(posts())
            .table(profiles())
            .table(audit("a"))
            .table(audit("b"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::AmbiguousRelationTarget { candidates: 2, .. }
        ));
    }

    #[test]
    fn duplicate_table_fails() {
        let err = Schema::builder()
            .table(profiles())
            .table(profiles())
            .build()
            .unwrap_err();
        assert_eq!(err, CompileError::DuplicateTable("profiles".into()));
    }

    #[test]
    fn unknown_target_and_column_fail() {
        let broken = TableDef::new("t")
            .column(Column::serial("id").primary_key())
            .relation(RelationDecl::has_many("things", "things", ["id"], ["t_id"]));
        assert_eq!(
            Schema::builder().table(broken).build().unwrap_err(),
            CompileError::UnknownTable("things".into())
        );

        let broken = TableDef::new("t")
            .column(Column::serial("id").primary_key())
            .relation(RelationDecl::belongs_to("user", "users", ["user_id"], ["id"]));
        let err = Schema::builder()
            .table(broken)
            .table(users())
            .table(posts())
            .table(profiles())
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownColumn {
                table: "t".into(),
                column: "user_id".into()
            }
        );
    }
}

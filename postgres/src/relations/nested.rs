//! Writes that reach through relations: nested create, connect and
//! disconnect.
//!
//! A `belongs_to` target is written before its owner, inside the owner's
//! insert as a CTE, and its key is spliced in as a sub-select. Relations whose
//! foreign key lives on the target (`has_one`, `has_many`, join tables) need
//! the owner's row first; they come back as [`PendingWrite`]s to run once the
//! owner insert has returned.

use std::{borrow::Cow, sync::Arc};

use relq_core::{CompileError, relq_trace_write};

use super::{JoinTable, RelationKind, RelationLink, ResolvedRelation, Schema};
use crate::{
    expr::{ColumnRef, Expr, SelectItem, WhereItem, eq, exists},
    query::{CteEntry, Query, Record, typed},
    values::PostgresValue,
};

type Name = Cow<'static, str>;

/// Values of a row to create, with writes to its relations.
#[derive(Debug, Clone, Default)]
pub struct CreateData {
    pub values: Record,
    pub nested: Vec<(Name, NestedWrite)>,
}

impl CreateData {
    pub fn new(values: Record) -> Self {
        Self {
            values,
            nested: Vec::new(),
        }
    }

    /// Adds a write to the relation `relation`.
    pub fn with(mut self, relation: impl Into<Name>, write: NestedWrite) -> Self {
        self.nested.push((relation.into(), write));
        self
    }
}

impl From<Record> for CreateData {
    fn from(values: Record) -> Self {
        CreateData::new(values)
    }
}

/// A write to a relation as part of creating its owner.
#[derive(Debug, Clone)]
pub enum NestedWrite {
    Create(Vec<CreateData>),
    /// Link to existing rows matching the conditions
    Connect(Vec<WhereItem>),
    /// Link to a row matching the conditions, creating it when none does
    ConnectOrCreate {
        conditions: Vec<WhereItem>,
        create: Box<CreateData>,
    },
}

impl NestedWrite {
    pub fn create(data: impl Into<CreateData>) -> Self {
        NestedWrite::Create(vec![data.into()])
    }

    pub fn create_many<I>(data: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<CreateData>,
    {
        NestedWrite::Create(data.into_iter().map(Into::into).collect())
    }

    pub fn connect(conditions: impl IntoIterator<Item = WhereItem>) -> Self {
        NestedWrite::Connect(conditions.into_iter().collect())
    }

    pub fn connect_or_create(
        conditions: impl IntoIterator<Item = WhereItem>,
        create: impl Into<CreateData>,
    ) -> Self {
        NestedWrite::ConnectOrCreate {
            conditions: conditions.into_iter().collect(),
            create: Box::new(create.into()),
        }
    }
}

/// A change to a relation of an existing row.
#[derive(Debug, Clone)]
pub enum NestedUpdate {
    Connect(Vec<WhereItem>),
    /// Unlink rows matching the conditions; all linked rows when empty
    Disconnect(Vec<WhereItem>),
    Create(Vec<CreateData>),
    /// Delete linked rows matching the conditions; all linked rows when empty
    Delete(Vec<WhereItem>),
}

/// The insert of an owner row plus the writes waiting for its returned row.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub insert: Query,
    pub pending: Vec<PendingWrite>,
}

/// A relation write that needs the owner row.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub relation: Arc<ResolvedRelation>,
    pub write: NestedWrite,
}

/// One statement of a nested write, in execution order.
#[derive(Debug, Clone)]
pub enum NestedStep {
    Execute(Query),
    /// Must change a row; changing none means the target was not found
    ExecuteOne(Query),
    /// An insert whose own pending writes follow it
    Create(CreatePlan),
}

fn unsupported(relation: &str, operation: &'static str) -> CompileError {
    CompileError::NestedWriteUnsupported {
        relation: relation.to_owned(),
        operation,
    }
}

fn owner_value(owner: &Record, key: &str) -> Expr {
    owner
        .get(key)
        .cloned()
        .unwrap_or(Expr::Value(PostgresValue::Null))
}

fn with_conditions(query: Query, conditions: &[WhereItem]) -> Query {
    conditions.iter().cloned().fold(query, Query::r#where)
}

fn key_columns(keys: &[Name]) -> Vec<SelectItem> {
    keys.iter()
        .map(|key| SelectItem::from(ColumnRef::new(key.clone())))
        .collect()
}

/// `(SELECT "cte"."key" FROM "cte")`
fn cte_value(cte: &str, key: &Name) -> Expr {
    Expr::Subquery(Box::new(
        Query::table(cte.to_owned()).select([ColumnRef::qualified(cte.to_owned(), key.clone())]),
    ))
}

/// CTEs collected while planning one insert statement.
struct CteSink {
    taken: Vec<String>,
    entries: Vec<CteEntry>,
}

impl CteSink {
    fn for_query(query: &Query) -> Self {
        Self {
            taken: query.ctes().iter().map(|cte| cte.name.to_string()).collect(),
            entries: Vec::new(),
        }
    }

    fn push(&mut self, query: Query) -> String {
        let name = (1..)
            .map(|n| if n == 1 { "q".to_owned() } else { format!("q{n}") })
            .find(|name| !self.taken.contains(name))
            .unwrap_or_default();
        self.taken.push(name.clone());
        self.entries.push(CteEntry::new(name.clone(), query));
        name
    }

    fn attach(self, query: Query) -> Query {
        self.entries.into_iter().fold(query, Query::with_cte)
    }
}

impl Query {
    /// Plans the insert of one row with its nested relation writes.
    ///
    /// The returned insert already contains every `belongs_to` write; run it,
    /// then feed its returned row to each [`PendingWrite::steps`].
    pub fn plan_create(self, data: impl Into<CreateData>) -> Result<CreatePlan, CompileError> {
        let mut ctes = CteSink::for_query(&self);
        let mut plan = self.plan_into(data.into(), &mut ctes)?;
        plan.insert = ctes.attach(plan.insert);
        Ok(plan)
    }

    /// Rows related to the loaded row `owner`.
    pub fn related(&self, relation: &str, owner: &Record) -> Result<Query, CompileError> {
        let (schema, relation) = self.find_relation(relation)?;
        Ok(relation.for_record(&schema, owner))
    }

    /// The schema and resolved relation `name` of this query's table.
    pub fn find_relation(&self, name: &str) -> Result<(Arc<Schema>, Arc<ResolvedRelation>), CompileError> {
        let unknown = || CompileError::UnknownRelation {
            table: self.table.to_string(),
            relation: name.to_owned(),
        };
        let meta = self.meta().ok_or_else(unknown)?;
        let relation = meta.schema.relation(meta.id, name).ok_or_else(unknown)?;
        Ok((meta.schema.clone(), relation.clone()))
    }

    fn plan_into(self, data: CreateData, ctes: &mut CteSink) -> Result<CreatePlan, CompileError> {
        let CreateData { mut values, nested } = data;
        let mut pending = Vec::new();
        let mut provided = Vec::new();

        for (name, write) in nested {
            let (schema, relation) = self.find_relation(&name)?;
            if relation.is_through() {
                return Err(unsupported(&name, "create"));
            }
            match relation.direct_keys() {
                Some((owner_keys, _)) if relation.kind == RelationKind::BelongsTo => {
                    let keys = relation.belongs_to_keys(&schema, write, ctes)?;
                    for (key, value) in owner_keys.iter().zip(keys) {
                        values.insert(key.clone(), value);
                    }
                }
                _ => pending.push(PendingWrite { relation, write }),
            }
            provided.push(name);
        }
        self.check_required(&values, &provided)?;

        let owner_keys: Vec<Name> = pending
            .iter()
            .flat_map(|write| write.relation.owner_keys().to_vec())
            .collect();
        let mut insert = self.insert(values);
        if !owner_keys.is_empty() {
            let missing = insert.selection().map(|items| {
                owner_keys
                    .iter()
                    .filter(|key| {
                        !items.iter().any(|item| {
                            matches!(item, SelectItem::Expr(Expr::Star(None)))
                                || item.output_name() == Some(key.as_ref())
                        })
                    })
                    .map(|key| SelectItem::from(ColumnRef::new(key.clone())))
                    .collect::<Vec<_>>()
            });
            insert = match missing {
                None => insert.returning_all(),
                Some(missing) => insert.returning(missing),
            };
        }
        Ok(CreatePlan { insert, pending })
    }

    fn check_required(&self, values: &Record, provided: &[Name]) -> Result<(), CompileError> {
        let Some(meta) = self.meta() else {
            return Ok(());
        };
        for relation in meta.schema.relations(meta.id) {
            if !relation.required || provided.contains(&relation.name) {
                continue;
            }
            let set = match relation.direct_keys() {
                Some((owner_keys, _)) if relation.kind == RelationKind::BelongsTo => {
                    owner_keys.iter().all(|key| values.contains(key))
                }
                _ => false,
            };
            if !set {
                return Err(CompileError::MissingRequiredRelation {
                    table: self.table.to_string(),
                    relation: relation.name.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl ResolvedRelation {
    /// Owner columns a write through this relation reads from the owner row.
    pub fn owner_keys(&self) -> &[Name] {
        match &self.link {
            RelationLink::Direct { owner_keys, .. } => owner_keys,
            RelationLink::JoinTable(join) => &join.owner_keys,
            RelationLink::Through { .. } => &[],
        }
    }

    fn target_keys(&self) -> &[Name] {
        match &self.link {
            RelationLink::Direct { target_keys, .. } => target_keys,
            RelationLink::JoinTable(join) => &join.target_keys,
            RelationLink::Through { .. } => &[],
        }
    }

    /// Values for the owner's foreign key columns, one per target key.
    fn belongs_to_keys(
        &self,
        schema: &Arc<Schema>,
        write: NestedWrite,
        ctes: &mut CteSink,
    ) -> Result<Vec<Expr>, CompileError> {
        let target_keys = self.target_keys().to_vec();
        match write {
            NestedWrite::Create(children) => {
                let Ok([child]) = <[CreateData; 1]>::try_from(children) else {
                    return Err(unsupported(&self.name, "create of several rows"));
                };
                let plan = schema.query_for(self.target).plan_into(child, ctes)?;
                if !plan.pending.is_empty() {
                    return Err(unsupported(&self.name, "create"));
                }
                let cte = ctes.push(plan.insert.reselect(key_columns(&target_keys)));
                Ok(target_keys.iter().map(|key| cte_value(&cte, key)).collect())
            }
            NestedWrite::Connect(conditions) => Ok(target_keys
                .iter()
                .map(|key| {
                    let query = with_conditions(self.query(schema), &conditions)
                        .reselect([ColumnRef::new(key.clone())])
                        .limit(1);
                    Expr::Subquery(Box::new(query))
                })
                .collect()),
            NestedWrite::ConnectOrCreate { conditions, create } => {
                if !create.nested.is_empty() {
                    return Err(unsupported(&self.name, "connect or create"));
                }
                let found = with_conditions(self.query(schema), &conditions)
                    .reselect(key_columns(&target_keys))
                    .limit(1);
                let found = ctes.push(found);
                let created = schema
                    .query_for(self.target)
                    .conditional_insert(&create.values, &found)?
                    .reselect(key_columns(&target_keys));
                let created = ctes.push(created);
                Ok(target_keys
                    .iter()
                    .map(|key| Expr::func("coalesce", [cte_value(&found, key), cte_value(&created, key)]))
                    .collect())
            }
        }
    }

    /// Sets the foreign key of a target row to the owner's key.
    fn link_child(&self, owner: &Record, values: &mut Record) {
        if let Some((owner_keys, target_keys)) = self.direct_keys() {
            for (owner_key, target_key) in owner_keys.iter().zip(target_keys) {
                values.insert(target_key.clone(), owner_value(owner, owner_key));
            }
        }
    }

    fn link_record(&self, owner: &Record) -> Record {
        let mut values = Record::new();
        self.link_child(owner, &mut values);
        values
    }

    /// `UPDATE target SET fk = <owner key> WHERE conditions`
    fn connect_query(&self, schema: &Arc<Schema>, owner: &Record, conditions: &[WhereItem]) -> Query {
        with_conditions(self.query(schema), conditions).update(self.link_record(owner))
    }

    fn create_children(
        &self,
        schema: &Arc<Schema>,
        owner: &Record,
        children: &[CreateData],
    ) -> Result<Vec<NestedStep>, CompileError> {
        children
            .iter()
            .map(|child| {
                let mut child = child.clone();
                self.link_child(owner, &mut child.values);
                Ok(NestedStep::Create(schema.query_for(self.target).plan_create(child)?))
            })
            .collect()
    }

    /// Owner key values as the leading columns of a join table row.
    fn join_owner_items(&self, schema: &Arc<Schema>, join: &JoinTable, owner: &Record) -> Vec<SelectItem> {
        let def = schema.table_id(&join.table).ok().map(|id| schema.table_def(id));
        join.join_owner_keys
            .iter()
            .zip(&join.owner_keys)
            .map(|(join_key, key)| SelectItem::Expr(typed(def, join_key, &owner_value(owner, key))))
            .collect()
    }

    fn join_columns(join: &JoinTable) -> Vec<Name> {
        join.join_owner_keys
            .iter()
            .chain(&join.join_target_keys)
            .cloned()
            .collect()
    }

    /// `INSERT INTO jt(owner cols, target cols) SELECT <owner keys>, "cte"."key" FROM "cte"`
    fn join_rows_from(
        &self,
        schema: &Arc<Schema>,
        join: &JoinTable,
        owner: &Record,
        cte: &str,
    ) -> Query {
        let mut items = self.join_owner_items(schema, join, owner);
        items.extend(
            join.target_keys
                .iter()
                .map(|key| SelectItem::from(ColumnRef::qualified(cte.to_owned(), key.clone()))),
        );
        Query::table(cte.to_owned()).select(items)
    }

    fn join_table_steps(
        &self,
        schema: &Arc<Schema>,
        join: &JoinTable,
        owner: &Record,
        write: &NestedWrite,
    ) -> Result<Vec<NestedStep>, CompileError> {
        let columns = Self::join_columns(join);
        match write {
            NestedWrite::Create(children) => children
                .iter()
                .map(|child| {
                    if !child.nested.is_empty() {
                        return Err(unsupported(&self.name, "create"));
                    }
                    let insert = schema
                        .query_for(self.target)
                        .insert(child.values.clone())
                        .reselect(key_columns(&join.target_keys));
                    let (outer, cte) = Query::table(join.table.clone()).with_unique(insert);
                    let rows = self.join_rows_from(schema, join, owner, &cte);
                    Ok(NestedStep::Execute(outer.insert_from(columns.clone(), rows)))
                })
                .collect(),
            NestedWrite::Connect(conditions) => {
                let mut items = self.join_owner_items(schema, join, owner);
                items.extend(key_columns(&join.target_keys));
                let rows = with_conditions(self.query(schema), conditions).reselect(items);
                Ok(vec![NestedStep::Execute(
                    Query::table(join.table.clone()).insert_from(columns, rows),
                )])
            }
            NestedWrite::ConnectOrCreate { conditions, create } => {
                if !create.nested.is_empty() {
                    return Err(unsupported(&self.name, "connect or create"));
                }
                let found = with_conditions(self.query(schema), conditions)
                    .reselect(key_columns(&join.target_keys))
                    .limit(1);
                let (outer, found) = Query::table(join.table.clone()).with_unique(found);
                let created = schema
                    .query_for(self.target)
                    .conditional_insert(&create.values, &found)?
                    .reselect(key_columns(&join.target_keys));
                let (outer, created) = outer.with_unique(created);
                let rows = self
                    .join_rows_from(schema, join, owner, &found)
                    .union_all(self.join_rows_from(schema, join, owner, &created));
                Ok(vec![NestedStep::Execute(outer.insert_from(columns, rows))])
            }
        }
    }

    /// Join table rows of `owner`, narrowed to targets matching `conditions`.
    fn join_links(&self, schema: &Arc<Schema>, join: &JoinTable, owner: &Record, conditions: &[WhereItem]) -> Query {
        let mut links = Query::table(join.table.clone());
        for (join_key, key) in join.join_owner_keys.iter().zip(&join.owner_keys) {
            links = links.r#where(eq(
                ColumnRef::qualified(join.table.clone(), join_key.clone()),
                owner_value(owner, key),
            ));
        }
        if conditions.is_empty() {
            return links;
        }
        let mut target = with_conditions(self.query(schema), conditions).reselect([Expr::raw("1")]);
        for (join_key, key) in join.join_target_keys.iter().zip(&join.target_keys) {
            target = target.r#where(eq(
                ColumnRef::new(key.clone()),
                ColumnRef::qualified(join.table.clone(), join_key.clone()),
            ));
        }
        links.r#where(exists(target))
    }

    /// Statements that change this relation of the existing row `owner`.
    pub fn nested_update(
        &self,
        schema: &Arc<Schema>,
        owner: &Record,
        update: NestedUpdate,
    ) -> Result<Vec<NestedStep>, CompileError> {
        relq_trace_write!("nested_update", self.name, update);

        match (&self.link, self.kind) {
            (RelationLink::Through { .. }, _) => Err(unsupported(&self.name, "update")),
            (RelationLink::Direct { owner_keys, .. }, RelationKind::BelongsTo) => {
                let owner_table = schema.query_for(self.owner);
                let pks = owner_table.primary_keys();
                let owner_row = owner_table
                    .where_columns(pks.iter().map(|pk| (ColumnRef::new(pk.clone()), owner_value(owner, pk))));
                let cleared = || -> Record {
                    owner_keys
                        .iter()
                        .map(|key| (key.clone(), Expr::Value(PostgresValue::Null)))
                        .collect()
                };
                match update {
                    NestedUpdate::Connect(conditions) => {
                        let matched = with_conditions(self.query(schema), &conditions).reselect([Expr::raw("1")]);
                        let mut ctes = CteSink::for_query(&owner_row);
                        let keys = self.belongs_to_keys(schema, NestedWrite::Connect(conditions), &mut ctes)?;
                        let link = owner_row
                            .r#where(exists(matched))
                            .update(owner_keys.iter().cloned().zip(keys).collect());
                        Ok(vec![NestedStep::ExecuteOne(link)])
                    }
                    NestedUpdate::Disconnect(_) => Ok(vec![NestedStep::Execute(owner_row.update(cleared()))]),
                    NestedUpdate::Create(children) => {
                        let mut ctes = CteSink::for_query(&owner_row);
                        let keys = self.belongs_to_keys(schema, NestedWrite::Create(children), &mut ctes)?;
                        let link = ctes.attach(owner_row.update(owner_keys.iter().cloned().zip(keys).collect()));
                        Ok(vec![NestedStep::Execute(link)])
                    }
                    NestedUpdate::Delete(conditions) => {
                        // the owner's key goes first so the delete never trips it
                        let parent = with_conditions(self.for_record(schema, owner), &conditions);
                        let unlink = owner_row
                            .r#where(exists(parent.clone().reselect([Expr::raw("1")])))
                            .update(cleared());
                        Ok(vec![NestedStep::Execute(unlink), NestedStep::Execute(parent.delete())])
                    }
                }
            }
            (RelationLink::Direct { target_keys, .. }, _) => match update {
                NestedUpdate::Connect(conditions) => {
                    Ok(vec![NestedStep::Execute(self.connect_query(schema, owner, &conditions))])
                }
                NestedUpdate::Disconnect(conditions) => {
                    let unlink: Record = target_keys
                        .iter()
                        .map(|key| (key.clone(), Expr::Value(PostgresValue::Null)))
                        .collect();
                    let query = with_conditions(self.for_record(schema, owner), &conditions).update(unlink);
                    Ok(vec![NestedStep::Execute(query)])
                }
                NestedUpdate::Create(children) => self.create_children(schema, owner, &children),
                NestedUpdate::Delete(conditions) => Ok(vec![NestedStep::Execute(
                    with_conditions(self.for_record(schema, owner), &conditions).delete(),
                )]),
            },
            (RelationLink::JoinTable(join), _) => match update {
                NestedUpdate::Connect(conditions) => {
                    self.join_table_steps(schema, join, owner, &NestedWrite::Connect(conditions))
                }
                NestedUpdate::Create(children) => {
                    self.join_table_steps(schema, join, owner, &NestedWrite::Create(children))
                }
                NestedUpdate::Disconnect(conditions) => Ok(vec![NestedStep::Execute(
                    self.join_links(schema, join, owner, &conditions).hard_delete(),
                )]),
                NestedUpdate::Delete(conditions) => {
                    let links = self
                        .join_links(schema, join, owner, &conditions)
                        .hard_delete()
                        .returning(key_columns(&join.join_target_keys));
                    let (target, cte) = schema.query_for(self.target).with_unique(links);
                    let mut linked = Query::table(cte.clone()).select([Expr::raw("1")]);
                    for (join_key, key) in join.join_target_keys.iter().zip(&join.target_keys) {
                        linked = linked.r#where(eq(
                            ColumnRef::qualified(cte.clone(), join_key.clone()),
                            ColumnRef::qualified(target.qualifier().to_owned(), key.clone()),
                        ));
                    }
                    Ok(vec![NestedStep::Execute(target.r#where(exists(linked)).delete())])
                }
            },
        }
    }
}

impl PendingWrite {
    /// Statements completing this write once the owner row is known.
    pub fn steps(&self, schema: &Arc<Schema>, owner: &Record) -> Result<Vec<NestedStep>, CompileError> {
        let relation = &self.relation;
        match (&relation.link, &self.write) {
            (RelationLink::Through { .. }, _) => Err(unsupported(&relation.name, "create")),
            (RelationLink::JoinTable(join), write) => relation.join_table_steps(schema, join, owner, write),
            (RelationLink::Direct { .. }, NestedWrite::Create(children)) => {
                relation.create_children(schema, owner, children)
            }
            (RelationLink::Direct { .. }, NestedWrite::Connect(conditions)) => Ok(vec![NestedStep::Execute(
                relation.connect_query(schema, owner, conditions),
            )]),
            (RelationLink::Direct { .. }, NestedWrite::ConnectOrCreate { conditions, create }) => {
                if !create.nested.is_empty() {
                    return Err(unsupported(&relation.name, "connect or create"));
                }
                let connected = relation
                    .connect_query(schema, owner, conditions)
                    .reselect([Expr::raw("1")]);
                let (target, guard) = schema.query_for(relation.target).with_unique(connected);
                let mut values = create.values.clone();
                relation.link_child(owner, &mut values);
                Ok(vec![NestedStep::Execute(target.conditional_insert(&values, &guard)?)])
            }
        }
    }
}

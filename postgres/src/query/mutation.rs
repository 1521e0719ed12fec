//! Insert, update and delete descriptors.

use std::{borrow::Cow, sync::Arc};

use super::{Query, QueryKind, ReturnType};
use crate::expr::{ColumnRef, Expr, IntoExpr, SelectItem, col};

type Name = Cow<'static, str>;

/// Column values for one row, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<(Name, Expr)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `column`, replacing an earlier value for it.
    pub fn set(mut self, column: impl Into<Name>, value: impl IntoExpr) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<Name>, value: impl IntoExpr) {
        let column = column.into();
        let value = value.into_expr();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Expr> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn remove(&mut self, column: &str) -> Option<Expr> {
        let index = self.fields.iter().position(|(name, _)| name == column)?;
        Some(self.fields.remove(index).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Name> {
        self.fields.iter().map(|(name, _)| name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Expr)> {
        self.fields.iter().map(|(name, value)| (name, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl IntoIterator for Record {
    type Item = (Name, Expr);
    type IntoIter = std::vec::IntoIter<(Name, Expr)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<K: Into<Name>, V: IntoExpr> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (column, value) in iter {
            record.insert(column, value);
        }
        record
    }
}

/// Builds a [`Record`]: `record! { "name" => "Ann", "age" => 30 }`.
#[macro_export]
macro_rules! record {
    () => { $crate::query::Record::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {
        $crate::query::Record::new()$(.set($column, $value))+
    };
}

#[derive(Debug, Clone)]
pub(crate) enum InsertSource {
    /// `VALUES (...), (...)`; rows are aligned to `columns`
    Values { columns: Vec<Name>, rows: Vec<Vec<Expr>> },
    /// `INSERT INTO t(columns) <select>`
    Select { columns: Vec<Name>, query: Box<Query> },
    /// Every row of `query` combined with each literal row of `values`
    SelectWithValues { query: Box<Query>, values: Vec<Record> },
}

/// `ON CONFLICT (target) DO ...`
#[derive(Debug, Clone)]
pub struct OnConflict {
    pub target: Vec<Name>,
    pub action: ConflictAction,
}

#[derive(Debug, Clone)]
pub enum ConflictAction {
    Nothing,
    Update(Vec<(Name, Expr)>),
    /// Overwrite every inserted column outside the target with `excluded`
    Merge,
}

#[derive(Debug, Clone)]
pub struct InsertData {
    pub(crate) source: InsertSource,
    pub(crate) on_conflict: Option<OnConflict>,
}

#[derive(Debug, Clone)]
pub struct UpdateData {
    pub(crate) set: Vec<(Name, Expr)>,
}

impl Query {
    fn into_insert(mut self, source: InsertSource) -> Self {
        self.kind = QueryKind::Insert(Arc::new(InsertData {
            source,
            on_conflict: None,
        }));
        if self.select.is_none() {
            self.return_type = ReturnType::Void;
        }
        self
    }

    /// `INSERT INTO t(columns) VALUES (...)`
    pub fn insert(self, record: Record) -> Self {
        self.insert_many([record])
    }

    /// Multi-row insert. Columns are the union of every record's columns in
    /// first-seen order; a record lacking a column inserts `DEFAULT`.
    pub fn insert_many(self, records: impl IntoIterator<Item = Record>) -> Self {
        let records: Vec<Record> = records.into_iter().collect();
        let mut columns: Vec<Name> = Vec::new();
        for record in &records {
            for column in record.columns() {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }
        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|column| record.remove(column).unwrap_or(Expr::Default))
                    .collect()
            })
            .collect();
        self.into_insert(InsertSource::Values { columns, rows })
    }

    /// `INSERT INTO t(columns) SELECT ...`
    pub fn insert_from<I, S>(self, columns: I, query: Query) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Name>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        self.into_insert(InsertSource::Select {
            columns,
            query: Box::new(query),
        })
    }

    /// Inserts one row per entry of `values`, each combined with the columns
    /// selected by `query`:
    /// `INSERT INTO t(q_cols, v_cols) SELECT "q".*, "v".* FROM (query) AS "q", (VALUES ...) "v"(v_cols)`.
    ///
    /// Every record must set the same columns.
    pub fn create_many_from(self, query: Query, values: impl IntoIterator<Item = Record>) -> Self {
        self.into_insert(InsertSource::SelectWithValues {
            query: Box::new(query),
            values: values.into_iter().collect(),
        })
    }

    fn with_conflict(mut self, target: Vec<Name>, action: ConflictAction) -> Self {
        if let QueryKind::Insert(data) = &mut self.kind {
            Arc::make_mut(data).on_conflict = Some(OnConflict { target, action });
        }
        self
    }

    /// Starts an `ON CONFLICT (columns)` clause.
    pub fn on_conflict<I, S>(self, columns: I) -> OnConflictBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<Name>,
    {
        OnConflictBuilder {
            query: self,
            target: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// `ON CONFLICT DO NOTHING` without a target
    pub fn on_conflict_do_nothing(self) -> Self {
        self.with_conflict(Vec::new(), ConflictAction::Nothing)
    }

    /// `UPDATE t SET ...`
    pub fn update(mut self, record: Record) -> Self {
        let mut set = match &self.kind {
            QueryKind::Update(data) => data.set.clone(),
            _ => Vec::new(),
        };
        for (column, value) in record {
            match set.iter_mut().find(|(name, _)| *name == column) {
                Some((_, slot)) => *slot = value,
                None => set.push((column, value)),
            }
        }
        self.kind = QueryKind::Update(Arc::new(UpdateData { set }));
        if self.select.is_none() {
            self.return_type = ReturnType::Void;
        }
        self
    }

    /// `SET "column" = "column" + by`
    pub fn increment(self, column: impl Into<Name>, by: impl IntoExpr) -> Self {
        let column = column.into();
        let value = col(ColumnRef::new(column.clone())).plus(by);
        self.update(Record::new().set(column, value))
    }

    /// `SET "column" = "column" - by`
    pub fn decrement(self, column: impl Into<Name>, by: impl IntoExpr) -> Self {
        let column = column.into();
        let value = col(ColumnRef::new(column.clone())).minus(by);
        self.update(Record::new().set(column, value))
    }

    /// Deletes the matching rows. On a soft-delete table this marks them
    /// deleted instead.
    pub fn delete(self) -> Self {
        let soft = self.table_def().and_then(|def| def.soft_delete.clone());
        match soft {
            Some(column) => self.update(Record::new().set(column, Expr::now())),
            None => self.hard_delete(),
        }
    }

    /// `DELETE FROM`, ignoring soft delete.
    pub fn hard_delete(mut self) -> Self {
        self.kind = QueryKind::Delete;
        if self.select.is_none() {
            self.return_type = ReturnType::Void;
        }
        self
    }

    /// `RETURNING items`. Switches a mutation returning nothing to all rows.
    pub fn returning<I>(mut self, items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SelectItem>,
    {
        if self.return_type == ReturnType::Void {
            self.return_type = ReturnType::All;
        }
        self.select(items)
    }

    /// `RETURNING *`
    pub fn returning_all(self) -> Self {
        self.returning(["*"])
    }
}

/// Pending `ON CONFLICT (target)`, finished by choosing an action.
#[derive(Debug, Clone)]
pub struct OnConflictBuilder {
    query: Query,
    target: Vec<Name>,
}

impl OnConflictBuilder {
    pub fn do_nothing(self) -> Query {
        self.query.with_conflict(self.target, ConflictAction::Nothing)
    }

    /// `DO UPDATE SET` with explicit values; [`Expr::excluded`] refers to the
    /// proposed row.
    pub fn do_update(self, record: Record) -> Query {
        let set = record.into_iter().collect();
        self.query.with_conflict(self.target, ConflictAction::Update(set))
    }

    /// `DO UPDATE SET "c" = excluded."c"` for every inserted column outside
    /// the conflict target.
    pub fn merge(self) -> Query {
        self.query.with_conflict(self.target, ConflictAction::Merge)
    }
}

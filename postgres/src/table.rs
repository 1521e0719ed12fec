//! Table definitions.

use std::borrow::Cow;

use crate::{columns::Column, relations::RelationDecl};

/// A table: its columns, an optional soft-delete column and the relations it
/// declares. Relation targets are named, not referenced, so tables can be
/// defined in any order and refer to each other.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: Cow<'static, str>,
    pub schema: Option<Cow<'static, str>>,
    pub columns: Vec<Column>,
    pub soft_delete: Option<Cow<'static, str>>,
    pub relations: Vec<RelationDecl>,
}

impl TableDef {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            soft_delete: None,
            relations: Vec::new(),
        }
    }

    pub fn in_schema(mut self, schema: impl Into<Cow<'static, str>>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = Column>) -> Self {
        self.columns.extend(columns);
        self
    }

    /// Rows with a non-null value in `column` are treated as deleted.
    pub fn soft_delete(mut self, column: impl Into<Cow<'static, str>>) -> Self {
        self.soft_delete = Some(column.into());
        self
    }

    pub fn relation(mut self, relation: RelationDecl) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|column| column.primary_key)
    }

    /// `schema.name`, or just `name`
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.to_string(),
        }
    }
}

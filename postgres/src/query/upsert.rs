//! Single-statement find-or-create and update-or-create.
//!
//! ```text
//! WITH "__upsert_found" AS (<select ... FOR UPDATE> | <UPDATE ... RETURNING sel>),
//!      "__upsert_created" AS (
//!        INSERT INTO t(cols) SELECT $1::type, ...
//!        WHERE NOT EXISTS (SELECT 1 FROM "__upsert_found") RETURNING sel)
//! SELECT "__upsert_found".*, true AS "__found" FROM "__upsert_found"
//! UNION ALL
//! SELECT "__upsert_created".*, false AS "__found" FROM "__upsert_created"
//! ```
//!
//! Every returned row carries [`FOUND_COLUMN`], telling which branch produced
//! it. More than one `true` row means the match was ambiguous.

use std::{borrow::Cow, sync::Arc};

use relq_core::{CompileError, Statement, relq_trace_write};

use super::{CteEntry, Query, Record, ReturnType, compile::typed};
use crate::{
    PostgresSQL,
    expr::{Expr, SelectItem, exists, not},
    values::PostgresValue,
};

/// Marker column added to every row of an upsert result.
pub const FOUND_COLUMN: &str = "__found";

const FOUND_CTE: &str = "__upsert_found";
const CREATED_CTE: &str = "__upsert_created";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    /// Select the row, create it when missing
    OrCreate,
    /// Update the row, create it when missing
    Upsert,
}

/// A compiled-on-demand upsert statement.
#[derive(Debug, Clone)]
pub struct Upsert {
    query: Query,
    kind: UpsertKind,
    return_type: ReturnType,
    create: Record,
    update: Option<Record>,
}

impl Upsert {
    /// The statement, as a union of the two branches.
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn kind(&self) -> UpsertKind {
        self.kind
    }

    /// Return type of the query the upsert was made from.
    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    /// Values inserted when no row matches.
    pub fn create_data(&self) -> &Record {
        &self.create
    }

    /// Values set on the matched row (upsert only).
    pub fn update_data(&self) -> Option<&Record> {
        self.update.as_ref()
    }

    pub fn to_sql(&self) -> Result<PostgresSQL, CompileError> {
        self.query.to_sql()
    }

    pub fn build(&self) -> Result<Statement<PostgresValue>, CompileError> {
        self.query.build()
    }
}

impl Query {
    /// Returns the matched row, or inserts `create` when none matches.
    ///
    /// The query must be a single-row select (`find`, `find_by`, `take`). A
    /// lock on the query applies to the select branch only.
    pub fn or_create(self, create: Record) -> Result<Upsert, CompileError> {
        self.check_upsert_source()?;
        let selection = self.upsert_selection();
        let found = self.clone().strip_for_branch().reselect(selection.iter().cloned());
        self.compile_upsert(found, UpsertKind::OrCreate, create, None)
    }

    /// Updates the matched row with `update`, or inserts `create` when none
    /// matches.
    pub fn upsert(self, update: Record, create: Record) -> Result<Upsert, CompileError> {
        self.check_upsert_source()?;
        if update.is_empty() {
            return Err(CompileError::EmptyInsert(self.table.to_string()));
        }
        let selection = self.upsert_selection();
        let mut found = self.clone().strip_for_branch();
        found.lock = None;
        let found = found.update(update.clone()).reselect(selection.iter().cloned());
        self.compile_upsert(found, UpsertKind::Upsert, create, Some(update))
    }

    fn check_upsert_source(&self) -> Result<(), CompileError> {
        if !self.is_select() || !self.return_type.is_single_row() || !self.set_ops.is_empty() {
            return Err(CompileError::UpsertRequiresSingleRow);
        }
        Ok(())
    }

    fn upsert_selection(&self) -> Vec<SelectItem> {
        match self.select.as_deref() {
            Some(items) if !items.is_empty() => items.clone(),
            _ => vec![SelectItem::Expr(Expr::Star(None))],
        }
    }

    /// Drops what only makes sense on the outer statement: CTEs (hoisted),
    /// ordering and the row limit (an ambiguous match must stay visible).
    fn strip_for_branch(mut self) -> Query {
        self.with = Arc::default();
        self.order = Arc::default();
        self.limit = None;
        self.offset = None;
        self.return_type = ReturnType::All;
        self
    }

    fn compile_upsert(
        self,
        found: Query,
        kind: UpsertKind,
        create: Record,
        update: Option<Record>,
    ) -> Result<Upsert, CompileError> {
        let return_type = self.return_type;
        let selection = self.upsert_selection();

        let mut outer = Query::table(FOUND_CTE);
        for cte in self.with.iter() {
            outer = outer.with_cte(cte.clone());
        }
        let found_name = outer.unique_cte_name(FOUND_CTE);
        let outer = outer.with(found_name.clone(), found);
        let created_name = outer.unique_cte_name(CREATED_CTE);

        let created = self
            .blank()
            .conditional_insert(&create, &found_name)?
            .returning(selection);

        let mut outer = outer.with_cte(CteEntry::new(created_name.clone(), created));
        outer.table = Cow::Owned(found_name.clone());
        let outer = outer
            .select([Expr::Star(Some(Cow::Owned(found_name)))])
            .select_as(FOUND_COLUMN, Expr::raw("true"))
            .union_all(
                Query::table(created_name.clone())
                    .select([Expr::Star(Some(Cow::Owned(created_name)))])
                    .select_as(FOUND_COLUMN, Expr::raw("false")),
            );

        relq_trace_write!("upsert", self.table, kind);

        Ok(Upsert {
            query: outer,
            kind,
            return_type,
            create,
            update,
        })
    }

    /// `INSERT INTO t(cols) SELECT <typed values> WHERE NOT EXISTS (SELECT 1 FROM "guard")`.
    ///
    /// Values are cast to their column types since nothing else gives Postgres
    /// a type for them. The insert carries no soft-delete filter and no lock.
    pub(crate) fn conditional_insert(self, record: &Record, guard: &str) -> Result<Query, CompileError> {
        if record.is_empty() {
            return Err(CompileError::EmptyInsert(self.table.to_string()));
        }
        let def = self.table_def();
        let values: Vec<SelectItem> = record
            .iter()
            .map(|(column, value)| SelectItem::Expr(typed(def, column, value)))
            .collect();
        let guard = Query::table(guard.to_owned()).select([Expr::raw("1")]);
        let source = Query::projection(values).r#where(not(exists(guard)));
        let columns: Vec<Cow<'static, str>> = record.columns().cloned().collect();
        Ok(self.insert_from(columns, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        columns::Column,
        expr::{ColumnRef, eq},
        record,
        relations::Schema,
        table::TableDef,
    };

    fn schema() -> Arc<Schema> {
        Schema::builder()
            .table(
                TableDef::new("users")
                    .column(Column::serial("id").primary_key())
                    .column(Column::text("name"))
                    .column(Column::integer("visits"))
                    .soft_delete("deleted_at"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn or_create_locks_only_the_select_branch() {
        let users = schema().query("users").unwrap();
        let upsert = users
            .find(1)
            .for_update()
            .or_create(record! { "name" => "x" })
            .unwrap();
        let statement = upsert.build().unwrap();

        assert_eq!(
            statement.text,
            concat!(
                r#"WITH "__upsert_found" AS (SELECT * FROM "users" WHERE "users"."id" = $1 "#,
                r#"AND "users"."deleted_at" IS NULL FOR UPDATE), "#,
                r#""__upsert_created" AS (INSERT INTO "users"("name") SELECT $2::text "#,
                r#"WHERE NOT EXISTS (SELECT 1 FROM "__upsert_found") RETURNING *) "#,
                r#"SELECT "__upsert_found".*, true AS "__found" FROM "__upsert_found" "#,
                r#"UNION ALL SELECT "__upsert_created".*, false AS "__found" FROM "__upsert_created""#
            )
        );
        assert_eq!(
            statement.values,
            vec![PostgresValue::Integer(1), PostgresValue::Text("x".into())]
        );
        assert_eq!(upsert.return_type(), ReturnType::OneOrThrow);
        assert_eq!(upsert.kind(), UpsertKind::OrCreate);
    }

    #[test]
    fn upsert_updates_then_creates() {
        let users = schema().query("users").unwrap();
        let upsert = users
            .find_by([("name", "ann")])
            .select(["id"])
            .upsert(
                record! { "visits" => col_plus_one() },
                record! { "name" => "ann", "visits" => 1 },
            )
            .unwrap();

        assert_eq!(
            upsert.to_sql().unwrap().sql(),
            concat!(
                r#"WITH "__upsert_found" AS (UPDATE "users" SET "visits" = "users"."visits" + $1 "#,
                r#"WHERE "users"."name" = $2 AND "users"."deleted_at" IS NULL RETURNING "users"."id"), "#,
                r#""__upsert_created" AS (INSERT INTO "users"("name", "visits") SELECT $3::text, $4::int4 "#,
                r#"WHERE NOT EXISTS (SELECT 1 FROM "__upsert_found") RETURNING "users"."id") "#,
                r#"SELECT "__upsert_found".*, true AS "__found" FROM "__upsert_found" "#,
                r#"UNION ALL SELECT "__upsert_created".*, false AS "__found" FROM "__upsert_created""#
            )
        );
    }

    fn col_plus_one() -> Expr {
        Expr::Column(ColumnRef::new("visits")).plus(1)
    }

    #[test]
    fn user_ctes_are_hoisted_and_names_stay_unique() {
        let users = schema().query("users").unwrap();
        let upsert = users
            .with(FOUND_CTE, Query::table("x"))
            .where_eq("name", "a")
            .take()
            .or_create(record! { "name" => "a" })
            .unwrap();
        let sql = upsert.to_sql().unwrap().sql();

        assert!(sql.starts_with(r#"WITH "__upsert_found" AS (SELECT * FROM "x"), "__upsert_found2" AS (SELECT"#));
        assert!(sql.contains(r#"NOT EXISTS (SELECT 1 FROM "__upsert_found2")"#));
        assert!(sql.ends_with(r#"FROM "__upsert_created""#));
    }

    #[test]
    fn requires_a_single_row_query() {
        let users = schema().query("users").unwrap();
        let err = users
            .clone()
            .r#where(eq("name", "a"))
            .or_create(record! { "name" => "a" })
            .unwrap_err();
        assert_eq!(err, CompileError::UpsertRequiresSingleRow);

        let err = users.find(1).or_create(Record::new()).unwrap_err();
        assert_eq!(err, CompileError::EmptyInsert("users".into()));
    }
}

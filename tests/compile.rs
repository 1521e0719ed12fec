use relq::{
    Column, CompileError, PostgresValue, Query, ReturnType, Schema, TableDef,
    expr::{WhereItem, col, eq, gt, in_query},
    record,
};

fn schema() -> std::sync::Arc<Schema> {
    Schema::builder()
        .table(
            TableDef::new("users")
                .column(Column::serial("id").primary_key())
                .column(Column::text("name")),
        )
        .table(
            TableDef::new("messages")
                .column(Column::serial("id").primary_key())
                .column(Column::integer("user_id"))
                .column(Column::bigint("a")),
        )
        .build()
        .unwrap()
}

#[test]
fn create_many_from_is_one_statement_with_typed_values() {
    let schema = schema();
    let source = schema
        .query("users")
        .unwrap()
        .where_eq("name", "ann")
        .select_as("user_id", col("id"));
    let query = schema
        .query("messages")
        .unwrap()
        .create_many_from(source, [record! { "a" => 1 }, record! { "a" => 2 }]);

    let statement = query.build().unwrap();
    assert_eq!(
        statement.text,
        concat!(
            r#"INSERT INTO "messages"("user_id", "a") SELECT "q".*, "v".* "#,
            r#"FROM (SELECT "users"."id" AS "user_id" FROM "users" WHERE "users"."name" = $1) AS "q", "#,
            r#"(VALUES ($2::int8), ($3)) "v"("a")"#
        )
    );
    assert_eq!(
        statement.values,
        [
            PostgresValue::Text("ann".into()),
            PostgresValue::Integer(1),
            PostgresValue::Integer(2),
        ]
    );
}

#[test]
fn batch_inserts_number_nested_selects_in_order() {
    let schema = schema();
    let users = || schema.query("users").unwrap();
    let messages = || schema.query("messages").unwrap();

    let active = messages()
        .r#where(gt("a", 20))
        .r#where(in_query("user_id", users().where_eq("name", "ann").select(["id"])))
        .select(["user_id"]);
    let source = users()
        .with("active", active)
        .select_as("user_id", col("id"))
        .r#where(in_query("id", Query::table("active").select(["user_id"])))
        .r#where(gt("id", 40));
    let latest = messages().where_eq("user_id", 10).get("a");
    let query = messages().create_many_from(source, [record! { "a" => latest }, record! { "a" => 50 }]);

    let statement = query.build().unwrap();
    assert_eq!(
        statement.text,
        concat!(
            r#"INSERT INTO "messages"("user_id", "a") SELECT "q".*, "v".* FROM ("#,
            r#"WITH "active" AS (SELECT "messages"."user_id" FROM "messages" WHERE "messages"."a" > $1 "#,
            r#"AND "messages"."user_id" IN (SELECT "users"."id" FROM "users" WHERE "users"."name" = $2)) "#,
            r#"SELECT "users"."id" AS "user_id" FROM "users" "#,
            r#"WHERE "users"."id" IN (SELECT "active"."user_id" FROM "active") AND "users"."id" > $3) AS "q", "#,
            r#"(VALUES ((SELECT "messages"."a" FROM "messages" WHERE "messages"."user_id" = $4 LIMIT 1)::int8), ($5)) "#,
            r#""v"("a")"#
        )
    );
    assert_eq!(
        statement.values,
        [
            PostgresValue::Integer(20),
            PostgresValue::Text("ann".into()),
            PostgresValue::Integer(40),
            PostgresValue::Integer(10),
            PostgresValue::Integer(50),
        ]
    );
}

#[test]
fn each_step_leaves_the_previous_query_untouched() {
    let users = schema().query("users").unwrap();
    let named = users.clone().where_eq("name", "ann");
    let limited = named.clone().limit(5);

    assert_eq!(users.to_sql().unwrap().sql(), r#"SELECT * FROM "users""#);
    assert_eq!(
        named.to_sql().unwrap().sql(),
        r#"SELECT * FROM "users" WHERE "users"."name" = $1"#
    );
    assert_eq!(
        limited.to_sql().unwrap().sql(),
        r#"SELECT * FROM "users" WHERE "users"."name" = $1 LIMIT 5"#
    );
}

#[test]
fn templates_are_renumbered_into_the_statement() {
    let users = schema().query("users").unwrap();
    let query = users
        .r#where(eq("id", 1))
        .r#where(
            WhereItem::template(
                "name = $1 OR name = $2",
                [PostgresValue::from("a"), PostgresValue::from("b")],
            )
            .unwrap(),
        )
        .r#where(eq("name", "c"));

    let statement = query.build().unwrap();
    assert_eq!(
        statement.text,
        r#"SELECT * FROM "users" WHERE "users"."id" = $1 AND (name = $2 OR name = $3) AND "users"."name" = $4"#
    );
    assert_eq!(statement.values.len(), 4);
}

#[test]
fn value_queries_need_one_column() {
    let users = schema().query("users").unwrap();
    let err = users
        .select(["id", "name"])
        .return_as(ReturnType::Value)
        .build()
        .unwrap_err();
    assert_eq!(err, CompileError::ValueWithMultipleColumns { count: 2 });
}

#[test]
fn unknown_tables_are_reported() {
    assert_eq!(
        schema().query("comments").unwrap_err(),
        CompileError::UnknownTable("comments".into())
    );
}

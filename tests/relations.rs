use std::sync::Arc;

use common::{MockDriver, int, rows, schema, text};
use relq::{
    Column, Error, Orm, QueryError, QueryErrorKind, RelationDecl, RelationKind, Row, RowSet, Schema, TableDef,
    TransactionOptions, expr::eq, record,
    relations::{CreateData, NestedUpdate, NestedWrite},
};

mod common;

fn row(columns: &[&str], values: Vec<relq::PostgresValue>) -> Row {
    let columns: Vec<String> = columns.iter().map(|column| column.to_string()).collect();
    Row::new(Arc::from(columns), values)
}

fn inserted_user(text: &str) -> Option<RowSet> {
    text.starts_with(r#"INSERT INTO "users""#)
        .then(|| rows(["id", "name", "visits"], vec![[int(5), common::text("ann"), int(0)]]))
}

#[tokio::test]
async fn has_many_children_are_inserted_after_the_owner() {
    let driver = MockDriver::new().respond(|text, _| Ok(inserted_user(text).unwrap_or(RowSet::affected(1))));
    let orm = Orm::new(driver.adapter(), schema());

    let user = orm
        .create(
            orm.table("users").unwrap(),
            CreateData::new(record! { "name" => "ann" }).with(
                "posts",
                NestedWrite::create_many([record! { "title" => "a" }, record! { "title" => "b" }]),
            ),
        )
        .await
        .unwrap();
    assert_eq!(user.get::<i32>("id").unwrap(), 5);

    assert_eq!(
        driver.statements(),
        [
            "BEGIN",
            r#"INSERT INTO "users"("name") VALUES ($1) RETURNING *"#,
            r#"INSERT INTO "posts"("title", "user_id") VALUES ($1, $2)"#,
            r#"INSERT INTO "posts"("title", "user_id") VALUES ($1, $2)"#,
            "COMMIT",
        ]
    );
    assert_eq!(driver.logged()[3].values, [text("b"), int(5)]);
}

#[tokio::test]
async fn belongs_to_parents_are_written_in_the_same_statement() {
    let driver = MockDriver::new().respond(|_, _| {
        Ok(rows(
            ["id", "user_id", "title"],
            vec![[int(1), int(5), common::text("hello")]],
        ))
    });
    let orm = Orm::new(driver.adapter(), schema());

    let post = orm
        .create(
            orm.table("posts").unwrap(),
            CreateData::new(record! { "title" => "hello" })
                .with("author", NestedWrite::create(record! { "name" => "ann" })),
        )
        .await
        .unwrap();
    assert_eq!(post.get::<i32>("user_id").unwrap(), 5);

    let statements = driver.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with(
        r#"WITH "q" AS (INSERT INTO "users"("name") VALUES ($1) RETURNING "users"."id") INSERT INTO "posts""#
    ));
}

#[tokio::test]
async fn failing_nested_writes_roll_back_the_owner() {
    let driver = MockDriver::new().respond(|text, _| match inserted_user(text) {
        Some(set) => Ok(set),
        None => Err(Error::Query(QueryError::new("violates foreign key").with_code("23503"))),
    });
    let orm = Orm::new(driver.adapter(), schema());

    let err = orm
        .create(
            orm.table("users").unwrap(),
            CreateData::new(record! { "name" => "ann" })
                .with("profile", NestedWrite::create(record! { "bio" => "hi" })),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.query_error().map(QueryError::kind),
        Some(QueryErrorKind::ForeignKeyViolation)
    );
    assert_eq!(driver.statements().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn nested_failures_inside_a_transaction_only_undo_their_savepoint() {
    let driver = MockDriver::new().respond(|text, _| {
        if text.starts_with(r#"INSERT INTO "profiles""#) {
            return Err(Error::Query(QueryError::new("boom")));
        }
        Ok(inserted_user(text).unwrap_or(RowSet::affected(1)))
    });
    let orm = Orm::new(driver.adapter(), schema());

    let db = orm.clone();
    orm.transaction(TransactionOptions::default(), || async move {
        db.exec(&db.table("tags")?.insert(record! { "name" => "kept" })).await?;
        let failed = db
            .create(
                db.table("users")?,
                CreateData::new(record! { "name" => "ann" })
                    .with("profile", NestedWrite::create(record! { "bio" => "hi" })),
            )
            .await;
        assert!(failed.is_err());
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(
        driver.statements(),
        [
            "BEGIN",
            r#"INSERT INTO "tags"("name") VALUES ($1)"#,
            "SAVEPOINT relq_sp_0",
            r#"INSERT INTO "users"("name") VALUES ($1) RETURNING *"#,
            r#"INSERT INTO "profiles"("bio", "user_id") VALUES ($1, $2)"#,
            "ROLLBACK TO SAVEPOINT relq_sp_0",
            "RELEASE SAVEPOINT relq_sp_0",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn related_rows_are_loaded_by_correlation() {
    let driver = MockDriver::new().respond(|_, _| {
        Ok(rows(["title"], vec![[common::text("a")], [common::text("b")]]))
    });
    let orm = Orm::new(driver.adapter(), schema());

    let user = row(&["id", "name"], vec![int(5), text("ann")]);
    let titles: Vec<String> = orm
        .pluck(&orm.related("users", &user, "posts").unwrap().pluck("title"))
        .await
        .unwrap();

    assert_eq!(titles, ["a", "b"]);
    assert_eq!(
        driver.statements(),
        [r#"SELECT "posts"."title" FROM "posts" WHERE "posts"."user_id" = $1 AND "posts"."deleted_at" IS NULL"#]
    );
    assert_eq!(driver.logged()[0].values, [int(5)]);
}

#[tokio::test]
async fn join_table_connect_is_one_statement() {
    let driver = MockDriver::new();
    let orm = Orm::new(driver.adapter(), schema());

    let post = row(&["id"], vec![int(3)]);
    orm.update_relation("posts", &post, "tags", NestedUpdate::Connect(vec![eq("name", "db")]))
        .await
        .unwrap();

    assert_eq!(
        driver.statements(),
        [r#"INSERT INTO "post_tags"("post_id", "tag_id") SELECT $1::int4, "tags"."id" FROM "tags" WHERE "tags"."name" = $2"#]
    );
}

#[tokio::test]
async fn connecting_a_missing_parent_is_not_found() {
    let driver = MockDriver::new();
    let orm = Orm::new(driver.adapter(), schema());

    let post = row(&["id", "user_id"], vec![int(3), int(1)]);
    let err = orm
        .update_relation("posts", &post, "author", NestedUpdate::Connect(vec![eq("name", "nobody")]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound));
    let statements = driver.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with(r#"UPDATE "posts" SET "user_id" = (SELECT "users"."id" FROM "users""#));
}

#[tokio::test]
async fn deleting_a_parent_unlinks_the_owner_first() {
    let driver = MockDriver::new().respond(|_, _| Ok(RowSet::affected(1)));
    let orm = Orm::new(driver.adapter(), schema());

    let post = row(&["id", "user_id"], vec![int(3), int(1)]);
    orm.update_relation("posts", &post, "author", NestedUpdate::Delete(Vec::new()))
        .await
        .unwrap();

    let statements = driver.statements();
    assert_eq!(statements.len(), 4);
    assert_eq!(statements[0], "BEGIN");
    assert!(statements[1].starts_with(r#"UPDATE "posts" SET "user_id" = $1"#));
    assert_eq!(statements[2], r#"DELETE FROM "users" WHERE "users"."id" = $1"#);
    assert_eq!(statements[3], "COMMIT");
}

#[tokio::test]
async fn unknown_relations_are_compile_errors() {
    let orm = Orm::new(MockDriver::new().adapter(), schema());
    let user = row(&["id"], vec![int(1)]);

    let err = orm.related("users", &user, "comments").unwrap_err();
    assert!(matches!(
        err,
        Error::Compile(relq::CompileError::UnknownRelation { ref table, ref relation })
            if table == "users" && relation == "comments"
    ));
}

#[test]
fn relations_resolve_regardless_of_registration_order() {
    let users = || {
        TableDef::new("users")
            .column(Column::serial("id").primary_key())
            .relation(RelationDecl::has_many("posts", "posts", ["id"], ["user_id"]))
            .relation(RelationDecl::has_one("profile", "profiles", ["id"], ["user_id"]))
    };
    let posts = || {
        TableDef::new("posts")
            .column(Column::serial("id").primary_key())
            .column(Column::integer("user_id"))
            .relation(RelationDecl::belongs_to("author", "users", ["user_id"], ["id"]))
            .relation(RelationDecl::through("author_profile", "author", "profile"))
    };
    let profiles = || {
        TableDef::new("profiles")
            .column(Column::serial("id").primary_key())
            .column(Column::integer("user_id"))
    };

    for schema in [
        Schema::builder().table(users()).table(posts()).table(profiles()),
        Schema::builder().table(posts()).table(profiles()).table(users()),
    ] {
        let schema = schema.build().unwrap();
        let posts = schema.table_id("posts").unwrap();
        let users = schema.table_id("users").unwrap();

        assert_eq!(schema.relation(users, "posts").unwrap().kind, RelationKind::HasMany);
        assert_eq!(schema.relation(posts, "author").unwrap().target, users);

        let through = schema.relation(posts, "author_profile").unwrap();
        assert!(through.is_through());
        assert_eq!(through.target, schema.table_id("profiles").unwrap());
    }
}

use std::{sync::Arc, time::Duration};

use common::MockDriver;
use futures_util::future::join;
use parking_lot::Mutex;
use relq::{
    Adapter, AdapterConfig, ConfigOverrides, ConnectRetry, Error, PostgresTransactionType, TransactionOptions,
};

mod common;

#[tokio::test]
async fn commit_wraps_the_body() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();

    let db = adapter.clone();
    adapter
        .transaction(TransactionOptions::default(), || async move {
            assert!(db.in_transaction());
            db.query("INSERT INTO t VALUES (1)", &[]).await?;
            db.query("INSERT INTO t VALUES (2)", &[]).await?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(
        driver.statements(),
        ["BEGIN", "INSERT INTO t VALUES (1)", "INSERT INTO t VALUES (2)", "COMMIT"]
    );
    assert!(driver.logged().iter().all(|logged| logged.session == 0));
    assert!(!adapter.in_transaction());
}

#[tokio::test]
async fn failing_body_rolls_back() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();

    let db = adapter.clone();
    let result: relq::Result<()> = adapter
        .transaction(TransactionOptions::default(), || async move {
            db.query("INSERT INTO t VALUES (1)", &[]).await?;
            Err(Error::Hook("boom".into()))
        })
        .await;

    assert!(matches!(result, Err(Error::Hook(message)) if message == "boom"));
    assert_eq!(driver.statements(), ["BEGIN", "INSERT INTO t VALUES (1)", "ROLLBACK"]);
}

#[tokio::test]
async fn begin_carries_the_options() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();

    let options = TransactionOptions::from(PostgresTransactionType::Serializable).read_only();
    adapter.transaction(options, || async { Ok(()) }).await.unwrap();

    assert_eq!(driver.statements(), ["BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY", "COMMIT"]);
}

#[tokio::test]
async fn inner_failure_only_rolls_back_its_savepoint() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();

    let db = adapter.clone();
    adapter
        .transaction(TransactionOptions::default(), || async move {
            db.query("INSERT a", &[]).await?;

            let inner = db.clone();
            let failed: relq::Result<()> = db
                .transaction(TransactionOptions::default(), || async move {
                    inner.query("INSERT b", &[]).await?;
                    Err(Error::Hook("nested".into()))
                })
                .await;
            assert!(failed.is_err());

            db.query("INSERT c", &[]).await?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(
        driver.statements(),
        [
            "BEGIN",
            "INSERT a",
            "SAVEPOINT relq_sp_0",
            "INSERT b",
            "ROLLBACK TO SAVEPOINT relq_sp_0",
            "RELEASE SAVEPOINT relq_sp_0",
            "INSERT c",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn outer_failure_rolls_back_released_savepoints() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();

    let db = adapter.clone();
    let result: relq::Result<()> = adapter
        .transaction(TransactionOptions::default(), || async move {
            let inner = db.clone();
            db.transaction(TransactionOptions::default(), || async move {
                inner.query("INSERT a", &[]).await.map(drop)
            })
            .await?;
            Err(Error::Hook("outer".into()))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(
        driver.statements(),
        [
            "BEGIN",
            "SAVEPOINT relq_sp_0",
            "INSERT a",
            "RELEASE SAVEPOINT relq_sp_0",
            "ROLLBACK",
        ]
    );
}

#[tokio::test]
async fn nested_savepoints_get_their_own_names() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();

    let db = adapter.clone();
    adapter
        .transaction(TransactionOptions::default(), || async move {
            let middle = db.clone();
            db.transaction(TransactionOptions::default(), || async move {
                let inner = middle.clone();
                middle
                    .transaction(TransactionOptions::default(), || async move {
                        inner.query("SELECT 1", &[]).await.map(drop)
                    })
                    .await
            })
            .await
        })
        .await
        .unwrap();

    assert_eq!(
        driver.statements(),
        [
            "BEGIN",
            "SAVEPOINT relq_sp_0",
            "SAVEPOINT relq_sp_1",
            "SELECT 1",
            "RELEASE SAVEPOINT relq_sp_1",
            "RELEASE SAVEPOINT relq_sp_0",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn sequential_savepoints_never_reuse_a_name() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();

    let db = adapter.clone();
    adapter
        .transaction(TransactionOptions::default(), || async move {
            db.transaction(TransactionOptions::default(), || async { Ok(()) }).await?;
            db.transaction(TransactionOptions::default(), || async { Ok(()) }).await
        })
        .await
        .unwrap();

    assert_eq!(
        driver.statements(),
        [
            "BEGIN",
            "SAVEPOINT relq_sp_0",
            "RELEASE SAVEPOINT relq_sp_0",
            "SAVEPOINT relq_sp_1",
            "RELEASE SAVEPOINT relq_sp_1",
            "COMMIT",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_savepoints_take_turns() {
    let driver = MockDriver::new().latency(Duration::from_millis(5));
    let adapter = driver.adapter();
    let fired = Arc::new(Mutex::new(Vec::new()));

    let db = adapter.clone();
    let hooks = fired.clone();
    adapter
        .transaction(TransactionOptions::default(), || async move {
            let (a, a_hooks) = (db.clone(), hooks.clone());
            let failing = db.transaction(TransactionOptions::default(), || async move {
                a.after_commit(move || async move {
                    a_hooks.lock().push("a");
                    Ok(())
                })
                .await?;
                a.query("SELECT 'a1'", &[]).await?;
                a.query("SELECT 'a2'", &[]).await?;
                Err::<(), _>(Error::Hook("a".into()))
            });

            let (b, b_hooks) = (db.clone(), hooks.clone());
            let succeeding = db.transaction(TransactionOptions::default(), || async move {
                b.after_commit(move || async move {
                    b_hooks.lock().push("b");
                    Ok(())
                })
                .await?;
                b.query("SELECT 'b1'", &[]).await.map(drop)
            });

            let (failed, succeeded) = join(failing, succeeding).await;
            assert!(failed.is_err());
            succeeded
        })
        .await
        .unwrap();

    assert_eq!(
        driver.statements(),
        [
            "BEGIN",
            "SAVEPOINT relq_sp_0",
            "SELECT 'a1'",
            "SELECT 'a2'",
            "ROLLBACK TO SAVEPOINT relq_sp_0",
            "RELEASE SAVEPOINT relq_sp_0",
            "SAVEPOINT relq_sp_1",
            "SELECT 'b1'",
            "RELEASE SAVEPOINT relq_sp_1",
            "COMMIT",
        ]
    );
    assert_eq!(*fired.lock(), ["b"]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_statements_in_a_transaction_run_one_at_a_time() {
    let driver = MockDriver::new().latency(Duration::from_millis(10));
    let adapter = driver.adapter();

    let db = adapter.clone();
    adapter
        .transaction(TransactionOptions::default(), || async move {
            let (first, second) = join(db.query("SELECT 1", &[]), db.query("SELECT 2", &[])).await;
            first?;
            second?;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(driver.max_in_flight(), 1);
    assert_eq!(driver.statements(), ["BEGIN", "SELECT 1", "SELECT 2", "COMMIT"]);
    assert_eq!(driver.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn statements_outside_a_transaction_use_separate_sessions() {
    let driver = MockDriver::new().latency(Duration::from_millis(10));
    let adapter = driver.adapter();

    let (first, second) = join(adapter.query("SELECT 1", &[]), adapter.query("SELECT 2", &[])).await;
    first.unwrap();
    second.unwrap();

    assert_eq!(driver.max_in_flight(), 2);
    assert_eq!(driver.connects(), 2);

    // both sessions went back to the pool
    adapter.query("SELECT 3", &[]).await.unwrap();
    assert_eq!(driver.connects(), 2);
}

#[tokio::test]
async fn commit_hooks_run_after_commit() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let db = adapter.clone();
    let (log, hook_seen) = (driver.clone(), seen.clone());
    adapter
        .transaction(TransactionOptions::default(), || async move {
            db.query("INSERT a", &[]).await?;
            db.after_commit(move || async move {
                hook_seen.lock().extend(log.statements());
                Ok(())
            })
            .await
        })
        .await
        .unwrap();

    assert_eq!(*seen.lock(), ["BEGIN", "INSERT a", "COMMIT"]);
}

#[tokio::test]
async fn commit_hooks_are_dropped_with_their_savepoint() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();
    let fired = Arc::new(Mutex::new(Vec::new()));

    let db = adapter.clone();
    let hooks = fired.clone();
    adapter
        .transaction(TransactionOptions::default(), || async move {
            let kept = hooks.clone();
            db.after_commit(move || async move {
                kept.lock().push("outer");
                Ok(())
            })
            .await?;

            let inner = db.clone();
            let dropped = hooks.clone();
            let _ = db
                .transaction(TransactionOptions::default(), || async move {
                    inner
                        .after_commit(move || async move {
                            dropped.lock().push("inner");
                            Ok(())
                        })
                        .await?;
                    Err::<(), _>(Error::Hook("undo".into()))
                })
                .await;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(*fired.lock(), ["outer"]);
}

#[tokio::test]
async fn commit_hooks_run_immediately_outside_a_transaction() {
    let adapter = MockDriver::new().adapter();
    let fired = Arc::new(Mutex::new(false));

    let flag = fired.clone();
    adapter
        .after_commit(move || async move {
            *flag.lock() = true;
            Ok(())
        })
        .await
        .unwrap();

    assert!(*fired.lock());
}

#[tokio::test(start_paused = true)]
async fn connection_failures_are_retried() {
    let driver = MockDriver::new().failing_connects(2);
    let config = AdapterConfig {
        connect_retry: ConnectRetry {
            attempts: 3,
            ..ConnectRetry::default()
        },
        ..AdapterConfig::default()
    };
    let adapter = Adapter::new(driver.clone(), config);

    adapter.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(driver.connects(), 1);

    let driver = MockDriver::new().failing_connects(5);
    let config = AdapterConfig {
        connect_retry: ConnectRetry {
            attempts: 3,
            ..ConnectRetry::default()
        },
        ..AdapterConfig::default()
    };
    let err = Adapter::new(driver.clone(), config)
        .query("SELECT 1", &[])
        .await
        .unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(driver.connects(), 0);
}

#[tokio::test]
async fn new_sessions_set_the_search_path() {
    let driver = MockDriver::new();
    let config = AdapterConfig {
        search_path: Some("app, public".into()),
        ..common::config()
    };
    let adapter = Adapter::new(driver.clone(), config);

    adapter.query("SELECT 1", &[]).await.unwrap();
    adapter.query("SELECT 2", &[]).await.unwrap();
    assert_eq!(
        driver.statements(),
        [r#"SET search_path TO "app", "public""#, "SELECT 1", "SELECT 2"]
    );
}

#[tokio::test]
async fn closed_adapters_refuse_statements() {
    let adapter = MockDriver::new().adapter();
    adapter.close();

    assert!(adapter.is_closed());
    let err = adapter.query("SELECT 1", &[]).await.unwrap_err();
    assert_eq!(err.query_error().and_then(|err| err.code.as_deref()), Some("08003"));
}

#[tokio::test]
async fn reconfigure_shares_no_sessions() {
    let driver = MockDriver::new();
    let adapter = driver.adapter();
    adapter.query("SELECT 1", &[]).await.unwrap();

    let other = adapter.reconfigure(ConfigOverrides {
        database: Some("other".into()),
        ..ConfigOverrides::default()
    });
    assert_eq!(other.database(), "other");
    assert_eq!(adapter.database(), "app");

    other.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(driver.connects(), 2);

    // a transaction on one adapter is invisible to the other
    let inner = other.clone();
    adapter
        .transaction(TransactionOptions::default(), || async move {
            assert!(!inner.in_transaction());
            Ok(())
        })
        .await
        .unwrap();
}

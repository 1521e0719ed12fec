use relq::{AdapterConfig, ConfigOverrides, ConnectRetry};

#[test]
fn loads_from_toml_with_defaults() {
    let config: AdapterConfig = toml::from_str(
        r#"
        host = "db.internal"
        database = "app"
        search_path = "app, public"

        [connect_retry]
        attempts = 3
        "#,
    )
    .unwrap();

    assert_eq!(config.host, "db.internal");
    assert_eq!(config.port, 5432);
    assert_eq!(config.user, "postgres");
    assert_eq!(config.search_path.as_deref(), Some("app, public"));
    assert_eq!(
        config.connect_retry,
        ConnectRetry {
            attempts: 3,
            ..ConnectRetry::default()
        }
    );
}

#[test]
fn loads_from_json() {
    let config: AdapterConfig =
        serde_json::from_str(r#"{"user": "svc", "password": "pw", "max_connections": 2}"#).unwrap();
    assert_eq!(config.user, "svc");
    assert_eq!(config.password.as_deref(), Some("pw"));
    assert_eq!(config.max_connections, 2);
    assert_eq!(config.database, "postgres");
}

#[test]
fn urls_and_overrides_compose() {
    let config = AdapterConfig::from_url("postgresql://svc:p%40ss@db:6432/app?schema=tenant_1").unwrap();
    assert_eq!(config.password.as_deref(), Some("p@ss"));
    assert_eq!(config.port, 6432);

    let merged = config.merged(ConfigOverrides {
        search_path: Some("tenant_2".into()),
        ..ConfigOverrides::default()
    });
    assert_eq!(merged.search_path.as_deref(), Some("tenant_2"));
    assert_eq!(merged.database, "app");
    assert_eq!(merged.password.as_deref(), Some("p@ss"));
}

//! Tests for the schema metadata cache

use std::time::Duration;

use rivven_crud::dialect::SqlServerDialect;
use rivven_crud::error::Error;
use rivven_crud::metadata::{ColumnMetadata, MetadataStore, RelationKind, RelationMetadata};
use rivven_crud::testing::MockConnection;

fn orders() -> RelationMetadata {
    RelationMetadata::new("sales", "orders", RelationKind::Table)
        .with_column(ColumnMetadata::new("id", "int").primary_key().identity())
        .with_column(ColumnMetadata::new("customer_id", "int"))
        .with_column(ColumnMetadata::new("total", "decimal"))
}

fn catalog() -> MockConnection {
    MockConnection::new()
        .with_relation(orders())
        .with_relation(
            RelationMetadata::new("hr", "people", RelationKind::Table)
                .with_column(ColumnMetadata::new("name", "nvarchar").not_null()),
        )
        .with_relation(
            RelationMetadata::new("sales", "v_big_orders", RelationKind::View)
                .with_column(ColumnMetadata::new("id", "int").not_null()),
        )
}

#[tokio::test(start_paused = true)]
async fn test_no_requery_within_ttl() {
    let conn = catalog();
    let mut store = MetadataStore::new(Duration::from_millis(600_000));

    let refreshed = store
        .ensure_fresh(&conn, &SqlServerDialect, None, false)
        .await
        .unwrap();
    assert!(refreshed);

    tokio::time::advance(Duration::from_secs(1)).await;
    let refreshed = store
        .ensure_fresh(&conn, &SqlServerDialect, None, false)
        .await
        .unwrap();
    assert!(!refreshed);

    // one primary-key query plus one column query
    assert_eq!(conn.introspection_queries(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_forced_refresh_always_requeries() {
    let conn = catalog();
    let mut store = MetadataStore::default();

    store
        .ensure_fresh(&conn, &SqlServerDialect, None, false)
        .await
        .unwrap();
    store
        .ensure_fresh(&conn, &SqlServerDialect, None, true)
        .await
        .unwrap();
    assert_eq!(conn.introspection_queries(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry_requeries() {
    let conn = catalog();
    let mut store = MetadataStore::new(Duration::from_millis(600_000));

    store
        .ensure_fresh(&conn, &SqlServerDialect, None, false)
        .await
        .unwrap();
    assert!(store.is_fresh());

    tokio::time::advance(Duration::from_millis(600_001)).await;
    assert!(!store.is_fresh());

    let refreshed = store
        .ensure_fresh(&conn, &SqlServerDialect, None, false)
        .await
        .unwrap();
    assert!(refreshed);
    assert_eq!(conn.introspection_queries(), 4);
}

#[tokio::test]
async fn test_snapshot_contents() {
    let conn = catalog();
    let mut store = MetadataStore::default();
    store
        .ensure_fresh(&conn, &SqlServerDialect, None, false)
        .await
        .unwrap();

    let names: Vec<_> = store.relations().iter().map(|r| r.full_name()).collect();
    assert_eq!(names, vec!["hr.people", "sales.orders", "sales.v_big_orders"]);

    let orders = store.lookup("sales.orders").unwrap();
    assert_eq!(orders.kind, RelationKind::Table);
    // introspection orders columns by name
    let columns: Vec<_> = orders.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["customer_id", "id", "total"]);

    let id = orders.column("id").unwrap();
    assert!(id.is_primary_key);
    assert!(id.is_identity);
    assert!(!id.is_nullable);
    assert!(orders.column("total").unwrap().is_nullable);

    assert_eq!(
        store.lookup("sales.v_big_orders").unwrap().kind,
        RelationKind::View
    );
    assert!(store.lookup("SALES.ORDERS").is_some());
    assert!(store.lookup("sales.missing").is_none());
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let conn = catalog();
    let mut store = MetadataStore::default();
    store
        .ensure_fresh(&conn, &SqlServerDialect, None, false)
        .await
        .unwrap();

    conn.fail_introspection(true);
    let err = store
        .ensure_fresh(&conn, &SqlServerDialect, None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaIntrospection { .. }));
    assert!(err.is_retriable());

    assert_eq!(store.relations().len(), 3);
    assert!(store.lookup("sales.orders").is_some());
}

#[tokio::test]
async fn test_first_refresh_failure_leaves_store_empty() {
    let conn = catalog();
    conn.fail_introspection(true);

    let mut store = MetadataStore::default();
    assert!(store
        .ensure_fresh(&conn, &SqlServerDialect, None, false)
        .await
        .is_err());
    assert!(store.relations().is_empty());
    assert!(!store.is_fresh());
}

#[tokio::test]
async fn test_schema_filter() {
    let conn = catalog();
    let mut store = MetadataStore::default();
    store
        .ensure_fresh(&conn, &SqlServerDialect, Some("sales"), false)
        .await
        .unwrap();

    let names: Vec<_> = store.relations().iter().map(|r| r.full_name()).collect();
    assert_eq!(names, vec!["sales.orders", "sales.v_big_orders"]);
}

#[tokio::test]
async fn test_execution_keys_cached_and_invalidated() {
    let conn = catalog();
    let mut store = MetadataStore::default();
    store
        .ensure_fresh(&conn, &SqlServerDialect, None, false)
        .await
        .unwrap();

    let relation = store.lookup("sales.orders").unwrap().clone();
    let keys = store.execution_keys(&relation);
    assert_eq!(keys.primary_keys, vec!["id"]);
    assert_eq!(keys.identity_column.as_deref(), Some("id"));

    let again = store.execution_keys(&relation);
    assert!(std::sync::Arc::ptr_eq(&keys, &again));

    store.invalidate();
    assert!(store.relations().is_empty());
    assert!(!store.is_fresh());

    let rebuilt = store.execution_keys(&relation);
    assert!(!std::sync::Arc::ptr_eq(&keys, &rebuilt));
}

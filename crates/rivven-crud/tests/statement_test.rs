//! End-to-end statement synthesis tests

use rivven_crud::binder::SynthesizedStatement;
use rivven_crud::capability::Operation;
use rivven_crud::dialect::SqlServerDialect;
use rivven_crud::error::Error;
use rivven_crud::metadata::{ColumnMetadata, ExecutionKeys, RelationKind, RelationMetadata};
use rivven_crud::statement::{CrudRequest, StatementSynthesizer};
use rivven_crud::types::Value;
use serde_json::json;

fn orders() -> RelationMetadata {
    RelationMetadata::new("sales", "orders", RelationKind::Table)
        .with_column(ColumnMetadata::new("id", "int").primary_key().identity())
        .with_column(ColumnMetadata::new("customer_id", "int").not_null())
        .with_column(ColumnMetadata::new("total", "decimal"))
}

fn synthesize(
    relation: &RelationMetadata,
    operation: Operation,
    params: serde_json::Value,
) -> rivven_crud::Result<SynthesizedStatement> {
    let keys = ExecutionKeys::from_relation(relation);
    let params = params.as_object().cloned().unwrap_or_default();
    let request = CrudRequest::from_parameters(operation, &params)?;
    StatementSynthesizer::new(&SqlServerDialect, relation, &keys).synthesize(&request)
}

#[test]
fn test_create_echoes_identity_row() {
    let stmt = synthesize(
        &orders(),
        Operation::Create,
        json!({"customer_id": 7, "total": 99.5}),
    )
    .unwrap();

    assert_eq!(
        stmt.text(),
        "INSERT INTO sales.orders ([customer_id], [total])\n\
         VALUES (@param0_, @param1_);\n\
         SELECT * FROM sales.orders WHERE [id] = SCOPE_IDENTITY()"
    );
    assert_eq!(stmt.values(), vec![Value::Int64(7), Value::Float64(99.5)]);

    assert_eq!(
        stmt.driver_text(&SqlServerDialect),
        "INSERT INTO sales.orders ([customer_id], [total])\n\
         VALUES (@P1, @P2);\n\
         SELECT * FROM sales.orders WHERE [id] = SCOPE_IDENTITY()"
    );
}

#[test]
fn test_read_with_predicate() {
    let stmt = synthesize(&orders(), Operation::Read, json!({"where_clause": "total > 50"}))
        .unwrap();
    assert_eq!(stmt.text(), "SELECT * FROM sales.orders WHERE total > 50");
    assert!(stmt.parameters().is_empty());
}

#[test]
fn test_read_defaults() {
    let stmt = synthesize(&orders(), Operation::Read, json!({})).unwrap();
    assert_eq!(stmt.text(), "SELECT * FROM sales.orders");

    let stmt = synthesize(
        &orders(),
        Operation::Read,
        json!({"select_distinct": false, "where_clause": "   ", "selected_columns": []}),
    )
    .unwrap();
    assert_eq!(stmt.text(), "SELECT * FROM sales.orders");
}

#[test]
fn test_update_binds_values_and_keys() {
    let stmt = synthesize(
        &orders(),
        Operation::Update,
        json!({"id": 12, "customer_id": 3}),
    )
    .unwrap();
    assert_eq!(
        stmt.driver_text(&SqlServerDialect),
        "UPDATE TOP (1) sales.orders SET [customer_id] = @P1\n\
         WHERE [id] = @P2;\n\
         SELECT [customer_id], [id] FROM sales.orders WHERE [id] = @P2"
    );
    assert_eq!(stmt.values(), vec![Value::Int64(3), Value::Int64(12)]);
}

#[test]
fn test_update_without_key_is_rejected() {
    let err = synthesize(&orders(), Operation::Update, json!({"total": 10})).unwrap_err();
    match err {
        Error::MissingKey { relation, columns } => {
            assert_eq!(relation, "sales.orders");
            assert_eq!(columns, vec!["id".to_string()]);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_delete_by_key() {
    let stmt = synthesize(&orders(), Operation::Delete, json!({"id": 5})).unwrap();
    assert_eq!(
        stmt.deparameterize(),
        "DELETE TOP (1) FROM sales.orders OUTPUT DELETED.* WHERE [id] = 5"
    );
}

#[test]
fn test_composite_key_delete() {
    let lines = RelationMetadata::new("sales", "order lines", RelationKind::Table)
        .with_column(ColumnMetadata::new("order_id", "int").primary_key())
        .with_column(ColumnMetadata::new("line_no", "int").primary_key())
        .with_column(ColumnMetadata::new("qty", "int"));

    let err = synthesize(&lines, Operation::Delete, json!({"order_id": 1})).unwrap_err();
    assert!(
        matches!(err, Error::MissingKey { ref columns, .. } if columns == &vec!["line_no".to_string()])
    );

    let stmt = synthesize(&lines, Operation::Delete, json!({"line_no": 2, "order_id": 1})).unwrap();
    assert_eq!(
        stmt.text(),
        "DELETE TOP (1) FROM sales.[order lines] OUTPUT DELETED.*\n\
         WHERE [line_no] = @param0_ AND [order_id] = @param1_"
    );
}

#[test]
fn test_values_never_reach_statement_text() {
    let hostile = "x'); DROP TABLE sales.orders; --";
    let stmt = synthesize(
        &orders(),
        Operation::Create,
        json!({"customer_id": 1, "total": null}),
    )
    .unwrap();
    assert!(!stmt.text().contains("DROP"));

    let notes = RelationMetadata::new("dbo", "notes", RelationKind::Table)
        .with_column(ColumnMetadata::new("body", "nvarchar"));
    let stmt = synthesize(&notes, Operation::Create, json!({"body": hostile})).unwrap();
    assert!(!stmt.text().contains("DROP"));
    assert_eq!(stmt.values(), vec![Value::String(hostile.to_string())]);
    assert_eq!(
        stmt.deparameterize(),
        "INSERT INTO dbo.notes ([body]) VALUES ('x''); DROP TABLE sales.orders; --'); \
         SELECT * FROM dbo.notes WHERE [body] = 'x''); DROP TABLE sales.orders; --'"
    );
}

#[test]
fn test_deparameterize_escapes_quotes() {
    let people = RelationMetadata::new("hr", "people", RelationKind::Table)
        .with_column(ColumnMetadata::new("name", "nvarchar").not_null());
    let stmt = synthesize(&people, Operation::Create, json!({"name": "O'Brien"})).unwrap();
    assert_eq!(
        stmt.deparameterize(),
        "INSERT INTO hr.people ([name]) VALUES ('O''Brien'); SELECT * FROM hr.people WHERE [name] = 'O''Brien'"
    );
}

#[test]
fn test_unknown_column_is_rejected() {
    let err = synthesize(&orders(), Operation::Create, json!({"colour": "red"})).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { ref parameter, .. } if parameter == "colour"));
}

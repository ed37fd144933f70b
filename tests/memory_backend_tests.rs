/// In-memory backend tests
///
/// The SQL subset the persistence context and its tests rely on.
/// Run with: cargo test --test memory_backend_tests

use entitymap::{Connection, ConnectionProvider, MemoryDatabase, OrmError, Statement, Value};
use tokio_test::assert_ok;

async fn inventory() -> MemoryDatabase {
    let db = MemoryDatabase::new();
    db.batch(
        "CREATE TABLE items (id INTEGER NOT NULL, name VARCHAR(40), price DOUBLE PRECISION, in_stock BOOLEAN);
         INSERT INTO items (id, name, price, in_stock) VALUES (1, 'bolt', 0.25, true);
         INSERT INTO items (id, name) VALUES (2, 'nut');
         INSERT INTO items VALUES (3, 'washer', 0.05, false);",
    )
    .await
    .unwrap();
    db
}

#[tokio::test]
async fn test_create_if_not_exists_and_duplicate_table() {
    let db = inventory().await;
    assert_ok!(db.batch("CREATE TABLE IF NOT EXISTS items (id INTEGER)").await);
    assert!(matches!(
        db.batch("CREATE TABLE items (id INTEGER)").await,
        Err(OrmError::QueryExecution(_))
    ));
    assert_ok!(db.batch("DROP TABLE IF EXISTS missing").await);
    assert_eq!(db.table_row_count("items").await.unwrap(), 3);
}

#[tokio::test]
async fn test_omitted_columns_are_null() {
    let db = inventory().await;
    let result = db
        .query(&Statement::prepare("SELECT price, in_stock FROM items WHERE id = ?").bind(2))
        .await
        .unwrap();
    assert_eq!(result.rows()[0], vec![Value::Null, Value::Null]);

    let nulls = db
        .query(&Statement::prepare("SELECT id FROM items WHERE price IS NULL"))
        .await
        .unwrap();
    assert_eq!(nulls.row_count(), 1);
}

#[tokio::test]
async fn test_and_predicate_with_mixed_placeholders() {
    let db = inventory().await;
    let result = db
        .query(
            &Statement::prepare("SELECT name FROM items WHERE in_stock = $1 AND id = $2")
                .bind(true)
                .bind(1),
        )
        .await
        .unwrap();
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.get(0, "name"), Some(&Value::from("bolt")));

    // NULL never equals anything
    let none = db
        .query(&Statement::prepare("SELECT * FROM items WHERE price = ?").bind(Value::Null))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_strict_typing() {
    let db = inventory().await;

    let compare = db
        .query(&Statement::prepare("SELECT * FROM items WHERE name = ?").bind(1))
        .await;
    assert!(matches!(compare, Err(OrmError::QueryExecution(_))));

    let insert = db
        .execute(&Statement::prepare("INSERT INTO items VALUES (?, ?, ?, ?)").bind("four").bind("x").bind(1.0).bind(true))
        .await;
    assert!(insert.is_err());

    let not_null = db.batch("INSERT INTO items (name) VALUES ('orphan')").await;
    assert!(not_null.is_err());
    assert_eq!(db.table_row_count("items").await.unwrap(), 3);

    let missing_param = db
        .query(&Statement::prepare("SELECT * FROM items WHERE id = ?"))
        .await;
    assert!(missing_param.is_err());
}

#[tokio::test]
async fn test_numeric_comparison_across_integer_and_float() {
    let db = inventory().await;
    let result = db
        .query(&Statement::prepare("SELECT name FROM items WHERE id = ?").bind(3.0))
        .await
        .unwrap();
    assert_eq!(result.get(0, "name"), Some(&Value::from("washer")));
}

#[tokio::test]
async fn test_connections_share_data() {
    let db = inventory().await;
    let mut writer = db.acquire().await.unwrap();
    let mut reader = db.acquire().await.unwrap();

    let affected = writer
        .execute(&Statement::prepare("UPDATE items SET in_stock = ? WHERE in_stock = ?").bind(false).bind(true))
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let result = reader
        .query(&Statement::prepare("SELECT * FROM items WHERE in_stock = ?").bind(false))
        .await
        .unwrap();
    assert_eq!(result.row_count(), 2);
    assert_eq!(db.count_statements("update"), 1);
}

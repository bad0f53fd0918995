use super::*;

async fn warehouse_with_usage_table() -> Warehouse {
    let warehouse = Warehouse::connect("sqlite::memory:")
        .await
        .expect("warehouse");
    sqlx::query(
        "CREATE TABLE license_usage (
            app_owner_email_id TEXT NOT NULL,
            app_name TEXT NOT NULL,
            seats INTEGER NOT NULL,
            monthly_cost REAL
        )",
    )
    .execute(warehouse.pool())
    .await
    .expect("schema");
    warehouse
}

async fn insert_usage(warehouse: &Warehouse, email: &str, app: &str, seats: i64) {
    sqlx::query(
        "INSERT INTO license_usage (app_owner_email_id, app_name, seats, monthly_cost)
         VALUES (?, ?, ?, ?)",
    )
    .bind(email)
    .bind(app)
    .bind(seats)
    .bind(12.5_f64)
    .execute(warehouse.pool())
    .await
    .expect("insert");
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let warehouse = warehouse_with_usage_table().await;
    warehouse.health_check().await.expect("health check");
}

#[tokio::test]
async fn authorizes_known_owner_regardless_of_case() {
    let warehouse = warehouse_with_usage_table().await;
    insert_usage(&warehouse, "alice@example.com", "crm_suite", 4).await;

    assert!(warehouse
        .authorized_owner_exists("ALICE@EXAMPLE.COM")
        .await
        .expect("lookup"));
    assert!(warehouse
        .authorized_owner_exists("alice@example.com")
        .await
        .expect("lookup"));
}

#[tokio::test]
async fn rejects_unknown_owner() {
    let warehouse = warehouse_with_usage_table().await;
    insert_usage(&warehouse, "alice@example.com", "crm_suite", 4).await;

    assert!(!warehouse
        .authorized_owner_exists("mallory@example.com")
        .await
        .expect("lookup"));
}

#[tokio::test]
async fn lists_user_tables_sorted() {
    let warehouse = warehouse_with_usage_table().await;
    sqlx::query("CREATE TABLE app_catalog (app_owner_email_id TEXT, app_name TEXT)")
        .execute(warehouse.pool())
        .await
        .expect("second table");

    let tables = warehouse.list_tables().await.expect("tables");
    assert_eq!(tables, vec!["app_catalog", "license_usage"]);
}

#[tokio::test]
async fn scopes_rows_to_owner_case_insensitively() {
    let warehouse = warehouse_with_usage_table().await;
    insert_usage(&warehouse, "alice@example.com", "crm_suite", 4).await;
    insert_usage(&warehouse, "bob@example.com", "design_studio", 2).await;

    let slice = warehouse
        .fetch_owner_rows("license_usage", "ALICE@example.com", 1000)
        .await
        .expect("read")
        .expect("table exists");
    assert_eq!(slice.rows.len(), 1);
    assert_eq!(slice.rows[0][1], JsonValue::String("crm_suite".into()));
}

#[tokio::test]
async fn caps_rows_at_requested_limit() {
    let warehouse = warehouse_with_usage_table().await;
    for index in 0..1005_i64 {
        insert_usage(&warehouse, "alice@example.com", &format!("app_{index}"), 1).await;
    }

    let slice = warehouse
        .fetch_owner_rows("license_usage", "alice@example.com", 1000)
        .await
        .expect("read")
        .expect("table exists");
    assert_eq!(slice.rows.len(), 1000);
}

#[tokio::test]
async fn unknown_table_yields_none() {
    let warehouse = warehouse_with_usage_table().await;
    let slice = warehouse
        .fetch_owner_rows("no_such_table", "alice@example.com", 1000)
        .await
        .expect("read");
    assert!(slice.is_none());
}

#[tokio::test]
async fn requested_name_must_match_catalog_exactly() {
    let warehouse = warehouse_with_usage_table().await;
    let slice = warehouse
        .fetch_owner_rows(
            "license_usage\" WHERE 1=1 --",
            "alice@example.com",
            1000,
        )
        .await
        .expect("read");
    assert!(slice.is_none());
}

#[tokio::test]
async fn columns_are_reported_even_without_matching_rows() {
    let warehouse = warehouse_with_usage_table().await;
    let slice = warehouse
        .fetch_owner_rows("license_usage", "nobody@example.com", 1000)
        .await
        .expect("read")
        .expect("table exists");
    assert_eq!(
        slice.columns,
        vec!["app_owner_email_id", "app_name", "seats", "monthly_cost"]
    );
    assert!(slice.rows.is_empty());
}

#[tokio::test]
async fn decodes_cells_by_sqlite_value_type() {
    let warehouse = warehouse_with_usage_table().await;
    sqlx::query(
        "INSERT INTO license_usage (app_owner_email_id, app_name, seats, monthly_cost)
         VALUES (?, ?, ?, NULL)",
    )
    .bind("carol@example.com")
    .bind("observability")
    .bind(7_i64)
    .execute(warehouse.pool())
    .await
    .expect("insert");

    let slice = warehouse
        .fetch_owner_rows("license_usage", "carol@example.com", 1000)
        .await
        .expect("read")
        .expect("table exists");
    let row = &slice.rows[0];
    assert_eq!(row[0], JsonValue::String("carol@example.com".into()));
    assert_eq!(row[2], JsonValue::from(7_i64));
    assert_eq!(row[3], JsonValue::Null);
}

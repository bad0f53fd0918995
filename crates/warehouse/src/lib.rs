use std::str::FromStr;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value as JsonValue;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, TypeInfo, ValueRef,
};

/// The governed usage table. It doubles as the authorization table: an email
/// is an authorized owner exactly when it owns at least one row here.
pub const USAGE_TABLE: &str = "license_usage";

/// Client for the license-usage warehouse. The schema is externally owned;
/// this crate only reads it, always scoped to an owner email bound as a
/// query parameter.
#[derive(Clone)]
pub struct Warehouse {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, Default)]
pub struct TableRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl Warehouse {
    pub async fn connect(warehouse_url: &str) -> Result<Self> {
        let connect_options =
            SqliteConnectOptions::from_str(warehouse_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("warehouse ping failed")?;
        Ok(())
    }

    /// Case-insensitive membership check against the usage table. The raw
    /// email is bound, never spliced into the statement.
    pub async fn authorized_owner_exists(&self, email: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM license_usage WHERE UPPER(app_owner_email_id) = UPPER(?)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .context("owner authorization lookup failed")?;
        Ok(count > 0)
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .context("table enumeration failed")?;
        Ok(tables)
    }

    /// Reads up to `limit` rows of `table` owned by `email`. Returns `None`
    /// when the table is not part of the catalog. Table names cannot be bound
    /// as parameters, so the requested name must round-trip through
    /// [`list_tables`] before it is quoted into the statement; the email and
    /// limit are always bound.
    pub async fn fetch_owner_rows(
        &self,
        table: &str,
        email: &str,
        limit: u32,
    ) -> Result<Option<TableRows>> {
        let Some(resolved) = self.resolve_table(table).await? else {
            return Ok(None);
        };

        let columns = self.table_columns(&resolved).await?;
        let statement = format!(
            "SELECT * FROM \"{resolved}\" WHERE UPPER(app_owner_email_id) = UPPER(?) LIMIT ?"
        );
        let rows = sqlx::query(&statement)
            .bind(email)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("owner-scoped read of '{resolved}' failed"))?;

        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cells = Vec::with_capacity(row.columns().len());
            for index in 0..row.columns().len() {
                cells.push(cell_value(row, index)?);
            }
            decoded.push(cells);
        }

        Ok(Some(TableRows {
            columns,
            rows: decoded,
        }))
    }

    async fn resolve_table(&self, requested: &str) -> Result<Option<String>> {
        let tables = self.list_tables().await?;
        Ok(tables.into_iter().find(|name| name == requested))
    }

    async fn table_columns(&self, resolved: &str) -> Result<Vec<String>> {
        let statement = format!("PRAGMA table_info(\"{resolved}\")");
        let rows = sqlx::query(&statement)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to inspect columns of '{resolved}'"))?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(row.try_get::<String, _>("name")?);
        }
        Ok(columns)
    }
}

fn cell_value(row: &SqliteRow, index: usize) -> Result<JsonValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }
    let value = match raw.type_info().name() {
        "INTEGER" => JsonValue::from(row.try_get::<i64, _>(index)?),
        "REAL" => JsonValue::from(row.try_get::<f64, _>(index)?),
        "BLOB" => JsonValue::String(STANDARD.encode(row.try_get::<Vec<u8>, _>(index)?)),
        _ => JsonValue::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

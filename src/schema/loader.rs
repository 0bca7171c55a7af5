//! Load metadata from a JSON file or from the `_sys_*` payload tables, and swap it into the shared cache.

use crate::error::SchemaError;
use crate::schema::{SchemaCache, SchemaDefinition, SharedSchema};
use sqlx::PgPool;
use std::path::{Path, PathBuf};

/// Schema name for `_sys_*` metadata tables. From env `SCHEMA_API_SCHEMA`, default `schema_api`.
pub fn metadata_schema() -> String {
    std::env::var("SCHEMA_API_SCHEMA").unwrap_or_else(|_| "schema_api".into())
}

/// Returns schema-qualified table name for `_sys_*` tables (e.g. "schema_api._sys_relations").
pub fn qualified_sys_table(table: &str) -> String {
    format!("{}.{}", metadata_schema(), table)
}

/// Where metadata comes from.
#[derive(Clone, Debug)]
pub enum SchemaSource {
    /// One JSON document holding modules, relations, attributes and apis.
    File(PathBuf),
    /// `_sys_modules`, `_sys_relations`, `_sys_attributes`, `_sys_apis`; one JSONB payload per row.
    Tables(PgPool),
}

pub async fn load_from_path(path: &Path) -> Result<SchemaDefinition, SchemaError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SchemaError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| SchemaError::Load(format!("{}: {}", path.display(), e)))
}

pub async fn load_from_pool(pool: &PgPool) -> Result<SchemaDefinition, SchemaError> {
    Ok(SchemaDefinition {
        modules: load_table(pool, &qualified_sys_table("_sys_modules")).await?,
        relations: load_table(pool, &qualified_sys_table("_sys_relations")).await?,
        attributes: load_table(pool, &qualified_sys_table("_sys_attributes")).await?,
        apis: load_table(pool, &qualified_sys_table("_sys_apis")).await?,
    })
}

async fn load_table<T>(pool: &PgPool, table: &str) -> Result<Vec<T>, SchemaError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let sql = format!("SELECT payload FROM {} ORDER BY id", table);
    tracing::debug!(sql = %sql, "query");
    let rows = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| SchemaError::Load(format!("{}: {}", table, e)))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let value: T = serde_json::from_value(row).map_err(|e| SchemaError::Load(format!("{}: {}", table, e)))?;
        out.push(value);
    }
    Ok(out)
}

/// Load and validate a fresh cache.
pub async fn load(source: &SchemaSource) -> Result<SchemaCache, SchemaError> {
    let def = match source {
        SchemaSource::File(path) => load_from_path(path).await?,
        SchemaSource::Tables(pool) => load_from_pool(pool).await?,
    };
    SchemaCache::build(def)
}

/// Replace the shared cache. Waits until every in-flight request has released its read guard.
pub async fn reload(shared: &SharedSchema, source: &SchemaSource) -> Result<usize, SchemaError> {
    let fresh = load(source).await?;
    let count = fresh.api_count();
    *shared.write().await = fresh;
    tracing::info!(apis = count, "schema cache reloaded");
    Ok(count)
}

//! PostgreSQL execution of the data primitives, one sqlx transaction per request.

use crate::data::import::{run_import, RecordWriter};
use crate::data::sql::{self, QueryBuf};
use crate::data::{DataError, DataGetResult, DataStore, DataTx, IdLookup, ImportRequest};
use crate::plan::DataGet;
use crate::schema::SchemaCache;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn begin<'s>(&self, schema: &'s SchemaCache) -> Result<Box<dyn DataTx + 's>, DataError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx {
            tx,
            schema,
            login_id: None,
        }))
    }

    async fn ping(&self) -> Result<(), DataError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Open transaction. Dropping it rolls back (sqlx queues the ROLLBACK on the connection).
pub struct PgTx<'s> {
    tx: Transaction<'static, Postgres>,
    schema: &'s SchemaCache,
    /// Login already set on this transaction.
    login_id: Option<i64>,
}

fn bind(q: &QueryBuf) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

impl<'s> PgTx<'s> {
    async fn set_login(&mut self, login_id: i64) -> Result<(), DataError> {
        if self.login_id == Some(login_id) {
            return Ok(());
        }
        let q = sql::set_login(login_id);
        self.execute(&q).await?;
        self.login_id = Some(login_id);
        Ok(())
    }

    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<PgRow>, DataError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        Ok(bind(q).fetch_all(&mut *self.tx).await?)
    }

    async fn fetch_optional(&mut self, q: &QueryBuf) -> Result<Option<PgRow>, DataError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        Ok(bind(q).fetch_optional(&mut *self.tx).await?)
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, DataError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute (tx)");
        let done = bind(q).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl<'s> DataTx for PgTx<'s> {
    async fn lookup_ids(&mut self, lookup: IdLookup, ids: &[i64]) -> Result<Vec<i64>, DataError> {
        let q = sql::lookup_ids(self.schema, &lookup, ids)?;
        let rows = self.fetch_all(&q).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get::<i64, _>(0)?);
        }
        Ok(out)
    }

    async fn get(&mut self, plan: &DataGet, login_id: i64) -> Result<DataGetResult, DataError> {
        self.set_login(login_id).await?;
        let q = sql::select(self.schema, plan)?;
        let rows = self.fetch_all(&q).await?;
        Ok(DataGetResult {
            rows: rows.iter().map(row_to_values).collect(),
            query: q.sql,
        })
    }

    async fn delete(&mut self, relation_id: Uuid, record_id: i64, login_id: i64) -> Result<(), DataError> {
        self.set_login(login_id).await?;
        let q = sql::delete(self.schema, relation_id, record_id)?;
        let affected = self.execute(&q).await?;
        tracing::debug!(relation_id = %relation_id, record_id, affected, "record deleted");
        Ok(())
    }

    async fn import(&mut self, request: ImportRequest<'_>) -> Result<BTreeMap<i32, i64>, DataError> {
        self.set_login(request.login_id).await?;
        let schema = self.schema;
        run_import(schema, self, request).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DataError> {
        let PgTx { tx, .. } = *self;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl<'s> RecordWriter for PgTx<'s> {
    async fn find_record(&mut self, relation_id: Uuid, by: &[(Uuid, Value)]) -> Result<Option<i64>, DataError> {
        let q = sql::find(self.schema, relation_id, by)?;
        match self.fetch_optional(&q).await? {
            Some(row) => Ok(Some(row.try_get::<i64, _>(0)?)),
            None => Ok(None),
        }
    }

    async fn insert_record(&mut self, relation_id: Uuid, values: &[(Uuid, Value)]) -> Result<i64, DataError> {
        let q = sql::insert(self.schema, relation_id, values)?;
        let row = self
            .fetch_optional(&q)
            .await?
            .ok_or(DataError::Db(sqlx::Error::RowNotFound))?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn update_record(&mut self, relation_id: Uuid, record_id: i64, values: &[(Uuid, Value)]) -> Result<(), DataError> {
        let q = sql::update(self.schema, relation_id, record_id, values)?;
        self.execute(&q).await?;
        Ok(())
    }
}

fn row_to_values(row: &PgRow) -> Vec<Value> {
    (0..row.len()).map(|i| cell_to_value(row, i)).collect()
}

/// Decode one cell by trying the types a read plan can produce.
fn cell_to_value(row: &PgRow, i: usize) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(i) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(i) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(i) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(i) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(i) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(i) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(i) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(i) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(i) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(i) {
        return j;
    }
    Value::Null
}

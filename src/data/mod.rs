//! Transactional data access: the primitives the request orchestrator runs inside one transaction.
//! `PgStore` executes against PostgreSQL; `MemoryStore` keeps rows in memory.

pub mod import;
pub mod memory;
pub mod params;
pub mod pg;
pub mod sql;

pub use import::{insert_order, resolve_lookups, run_import, ImportStep, RecordWriter, ResolvedLookups};
pub use memory::MemoryStore;
pub use pg::{PgStore, PgTx};

use crate::error::{AppError, SchemaError};
use crate::plan::DataGet;
use crate::schema::{Column, Join, QueryLookup, SchemaCache};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("{0}")]
    Invalid(String),
}

impl DataError {
    /// Read-side failure: metadata gaps keep their message, everything else is hidden behind the generic one.
    pub fn unavailable(self) -> AppError {
        match self {
            DataError::Schema(e) => e.into(),
            other => AppError::unavailable(other),
        }
    }
}

/// "Distinct `lookup` values of `relation` where `filter` is one of the given ids."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdLookup {
    pub relation_id: Uuid,
    pub lookup_attribute_id: Uuid,
    pub filter_attribute_id: Uuid,
}

/// Rows in expression order plus the rendered query (diagnostics only).
#[derive(Clone, Debug, Default)]
pub struct DataGetResult {
    pub rows: Vec<Vec<Value>>,
    pub query: String,
}

/// Positional values for one multi-relation insert.
#[derive(Clone, Copy, Debug)]
pub struct ImportRequest<'a> {
    pub login_id: i64,
    pub values: &'a [Value],
    pub columns: &'a [Column],
    pub joins: &'a [Join],
    pub lookups: &'a [QueryLookup],
    pub resolved: &'a ResolvedLookups,
}

/// Opens one transaction per request against the given schema snapshot.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn begin<'s>(&self, schema: &'s SchemaCache) -> Result<Box<dyn DataTx + 's>, DataError>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), DataError>;
}

/// One open transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait DataTx: Send {
    async fn lookup_ids(&mut self, lookup: IdLookup, ids: &[i64]) -> Result<Vec<i64>, DataError>;

    async fn get(&mut self, plan: &DataGet, login_id: i64) -> Result<DataGetResult, DataError>;

    async fn delete(&mut self, relation_id: Uuid, record_id: i64, login_id: i64) -> Result<(), DataError>;

    /// Insert (or find via lookups) one record per touched relation index; returns index -> record id.
    async fn import(&mut self, request: ImportRequest<'_>) -> Result<BTreeMap<i32, i64>, DataError>;

    async fn commit(self: Box<Self>) -> Result<(), DataError>;
}

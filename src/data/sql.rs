//! Builds parameterized SELECT (from read plans), lookup, INSERT, UPDATE and DELETE statements.
//! Identifiers come from metadata only; every value is bound.

use crate::data::params::{id_array_param, to_text_param, PgParam};
use crate::data::{DataError, IdLookup};
use crate::plan::{DataGet, DataGetFilter, DataGetFilterSide};
use crate::schema::{Aggregator, Attribute, AttributeContent, Connector, SchemaCache};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Schema holding the file tables of every files attribute.
pub const FILES_SCHEMA: &str = "instance_file";

/// Quote identifier for PostgreSQL (safe: only from metadata).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// Relations live in a schema named after their module.
pub fn relation_table(schema: &SchemaCache, relation_id: Uuid) -> Result<String, DataError> {
    let rel = schema.relation(relation_id)?;
    let module = schema.module(rel.module_id)?;
    Ok(qualified_table(&module.name, &rel.name))
}

pub fn files_table(atr_id: Uuid) -> String {
    qualified_table(FILES_SCHEMA, &atr_id.to_string())
}

pub fn files_record_table(atr_id: Uuid) -> String {
    qualified_table(FILES_SCHEMA, &format!("{}_record", atr_id))
}

pub fn files_version_table(atr_id: Uuid) -> String {
    qualified_table(FILES_SCHEMA, &format!("{}_version", atr_id))
}

/// Alias of the relation at `index` in the query nested `depth` levels deep.
pub fn alias(depth: u32, index: i32) -> String {
    quoted(&format!("q{}_{}", depth, index))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgParam>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    /// Append a parameter and return its placeholder, cast when the type is known.
    pub fn push_param(&mut self, v: PgParam, cast: Option<&str>) -> String {
        self.params.push(v);
        let n = self.params.len();
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }

    fn push_typed(&mut self, atr: &Attribute, v: &Value) -> Result<String, DataError> {
        let t = atr
            .content
            .pg_type()
            .ok_or_else(|| DataError::Invalid(format!("attribute '{}' cannot hold a plain value", atr.name)))?;
        Ok(self.push_param(to_text_param(v), Some(t)))
    }
}

/// Column as selected. Numeric is returned as text so it survives decoding without precision loss.
fn plain(expr: &str, content: AttributeContent) -> String {
    match content {
        AttributeContent::Numeric => format!("{}::TEXT", expr),
        _ => expr.to_string(),
    }
}

fn aggregate(agg: Aggregator, col: &str, content: AttributeContent) -> String {
    match agg {
        Aggregator::Count => format!("COUNT({})", col),
        Aggregator::Sum => format!("SUM({})::FLOAT8", col),
        Aggregator::Avg => format!("AVG({})::FLOAT8", col),
        Aggregator::Min => plain(&format!("MIN({})", col), content),
        Aggregator::Max => plain(&format!("MAX({})", col), content),
        Aggregator::List => format!("STRING_AGG({}::TEXT, ', ')", col),
        Aggregator::Array => format!("ARRAY_TO_JSON(ARRAY_AGG({}))", col),
        Aggregator::Json => format!("JSON_AGG({})", col),
        Aggregator::Every => format!("BOOL_AND({})", col),
        Aggregator::BoolOr => format!("BOOL_OR({})", col),
        Aggregator::First => plain(&format!("(ARRAY_AGG({}))[1]", col), content),
        Aggregator::Last => plain(&format!("(ARRAY_AGG({}))[COUNT(*)]", col), content),
    }
}

/// Result type of an aggregate over an attribute, for casting the value compared against it.
fn aggregate_type(agg: Option<Aggregator>, content: AttributeContent) -> Option<&'static str> {
    match agg {
        Some(Aggregator::Count) => Some("bigint"),
        Some(Aggregator::Sum) | Some(Aggregator::Avg) => Some("double precision"),
        Some(Aggregator::List) => Some("text"),
        Some(Aggregator::Every) | Some(Aggregator::BoolOr) => Some("boolean"),
        Some(Aggregator::Array) | Some(Aggregator::Json) => None,
        Some(Aggregator::Min) | Some(Aggregator::Max) | Some(Aggregator::First) | Some(Aggregator::Last) | None => {
            content.pg_type()
        }
    }
}

/// Render a read plan. Nested plans (sub-query expressions and filter sides) get their own alias level.
pub fn select(schema: &SchemaCache, plan: &DataGet) -> Result<QueryBuf, DataError> {
    let mut renderer = GetRenderer {
        schema,
        buf: QueryBuf::new(),
    };
    let sql = renderer.get(plan, 0)?;
    renderer.buf.sql = sql;
    Ok(renderer.buf)
}

struct GetRenderer<'a> {
    schema: &'a SchemaCache,
    buf: QueryBuf,
}

impl<'a> GetRenderer<'a> {
    fn get(&mut self, plan: &DataGet, depth: u32) -> Result<String, DataError> {
        let mut relation_at: HashMap<i32, Uuid> = HashMap::new();
        relation_at.insert(0, plan.relation_id);
        for j in &plan.joins {
            relation_at.insert(j.index, j.relation_id);
        }
        let relation_of = |index: i32| {
            relation_at
                .get(&index)
                .copied()
                .ok_or_else(|| DataError::Invalid(format!("relation index {} is not joined", index)))
        };

        let mut from = format!("{} AS {}", relation_table(self.schema, plan.relation_id)?, alias(depth, 0));
        for j in &plan.joins {
            let table = relation_table(self.schema, j.relation_id)?;
            let child = alias(depth, j.index);
            if j.connector == Connector::Cross {
                from.push_str(&format!("\nCROSS JOIN {} AS {}", table, child));
                continue;
            }
            let atr = self.schema.attribute(j.attribute_id)?;
            let source = alias(depth, j.index_from);
            let on = if atr.relation_id == j.relation_id {
                let pk = self.schema.pk_attribute(relation_of(j.index_from)?)?;
                format!("{}.{} = {}.{}", child, quoted(&atr.name), source, quoted(&pk.name))
            } else {
                let pk = self.schema.pk_attribute(j.relation_id)?;
                format!("{}.{} = {}.{}", source, quoted(&atr.name), child, quoted(&pk.name))
            };
            from.push_str(&format!("\n{} {} AS {} ON {}", j.connector.sql(), table, child, on));
        }

        let mut columns = Vec::with_capacity(plan.expressions.len());
        let mut grouped = Vec::new();
        let mut aggregated = false;
        for (position, e) in plan.expressions.iter().enumerate() {
            if let Some(sub) = &e.query {
                columns.push(format!("({})", self.get(sub, depth + 1)?));
                continue;
            }
            let atr = self.schema.attribute(e.attribute_id)?;
            let rel_alias = alias(depth, e.index);
            if atr.content.is_files() {
                columns.push(self.files_column(atr, &rel_alias, relation_of(e.index)?)?);
                continue;
            }
            let col = format!("{}.{}", rel_alias, quoted(&atr.name));
            match e.aggregator {
                Some(agg) => {
                    aggregated = true;
                    columns.push(aggregate(agg, &col, atr.content));
                }
                None => {
                    grouped.push((position + 1).to_string());
                    columns.push(plain(&col, atr.content));
                }
            }
        }
        if columns.is_empty() {
            return Err(DataError::Invalid("read plan has no expressions".into()));
        }

        let mut sql = format!("SELECT {}\nFROM {}", columns.join(", "), from);
        if !plan.filters.is_empty() {
            let clause = self.filters(&plan.filters, depth)?;
            sql.push_str(&format!("\nWHERE {}", clause));
        }
        if aggregated && !grouped.is_empty() {
            sql.push_str(&format!("\nGROUP BY {}", grouped.join(", ")));
        }
        if !plan.orders.is_empty() {
            let mut orders = Vec::with_capacity(plan.orders.len());
            for o in &plan.orders {
                let atr = self.schema.attribute(o.attribute_id)?;
                orders.push(format!(
                    "{}.{} {}",
                    alias(depth, o.index),
                    quoted(&atr.name),
                    if o.ascending { "ASC" } else { "DESC" }
                ));
            }
            sql.push_str(&format!("\nORDER BY {}", orders.join(", ")));
        }
        if plan.limit > 0 {
            sql.push_str(&format!("\nLIMIT {}", plan.limit));
        }
        if plan.offset > 0 {
            sql.push_str(&format!("\nOFFSET {}", plan.offset));
        }
        Ok(sql)
    }

    /// Files of one record as a JSON array, excluding files removed from it.
    fn files_column(&self, atr: &Attribute, rel_alias: &str, relation_id: Uuid) -> Result<String, DataError> {
        let pk = self.schema.pk_attribute(relation_id)?;
        Ok(format!(
            "(SELECT JSON_AGG(JSON_BUILD_OBJECT('id', r.\"file_id\", 'name', r.\"name\")) FROM {} AS r WHERE r.\"record_id\" = {}.{} AND r.\"date_delete\" IS NULL)",
            files_record_table(atr.id),
            rel_alias,
            quoted(&pk.name)
        ))
    }

    fn filters(&mut self, filters: &[DataGetFilter], depth: u32) -> Result<String, DataError> {
        let mut out = String::new();
        for (i, f) in filters.iter().enumerate() {
            if i > 0 {
                out.push_str(&format!(" {} ", f.connector.sql()));
            }
            let type0 = self.side_type(&f.side0)?;
            let type1 = self.side_type(&f.side1)?;
            out.push_str(&"(".repeat(f.side0.brackets as usize));
            out.push_str(&self.side(&f.side0, depth, type1)?);
            out.push(' ');
            out.push_str(f.operator.sql());
            if !f.operator.is_unary() {
                out.push(' ');
                out.push_str(&self.side(&f.side1, depth, type0)?);
            }
            out.push_str(&")".repeat(f.side1.brackets as usize));
        }
        Ok(out)
    }

    /// SQL type a filter side evaluates to, when known.
    fn side_type(&self, side: &DataGetFilterSide) -> Result<Option<&'static str>, DataError> {
        if let Some(sub) = &side.query {
            let Some(e) = sub.expressions.first() else {
                return Ok(None);
            };
            let atr = self.schema.attribute(e.attribute_id)?;
            return Ok(aggregate_type(e.aggregator, atr.content));
        }
        match side.attribute_id {
            Some(id) => Ok(self.schema.attribute(id)?.content.pg_type()),
            None => Ok(None),
        }
    }

    /// `cast` is the other side's type; values are bound with it.
    fn side(&mut self, side: &DataGetFilterSide, depth: u32, cast: Option<&str>) -> Result<String, DataError> {
        if let Some(sub) = &side.query {
            return Ok(format!("({})", self.get(sub, depth + 1)?));
        }
        if let Some(atr_id) = side.attribute_id {
            let atr = self.schema.attribute(atr_id)?;
            let level = depth.checked_sub(side.attribute_nested).ok_or_else(|| {
                DataError::Invalid(format!(
                    "attribute '{}' refers {} levels up from query depth {}",
                    atr.name, side.attribute_nested, depth
                ))
            })?;
            return Ok(format!("{}.{}", alias(level, side.attribute_index), quoted(&atr.name)));
        }
        match &side.value {
            None | Some(Value::Null) => Ok("NULL".into()),
            Some(v) => Ok(self.buf.push_param(to_text_param(v), cast)),
        }
    }
}

/// Distinct non-null `lookup` values of a relation where `filter` is one of `ids`.
pub fn lookup_ids(schema: &SchemaCache, lookup: &IdLookup, ids: &[i64]) -> Result<QueryBuf, DataError> {
    let mut q = QueryBuf::new();
    let table = relation_table(schema, lookup.relation_id)?;
    let col = quoted(&schema.attribute(lookup.lookup_attribute_id)?.name);
    let filter = quoted(&schema.attribute(lookup.filter_attribute_id)?.name);
    let ph = q.push_param(id_array_param(ids), Some("BIGINT[]"));
    q.sql = format!(
        "SELECT DISTINCT {col}::BIGINT FROM {table} WHERE {filter} = ANY({ph}) AND {col} IS NOT NULL ORDER BY 1",
        col = col,
        table = table,
        filter = filter,
        ph = ph
    );
    Ok(q)
}

/// DELETE by primary key.
pub fn delete(schema: &SchemaCache, relation_id: Uuid, record_id: i64) -> Result<QueryBuf, DataError> {
    let mut q = QueryBuf::new();
    let table = relation_table(schema, relation_id)?;
    let pk = schema.pk_attribute(relation_id)?;
    let ph = q.push_param(Some(record_id.to_string()), Some("BIGINT"));
    q.sql = format!("DELETE FROM {} WHERE {} = {}", table, quoted(&pk.name), ph);
    Ok(q)
}

/// INSERT returning the generated primary key.
pub fn insert(schema: &SchemaCache, relation_id: Uuid, values: &[(Uuid, Value)]) -> Result<QueryBuf, DataError> {
    let mut q = QueryBuf::new();
    let table = relation_table(schema, relation_id)?;
    let pk = schema.pk_attribute(relation_id)?;
    let mut cols = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (atr_id, v) in values {
        let atr = schema.attribute(*atr_id)?;
        cols.push(quoted(&atr.name));
        placeholders.push(q.push_typed(atr, v)?);
    }
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}::BIGINT", table, quoted(&pk.name))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}::BIGINT",
            table,
            cols.join(", "),
            placeholders.join(", "),
            quoted(&pk.name)
        )
    };
    Ok(q)
}

/// UPDATE by primary key: SET only the given attributes.
pub fn update(schema: &SchemaCache, relation_id: Uuid, record_id: i64, values: &[(Uuid, Value)]) -> Result<QueryBuf, DataError> {
    let mut q = QueryBuf::new();
    let table = relation_table(schema, relation_id)?;
    let pk = schema.pk_attribute(relation_id)?;
    let mut sets = Vec::with_capacity(values.len());
    for (atr_id, v) in values {
        let atr = schema.attribute(*atr_id)?;
        let ph = q.push_typed(atr, v)?;
        sets.push(format!("{} = {}", quoted(&atr.name), ph));
    }
    if sets.is_empty() {
        return Err(DataError::Invalid("update without values".into()));
    }
    let id_ph = q.push_param(Some(record_id.to_string()), Some("BIGINT"));
    q.sql = format!("UPDATE {} SET {} WHERE {} = {}", table, sets.join(", "), quoted(&pk.name), id_ph);
    Ok(q)
}

/// Primary key of the first record matching all given attribute values.
pub fn find(schema: &SchemaCache, relation_id: Uuid, by: &[(Uuid, Value)]) -> Result<QueryBuf, DataError> {
    let mut q = QueryBuf::new();
    let table = relation_table(schema, relation_id)?;
    let pk = schema.pk_attribute(relation_id)?;
    let mut conditions = Vec::with_capacity(by.len());
    for (atr_id, v) in by {
        let atr = schema.attribute(*atr_id)?;
        let ph = q.push_typed(atr, v)?;
        conditions.push(format!("{} = {}", quoted(&atr.name), ph));
    }
    if conditions.is_empty() {
        return Err(DataError::Invalid("record lookup without attributes".into()));
    }
    q.sql = format!(
        "SELECT {}::BIGINT FROM {} WHERE {} ORDER BY 1 LIMIT 1",
        quoted(&pk.name),
        table,
        conditions.join(" AND ")
    );
    Ok(q)
}

/// Transaction-local acting login, visible to triggers via `current_setting('schema_api.login_id')`.
pub fn set_login(login_id: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.push_param(Some(login_id.to_string()), None);
    q.sql = format!("SELECT set_config('schema_api.login_id', {}, true)", ph);
    q
}

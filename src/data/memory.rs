//! In-memory data store for tests and local runs without PostgreSQL.
//!
//! Each transaction works on a copy of all tables and writes it back on commit, so dropping a
//! transaction discards its changes. Read plans are evaluated directly: joins, filters (brackets group,
//! AND binds tighter than OR), plain and aggregated expressions, correlated
//! sub queries, orders, limit and offset. Right and full joins behave like left joins.

use crate::data::import::{run_import, RecordWriter};
use crate::data::{DataError, DataGetResult, DataStore, DataTx, IdLookup, ImportRequest};
use crate::plan::{DataGet, DataGetExpression, DataGetFilter, DataGetFilterSide};
use crate::schema::{Aggregator, Connector, FilterConnector, FilterOperator, SchemaCache};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Attribute values of one record. The primary key is the map key of its table, not stored here.
pub type Record = HashMap<Uuid, Value>;

type Tables = HashMap<Uuid, BTreeMap<i64, Record>>;

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    failing_deletes: HashSet<(Uuid, i64)>,
}

/// Shared handle; clones see the same tables.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace a committed record.
    pub fn seed(&self, relation_id: Uuid, record_id: i64, values: &[(Uuid, Value)]) {
        let record: Record = values.iter().cloned().collect();
        self.lock().tables.entry(relation_id).or_default().insert(record_id, record);
    }

    /// Make every later delete of this record fail, like a violated constraint would.
    pub fn fail_delete(&self, relation_id: Uuid, record_id: i64) {
        self.lock().failing_deletes.insert((relation_id, record_id));
    }

    pub fn contains(&self, relation_id: Uuid, record_id: i64) -> bool {
        self.lock()
            .tables
            .get(&relation_id)
            .map_or(false, |t| t.contains_key(&record_id))
    }

    pub fn record(&self, relation_id: Uuid, record_id: i64) -> Option<Record> {
        self.lock().tables.get(&relation_id)?.get(&record_id).cloned()
    }

    pub fn record_ids(&self, relation_id: Uuid) -> Vec<i64> {
        self.lock()
            .tables
            .get(&relation_id)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn begin<'s>(&self, schema: &'s SchemaCache) -> Result<Box<dyn DataTx + 's>, DataError> {
        let (tables, failing_deletes) = {
            let inner = self.lock();
            (inner.tables.clone(), inner.failing_deletes.clone())
        };
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            schema,
            tables,
            failing_deletes,
        }))
    }

    async fn ping(&self) -> Result<(), DataError> {
        Ok(())
    }
}

pub struct MemoryTx<'s> {
    store: MemoryStore,
    schema: &'s SchemaCache,
    tables: Tables,
    failing_deletes: HashSet<(Uuid, i64)>,
}

/// Record bound to each relation index of one result row; `None` for unmatched outer joins.
type Scope = HashMap<i32, (Uuid, Option<i64>)>;

impl<'s> MemoryTx<'s> {
    fn cell(&self, relation_id: Uuid, record_id: Option<i64>, atr_id: Uuid) -> Result<Value, DataError> {
        let Some(id) = record_id else {
            return Ok(Value::Null);
        };
        if self.schema.pk_attribute(relation_id)?.id == atr_id {
            return Ok(Value::from(id));
        }
        Ok(self
            .tables
            .get(&relation_id)
            .and_then(|t| t.get(&id))
            .and_then(|r| r.get(&atr_id))
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn ids(&self, relation_id: Uuid) -> Vec<i64> {
        self.tables
            .get(&relation_id)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    fn scopes(&self, plan: &DataGet, outer: &[Scope]) -> Result<Vec<Scope>, DataError> {
        let mut scopes: Vec<Scope> = self
            .ids(plan.relation_id)
            .into_iter()
            .map(|id| HashMap::from([(0, (plan.relation_id, Some(id)))]))
            .collect();

        for join in &plan.joins {
            let atr = self.schema.attribute(join.attribute_id)?;
            let mut joined = Vec::with_capacity(scopes.len());
            for scope in scopes {
                let (source_rel, source_id) = scope
                    .get(&join.index_from)
                    .copied()
                    .ok_or_else(|| DataError::Invalid(format!("relation index {} is not joined", join.index_from)))?;
                let mut matches = Vec::new();
                for id in self.ids(join.relation_id) {
                    let linked = match join.connector {
                        Connector::Cross => true,
                        _ if atr.relation_id == join.relation_id => {
                            source_id.is_some()
                                && self.cell(join.relation_id, Some(id), atr.id)?.as_i64() == source_id
                        }
                        _ => self.cell(source_rel, source_id, atr.id)?.as_i64() == Some(id),
                    };
                    if linked {
                        matches.push(id);
                    }
                }
                if matches.is_empty() && join.connector != Connector::Inner && join.connector != Connector::Cross {
                    let mut s = scope.clone();
                    s.insert(join.index, (join.relation_id, None));
                    joined.push(s);
                }
                for id in matches {
                    let mut s = scope.clone();
                    s.insert(join.index, (join.relation_id, Some(id)));
                    joined.push(s);
                }
            }
            scopes = joined;
        }

        let mut kept = Vec::with_capacity(scopes.len());
        for scope in scopes {
            if self.matches(&plan.filters, &scope, outer)? {
                kept.push(scope);
            }
        }
        Ok(kept)
    }

    /// Evaluates the filter chain with AND binding tighter than OR. Each bracket opens a group
    /// with its own OR/AND state; closing brackets without an open group are ignored and groups
    /// still open at the end are closed there.
    fn matches(&self, filters: &[DataGetFilter], scope: &Scope, outer: &[Scope]) -> Result<bool, DataError> {
        let mut groups = vec![Group::default()];
        for (i, f) in filters.iter().enumerate() {
            if i > 0 && f.connector == FilterConnector::Or {
                if let Some(g) = groups.last_mut() {
                    g.or();
                }
            }
            for _ in 0..f.side0.brackets {
                groups.push(Group::default());
            }
            let left = self.side(&f.side0, scope, outer)?;
            let hit = match f.operator {
                FilterOperator::IsNull => left.is_null(),
                FilterOperator::IsNotNull => !left.is_null(),
                op => {
                    let right = self.side(&f.side1, scope, outer)?;
                    compare_with(op, &left, &right)
                }
            };
            if let Some(g) = groups.last_mut() {
                g.and(hit);
            }
            for _ in 0..f.side1.brackets {
                close_group(&mut groups);
            }
        }
        while groups.len() > 1 {
            close_group(&mut groups);
        }
        Ok(groups.pop().map_or(true, |g| g.result()))
    }

    fn side(&self, side: &DataGetFilterSide, scope: &Scope, outer: &[Scope]) -> Result<Value, DataError> {
        if let Some(sub) = &side.query {
            return self.scalar(sub, scope, outer);
        }
        if let Some(atr_id) = side.attribute_id {
            let level = match side.attribute_nested {
                0 => Some(scope),
                n => outer.len().checked_sub(n as usize).and_then(|i| outer.get(i)),
            };
            let level = level.ok_or_else(|| DataError::Invalid("nested attribute outside of query".into()))?;
            let (rel, id) = level
                .get(&side.attribute_index)
                .copied()
                .ok_or_else(|| DataError::Invalid(format!("relation index {} is not joined", side.attribute_index)))?;
            return self.cell(rel, id, atr_id);
        }
        Ok(side.value.clone().unwrap_or(Value::Null))
    }

    /// First value of a nested plan evaluated for one outer row.
    fn scalar(&self, plan: &DataGet, scope: &Scope, outer: &[Scope]) -> Result<Value, DataError> {
        let mut stack = outer.to_vec();
        stack.push(scope.clone());
        let rows = self.evaluate(plan, &stack)?;
        Ok(rows.into_iter().next().and_then(|r| r.into_iter().next()).unwrap_or(Value::Null))
    }

    fn evaluate(&self, plan: &DataGet, outer: &[Scope]) -> Result<Vec<Vec<Value>>, DataError> {
        let mut scopes = self.scopes(plan, outer)?;

        let mut keyed = Vec::with_capacity(scopes.len());
        for scope in scopes.drain(..) {
            let mut key = Vec::with_capacity(plan.orders.len());
            for o in &plan.orders {
                let (rel, id) = scope.get(&o.index).copied().unwrap_or((Uuid::nil(), None));
                key.push(self.cell(rel, id, o.attribute_id)?);
            }
            keyed.push((key, scope));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (o, (x, y)) in plan.orders.iter().zip(a.iter().zip(b)) {
                let ord = order_values(x, y);
                let ord = if o.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        let scopes: Vec<Scope> = keyed.into_iter().map(|(_, s)| s).collect();

        let aggregated = plan.expressions.iter().any(|e| e.query.is_none() && e.aggregator.is_some());
        let mut rows = if aggregated {
            self.aggregate_rows(&plan.expressions, &scopes, outer)?
        } else {
            let mut rows = Vec::with_capacity(scopes.len());
            for scope in &scopes {
                let mut row = Vec::with_capacity(plan.expressions.len());
                for e in &plan.expressions {
                    row.push(self.expression(e, scope, outer)?);
                }
                rows.push(row);
            }
            rows
        };

        let offset = (plan.offset as usize).min(rows.len());
        rows.drain(..offset);
        if plan.limit > 0 {
            rows.truncate(plan.limit as usize);
        }
        Ok(rows)
    }

    fn expression(&self, e: &DataGetExpression, scope: &Scope, outer: &[Scope]) -> Result<Value, DataError> {
        if let Some(sub) = &e.query {
            return self.scalar(sub, scope, outer);
        }
        let (rel, id) = scope.get(&e.index).copied().unwrap_or((Uuid::nil(), None));
        self.cell(rel, id, e.attribute_id)
    }

    /// Group by the plain expressions; aggregates without any rows still yield one row.
    fn aggregate_rows(&self, expressions: &[DataGetExpression], scopes: &[Scope], outer: &[Scope]) -> Result<Vec<Vec<Value>>, DataError> {
        let mut groups: Vec<(Vec<Value>, Vec<Vec<Value>>)> = Vec::new();
        for scope in scopes {
            let mut key = Vec::new();
            let mut inputs = Vec::new();
            for e in expressions {
                let v = self.expression(e, scope, outer)?;
                if e.aggregator.is_some() && e.query.is_none() {
                    inputs.push(v);
                } else {
                    key.push(v);
                }
            }
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rows)) => rows.push(inputs),
                None => groups.push((key, vec![inputs])),
            }
        }
        let has_plain = expressions.iter().any(|e| e.aggregator.is_none() || e.query.is_some());
        if groups.is_empty() && !has_plain {
            groups.push((Vec::new(), Vec::new()));
        }

        let mut rows = Vec::with_capacity(groups.len());
        for (key, inputs) in groups {
            let mut plain = key.into_iter();
            let mut aggregated = 0;
            let mut row = Vec::with_capacity(expressions.len());
            for e in expressions {
                match (e.aggregator, &e.query) {
                    (Some(agg), None) => {
                        let values: Vec<&Value> = inputs.iter().map(|r| &r[aggregated]).collect();
                        row.push(aggregate(agg, &values));
                        aggregated += 1;
                    }
                    _ => row.push(plain.next().unwrap_or(Value::Null)),
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

fn aggregate(agg: Aggregator, values: &[&Value]) -> Value {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
    match agg {
        Aggregator::Count => Value::from(present.len() as i64),
        Aggregator::Sum if numbers.is_empty() => Value::Null,
        Aggregator::Sum => Value::from(numbers.iter().sum::<f64>()),
        Aggregator::Avg if numbers.is_empty() => Value::Null,
        Aggregator::Avg => Value::from(numbers.iter().sum::<f64>() / numbers.len() as f64),
        Aggregator::Min => present.into_iter().min_by(|a, b| order_values(a, b)).cloned().unwrap_or(Value::Null),
        Aggregator::Max => present.into_iter().max_by(|a, b| order_values(a, b)).cloned().unwrap_or(Value::Null),
        Aggregator::List if present.is_empty() => Value::Null,
        Aggregator::List => Value::from(
            present
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Aggregator::Array | Aggregator::Json if values.is_empty() => Value::Null,
        Aggregator::Array | Aggregator::Json => Value::Array(values.iter().map(|v| (*v).clone()).collect()),
        Aggregator::Every if present.is_empty() => Value::Null,
        Aggregator::Every => Value::Bool(present.iter().all(|v| v.as_bool() == Some(true))),
        Aggregator::BoolOr if present.is_empty() => Value::Null,
        Aggregator::BoolOr => Value::Bool(present.iter().any(|v| v.as_bool() == Some(true))),
        Aggregator::First => values.first().map(|v| (*v).clone()).unwrap_or(Value::Null),
        Aggregator::Last => values.last().map(|v| (*v).clone()).unwrap_or(Value::Null),
    }
}

/// SQL-like comparison: numbers compare numerically (also against numeric strings), NULL never matches.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    let number = |v: &Value| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => number(a)?.partial_cmp(&number(b)?),
    }
}

/// Total order for sorting; NULL sorts last.
fn order_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn like(value: &Value, pattern: &Value, case_insensitive: bool) -> bool {
    let (Value::String(v), Value::String(p)) = (value, pattern) else {
        return false;
    };
    let mut re = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    for c in p.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|r| r.is_match(v)).unwrap_or(false)
}

fn compare_with(op: FilterOperator, left: &Value, right: &Value) -> bool {
    let ord = compare_values(left, right);
    match op {
        FilterOperator::Eq => ord == Some(Ordering::Equal),
        FilterOperator::Ne => matches!(ord, Some(o) if o != Ordering::Equal),
        FilterOperator::Lt => ord == Some(Ordering::Less),
        FilterOperator::Gt => ord == Some(Ordering::Greater),
        FilterOperator::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        FilterOperator::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        FilterOperator::Like => like(left, right, false),
        FilterOperator::ILike => like(left, right, true),
        FilterOperator::NotLike => !left.is_null() && !like(left, right, false),
        FilterOperator::NotILike => !left.is_null() && !like(left, right, true),
        FilterOperator::IsNull => left.is_null(),
        FilterOperator::IsNotNull => !left.is_null(),
    }
}

#[async_trait]
impl<'s> DataTx for MemoryTx<'s> {
    async fn lookup_ids(&mut self, lookup: IdLookup, ids: &[i64]) -> Result<Vec<i64>, DataError> {
        let mut out = BTreeSet::new();
        for id in self.ids(lookup.relation_id) {
            let filter = self.cell(lookup.relation_id, Some(id), lookup.filter_attribute_id)?;
            if filter.as_i64().map_or(false, |f| ids.contains(&f)) {
                if let Some(v) = self.cell(lookup.relation_id, Some(id), lookup.lookup_attribute_id)?.as_i64() {
                    out.insert(v);
                }
            }
        }
        Ok(out.into_iter().collect())
    }

    async fn get(&mut self, plan: &DataGet, _login_id: i64) -> Result<DataGetResult, DataError> {
        let rows = self.evaluate(plan, &[])?;
        Ok(DataGetResult {
            rows,
            query: format!("memory read of relation {}", plan.relation_id),
        })
    }

    async fn delete(&mut self, relation_id: Uuid, record_id: i64, login_id: i64) -> Result<(), DataError> {
        if self.failing_deletes.contains(&(relation_id, record_id)) {
            return Err(DataError::Invalid(format!(
                "delete of record {} in relation {} violates a constraint",
                record_id, relation_id
            )));
        }
        if let Some(table) = self.tables.get_mut(&relation_id) {
            table.remove(&record_id);
        }
        tracing::debug!(relation_id = %relation_id, record_id, login_id, "memory record deleted");
        Ok(())
    }

    async fn import(&mut self, request: ImportRequest<'_>) -> Result<BTreeMap<i32, i64>, DataError> {
        let schema = self.schema;
        run_import(schema, self, request).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DataError> {
        let MemoryTx { store, tables, .. } = *self;
        store.lock().tables = tables;
        Ok(())
    }
}

#[async_trait]
impl<'s> RecordWriter for MemoryTx<'s> {
    async fn find_record(&mut self, relation_id: Uuid, by: &[(Uuid, Value)]) -> Result<Option<i64>, DataError> {
        for id in self.ids(relation_id) {
            let mut all = true;
            for (atr_id, v) in by {
                if compare_values(&self.cell(relation_id, Some(id), *atr_id)?, v) != Some(Ordering::Equal) {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    async fn insert_record(&mut self, relation_id: Uuid, values: &[(Uuid, Value)]) -> Result<i64, DataError> {
        let pk = self.schema.pk_attribute(relation_id)?.id;
        let table = self.tables.entry(relation_id).or_default();
        let id = table.keys().next_back().map_or(1, |last| last + 1);
        let record: Record = values.iter().filter(|(a, _)| *a != pk).cloned().collect();
        table.insert(id, record);
        Ok(id)
    }

    async fn update_record(&mut self, relation_id: Uuid, record_id: i64, values: &[(Uuid, Value)]) -> Result<(), DataError> {
        let record = self
            .tables
            .get_mut(&relation_id)
            .and_then(|t| t.get_mut(&record_id))
            .ok_or_else(|| DataError::Invalid(format!("record {} does not exist", record_id)))?;
        for (atr_id, v) in values {
            record.insert(*atr_id, v.clone());
        }
        Ok(())
    }
}

/// One bracket level of a filter chain: `any` holds finished OR terms, `all` the running AND term.
#[derive(Clone, Copy)]
struct Group {
    any: bool,
    all: bool,
}

impl Default for Group {
    fn default() -> Self {
        Self { any: false, all: true }
    }
}

impl Group {
    fn or(&mut self) {
        self.any |= self.all;
        self.all = true;
    }

    fn and(&mut self, hit: bool) {
        self.all &= hit;
    }

    fn result(self) -> bool {
        self.any || self.all
    }
}

fn close_group(groups: &mut Vec<Group>) {
    if groups.len() < 2 {
        return;
    }
    if let Some(inner) = groups.pop() {
        if let Some(g) = groups.last_mut() {
            g.and(inner.result());
        }
    }
}

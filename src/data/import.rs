//! Multi-relation import planning: which relation is written first and which
//! foreign keys are filled from earlier writes.

use crate::data::{DataError, ImportRequest};
use crate::schema::{Join, QueryLookup, SchemaCache};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// relation index -> attributes identifying an existing record there.
pub type ResolvedLookups = BTreeMap<i32, Vec<Uuid>>;

/// Keep lookups whose index is part of the join set.
pub fn resolve_lookups(joins: &[Join], lookups: &[QueryLookup]) -> ResolvedLookups {
    lookups
        .iter()
        .filter(|l| !l.attribute_ids.is_empty() && joins.iter().any(|j| j.index == l.index))
        .map(|l| (l.index, l.attribute_ids.clone()))
        .collect()
}

/// One relation write. `foreign_keys` are (attribute on this relation, index whose record id it takes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportStep {
    pub index: i32,
    pub relation_id: Uuid,
    pub foreign_keys: Vec<(Uuid, i32)>,
}

/// Order relation writes so every referenced record exists before the record pointing at it.
/// A child holding the join attribute is written after its source; a source holding it is written after the child.
pub fn insert_order(schema: &SchemaCache, joins: &[Join]) -> Result<Vec<ImportStep>, DataError> {
    let mut steps: BTreeMap<i32, ImportStep> = BTreeMap::new();
    let mut depends_on: BTreeMap<i32, BTreeSet<i32>> = BTreeMap::new();

    for join in joins {
        steps.insert(
            join.index,
            ImportStep {
                index: join.index,
                relation_id: join.relation_id,
                foreign_keys: Vec::new(),
            },
        );
        depends_on.entry(join.index).or_default();
    }
    for join in joins.iter().filter(|j| j.index != 0) {
        let atr_id = join
            .attribute_id
            .ok_or_else(|| DataError::Invalid(format!("join index {} has no attribute", join.index)))?;
        let atr = schema.attribute(atr_id)?;
        let (holder, referenced) = if atr.relation_id == join.relation_id {
            (join.index, join.index_from)
        } else {
            (join.index_from, join.index)
        };
        let step = steps
            .get_mut(&holder)
            .ok_or_else(|| DataError::Invalid(format!("join index {} is not defined", holder)))?;
        step.foreign_keys.push((atr_id, referenced));
        depends_on.entry(holder).or_default().insert(referenced);
    }

    let mut done: BTreeSet<i32> = BTreeSet::new();
    let mut order = Vec::with_capacity(steps.len());
    while order.len() < steps.len() {
        let next = depends_on
            .iter()
            .find(|(index, deps)| !done.contains(*index) && deps.iter().all(|d| done.contains(d)))
            .map(|(index, _)| *index)
            .ok_or_else(|| DataError::Invalid("join graph has circular foreign keys".into()))?;
        done.insert(next);
        if let Some(step) = steps.remove(&next) {
            order.push(step);
        }
    }
    Ok(order)
}

/// Non-null column values supplied for one relation index, in column order.
pub fn step_values(schema: &SchemaCache, request: &ImportRequest<'_>, index: i32) -> Result<Vec<(Uuid, Value)>, DataError> {
    let mut out = Vec::new();
    for (column, value) in request.columns.iter().zip(request.values) {
        if column.index != index || column.sub_query || value.is_null() {
            continue;
        }
        if schema.attribute(column.attribute_id)?.content.is_files() {
            return Err(DataError::Invalid("file attributes cannot be imported".into()));
        }
        out.push((column.attribute_id, value.clone()));
    }
    Ok(out)
}

/// Record-level writes an import is made of.
#[async_trait]
pub trait RecordWriter: Send {
    /// Id of the record whose attributes equal all of `by`, if any.
    async fn find_record(&mut self, relation_id: Uuid, by: &[(Uuid, Value)]) -> Result<Option<i64>, DataError>;

    async fn insert_record(&mut self, relation_id: Uuid, values: &[(Uuid, Value)]) -> Result<i64, DataError>;

    async fn update_record(&mut self, relation_id: Uuid, record_id: i64, values: &[(Uuid, Value)]) -> Result<(), DataError>;
}

/// Write every relation index that received values, in dependency order.
/// Indices with a lookup reuse an existing record when all lookup attributes match.
pub async fn run_import<W>(schema: &SchemaCache, writer: &mut W, request: ImportRequest<'_>) -> Result<BTreeMap<i32, i64>, DataError>
where
    W: RecordWriter + ?Sized,
{
    let mut ids: BTreeMap<i32, i64> = BTreeMap::new();
    for step in insert_order(schema, request.joins)? {
        let mut values = step_values(schema, &request, step.index)?;
        if values.is_empty() {
            continue;
        }
        for (atr_id, from) in &step.foreign_keys {
            if let Some(id) = ids.get(from) {
                values.retain(|(a, _)| a != atr_id);
                values.push((*atr_id, Value::from(*id)));
            }
        }

        let lookup_attrs = request.resolved.get(&step.index);
        let mut existing = None;
        if let Some(attrs) = lookup_attrs {
            let by: Vec<(Uuid, Value)> = attrs
                .iter()
                .filter_map(|a| values.iter().find(|(v, _)| v == a).cloned())
                .collect();
            if by.len() == attrs.len() {
                existing = writer.find_record(step.relation_id, &by).await?;
            }
        }

        let id = match (existing, lookup_attrs) {
            (Some(id), Some(attrs)) => {
                let rest: Vec<(Uuid, Value)> = values.into_iter().filter(|(a, _)| !attrs.contains(a)).collect();
                if !rest.is_empty() {
                    writer.update_record(step.relation_id, id, &rest).await?;
                }
                id
            }
            _ => writer.insert_record(step.relation_id, &values).await?,
        };
        tracing::debug!(index = step.index, record_id = id, "import wrote relation");
        ids.insert(step.index, id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::*;

    #[test]
    fn source_holding_foreign_key_is_written_after_child() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let order = insert_order(&cache, &api.query.joins).unwrap();
        let indices: Vec<i32> = order.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 0]);
        assert_eq!(order[1].foreign_keys, vec![(ATR_EMPLOYEE_DEPARTMENT, 1)]);
        assert!(order[0].foreign_keys.is_empty());
    }

    #[test]
    fn child_holding_foreign_key_is_written_after_source() {
        let cache = cache();
        let joins = vec![root(REL_DEPARTMENT), join(1, 0, REL_EMPLOYEE, ATR_EMPLOYEE_DEPARTMENT, true)];
        let order = insert_order(&cache, &joins).unwrap();
        let indices: Vec<i32> = order.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(order[1].foreign_keys, vec![(ATR_EMPLOYEE_DEPARTMENT, 0)]);
    }

    #[test]
    fn lookups_outside_join_set_are_dropped() {
        let joins = vec![root(REL_EMPLOYEE)];
        let lookups = vec![
            QueryLookup { index: 0, attribute_ids: vec![ATR_EMPLOYEE_FIRSTNAME] },
            QueryLookup { index: 3, attribute_ids: vec![ATR_DEPARTMENT_NAME] },
        ];
        let resolved = resolve_lookups(&joins, &lookups);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&0], vec![ATR_EMPLOYEE_FIRSTNAME]);
    }

    #[test]
    fn step_values_skip_nulls_and_other_indices() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let values = vec![Value::from("Hans"), Value::Null, Value::from("IT")];
        let resolved = ResolvedLookups::new();
        let request = ImportRequest {
            login_id: 1,
            values: &values,
            columns: &api.columns,
            joins: &api.query.joins,
            lookups: &api.query.lookups,
            resolved: &resolved,
        };
        let root_values = step_values(&cache, &request, 0).unwrap();
        assert_eq!(root_values, vec![(ATR_EMPLOYEE_FIRSTNAME, Value::from("Hans"))]);
        let dept_values = step_values(&cache, &request, 1).unwrap();
        assert_eq!(dept_values, vec![(ATR_DEPARTMENT_NAME, Value::from("IT"))]);
    }

    #[derive(Default)]
    struct Recorder {
        existing: Option<i64>,
        inserts: Vec<(Uuid, Vec<(Uuid, Value)>)>,
        updates: Vec<(i64, Vec<(Uuid, Value)>)>,
    }

    #[async_trait]
    impl RecordWriter for Recorder {
        async fn find_record(&mut self, _relation_id: Uuid, _by: &[(Uuid, Value)]) -> Result<Option<i64>, DataError> {
            Ok(self.existing)
        }

        async fn insert_record(&mut self, relation_id: Uuid, values: &[(Uuid, Value)]) -> Result<i64, DataError> {
            self.inserts.push((relation_id, values.to_vec()));
            Ok(100 + self.inserts.len() as i64)
        }

        async fn update_record(&mut self, _relation_id: Uuid, record_id: i64, values: &[(Uuid, Value)]) -> Result<(), DataError> {
            self.updates.push((record_id, values.to_vec()));
            Ok(())
        }
    }

    fn employee_values() -> Vec<Value> {
        vec![Value::from("Hans"), Value::from(47), Value::from("IT")]
    }

    #[tokio::test]
    async fn inserts_department_first_and_links_employee() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let values = employee_values();
        let resolved = ResolvedLookups::new();
        let request = ImportRequest {
            login_id: 1,
            values: &values,
            columns: &api.columns,
            joins: &api.query.joins,
            lookups: &api.query.lookups,
            resolved: &resolved,
        };
        let mut writer = Recorder::default();
        let ids = run_import(&cache, &mut writer, request).await.unwrap();

        assert_eq!(ids[&1], 101);
        assert_eq!(ids[&0], 102);
        assert_eq!(writer.inserts[0].0, REL_DEPARTMENT);
        assert_eq!(writer.inserts[1].0, REL_EMPLOYEE);
        assert!(writer.inserts[1].1.contains(&(ATR_EMPLOYEE_DEPARTMENT, Value::from(101))));
    }

    #[tokio::test]
    async fn lookup_reuses_existing_department() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let values = employee_values();
        let resolved = resolve_lookups(&api.query.joins, &api.query.lookups);
        let request = ImportRequest {
            login_id: 1,
            values: &values,
            columns: &api.columns,
            joins: &api.query.joins,
            lookups: &api.query.lookups,
            resolved: &resolved,
        };
        let mut writer = Recorder {
            existing: Some(7),
            ..Default::default()
        };
        let ids = run_import(&cache, &mut writer, request).await.unwrap();

        assert_eq!(ids[&1], 7);
        assert!(writer.updates.is_empty());
        assert_eq!(writer.inserts.len(), 1);
        assert!(writer.inserts[0].1.contains(&(ATR_EMPLOYEE_DEPARTMENT, Value::from(7))));
    }
}

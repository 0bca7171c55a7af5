//! Cascading DELETE over an API's join graph.
//!
//! Phase one walks the joins in index order and resolves, per relation index, the record ids
//! reachable from the requested root record. Phase two deletes every resolved record whose join
//! carries `apply_delete`. Joins without `apply_delete` are still resolved so they can bridge to
//! deletable descendants.

use crate::data::{DataError, DataTx, IdLookup};
use crate::error::AppError;
use crate::schema::{Join, Query, SchemaCache};
use std::collections::BTreeMap;

/// relation index -> matched record ids. A missing index was never reached; an empty one matched nothing.
pub type ResolvedIds = BTreeMap<i32, Vec<i64>>;

/// Which column to read and which to filter on for one hop. Either side of a join may hold the foreign key.
fn id_lookup(schema: &SchemaCache, query: &Query, join: &Join) -> Result<IdLookup, AppError> {
    let atr_id = join
        .attribute_id
        .ok_or_else(|| AppError::unavailable_with(format!("join index {} has no attribute", join.index)))?;
    let atr = schema.attribute(atr_id)?;

    if atr.relation_id == join.relation_id {
        return Ok(IdLookup {
            relation_id: join.relation_id,
            lookup_attribute_id: schema.pk_attribute(join.relation_id)?.id,
            filter_attribute_id: atr_id,
        });
    }
    let source = query
        .join(join.index_from)
        .ok_or_else(|| AppError::unavailable_with(format!("join index {} is not defined", join.index_from)))?;
    Ok(IdLookup {
        relation_id: source.relation_id,
        lookup_attribute_id: atr_id,
        filter_attribute_id: schema.pk_attribute(source.relation_id)?.id,
    })
}

/// Resolve record ids for every reachable join index, starting from `record_id` at index 0.
pub async fn resolve_ids(
    schema: &SchemaCache,
    query: &Query,
    record_id: i64,
    tx: &mut dyn DataTx,
) -> Result<ResolvedIds, AppError> {
    let mut resolved = ResolvedIds::new();

    for join in &query.joins {
        if join.index == 0 {
            resolved.insert(0, vec![record_id]);
            continue;
        }
        let source_ids = match resolved.get(&join.index_from) {
            Some(ids) => ids.clone(),
            None => {
                tracing::debug!(index = join.index, from = join.index_from, "join source not reached, skipping");
                continue;
            }
        };
        if source_ids.is_empty() {
            resolved.insert(join.index, Vec::new());
            continue;
        }
        let lookup = id_lookup(schema, query, join)?;
        let ids = tx.lookup_ids(lookup, &source_ids).await.map_err(DataError::unavailable)?;
        tracing::debug!(index = join.index, count = ids.len(), "resolved join ids");
        resolved.insert(join.index, ids);
    }
    Ok(resolved)
}

/// Delete resolved records of every `apply_delete` join. Returns the number of records deleted.
pub async fn delete_cascade(
    query: &Query,
    resolved: &ResolvedIds,
    tx: &mut dyn DataTx,
    login_id: i64,
) -> Result<usize, AppError> {
    let mut deleted = 0;
    for join in query.joins.iter().filter(|j| j.apply_delete) {
        let Some(ids) = resolved.get(&join.index) else {
            continue;
        };
        for id in ids {
            tx.delete(join.relation_id, *id, login_id)
                .await
                .map_err(|e| AppError::conflict("record could not be deleted, it is still referenced", e))?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataStore, MemoryStore};
    use crate::schema::fixtures::*;
    use serde_json::json;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(REL_PERSON, 3, &[(ATR_PERSON_NAME, json!("Ada")), (ATR_PERSON_DEPT, json!(9))]);
        store.seed(REL_PERSON, 4, &[(ATR_PERSON_NAME, json!("Bob"))]);
        store.seed(REL_DEPARTMENT, 9, &[(ATR_DEPARTMENT_NAME, json!("IT"))]);
        store.seed(REL_EMPLOYEE, 11, &[(ATR_EMPLOYEE_DEPARTMENT, json!(9))]);
        store.seed(REL_EMPLOYEE, 12, &[(ATR_EMPLOYEE_DEPARTMENT, json!(9))]);
        store.seed(REL_EMPLOYEE, 13, &[(ATR_EMPLOYEE_DEPARTMENT, json!(8))]);
        store
    }

    #[tokio::test]
    async fn resolves_both_foreign_key_directions() {
        let cache = cache();
        let store = seeded();
        let api = cache.api_by_name("hr", "persons", 1).unwrap();
        let mut tx = store.begin(&cache).await.unwrap();

        let resolved = resolve_ids(&cache, &api.query, 3, tx.as_mut()).await.unwrap();
        assert_eq!(resolved[&0], vec![3]);
        assert_eq!(resolved[&1], vec![9]);
        assert_eq!(resolved[&2], vec![11, 12]);
    }

    #[tokio::test]
    async fn empty_anchor_resolves_descendants_as_empty() {
        let cache = cache();
        let store = seeded();
        let api = cache.api_by_name("hr", "persons", 1).unwrap();
        let mut tx = store.begin(&cache).await.unwrap();

        let resolved = resolve_ids(&cache, &api.query, 4, tx.as_mut()).await.unwrap();
        assert_eq!(resolved[&1], Vec::<i64>::new());
        assert_eq!(resolved[&2], Vec::<i64>::new());
    }

    #[tokio::test]
    async fn cascade_deletes_only_apply_delete_joins() {
        let cache = cache();
        let store = seeded();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let mut tx = store.begin(&cache).await.unwrap();

        let resolved = resolve_ids(&cache, &api.query, 11, tx.as_mut()).await.unwrap();
        assert_eq!(resolved[&1], vec![9]);
        let deleted = delete_cascade(&api.query, &resolved, tx.as_mut(), 1).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(deleted, 1);
        assert!(!store.contains(REL_EMPLOYEE, 11));
        assert!(store.contains(REL_DEPARTMENT, 9));
    }

    #[tokio::test]
    async fn non_deletable_join_bridges_to_deletable_descendant() {
        let cache = cache();
        let store = seeded();
        let mut query = cache.api_by_name("hr", "persons", 1).unwrap().query.clone();
        query.joins[1].apply_delete = false;
        let mut tx = store.begin(&cache).await.unwrap();

        let resolved = resolve_ids(&cache, &query, 3, tx.as_mut()).await.unwrap();
        delete_cascade(&query, &resolved, tx.as_mut(), 1).await.unwrap();
        tx.commit().await.unwrap();

        assert!(!store.contains(REL_PERSON, 3));
        assert!(store.contains(REL_DEPARTMENT, 9));
        assert!(!store.contains(REL_EMPLOYEE, 11));
        assert!(!store.contains(REL_EMPLOYEE, 12));
        assert!(store.contains(REL_EMPLOYEE, 13));
    }

    #[tokio::test]
    async fn failed_delete_is_conflict_and_rolls_back() {
        let cache = cache();
        let store = seeded();
        store.fail_delete(REL_EMPLOYEE, 12);
        let api = cache.api_by_name("hr", "persons", 1).unwrap();
        let mut tx = store.begin(&cache).await.unwrap();

        let resolved = resolve_ids(&cache, &api.query, 3, tx.as_mut()).await.unwrap();
        let err = delete_cascade(&api.query, &resolved, tx.as_mut(), 1).await.unwrap_err();
        drop(tx);

        assert!(matches!(err, AppError::Conflict { .. }));
        assert!(store.contains(REL_PERSON, 3));
        assert!(store.contains(REL_DEPARTMENT, 9));
        assert!(store.contains(REL_EMPLOYEE, 11));
    }
}

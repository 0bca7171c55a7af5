//! Metadata validation: referential integrity and join graph consistency.

use crate::error::SchemaError;
use crate::schema::{Api, Query, SchemaDefinition};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub fn validate(def: &SchemaDefinition) -> Result<(), SchemaError> {
    let module_ids: HashSet<Uuid> = def.modules.iter().map(|m| m.id).collect();
    let relation_ids: HashSet<Uuid> = def.relations.iter().map(|r| r.id).collect();
    let attribute_relation: HashMap<Uuid, Uuid> = def.attributes.iter().map(|a| (a.id, a.relation_id)).collect();

    for r in &def.relations {
        if !module_ids.contains(&r.module_id) {
            return Err(SchemaError::UnknownModule(r.module_id));
        }
        match attribute_relation.get(&r.attribute_id_pk) {
            Some(owner) if *owner == r.id => {}
            _ => return Err(SchemaError::UnknownAttribute(r.attribute_id_pk)),
        }
    }

    for a in &def.attributes {
        if !relation_ids.contains(&a.relation_id) {
            return Err(SchemaError::UnknownRelation(a.relation_id));
        }
    }

    let mut keys = HashSet::new();
    for api in &def.apis {
        if !module_ids.contains(&api.module_id) {
            return Err(SchemaError::UnknownModule(api.module_id));
        }
        if !keys.insert((api.module_id, api.key())) {
            return Err(SchemaError::DuplicateApi(api.key()));
        }
        validate_api(api, &relation_ids, &attribute_relation)?;
    }
    Ok(())
}

fn validate_api(
    api: &Api,
    relation_ids: &HashSet<Uuid>,
    attribute_relation: &HashMap<Uuid, Uuid>,
) -> Result<(), SchemaError> {
    let name = api.key();
    if api.limit_def > api.limit_max {
        return Err(SchemaError::InvalidQuery {
            api: name,
            reason: format!("default limit {} exceeds max. limit {}", api.limit_def, api.limit_max),
        });
    }
    let indices = validate_query(&name, &api.query, relation_ids, attribute_relation)?;

    for column in &api.columns {
        if !indices.contains(&column.index) {
            return Err(SchemaError::UnknownJoinIndex { api: name, index: column.index });
        }
        if !attribute_relation.contains_key(&column.attribute_id) {
            return Err(SchemaError::UnknownAttribute(column.attribute_id));
        }
        if column.sub_query {
            if column.aggregator.is_none() {
                return Err(SchemaError::InvalidQuery {
                    api: name,
                    reason: "sub query column without aggregator".into(),
                });
            }
            let Some(sub) = &column.query else {
                return Err(SchemaError::InvalidQuery {
                    api: name,
                    reason: "sub query column without query".into(),
                });
            };
            let sub_indices = validate_query(&name, sub, relation_ids, attribute_relation)?;
            if !sub_indices.contains(&column.index) {
                return Err(SchemaError::UnknownJoinIndex { api: name, index: column.index });
            }
        }
    }
    Ok(())
}

/// Checks the join tree and returns the set of defined indices.
fn validate_query(
    api: &str,
    query: &Query,
    relation_ids: &HashSet<Uuid>,
    attribute_relation: &HashMap<Uuid, Uuid>,
) -> Result<HashSet<i32>, SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidQuery {
        api: api.to_string(),
        reason,
    };
    let mut relation_at: HashMap<i32, Uuid> = HashMap::new();

    for join in &query.joins {
        if !relation_ids.contains(&join.relation_id) {
            return Err(SchemaError::UnknownRelation(join.relation_id));
        }
        if relation_at.contains_key(&join.index) {
            return Err(invalid(format!("duplicate join index {}", join.index)));
        }
        if join.index == 0 {
            if query.relation_id != Some(join.relation_id) {
                return Err(invalid("join index 0 must be the base relation".into()));
            }
            relation_at.insert(0, join.relation_id);
            continue;
        }
        if join.index < 0 || join.index_from >= join.index {
            return Err(invalid(format!(
                "join index {} must come after its source index {}",
                join.index, join.index_from
            )));
        }
        let Some(from_relation) = relation_at.get(&join.index_from).copied() else {
            return Err(SchemaError::UnknownJoinIndex {
                api: api.to_string(),
                index: join.index_from,
            });
        };
        let atr_id = join
            .attribute_id
            .ok_or_else(|| invalid(format!("join index {} has no attribute", join.index)))?;
        let owner = attribute_relation
            .get(&atr_id)
            .copied()
            .ok_or(SchemaError::UnknownAttribute(atr_id))?;
        if owner != join.relation_id && owner != from_relation {
            return Err(invalid(format!(
                "join attribute {} belongs to neither relation of join index {}",
                atr_id, join.index
            )));
        }
        relation_at.insert(join.index, join.relation_id);
    }

    let indices: HashSet<i32> = relation_at.keys().copied().collect();
    let known = |index: i32| -> Result<(), SchemaError> {
        if indices.contains(&index) {
            Ok(())
        } else {
            Err(SchemaError::UnknownJoinIndex {
                api: api.to_string(),
                index,
            })
        }
    };
    for order in &query.orders {
        known(order.index)?;
    }
    for lookup in &query.lookups {
        known(lookup.index)?;
        for atr_id in &lookup.attribute_ids {
            if attribute_relation.get(atr_id) != relation_at.get(&lookup.index) {
                return Err(invalid(format!(
                    "lookup attribute {} is not part of relation index {}",
                    atr_id, lookup.index
                )));
            }
        }
    }
    Ok(indices)
}

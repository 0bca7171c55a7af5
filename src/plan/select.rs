//! Read plan for GET: joins, column expressions, stored filters and orders, optional record filter.

use crate::error::AppError;
use crate::plan::{convert, DataGet, DataGetExpression, DataGetFilter, DataGetFilterSide};
use crate::request::Getters;
use crate::schema::{Api, FilterConnector, FilterOperator, SchemaCache};
use serde_json::Value;

/// Build the read plan for one GET call. `limit` above the API maximum is rejected, never truncated.
pub fn build_get(
    schema: &SchemaCache,
    api: &Api,
    record_id: Option<i64>,
    getters: &Getters,
    login_id: i64,
    language_code: &str,
) -> Result<DataGet, AppError> {
    // 0 renders no LIMIT at all, so it is only allowed for APIs without a maximum
    if getters.limit > api.limit_max || (getters.limit == 0 && api.limit_max > 0) {
        return Err(AppError::BadRequest(format!("max. result limit is: {}", api.limit_max)));
    }
    let relation_id = api
        .query
        .relation_id
        .ok_or_else(|| AppError::unavailable_with("query has no base relation"))?;

    let expressions = api
        .columns
        .iter()
        .map(|column| {
            let query = match (&column.query, column.sub_query) {
                (Some(sub), true) => Some(Box::new(convert::sub_query(
                    sub,
                    column.aggregator,
                    column.attribute_id,
                    column.index,
                    login_id,
                    language_code,
                ))),
                _ => None,
            };
            DataGetExpression {
                attribute_id: column.attribute_id,
                index: column.index,
                aggregator: if query.is_some() { None } else { column.aggregator },
                query,
            }
        })
        .collect();

    let mut filters = convert::filters(&api.query.filters, login_id, language_code);
    if let Some(id) = record_id {
        let pk = schema.relation(relation_id)?.attribute_id_pk;
        // stored filters form one group so the record filter applies to all of them
        if let Some(first) = filters.first_mut() {
            first.side0.brackets += 1;
        }
        if let Some(last) = filters.last_mut() {
            last.side1.brackets += 1;
        }
        filters.push(DataGetFilter {
            connector: FilterConnector::And,
            operator: FilterOperator::Eq,
            side0: DataGetFilterSide {
                attribute_id: Some(pk),
                ..Default::default()
            },
            side1: DataGetFilterSide {
                value: Some(Value::from(id)),
                ..Default::default()
            },
        });
    }

    Ok(DataGet {
        relation_id,
        joins: convert::joins(&api.query),
        expressions,
        filters,
        orders: convert::orders(&api.query.orders),
        limit: getters.limit,
        offset: getters.offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::*;
    use crate::schema::Connector;

    fn getters(limit: u32) -> Getters {
        Getters {
            limit,
            offset: 20,
            verbose: false,
        }
    }

    #[test]
    fn copies_joins_above_root_and_projects_columns() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let get = build_get(&cache, api, None, &getters(10), 1, "en_us").unwrap();

        assert_eq!(get.relation_id, REL_EMPLOYEE);
        assert_eq!(get.joins.len(), 1);
        assert_eq!(get.joins[0].index, 1);
        assert_eq!(get.joins[0].index_from, 0);
        assert_eq!(get.joins[0].attribute_id, ATR_EMPLOYEE_DEPARTMENT);
        assert_eq!(get.joins[0].connector, Connector::Left);
        let projected: Vec<_> = get.expressions.iter().map(|e| (e.index, e.attribute_id)).collect();
        assert_eq!(
            projected,
            vec![(0, ATR_EMPLOYEE_FIRSTNAME), (0, ATR_EMPLOYEE_AGE), (1, ATR_DEPARTMENT_NAME)]
        );
        assert!(get.filters.is_empty());
        assert_eq!((get.limit, get.offset), (10, 20));
    }

    #[test]
    fn record_id_adds_pk_filter_on_root() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let get = build_get(&cache, api, Some(45), &getters(10), 1, "en_us").unwrap();

        let filter = get.filters.last().unwrap();
        assert_eq!(filter.connector, FilterConnector::And);
        assert_eq!(filter.operator, FilterOperator::Eq);
        assert_eq!(filter.side0.attribute_id, Some(ATR_EMPLOYEE_ID));
        assert_eq!(filter.side0.attribute_index, 0);
        assert_eq!(filter.side1.value, Some(Value::from(45)));
    }

    #[test]
    fn record_filter_groups_stored_filters() {
        let cache = cache_with_or_filter();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let get = build_get(&cache, api, Some(11), &getters(10), 1, "en_us").unwrap();

        assert_eq!(get.filters.len(), 3);
        assert_eq!(get.filters[0].side0.brackets, 1);
        assert_eq!(get.filters[1].connector, FilterConnector::Or);
        assert_eq!(get.filters[1].side1.brackets, 1);
        assert_eq!(get.filters[2].connector, FilterConnector::And);
        assert_eq!((get.filters[2].side0.brackets, get.filters[2].side1.brackets), (0, 0));

        let list = build_get(&cache, api, None, &getters(10), 1, "en_us").unwrap();
        assert_eq!(list.filters[0].side0.brackets, 0);
        assert_eq!(list.filters[1].side1.brackets, 0);
    }

    #[test]
    fn zero_limit_is_rejected_when_api_has_a_maximum() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        match build_get(&cache, api, None, &getters(0), 1, "en_us") {
            Err(AppError::BadRequest(m)) => assert_eq!(m, "max. result limit is: 100"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn limit_above_max_is_rejected_with_max_stated() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        match build_get(&cache, api, None, &getters(101), 1, "en_us") {
            Err(AppError::BadRequest(m)) => assert_eq!(m, "max. result limit is: 100"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(build_get(&cache, api, None, &getters(100), 1, "en_us").is_ok());
    }

    #[test]
    fn sub_query_columns_expand_to_nested_plans() {
        let cache = cache();
        let api = cache.api_by_name("hr", "headcount", 1).unwrap();
        let get = build_get(&cache, api, None, &getters(10), 3, "en_us").unwrap();

        let count = &get.expressions[1];
        assert!(count.aggregator.is_none());
        let sub = count.query.as_ref().unwrap();
        assert_eq!(sub.relation_id, REL_EMPLOYEE);
        assert_eq!(sub.expressions[0].aggregator, Some(crate::schema::Aggregator::Count));
        assert_eq!(sub.filters[0].side1.attribute_nested, 1);
    }
}

//! Converters from stored filter/order/sub-query definitions to the read-plan IR.
//! Per-request values (login id, language code) are substituted here.

use crate::plan::{DataGet, DataGetExpression, DataGetFilter, DataGetFilterSide, DataGetJoin, DataGetOrder};
use crate::schema::{Aggregator, FilterContent, Query, QueryFilter, QueryFilterSide, QueryOrder};
use serde_json::Value;
use uuid::Uuid;

pub fn filters(stored: &[QueryFilter], login_id: i64, language_code: &str) -> Vec<DataGetFilter> {
    stored
        .iter()
        .map(|f| DataGetFilter {
            connector: f.connector,
            operator: f.operator,
            side0: side(&f.side0, login_id, language_code),
            side1: side(&f.side1, login_id, language_code),
        })
        .collect()
}

fn side(stored: &QueryFilterSide, login_id: i64, language_code: &str) -> DataGetFilterSide {
    let mut out = DataGetFilterSide {
        brackets: stored.brackets,
        ..Default::default()
    };
    match stored.content {
        FilterContent::Attribute => {
            out.attribute_id = stored.attribute_id;
            out.attribute_index = stored.attribute_index;
            out.attribute_nested = stored.attribute_nested;
        }
        FilterContent::Value => out.value = Some(stored.value.clone().unwrap_or(Value::Null)),
        FilterContent::Login => out.value = Some(Value::from(login_id)),
        FilterContent::LanguageCode => out.value = Some(Value::from(language_code)),
        FilterContent::True => out.value = Some(Value::Bool(true)),
        FilterContent::SubQuery => match (&stored.query, stored.query_aggregator, stored.attribute_id) {
            (Some(query), aggregator, Some(attribute_id)) => {
                out.query = Some(Box::new(sub_query(
                    query,
                    aggregator,
                    attribute_id,
                    stored.attribute_index,
                    login_id,
                    language_code,
                )));
            }
            _ => out.value = Some(Value::Null),
        },
    }
    out
}

pub fn orders(stored: &[QueryOrder]) -> Vec<DataGetOrder> {
    stored
        .iter()
        .map(|o| DataGetOrder {
            attribute_id: o.attribute_id,
            index: o.index,
            ascending: o.ascending,
        })
        .collect()
}

/// Joins with index > 0; index 0 is the plan's root relation.
pub fn joins(query: &Query) -> Vec<DataGetJoin> {
    query
        .joins
        .iter()
        .filter(|j| j.index != 0)
        .filter_map(|j| {
            j.attribute_id.map(|attribute_id| DataGetJoin {
                relation_id: j.relation_id,
                attribute_id,
                index: j.index,
                index_from: j.index_from,
                connector: j.connector,
            })
        })
        .collect()
}

/// Sub query yielding a single (usually aggregated) value of `attribute_id` at relation `index`.
pub fn sub_query(
    query: &Query,
    aggregator: Option<Aggregator>,
    attribute_id: Uuid,
    index: i32,
    login_id: i64,
    language_code: &str,
) -> DataGet {
    DataGet {
        relation_id: query.relation_id.unwrap_or_default(),
        joins: joins(query),
        expressions: vec![DataGetExpression {
            attribute_id,
            index,
            aggregator,
            query: None,
        }],
        filters: filters(&query.filters, login_id, language_code),
        orders: orders(&query.orders),
        limit: query.fixed_limit,
        offset: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FilterConnector, FilterOperator};

    fn stored(content: FilterContent) -> QueryFilter {
        QueryFilter {
            connector: FilterConnector::Or,
            operator: FilterOperator::Eq,
            side0: QueryFilterSide {
                content: FilterContent::Attribute,
                attribute_id: Some(Uuid::from_u128(1)),
                attribute_index: 2,
                brackets: 1,
                ..Default::default()
            },
            side1: QueryFilterSide {
                content,
                value: Some(Value::from("fixed")),
                brackets: 1,
                ..Default::default()
            },
        }
    }

    #[test]
    fn substitutes_login_and_language() {
        let out = filters(
            &[stored(FilterContent::Login), stored(FilterContent::LanguageCode)],
            7,
            "de_de",
        );
        assert_eq!(out[0].side1.value, Some(Value::from(7)));
        assert_eq!(out[1].side1.value, Some(Value::from("de_de")));
        assert_eq!(out[0].connector, FilterConnector::Or);
        assert_eq!(out[0].side0.attribute_index, 2);
        assert_eq!(out[0].side0.brackets, 1);
    }

    #[test]
    fn keeps_stored_values() {
        let out = filters(&[stored(FilterContent::Value)], 7, "en_us");
        assert_eq!(out[0].side1.value, Some(Value::from("fixed")));
        assert!(out[0].side1.attribute_id.is_none());
    }

    #[test]
    fn sub_query_carries_aggregated_expression() {
        let query = Query {
            relation_id: Some(Uuid::from_u128(5)),
            fixed_limit: 1,
            ..Default::default()
        };
        let get = sub_query(&query, Some(Aggregator::Max), Uuid::from_u128(9), 0, 1, "en_us");
        assert_eq!(get.relation_id, Uuid::from_u128(5));
        assert_eq!(get.expressions.len(), 1);
        assert_eq!(get.expressions[0].aggregator, Some(Aggregator::Max));
        assert_eq!(get.limit, 1);
    }
}

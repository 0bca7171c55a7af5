//! Data-access plans built from API metadata: the read-plan IR, its converters, and the
//! select and cascading-delete planners.

pub mod convert;
pub mod delete;
pub mod select;

pub use delete::{delete_cascade, resolve_ids, ResolvedIds};
pub use select::build_get;

use crate::schema::{Aggregator, Connector, FilterConnector, FilterOperator};
use serde_json::Value;
use uuid::Uuid;

/// Read plan handed to the data layer. Relations are referenced by index, attributes by id.
#[derive(Clone, Debug, PartialEq)]
pub struct DataGet {
    /// Relation at index 0.
    pub relation_id: Uuid,
    pub joins: Vec<DataGetJoin>,
    pub expressions: Vec<DataGetExpression>,
    pub filters: Vec<DataGetFilter>,
    pub orders: Vec<DataGetOrder>,
    /// 0 = no limit.
    pub limit: u32,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataGetJoin {
    pub relation_id: Uuid,
    pub attribute_id: Uuid,
    pub index: i32,
    pub index_from: i32,
    pub connector: Connector,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataGetExpression {
    pub attribute_id: Uuid,
    pub index: i32,
    pub aggregator: Option<Aggregator>,
    /// Correlated sub query producing this expression's value.
    pub query: Option<Box<DataGet>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataGetFilter {
    pub connector: FilterConnector,
    pub operator: FilterOperator,
    pub side0: DataGetFilterSide,
    pub side1: DataGetFilterSide,
}

/// One side of a filter: an attribute, a sub query or a bound value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataGetFilterSide {
    pub attribute_id: Option<Uuid>,
    pub attribute_index: i32,
    pub attribute_nested: u32,
    pub brackets: u32,
    pub query: Option<Box<DataGet>>,
    pub value: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataGetOrder {
    pub attribute_id: Uuid,
    pub index: i32,
    pub ascending: bool,
}

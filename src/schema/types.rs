//! Metadata types as persisted (JSON payloads) and cached: modules, relations, attributes, APIs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    pub id: Uuid,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    pub module_id: Uuid,
    pub name: String,
    pub attribute_id_pk: Uuid,
    /// Number of newer file versions to keep before older ones may be pruned.
    #[serde(default)]
    pub retention_count: Option<i32>,
    /// File versions younger than this many days are never pruned.
    #[serde(default)]
    pub retention_days: Option<i32>,
}

/// Attribute content. Everything but `Files` is a plain column value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeContent {
    Integer,
    Bigint,
    Numeric,
    Real,
    #[serde(rename = "double precision")]
    Double,
    Text,
    Varchar,
    Boolean,
    Date,
    Datetime,
    Uuid,
    /// Foreign key to another relation's primary key.
    Relationship,
    Files,
}

impl AttributeContent {
    /// PostgreSQL type used to cast bound parameters. `None` for file-sets.
    pub fn pg_type(self) -> Option<&'static str> {
        Some(match self {
            AttributeContent::Integer => "integer",
            AttributeContent::Bigint | AttributeContent::Relationship => "bigint",
            AttributeContent::Numeric => "numeric",
            AttributeContent::Real => "real",
            AttributeContent::Double => "double precision",
            AttributeContent::Text => "text",
            AttributeContent::Varchar => "varchar",
            AttributeContent::Boolean => "boolean",
            AttributeContent::Date => "date",
            AttributeContent::Datetime => "timestamptz",
            AttributeContent::Uuid => "uuid",
            AttributeContent::Files => return None,
        })
    }

    pub fn is_files(self) -> bool {
        self == AttributeContent::Files
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attribute {
    pub id: Uuid,
    pub relation_id: Uuid,
    pub name: String,
    pub content: AttributeContent,
}

/// Join type between two relation indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connector {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl Connector {
    pub fn sql(self) -> &'static str {
        match self {
            Connector::Inner => "INNER JOIN",
            Connector::Left => "LEFT JOIN",
            Connector::Right => "RIGHT JOIN",
            Connector::Full => "FULL JOIN",
            Connector::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Join {
    pub index: i32,
    /// Index this join hangs off. Ignored for index 0.
    #[serde(default)]
    pub index_from: i32,
    pub relation_id: Uuid,
    /// Attribute linking this relation and the one at `index_from`. `None` only for index 0.
    #[serde(default)]
    pub attribute_id: Option<Uuid>,
    #[serde(default)]
    pub connector: Connector,
    #[serde(default)]
    pub apply_delete: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    List,
    Array,
    Json,
    Every,
    BoolOr,
    /// Value of the first row of the group.
    First,
    /// Value of the last row of the group.
    Last,
}

impl Aggregator {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregator::Count => "count",
            Aggregator::Sum => "sum",
            Aggregator::Avg => "avg",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::List => "list",
            Aggregator::Array => "array",
            Aggregator::Json => "json",
            Aggregator::Every => "every",
            Aggregator::BoolOr => "bool_or",
            Aggregator::First => "first",
            Aggregator::Last => "last",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterConnector {
    #[default]
    And,
    Or,
}

impl FilterConnector {
    pub fn sql(self) -> &'static str {
        match self {
            FilterConnector::And => "AND",
            FilterConnector::Or => "OR",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "ILIKE")]
    ILike,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    #[serde(rename = "NOT ILIKE")]
    NotILike,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

impl FilterOperator {
    pub fn sql(self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "<>",
            FilterOperator::Lt => "<",
            FilterOperator::Gt => ">",
            FilterOperator::Le => "<=",
            FilterOperator::Ge => ">=",
            FilterOperator::Like => "LIKE",
            FilterOperator::ILike => "ILIKE",
            FilterOperator::NotLike => "NOT LIKE",
            FilterOperator::NotILike => "NOT ILIKE",
            FilterOperator::IsNull => "IS NULL",
            FilterOperator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Operators without a right-hand side.
    pub fn is_unary(self) -> bool {
        matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }
}

/// What a stored filter side refers to. `Login` and `LanguageCode` are filled in per request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterContent {
    Attribute,
    #[default]
    Value,
    Login,
    LanguageCode,
    SubQuery,
    True,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryFilterSide {
    #[serde(default)]
    pub content: FilterContent,
    #[serde(default)]
    pub attribute_id: Option<Uuid>,
    #[serde(default)]
    pub attribute_index: i32,
    /// Query levels to climb for the attribute (0 = own level, 1 = parent query, ...).
    #[serde(default)]
    pub attribute_nested: u32,
    #[serde(default)]
    pub brackets: u32,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub query: Option<Box<Query>>,
    #[serde(default)]
    pub query_aggregator: Option<Aggregator>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default)]
    pub connector: FilterConnector,
    pub operator: FilterOperator,
    pub side0: QueryFilterSide,
    #[serde(default)]
    pub side1: QueryFilterSide,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryOrder {
    pub attribute_id: Uuid,
    pub index: i32,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

fn default_true() -> bool {
    true
}

/// Attributes identifying an existing record at `index` during import.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryLookup {
    pub index: i32,
    pub attribute_ids: Vec<Uuid>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub relation_id: Option<Uuid>,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
    #[serde(default)]
    pub orders: Vec<QueryOrder>,
    #[serde(default)]
    pub lookups: Vec<QueryLookup>,
    /// Row limit for sub-queries. 0 = none.
    #[serde(default)]
    pub fixed_limit: u32,
}

impl Query {
    pub fn join(&self, index: i32) -> Option<&Join> {
        self.joins.iter().find(|j| j.index == index)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Column {
    pub attribute_id: Uuid,
    pub index: i32,
    #[serde(default)]
    pub sub_query: bool,
    #[serde(default)]
    pub aggregator: Option<Aggregator>,
    #[serde(default)]
    pub query: Option<Query>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Api {
    pub id: Uuid,
    pub module_id: Uuid,
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub has_get: bool,
    #[serde(default)]
    pub has_post: bool,
    #[serde(default)]
    pub has_delete: bool,
    pub limit_def: u32,
    pub limit_max: u32,
    #[serde(default)]
    pub verbose_def: bool,
    pub query: Query,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Api {
    /// Composite lookup key within its module: `"<name>.v<version>"`.
    pub fn key(&self) -> String {
        api_key(&self.name, self.version)
    }
}

pub fn api_key(name: &str, version: u32) -> String {
    format!("{}.v{}", name, version)
}

/// All metadata in one struct, as loaded from a file or the `_sys_*` tables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub apis: Vec<Api>,
}

//! Shared metadata for unit tests: module `hr` with employee, department and person.

use crate::schema::*;
use uuid::Uuid;

pub const MOD_HR: Uuid = Uuid::from_u128(0x100);

pub const REL_EMPLOYEE: Uuid = Uuid::from_u128(0x200);
pub const REL_DEPARTMENT: Uuid = Uuid::from_u128(0x201);
pub const REL_PERSON: Uuid = Uuid::from_u128(0x202);

pub const ATR_EMPLOYEE_ID: Uuid = Uuid::from_u128(0x300);
pub const ATR_EMPLOYEE_FIRSTNAME: Uuid = Uuid::from_u128(0x301);
pub const ATR_EMPLOYEE_AGE: Uuid = Uuid::from_u128(0x302);
pub const ATR_EMPLOYEE_DEPARTMENT: Uuid = Uuid::from_u128(0x303);
pub const ATR_DEPARTMENT_ID: Uuid = Uuid::from_u128(0x310);
pub const ATR_DEPARTMENT_NAME: Uuid = Uuid::from_u128(0x311);
pub const ATR_PERSON_ID: Uuid = Uuid::from_u128(0x320);
pub const ATR_PERSON_NAME: Uuid = Uuid::from_u128(0x321);
pub const ATR_PERSON_DEPT: Uuid = Uuid::from_u128(0x322);

pub const API_EMPLOYEES: Uuid = Uuid::from_u128(0x400);
pub const API_PERSONS: Uuid = Uuid::from_u128(0x401);
pub const API_HEADCOUNT: Uuid = Uuid::from_u128(0x402);

fn relation(id: Uuid, name: &str, pk: Uuid) -> Relation {
    Relation {
        id,
        module_id: MOD_HR,
        name: name.into(),
        attribute_id_pk: pk,
        retention_count: None,
        retention_days: None,
    }
}

fn attribute(id: Uuid, relation_id: Uuid, name: &str, content: AttributeContent) -> Attribute {
    Attribute {
        id,
        relation_id,
        name: name.into(),
        content,
    }
}

pub fn root(relation_id: Uuid) -> Join {
    Join {
        index: 0,
        index_from: 0,
        relation_id,
        attribute_id: None,
        connector: Connector::Inner,
        apply_delete: true,
    }
}

pub fn join(index: i32, index_from: i32, relation_id: Uuid, attribute_id: Uuid, apply_delete: bool) -> Join {
    Join {
        index,
        index_from,
        relation_id,
        attribute_id: Some(attribute_id),
        connector: Connector::Left,
        apply_delete,
    }
}

pub fn column(attribute_id: Uuid, index: i32) -> Column {
    Column {
        attribute_id,
        index,
        sub_query: false,
        aggregator: None,
        query: None,
    }
}

fn api(id: Uuid, name: &str, query: Query, columns: Vec<Column>) -> Api {
    Api {
        id,
        module_id: MOD_HR,
        name: name.into(),
        version: 1,
        has_get: true,
        has_post: true,
        has_delete: true,
        limit_def: 10,
        limit_max: 100,
        verbose_def: false,
        query,
        columns,
    }
}

pub fn definition() -> SchemaDefinition {
    let employees = api(
        API_EMPLOYEES,
        "employees",
        Query {
            relation_id: Some(REL_EMPLOYEE),
            joins: vec![
                root(REL_EMPLOYEE),
                join(1, 0, REL_DEPARTMENT, ATR_EMPLOYEE_DEPARTMENT, false),
            ],
            lookups: vec![QueryLookup {
                index: 1,
                attribute_ids: vec![ATR_DEPARTMENT_NAME],
            }],
            ..Default::default()
        },
        vec![
            column(ATR_EMPLOYEE_FIRSTNAME, 0),
            column(ATR_EMPLOYEE_AGE, 0),
            column(ATR_DEPARTMENT_NAME, 1),
        ],
    );

    let mut persons = api(
        API_PERSONS,
        "persons",
        Query {
            relation_id: Some(REL_PERSON),
            joins: vec![
                root(REL_PERSON),
                join(1, 0, REL_DEPARTMENT, ATR_PERSON_DEPT, true),
                join(2, 1, REL_EMPLOYEE, ATR_EMPLOYEE_DEPARTMENT, true),
            ],
            ..Default::default()
        },
        vec![column(ATR_PERSON_NAME, 0), column(ATR_DEPARTMENT_NAME, 1)],
    );
    persons.has_post = false;

    let colleagues = Query {
        relation_id: Some(REL_EMPLOYEE),
        joins: vec![root(REL_EMPLOYEE)],
        filters: vec![QueryFilter {
            connector: FilterConnector::And,
            operator: FilterOperator::Eq,
            side0: QueryFilterSide {
                content: FilterContent::Attribute,
                attribute_id: Some(ATR_EMPLOYEE_DEPARTMENT),
                ..Default::default()
            },
            side1: QueryFilterSide {
                content: FilterContent::Attribute,
                attribute_id: Some(ATR_EMPLOYEE_DEPARTMENT),
                attribute_nested: 1,
                ..Default::default()
            },
        }],
        ..Default::default()
    };
    let mut headcount = api(
        API_HEADCOUNT,
        "headcount",
        Query {
            relation_id: Some(REL_EMPLOYEE),
            joins: vec![root(REL_EMPLOYEE)],
            ..Default::default()
        },
        vec![
            column(ATR_EMPLOYEE_FIRSTNAME, 0),
            Column {
                attribute_id: ATR_EMPLOYEE_ID,
                index: 0,
                sub_query: true,
                aggregator: Some(Aggregator::Count),
                query: Some(colleagues),
            },
        ],
    );
    headcount.has_post = false;
    headcount.has_delete = false;
    headcount.verbose_def = true;

    SchemaDefinition {
        modules: vec![Module {
            id: MOD_HR,
            name: "hr".into(),
        }],
        relations: vec![
            relation(REL_EMPLOYEE, "employee", ATR_EMPLOYEE_ID),
            relation(REL_DEPARTMENT, "department", ATR_DEPARTMENT_ID),
            relation(REL_PERSON, "person", ATR_PERSON_ID),
        ],
        attributes: vec![
            attribute(ATR_EMPLOYEE_ID, REL_EMPLOYEE, "id", AttributeContent::Bigint),
            attribute(ATR_EMPLOYEE_FIRSTNAME, REL_EMPLOYEE, "firstname", AttributeContent::Text),
            attribute(ATR_EMPLOYEE_AGE, REL_EMPLOYEE, "age", AttributeContent::Integer),
            attribute(ATR_EMPLOYEE_DEPARTMENT, REL_EMPLOYEE, "department_id", AttributeContent::Relationship),
            attribute(ATR_DEPARTMENT_ID, REL_DEPARTMENT, "id", AttributeContent::Bigint),
            attribute(ATR_DEPARTMENT_NAME, REL_DEPARTMENT, "name", AttributeContent::Text),
            attribute(ATR_PERSON_ID, REL_PERSON, "id", AttributeContent::Bigint),
            attribute(ATR_PERSON_NAME, REL_PERSON, "name", AttributeContent::Text),
            attribute(ATR_PERSON_DEPT, REL_PERSON, "dept_id", AttributeContent::Relationship),
        ],
        apis: vec![employees, persons, headcount],
    }
}

pub fn cache() -> SchemaCache {
    SchemaCache::build(definition()).expect("fixture schema is valid")
}

fn firstname_is(value: &str, connector: FilterConnector) -> QueryFilter {
    QueryFilter {
        connector,
        operator: FilterOperator::Eq,
        side0: QueryFilterSide {
            content: FilterContent::Attribute,
            attribute_id: Some(ATR_EMPLOYEE_FIRSTNAME),
            ..Default::default()
        },
        side1: QueryFilterSide {
            value: Some(serde_json::Value::from(value)),
            ..Default::default()
        },
    }
}

/// Employees API with the stored filter `firstname = 'Hans' OR firstname = 'Grete'`.
pub fn cache_with_or_filter() -> SchemaCache {
    let mut def = definition();
    def.apis[0].query.filters = vec![
        firstname_is("Hans", FilterConnector::And),
        firstname_is("Grete", FilterConnector::Or),
    ];
    SchemaCache::build(def).expect("fixture schema is valid")
}

use crate::error::SchemaError;
use crate::schema::{Aggregator, Column, SchemaCache};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Attribute name, or `"<AGGREGATOR> (<name>)"` for aggregated columns.
pub fn display_name(attribute_name: &str, aggregator: Option<Aggregator>) -> String {
    match aggregator {
        Some(agg) => format!("{} ({})", agg.as_str().to_uppercase(), attribute_name),
        None => attribute_name.to_string(),
    }
}

pub fn encode_compact(rows: Vec<Vec<Value>>) -> Value {
    Value::Array(rows.into_iter().map(Value::Array).collect())
}

/// Relation reference and display name per column, resolved once for all rows.
fn column_keys(schema: &SchemaCache, columns: &[Column]) -> Result<Vec<(String, String)>, SchemaError> {
    let mut relation_refs: HashMap<i32, String> = HashMap::new();
    let mut keys = Vec::with_capacity(columns.len());
    for column in columns {
        let atr = schema.attribute(column.attribute_id)?;
        let relation_ref = match relation_refs.get(&column.index) {
            Some(r) => r.clone(),
            None => {
                let rel = schema.relation(atr.relation_id)?;
                let r = format!("{}({})", column.index, rel.name);
                relation_refs.insert(column.index, r.clone());
                r
            }
        };
        keys.push((relation_ref, display_name(&atr.name, column.aggregator)));
    }
    Ok(keys)
}

pub fn encode_verbose(schema: &SchemaCache, columns: &[Column], rows: Vec<Vec<Value>>) -> Result<Value, SchemaError> {
    let keys = column_keys(schema, columns)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut object = Map::new();
        for ((relation_ref, name), value) in keys.iter().zip(row) {
            let entry = object
                .entry(relation_ref.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(attributes) = entry {
                attributes.insert(name.clone(), value);
            }
        }
        out.push(Value::Object(object));
    }
    Ok(Value::Array(out))
}

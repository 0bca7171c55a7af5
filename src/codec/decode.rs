use crate::error::AppError;
use crate::schema::{Column, SchemaCache};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn relation_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(.+\)").expect("static regex"))
}

fn invalid_json() -> AppError {
    AppError::BadRequest("invalid JSON object".into())
}

/// Relation index from a verbose key: `"1"`, `"1(department)"` or `" 1 (department) "`.
fn relation_index(key: &str) -> Result<i32, AppError> {
    let stripped = relation_name_pattern().replace(key, "");
    let stripped = stripped.trim();
    stripped
        .parse::<i32>()
        .map_err(|_| AppError::BadRequest(format!("invalid relation index '{}', integer expected", stripped)))
}

/// Positional values, one per column.
pub fn decode_compact(body: Value, columns: &[Column]) -> Result<Vec<Value>, AppError> {
    let Value::Array(values) = body else {
        return Err(invalid_json());
    };
    if values.len() != columns.len() {
        return Err(AppError::BadRequest(format!(
            "invalid value count {}, expected {} (one per column)",
            values.len(),
            columns.len()
        )));
    }
    Ok(values)
}

/// `{"<index>(<relation>)": {"<attribute>": value}}` to positional values. Unmentioned columns stay null.
pub fn decode_verbose(schema: &SchemaCache, body: Value, columns: &[Column]) -> Result<Vec<Value>, AppError> {
    let Value::Object(relations) = body else {
        return Err(invalid_json());
    };
    let mut values = vec![Value::Null; columns.len()];

    for (key, attributes) in relations {
        let Value::Object(attributes) = attributes else {
            return Err(invalid_json());
        };
        let index = relation_index(&key)?;
        for (slot, column) in values.iter_mut().zip(columns) {
            if column.index != index {
                continue;
            }
            let atr = schema.attribute(column.attribute_id)?;
            if let Some(value) = attributes.get(&atr.name) {
                *slot = value.clone();
            }
        }
    }
    Ok(values)
}

/// Decode a POST body in the shape selected by `verbose`.
pub fn decode_body(schema: &SchemaCache, body: &[u8], columns: &[Column], verbose: bool) -> Result<Vec<Value>, AppError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| invalid_json())?;
    if verbose {
        decode_verbose(schema, value, columns)
    } else {
        decode_compact(value, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_verbose;
    use crate::schema::fixtures::*;
    use serde_json::json;

    #[test]
    fn verbose_keys_accept_optional_relation_name() {
        assert_eq!(relation_index("0").unwrap(), 0);
        assert_eq!(relation_index("1(department)").unwrap(), 1);
        assert_eq!(relation_index(" 2 (x y) ").unwrap(), 2);
        match relation_index("one(employee)") {
            Err(AppError::BadRequest(m)) => assert_eq!(m, "invalid relation index 'one', integer expected"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn verbose_body_decodes_to_column_order() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let body = json!({
            "1(department)": {"name": "IT"},
            "0(employee)": {"age": 47, "firstname": "Hans"}
        });
        let values = decode_verbose(&cache, body, &api.columns).unwrap();
        assert_eq!(values, vec![json!("Hans"), json!(47), json!("IT")]);
    }

    #[test]
    fn omitted_attributes_and_relations_stay_null() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let values = decode_verbose(&cache, json!({"0": {"firstname": "Hans", "unknown": 1}}), &api.columns).unwrap();
        assert_eq!(values, vec![json!("Hans"), Value::Null, Value::Null]);
    }

    #[test]
    fn verbose_and_compact_encodings_agree() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let row = vec![json!("Hans"), json!(47), json!("IT")];
        let verbose = encode_verbose(&cache, &api.columns, vec![row.clone()]).unwrap();
        let first = verbose.as_array().unwrap()[0].clone();
        assert_eq!(decode_verbose(&cache, first, &api.columns).unwrap(), row);
        assert_eq!(decode_compact(json!(row), &api.columns).unwrap(), row);
    }

    #[test]
    fn compact_body_must_match_column_count() {
        let cache = cache();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        assert!(matches!(
            decode_compact(json!(["Hans", 47]), &api.columns),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            decode_body(&cache, b"{\"0\":1}", &api.columns, true),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(decode_body(&cache, b"not json", &api.columns, false), Err(AppError::BadRequest(_))));
    }
}

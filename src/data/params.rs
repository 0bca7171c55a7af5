//! JSON values to bind parameters. Every value is bound as text and cast in SQL (`$n::<type>`),
//! so one parameter type covers all attribute contents.

use serde_json::Value;

/// A bound parameter; `None` binds SQL NULL.
pub type PgParam = Option<String>;

/// Text form PostgreSQL accepts for a cast to the attribute's type.
pub fn to_text_param(v: &Value) -> PgParam {
    match v {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => Some(v.to_string()),
    }
}

/// PostgreSQL array literal for a `$n::BIGINT[]` parameter.
pub fn id_array_param(ids: &[i64]) -> PgParam {
    let items: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    Some(format!("{{{}}}", items.join(",")))
}

use crate::error::AppError;
use crate::request::{ApiRequest, Verb};
use crate::schema::{Api, SchemaCache};

/// Cached API for `(module, name, version)`, checked against the requested verb.
pub fn resolve_api<'s>(schema: &'s SchemaCache, request: &ApiRequest) -> Result<&'s Api, AppError> {
    let api = schema
        .api_by_name(&request.module, &request.api, request.version)
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "API '{}.{}' (v{}) does not exist",
                request.module, request.api, request.version
            ))
        })?;

    let supported = match request.verb {
        Verb::Get { .. } => api.has_get,
        Verb::Post => api.has_post,
        Verb::Delete { .. } => api.has_delete,
    };
    if !supported {
        return Err(AppError::BadRequest(format!(
            "HTTP method '{}' is not supported by this API",
            request.verb.name()
        )));
    }
    if api.query.relation_id.is_none() {
        return Err(AppError::unavailable_with("query has no base relation"));
    }
    Ok(api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::*;

    fn request(api: &str, version: u32, verb: Verb) -> ApiRequest {
        ApiRequest {
            module: "hr".into(),
            api: api.into(),
            version,
            verb,
        }
    }

    #[test]
    fn finds_api_by_name_and_version() {
        let cache = cache();
        let api = resolve_api(&cache, &request("employees", 1, Verb::Get { record_id: None })).unwrap();
        assert_eq!(api.id, API_EMPLOYEES);
    }

    #[test]
    fn unknown_version_is_not_found() {
        let cache = cache();
        match resolve_api(&cache, &request("employees", 2, Verb::Post)) {
            Err(AppError::NotFound(m)) => assert_eq!(m, "API 'hr.employees' (v2) does not exist"),
            other => panic!("expected not found, got {:?}", other),
        }
    }

    #[test]
    fn verb_flags_are_enforced() {
        let cache = cache();
        match resolve_api(&cache, &request("persons", 1, Verb::Post)) {
            Err(AppError::BadRequest(m)) => assert_eq!(m, "HTTP method 'POST' is not supported by this API"),
            other => panic!("expected bad request, got {:?}", other),
        }
        assert!(resolve_api(&cache, &request("headcount", 1, Verb::Delete { record_id: 1 })).is_err());
    }
}

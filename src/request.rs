//! Request parsing: `/api/{module}/{api}/v{version}[/{record_id}]` plus method and query getters.

use crate::error::AppError;
use axum::http::Method;
use regex::Regex;
use std::sync::OnceLock;

/// Fixed prefix of every data API path.
pub const API_PREFIX: &str = "api";

/// HTTP verb with the fields it needs, decided once at parse time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get { record_id: Option<i64> },
    Post,
    Delete { record_id: i64 },
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Get { .. } => "GET",
            Verb::Post => "POST",
            Verb::Delete { .. } => "DELETE",
        }
    }

    pub fn record_id(&self) -> Option<i64> {
        match self {
            Verb::Get { record_id } => *record_id,
            Verb::Post => None,
            Verb::Delete { record_id } => Some(*record_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRequest {
    pub module: String,
    pub api: String,
    pub version: u32,
    pub verb: Verb,
}

fn version_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v(\d+)$").expect("static regex"))
}

fn invalid_url(method: &Method) -> AppError {
    let postfix = if *method == Method::GET { " (record ID is optional)" } else { "" };
    AppError::BadRequest(format!(
        "invalid URL, expected: /api/{{MODULE_NAME}}/{{API_NAME}}/{{VERSION}}/{{RECORD_ID}}{}",
        postfix
    ))
}

/// Parse method and path into an [`ApiRequest`].
pub fn parse(method: &Method, path: &str) -> Result<ApiRequest, AppError> {
    if *method != Method::GET && *method != Method::POST && *method != Method::DELETE {
        return Err(AppError::BadRequest("invalid HTTP method".into()));
    }

    // "", "api", module, api, version[, record id]
    let elements: Vec<&str> = path.split('/').collect();
    if elements.len() < 5
        || elements.len() > 6
        || !elements[0].is_empty()
        || elements[1] != API_PREFIX
        || elements[2..].iter().any(|s| s.is_empty())
    {
        return Err(invalid_url(method));
    }
    let record_provided = elements.len() == 6;
    if *method == Method::DELETE && !record_provided {
        return Err(invalid_url(method));
    }

    let version = version_pattern()
        .captures(elements[4])
        .and_then(|c| c[1].parse::<u32>().ok())
        .ok_or_else(|| {
            AppError::BadRequest(format!("invalid API version format '{}', expected: 'v12'", elements[4]))
        })?;

    let record_id = if record_provided {
        let raw = elements[5];
        let id = raw
            .parse::<i64>()
            .ok()
            .filter(|id| *id >= 0)
            .ok_or_else(|| AppError::BadRequest(format!("invalid API record ID '{}', integer expected", raw)))?;
        Some(id)
    } else {
        None
    };

    let verb = match *method {
        Method::GET => Verb::Get { record_id },
        Method::POST => Verb::Post,
        _ => {
            let record_id = record_id.unwrap_or_default();
            if record_id < 1 {
                return Err(AppError::BadRequest("record ID must be > 0".into()));
            }
            Verb::Delete { record_id }
        }
    };

    Ok(ApiRequest {
        module: elements[2].to_string(),
        api: elements[3].to_string(),
        version,
        verb,
    })
}

/// Query getters after applying API defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Getters {
    pub limit: u32,
    pub offset: u32,
    pub verbose: bool,
}

/// Apply `limit`, `offset` and `verbose` over the API defaults. Unknown parameters are ignored.
pub fn parse_getters(
    params: &[(String, String)],
    limit_def: u32,
    verbose_def: bool,
) -> Result<Getters, AppError> {
    let mut getters = Getters {
        limit: limit_def,
        offset: 0,
        verbose: verbose_def,
    };
    for name in ["limit", "offset", "verbose"] {
        let mut values = params.iter().filter(|(k, _)| k == name).map(|(_, v)| v);
        let Some(value) = values.next() else { continue };
        if values.next().is_some() {
            return Err(AppError::BadRequest(format!("{} must be given once", name)));
        }
        let n: u32 = value
            .parse()
            .map_err(|_| AppError::BadRequest(format!("invalid value '{}' for {}", value, name)))?;
        match name {
            "limit" => getters.limit = n,
            "offset" => getters.offset = n,
            _ => getters.verbose = n == 1,
        }
    }
    Ok(getters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bad(method: Method, path: &str) -> String {
        match parse(&method, path) {
            Err(AppError::BadRequest(m)) => m,
            other => panic!("expected bad request, got {:?}", other),
        }
    }

    #[test]
    fn parses_list_and_single_record_get() {
        let r = parse(&Method::GET, "/api/lsw_invoices/contracts/v1").unwrap();
        assert_eq!(r.module, "lsw_invoices");
        assert_eq!(r.api, "contracts");
        assert_eq!(r.version, 1);
        assert_eq!(r.verb, Verb::Get { record_id: None });

        let r = parse(&Method::GET, "/api/lsw_invoices/contracts/v12/45").unwrap();
        assert_eq!(r.version, 12);
        assert_eq!(r.verb, Verb::Get { record_id: Some(45) });
    }

    #[test]
    fn delete_requires_positive_record_id() {
        let r = parse(&Method::DELETE, "/api/hr/persons/v1/45").unwrap();
        assert_eq!(r.verb, Verb::Delete { record_id: 45 });
        assert!(bad(Method::DELETE, "/api/hr/persons/v1").contains("invalid URL"));
        assert!(bad(Method::DELETE, "/api/hr/persons/v1/0").contains("> 0"));
    }

    #[test]
    fn post_ignores_record_segment_but_validates_it() {
        assert_eq!(parse(&Method::POST, "/api/hr/employees/v1/7").unwrap().verb, Verb::Post);
        assert!(bad(Method::POST, "/api/hr/employees/v1/abc").contains("integer expected"));
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(bad(Method::GET, "/api/hr/employees").contains("record ID is optional"));
        assert!(bad(Method::GET, "/api/hr/employees/v1/2/3").contains("invalid URL"));
        assert!(bad(Method::GET, "/api/hr//v1").contains("invalid URL"));
        assert!(bad(Method::GET, "/data/hr/employees/v1").contains("invalid URL"));
        assert!(bad(Method::GET, "/api/hr/employees/1").contains("expected: 'v12'"));
        assert!(bad(Method::GET, "/api/hr/employees/vx").contains("expected: 'v12'"));
        assert!(bad(Method::GET, "/api/hr/employees/v1/-3").contains("integer expected"));
        assert!(bad(Method::GET, "/api/hr/employees/v1/x").contains("integer expected"));
    }

    #[test]
    fn rejects_other_methods() {
        assert_eq!(bad(Method::PUT, "/api/hr/employees/v1"), "invalid HTTP method");
        assert_eq!(bad(Method::PATCH, "/api/hr/employees/v1/1"), "invalid HTTP method");
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn getters_default_to_api_settings() {
        let g = parse_getters(&params(&[("foo", "bar")]), 25, true).unwrap();
        assert_eq!(g, Getters { limit: 25, offset: 0, verbose: true });
    }

    #[test]
    fn getters_override_defaults() {
        let g = parse_getters(&params(&[("limit", "5"), ("offset", "10"), ("verbose", "0")]), 25, true).unwrap();
        assert_eq!(g, Getters { limit: 5, offset: 10, verbose: false });
        assert!(parse_getters(&params(&[("verbose", "1")]), 25, false).unwrap().verbose);
    }

    #[test]
    fn getters_reject_bad_or_repeated_values() {
        assert!(parse_getters(&params(&[("limit", "ten")]), 25, false).is_err());
        assert!(parse_getters(&params(&[("offset", "-1")]), 25, false).is_err());
        assert!(parse_getters(&params(&[("limit", "1"), ("limit", "2")]), 25, false).is_err());
    }
}

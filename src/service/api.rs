use crate::auth::Login;
use crate::codec::{decode_body, encode_compact, encode_verbose};
use crate::data::{resolve_lookups, DataError, DataStore, DataTx, ImportRequest};
use crate::error::AppError;
use crate::plan::{build_get, delete_cascade, resolve_ids};
use crate::request::{Getters, Verb};
use crate::schema::{Api, SchemaCache};
use serde_json::Value;

/// One resolved API call.
#[derive(Clone, Copy, Debug)]
pub struct ApiCall<'a> {
    pub api: &'a Api,
    pub verb: Verb,
    pub getters: Getters,
    /// Raw request body; only read for POST.
    pub body: &'a [u8],
    pub login: &'a Login,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApiOutput {
    /// Encoded rows (compact or verbose).
    Rows(Value),
    /// Record id per relation index, ascending by index.
    Ids(Vec<i64>),
    /// Number of records removed by the cascade.
    Deleted(usize),
}

/// Run one call inside a single transaction. Any error drops the transaction, which rolls it back.
pub async fn execute(store: &dyn DataStore, schema: &SchemaCache, call: ApiCall<'_>) -> Result<ApiOutput, AppError> {
    let mut tx = store.begin(schema).await.map_err(DataError::unavailable)?;

    let output = match call.verb {
        Verb::Get { record_id } => get(schema, tx.as_mut(), &call, record_id).await?,
        Verb::Post => post(schema, tx.as_mut(), &call).await?,
        Verb::Delete { record_id } => {
            let resolved = resolve_ids(schema, &call.api.query, record_id, tx.as_mut()).await?;
            ApiOutput::Deleted(delete_cascade(&call.api.query, &resolved, tx.as_mut(), call.login.id).await?)
        }
    };

    tx.commit().await.map_err(DataError::unavailable)?;
    Ok(output)
}

async fn get(
    schema: &SchemaCache,
    tx: &mut dyn DataTx,
    call: &ApiCall<'_>,
    record_id: Option<i64>,
) -> Result<ApiOutput, AppError> {
    let plan = build_get(schema, call.api, record_id, &call.getters, call.login.id, &call.login.language_code)?;
    let result = tx.get(&plan, call.login.id).await.map_err(DataError::unavailable)?;
    tracing::debug!(query = %result.query, rows = result.rows.len(), "data get");

    let rows = if call.getters.verbose {
        encode_verbose(schema, &call.api.columns, result.rows)?
    } else {
        encode_compact(result.rows)
    };
    Ok(ApiOutput::Rows(rows))
}

async fn post(schema: &SchemaCache, tx: &mut dyn DataTx, call: &ApiCall<'_>) -> Result<ApiOutput, AppError> {
    let api = call.api;
    let values = decode_body(schema, call.body, &api.columns, call.getters.verbose)?;
    let resolved = resolve_lookups(&api.query.joins, &api.query.lookups);

    let ids = tx
        .import(ImportRequest {
            login_id: call.login.id,
            values: &values,
            columns: &api.columns,
            joins: &api.query.joins,
            lookups: &api.query.lookups,
            resolved: &resolved,
        })
        .await
        .map_err(|e| AppError::conflict("records could not be imported", e))?;
    Ok(ApiOutput::Ids(ids.into_values().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryStore;
    use crate::schema::fixtures::*;
    use serde_json::json;

    fn login() -> Login {
        Login {
            id: 1,
            admin: false,
            no_auth: false,
            language_code: "en_us".into(),
        }
    }

    fn getters(verbose: bool) -> Getters {
        Getters {
            limit: 10,
            offset: 0,
            verbose,
        }
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(REL_DEPARTMENT, 9, &[(ATR_DEPARTMENT_NAME, json!("IT"))]);
        store.seed(
            REL_EMPLOYEE,
            11,
            &[
                (ATR_EMPLOYEE_FIRSTNAME, json!("Hans")),
                (ATR_EMPLOYEE_AGE, json!(47)),
                (ATR_EMPLOYEE_DEPARTMENT, json!(9)),
            ],
        );
        store
    }

    #[tokio::test]
    async fn get_encodes_compact_and_verbose() {
        let cache = cache();
        let store = seeded();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let login = login();

        let compact = execute(
            &store,
            &cache,
            ApiCall { api, verb: Verb::Get { record_id: None }, getters: getters(false), body: &[], login: &login },
        )
        .await
        .unwrap();
        assert_eq!(compact, ApiOutput::Rows(json!([["Hans", 47, "IT"]])));

        let verbose = execute(
            &store,
            &cache,
            ApiCall { api, verb: Verb::Get { record_id: Some(11) }, getters: getters(true), body: &[], login: &login },
        )
        .await
        .unwrap();
        assert_eq!(
            verbose,
            ApiOutput::Rows(json!([{"0(employee)": {"firstname": "Hans", "age": 47}, "1(department)": {"name": "IT"}}]))
        );
    }

    #[tokio::test]
    async fn post_returns_ids_by_relation_index() {
        let cache = cache();
        let store = MemoryStore::new();
        let api = cache.api_by_name("hr", "employees", 1).unwrap();
        let login = login();
        let body = br#"{"1(department)": {"name": "IT"}, "0(employee)": {"firstname": "Hans", "age": 47}}"#;

        let out = execute(
            &store,
            &cache,
            ApiCall { api, verb: Verb::Post, getters: getters(true), body, login: &login },
        )
        .await
        .unwrap();
        let ApiOutput::Ids(ids) = out else { panic!("expected ids") };
        assert_eq!(ids.len(), 2);
        let employee = store.record(REL_EMPLOYEE, ids[0]).unwrap();
        assert_eq!(employee[&ATR_EMPLOYEE_DEPARTMENT], json!(ids[1]));
        assert!(store.contains(REL_DEPARTMENT, ids[1]));
    }

    #[tokio::test]
    async fn failed_delete_rolls_back_whole_cascade() {
        let cache = cache();
        let store = MemoryStore::new();
        store.seed(REL_PERSON, 3, &[(ATR_PERSON_DEPT, json!(9))]);
        store.seed(REL_DEPARTMENT, 9, &[(ATR_DEPARTMENT_NAME, json!("IT"))]);
        store.seed(REL_EMPLOYEE, 11, &[(ATR_EMPLOYEE_DEPARTMENT, json!(9))]);
        store.fail_delete(REL_EMPLOYEE, 11);
        let api = cache.api_by_name("hr", "persons", 1).unwrap();
        let login = login();

        let err = execute(
            &store,
            &cache,
            ApiCall { api, verb: Verb::Delete { record_id: 3 }, getters: getters(false), body: &[], login: &login },
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
        assert!(store.contains(REL_PERSON, 3));
        assert!(store.contains(REL_DEPARTMENT, 9));
    }

    #[tokio::test]
    async fn delete_cascades_and_commits() {
        let cache = cache();
        let store = MemoryStore::new();
        store.seed(REL_PERSON, 3, &[(ATR_PERSON_DEPT, json!(9))]);
        store.seed(REL_DEPARTMENT, 9, &[(ATR_DEPARTMENT_NAME, json!("IT"))]);
        store.seed(REL_EMPLOYEE, 11, &[(ATR_EMPLOYEE_DEPARTMENT, json!(9))]);
        store.seed(REL_EMPLOYEE, 12, &[(ATR_EMPLOYEE_DEPARTMENT, json!(8))]);
        let api = cache.api_by_name("hr", "persons", 1).unwrap();
        let login = login();

        let out = execute(
            &store,
            &cache,
            ApiCall { api, verb: Verb::Delete { record_id: 3 }, getters: getters(false), body: &[], login: &login },
        )
        .await
        .unwrap();
        assert_eq!(out, ApiOutput::Deleted(3));
        assert!(!store.contains(REL_PERSON, 3));
        assert!(!store.contains(REL_EMPLOYEE, 11));
        assert!(store.contains(REL_EMPLOYEE, 12));
    }
}

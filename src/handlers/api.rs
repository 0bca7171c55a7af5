//! `GET|POST|DELETE /api/{module}/{api}/v{version}[/{record_id}]`.

use crate::error::AppError;
use crate::extractors::Origin;
use crate::handlers::authenticate;
use crate::request::{self, parse_getters};
use crate::response::api_response;
use crate::service::{self, resolve_api, ApiCall};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, Uri},
    response::Response,
};

pub async fn call_api(
    State(state): State<AppState>,
    origin: Origin,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let login = authenticate(&state, &origin, &headers)?;
    let request = request::parse(&method, uri.path())?;
    let Query(params) = Query::<Vec<(String, String)>>::try_from_uri(&uri)
        .map_err(|_| AppError::BadRequest("invalid query string".into()))?;

    // held until the response is encoded; reloads wait for it
    let schema = state.schema.read().await;
    let api = resolve_api(&schema, &request)?;
    let getters = parse_getters(&params, api.limit_def, api.verbose_def)?;

    tracing::info!(
        login_id = login.id,
        "'{}.{}' (v{}) is called with {} (record ID: {})",
        request.module,
        request.api,
        request.version,
        request.verb.name(),
        request.verb.record_id().unwrap_or_default()
    );

    let call = ApiCall {
        api,
        verb: request.verb,
        getters,
        body: &body,
        login: &login,
    };
    let output = tokio::time::timeout(state.db_timeout, service::execute(state.store.as_ref(), &schema, call))
        .await
        .map_err(|_| AppError::unavailable(format!("request exceeded deadline of {:?}", state.db_timeout)))??;
    Ok(api_response(output))
}

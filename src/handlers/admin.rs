//! Schema administration.

use crate::error::AppError;
use crate::extractors::Origin;
use crate::handlers::authenticate;
use crate::schema::reload;
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use serde_json::Value;

/// `POST /admin/schema/reload`: re-read metadata from the configured source and swap the cache.
pub async fn reload_schema(
    State(state): State<AppState>,
    origin: Origin,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let login = authenticate(&state, &origin, &headers)?;
    if !login.admin {
        return Err(AppError::Unauthorized);
    }
    let source = state
        .schema_source
        .as_ref()
        .ok_or_else(|| AppError::unavailable_with("schema reload is not configured"))?;
    tracing::debug!(login_id = login.id, "schema reload requested");
    let apis = reload(&state.schema, source).await?;
    Ok(Json(serde_json::json!({ "apis": apis })))
}

use crate::handlers::{admin::reload_schema, api::call_api};
use crate::state::AppState;
use axum::{
    routing::{any, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

/// The data API under `/api/` plus schema administration, with request bodies capped at `state.body_limit`.
pub fn api_routes(state: AppState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/api/*rest", any(call_api))
        .route("/admin/schema/reload", post(reload_schema))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

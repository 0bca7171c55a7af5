pub mod api;
pub mod common;

pub use api::api_routes;
pub use common::common_routes;

use crate::state::AppState;
use axum::Router;

/// Every route of the service.
pub fn app(state: AppState) -> Router {
    common_routes(state.clone()).merge(api_routes(state))
}

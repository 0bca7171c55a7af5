//! Request orchestration: API resolution and the per-verb transactional flow.

mod api;
mod resolver;

pub use api::{execute, ApiCall, ApiOutput};
pub use resolver::resolve_api;

//! Shared application state for all routes. The schema cache is reloadable at runtime.

use crate::auth::{Authenticator, Bruteforce};
use crate::data::DataStore;
use crate::schema::{SchemaSource, SharedSchema};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub schema: SharedSchema,
    /// Where `/admin/schema/reload` reads metadata from; `None` disables reloading.
    pub schema_source: Option<SchemaSource>,
    pub auth: Arc<dyn Authenticator>,
    pub bruteforce: Arc<Bruteforce>,
    /// Deadline for the transactional part of one API call.
    pub db_timeout: Duration,
    pub body_limit: usize,
}

//! Schema API: REST endpoints compiled from metadata. Joined reads, cascading deletes and
//! multi-relation imports over PostgreSQL, without per-API code.

pub mod auth;
pub mod codec;
pub mod data;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod plan;
pub mod request;
pub mod response;
pub mod retention;
pub mod routes;
pub mod schema;
pub mod service;
pub mod settings;
pub mod state;

pub use auth::{Authenticator, Bruteforce, Login, TokenTable};
pub use data::{DataStore, MemoryStore, PgStore};
pub use error::{AppError, SchemaError};
pub use response::{api_response, error_body};
pub use retention::{spawn_cleanup, RetentionSettings};
pub use routes::{api_routes, app, common_routes};
pub use schema::{load, reload, SchemaCache, SchemaSource, SharedSchema};
pub use settings::{Settings, SettingsError};
pub use state::AppState;

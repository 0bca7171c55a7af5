pub mod types;
pub mod cache;
pub mod loader;
pub mod validator;

#[cfg(test)]
pub(crate) mod fixtures;

pub use types::*;
pub use cache::*;
pub use loader::*;
pub use validator::*;

//! Taskeri REST boundary: transport, authentication chain and endpoints.

pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod error;
pub mod resources;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;
pub mod types;

pub use cached_client::CachedClient;
pub use client::ApiClient;
pub use error::ApiError;
pub use session::{AuthState, SessionStore};

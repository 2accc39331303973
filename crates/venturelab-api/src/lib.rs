//! VentureLab edge API: the platform's serverless functions as one axum
//! service.

pub mod audit;
pub mod auth;
pub mod backend;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

#[cfg(test)]
mod test_helpers;

pub use auth::{AccessTier, AuthContext, AuthVerifier, JwtVerifier, RemoteAuthVerifier};
pub use backend::{Backend, BackendError, InMemoryBackend, RestBackend};
pub use error::*;
pub use routes::*;
pub use server::*;
pub use state::*;

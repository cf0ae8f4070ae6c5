//! HTTP middleware for axum.
//!
//! - `auth` - Bearer token middleware and identity extractors
//! - `job_auth` - Shared-secret guard for scheduler endpoints

pub mod auth;
pub mod job_auth;

pub use auth::{auth_middleware, AuthRejection, AuthState, RequireAdmin, RequireAuth};
pub use job_auth::{JobAuthorized, JOB_SECRET_HEADER};

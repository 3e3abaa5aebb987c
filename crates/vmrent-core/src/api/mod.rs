//! REST API layer for the VM rental service.
//!
//! - `transport`: request/response values and the `Transport` seam (reqwest in production)
//! - `client`: typed `ApiClient` wrappers for auth, billing and VM endpoints
//! - `error`: `ApiError` classification of failed calls
//!
//! The API uses bearer token authentication; tokens are managed by `crate::auth`.

pub mod client;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{HttpTransport, Request, Response, Transport, TransportError};

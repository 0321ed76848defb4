//! HTTP API surface.

pub mod routes;

pub use routes::{ApiState, api_routes};

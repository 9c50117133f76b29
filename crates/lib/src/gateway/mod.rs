//! Gateway: HTTP surface for vendor webhooks and the manager API.
//!
//! Webhooks run the inbound pipeline synchronously and always answer 200 with a `status`
//! field; the manager routes read conversations, feedback and analyst reports.

mod api;
mod server;

pub use api::ApiError;
pub use server::{build_backend, router, run_gateway, GatewayState};

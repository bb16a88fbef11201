//! HTTP surface and scheduler dispatch for the otx backend.
//!
//! `routes::build_router` is the single entry point; `main.rs` attaches
//! middleware, starts the worker pool, and serves. Handlers are thin:
//! auth → parse → call into the service crates → map errors.

pub mod api_types;
pub mod auth;
pub mod dispatch;
pub mod registry;
pub mod routes;
pub mod state;

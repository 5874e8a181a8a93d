//! HTTP surface: routes, handlers and request-scoped middleware.

pub mod client;
pub mod health;
pub mod request_id;

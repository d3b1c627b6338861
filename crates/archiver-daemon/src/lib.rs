//! archiver-daemon - HTTP transport for the archiver task registry.
//!
//! The binary builds one [`TaskRegistry`](archiver_core::TaskRegistry),
//! wraps it in an [`AppState`] and serves [`handlers::router`] until SIGINT
//! or SIGTERM. This library half exists so the router can be driven from
//! tests without binding a socket.
//!
//! # Modules
//!
//! - [`error`]: [`ApiError`] and its HTTP status mapping
//! - [`handlers`]: request and response bodies, route handlers, router
//! - [`state`]: state shared across handlers

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use handlers::router;
pub use state::AppState;

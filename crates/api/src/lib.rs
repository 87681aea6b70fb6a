//! Sketch map HTTP API.
//!
//! Handlers validate input, store uploads and enqueue tasks; all image
//! processing happens in the worker. Exposed as a library so integration
//! tests and the binary share the same router.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;

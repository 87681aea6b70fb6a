//! Request handlers.
//!
//! Handlers validate input and enqueue tasks through the repositories in
//! `sketchmap_db`; errors are mapped via [`AppError`](crate::error::AppError).

pub mod create;
pub mod digitize;
pub mod results;

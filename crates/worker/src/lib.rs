//! Task worker for the sketch map service.
//!
//! Claims queued tasks from the database, runs the pipeline stages and
//! stores results or user-facing errors back on the task rows.

pub mod config;
pub mod context;
pub mod models;
pub mod runner;
pub mod tasks;

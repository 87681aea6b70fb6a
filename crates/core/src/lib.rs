//! Domain types shared by the sketch map API, worker and pipeline.
//!
//! Pure data and validation only; no I/O lives here.

pub mod colors;
pub mod error;
pub mod layer;
pub mod paper_format;
pub mod qr_payload;
pub mod request;
pub mod types;
pub mod validation;

/// Version stamped into every QR code and map frame row.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

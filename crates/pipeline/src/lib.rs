//! Image and geodata processing for sketch maps.
//!
//! Everything here is synchronous and CPU bound except the HTTP clients in
//! [`basemap`] and [`quality_report::oqt`]. Workers run the CPU stages on
//! the blocking pool.

pub mod basemap;
pub mod bundle;
pub mod clip;
pub mod detect;
pub mod digitize;
pub mod georeference;
pub mod merge;
pub mod pdf;
pub mod polygonize;
pub mod postprocess;
pub mod projection;
pub mod qr;
pub mod quality_report;
pub mod raster;
pub mod sketch_map;

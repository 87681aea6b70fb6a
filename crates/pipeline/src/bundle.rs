//! Zip bundle of georeferenced rasters with an attribution file.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use sketchmap_core::error::CoreError;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const ATTRIBUTIONS_FILE: &str = "attributions.txt";

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BundleError> for CoreError {
    fn from(err: BundleError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

/// One clipped, georeferenced upload.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    /// File name stem of the upload.
    pub stem: String,
    pub geotiff: Vec<u8>,
}

/// Archive name for `stem`, suffixed with a counter when already taken.
fn unique_name(stem: &str, taken: &mut HashSet<String>) -> String {
    let mut name = format!("{stem}.geotiff");
    let mut n = 1;
    while !taken.insert(name.clone()) {
        name = format!("{stem}_{n}.geotiff");
        n += 1;
    }
    name
}

/// Zip all entries as `<stem>.geotiff` plus `attributions.txt` holding one
/// attribution per line block, duplicates removed.
pub fn build_raster_bundle(entries: &[BundleEntry], attributions: &[String]) -> Result<Vec<u8>, BundleError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let mut taken = HashSet::new();

    for entry in entries {
        zip.start_file(unique_name(&entry.stem, &mut taken), options)?;
        zip.write_all(&entry.geotiff)?;
    }

    let mut seen = HashSet::new();
    let text: Vec<&str> = attributions
        .iter()
        .map(String::as_str)
        .filter(|a| seen.insert(*a))
        .collect();
    zip.start_file(ATTRIBUTIONS_FILE, options)?;
    zip.write_all(text.join("\n").as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

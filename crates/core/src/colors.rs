//! Ordered catalogue of marking colors.
//!
//! Index 0 is the background sentinel. Index `i >= 1` names the color the
//! classifier reports as label `i - 1`, so the catalogue order must follow
//! the training label order.

use crate::error::CoreError;

/// Raster value and color index reserved for "no marking".
pub const BACKGROUND_INDEX: u8 = 0;

/// Default catalogue in classifier label order.
pub const DEFAULT_COLORS: [&str; 7] = ["red", "blue", "green", "yellow", "pink", "turquoise", "white"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorCatalogue {
    names: Vec<String>,
}

impl Default for ColorCatalogue {
    fn default() -> Self {
        Self {
            names: DEFAULT_COLORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ColorCatalogue {
    /// Build a catalogue from names in label order.
    pub fn new(names: Vec<String>) -> Result<Self, CoreError> {
        if names.is_empty() {
            return Err(CoreError::Validation("The color catalogue must not be empty".into()));
        }
        if names.len() >= u8::MAX as usize {
            return Err(CoreError::Validation("The color catalogue has too many entries".into()));
        }
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() || names[..i].contains(name) {
                return Err(CoreError::Validation(format!(
                    "Invalid or duplicate color name '{name}'"
                )));
            }
        }
        Ok(Self { names })
    }

    /// Parse a comma separated list such as `red,blue,green`.
    pub fn from_csv(raw: &str) -> Result<Self, CoreError> {
        Self::new(
            raw.split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Name for a color index (1-based). The background index has no name.
    pub fn name(&self, index: u8) -> Option<&str> {
        if index == BACKGROUND_INDEX {
            return None;
        }
        self.names.get(index as usize - 1).map(String::as_str)
    }

    /// Color index for a classifier label (top-1 class id).
    pub fn index_for_label(&self, label: usize) -> Option<u8> {
        (label < self.names.len()).then(|| (label + 1) as u8)
    }

    /// Catalogue position of a color name, used for layer ordering.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_has_no_name() {
        let catalogue = ColorCatalogue::default();
        assert_eq!(catalogue.name(0), None);
        assert_eq!(catalogue.name(1), Some("red"));
        assert_eq!(catalogue.name(7), Some("white"));
        assert_eq!(catalogue.name(8), None);
    }

    #[test]
    fn labels_are_shifted_by_one() {
        let catalogue = ColorCatalogue::default();
        assert_eq!(catalogue.index_for_label(0), Some(1));
        assert_eq!(catalogue.index_for_label(6), Some(7));
        assert_eq!(catalogue.index_for_label(7), None);
    }

    #[test]
    fn csv_catalogue() {
        let catalogue = ColorCatalogue::from_csv("Black, blue,green").unwrap();
        assert_eq!(catalogue.names(), &["black", "blue", "green"]);
        assert_eq!(catalogue.position("green"), Some(2));
    }

    #[test]
    fn duplicates_are_rejected() {
        assert!(ColorCatalogue::from_csv("red,red").is_err());
        assert!(ColorCatalogue::from_csv(" , ").is_err());
    }
}

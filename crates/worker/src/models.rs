//! Marking models loaded once per worker process.
//!
//! Tasks borrow the models through the registry held by the worker
//! context; nothing is cached in globals.

use std::sync::Arc;

use sketchmap_core::error::CoreError;
use sketchmap_core::layer::WeightFamily;
use sketchmap_pipeline::detect::models::{MarkingModels, PromptSegmenter};

use crate::config::ModelConfig;

pub struct ModelRegistry {
    osm: MarkingModels,
    esri: MarkingModels,
    segmenter: Arc<dyn PromptSegmenter>,
}

impl ModelRegistry {
    pub fn new(osm: MarkingModels, esri: MarkingModels, segmenter: Arc<dyn PromptSegmenter>) -> Self {
        Self { osm, esri, segmenter }
    }

    /// Detector and classifier trained for the base map family.
    pub fn markings(&self, family: WeightFamily) -> &MarkingModels {
        match family {
            WeightFamily::Osm => &self.osm,
            WeightFamily::Esri => &self.esri,
        }
    }

    /// Shared handle, so blocking stages can own it.
    pub fn segmenter(&self) -> Arc<dyn PromptSegmenter> {
        Arc::clone(&self.segmenter)
    }

    /// Load all TorchScript weights from the weights directory on the GPU
    /// when one is available.
    #[cfg(feature = "with-tch")]
    pub fn load(config: &ModelConfig) -> Result<Self, CoreError> {
        use sketchmap_pipeline::detect::torch::{default_device, TorchClassifier, TorchDetector, TorchSegmenter};

        let device = default_device();
        tracing::info!(?device, weights_dir = %config.weights_dir.display(), "Loading marking models");
        let load_pair = |obj: &str, cls: &str| -> Result<MarkingModels, CoreError> {
            Ok(MarkingModels {
                detector: Arc::new(TorchDetector::new(&config.path(obj), device)?),
                classifier: Arc::new(TorchClassifier::new(&config.path(cls), device)?),
            })
        };
        let osm = load_pair(&config.yolo_osm_obj, &config.yolo_osm_cls)?;
        let esri = load_pair(&config.yolo_esri_obj, &config.yolo_esri_cls)?;
        let segmenter = TorchSegmenter::new(&config.path(&config.sam_file()), device)?;
        Ok(Self::new(osm, esri, Arc::new(segmenter)))
    }

    #[cfg(not(feature = "with-tch"))]
    pub fn load(config: &ModelConfig) -> Result<Self, CoreError> {
        Err(CoreError::ModelInference(format!(
            "Marking models in {} cannot be loaded: the worker was built without the with-tch feature.",
            config.weights_dir.display()
        )))
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_resolve_to_their_models() {
        let registry = fakes::registry();
        let osm = registry.markings(WeightFamily::Osm) as *const MarkingModels;
        let esri = registry.markings(WeightFamily::Esri) as *const MarkingModels;
        assert_ne!(osm, esri);
    }

    #[cfg(not(feature = "with-tch"))]
    #[test]
    fn loading_without_torch_is_a_model_error() {
        let config = ModelConfig {
            weights_dir: std::path::PathBuf::from("./weights"),
            yolo_osm_obj: String::new(),
            yolo_osm_cls: String::new(),
            yolo_esri_obj: String::new(),
            yolo_esri_cls: String::new(),
            sam_model_type: "vit_b".into(),
        };
        let err = ModelRegistry::load(&config).unwrap_err();
        assert_eq!(err.kind_name(), "ModelInferenceError");
    }
}

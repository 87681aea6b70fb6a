use std::sync::Arc;

use sketchmap_core::error::CoreError;
use sketchmap_db::DbPool;
use sketchmap_pipeline::basemap::BaseMaps;
use sketchmap_pipeline::quality_report::oqt::OqtClient;

use crate::config::WorkerConfig;
use crate::models::ModelRegistry;

/// Long-lived handles shared by all tasks of one worker process.
pub struct WorkerContext {
    pub pool: DbPool,
    pub config: Arc<WorkerConfig>,
    pub base_maps: BaseMaps,
    pub oqt: OqtClient,
    /// `None` when the marking models could not be loaded.
    models: Option<Arc<ModelRegistry>>,
}

impl WorkerContext {
    pub fn new(pool: DbPool, config: WorkerConfig, models: Option<ModelRegistry>) -> Result<Self, CoreError> {
        let base_maps = BaseMaps::new(&config.base_maps)?;
        let oqt = OqtClient::new(config.oqt_url.clone(), &config.base_maps.user_agent)?;
        Ok(Self {
            pool,
            config: Arc::new(config),
            base_maps,
            oqt,
            models: models.map(Arc::new),
        })
    }

    /// Marking models, or a model error for workers started without them.
    pub fn models(&self) -> Result<Arc<ModelRegistry>, CoreError> {
        self.models.clone().ok_or_else(|| {
            CoreError::ModelInference("Marking models are not available on this worker.".into())
        })
    }
}

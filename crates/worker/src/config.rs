use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sketchmap_core::colors::ColorCatalogue;
use sketchmap_core::request::{ALL_TASK_KINDS, TASK_VECTOR_FILE};
use sketchmap_pipeline::basemap::wms::WmsLayer;
use sketchmap_pipeline::basemap::BaseMapConfig;
use sketchmap_pipeline::clip::PlausibilityBand;
use sketchmap_pipeline::digitize::DigitizeConfig;
use sketchmap_pipeline::postprocess::{PostProcessConfig, DEFAULT_POINT_AREA_THRESHOLD};

const OSM_WMS_URL: &str = "https://maps.heigit.org/osm-carto/service?SERVICE=WMS&VERSION=1.1.1";
const ESRI_WMS_URL: &str = "https://maps.heigit.org/esri/service?SERVICE=WMS&VERSION=1.1.1";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse()
        .unwrap_or_else(|e| panic!("{key} is invalid: {e}"))
}

/// TorchScript weight files of the marking models.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub weights_dir: PathBuf,
    pub yolo_osm_obj: String,
    pub yolo_osm_cls: String,
    pub yolo_esri_obj: String,
    pub yolo_esri_cls: String,
    /// Segmenter variant, resolved to `sam_<type>.torchscript`.
    pub sam_model_type: String,
}

impl ModelConfig {
    pub fn path(&self, file: &str) -> PathBuf {
        self.weights_dir.join(file)
    }

    pub fn sam_file(&self) -> String {
        format!("sam_{}.torchscript", self.sam_model_type)
    }
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name recorded on claimed tasks.
    pub name: String,
    /// Tasks processed at the same time by this process.
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Task kinds this worker claims.
    pub task_kinds: Vec<String>,
    /// Running tasks older than this are failed by the stale task sweep.
    pub stale_after: Duration,
    pub base_maps: BaseMapConfig,
    pub oqt_url: String,
    pub models: ModelConfig,
    pub digitize: DigitizeConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                                     | Default                              |
    /// |---------------------------------------------|--------------------------------------|
    /// | `SMT_WORKER_NAME`                           | `worker-<pid>`                       |
    /// | `SMT_WORKER_CONCURRENCY`                    | `2`                                  |
    /// | `SMT_WORKER_POLL_MS`                        | `500`                                |
    /// | `SMT_WORKER_TASKS`                          | all task kinds (comma separated)     |
    /// | `SMT_TASK_STALE_SECS`                       | `3600`                               |
    /// | `SMT_WMS_URL_OSM`                           | heigit osm-carto WMS                 |
    /// | `SMT_WMS_LAYERS_OSM`                        | `heigit:osm-carto@2xx`               |
    /// | `SMT_WMS_URL_ESRI_WORLD_IMAGERY`            | heigit esri WMS                      |
    /// | `SMT_WMS_LAYERS_ESRI_WORLD_IMAGERY`         | `world_imagery`                      |
    /// | `SMT_WMS_URL_ESRI_WORLD_IMAGERY_FALLBACK`   | heigit esri WMS                      |
    /// | `SMT_WMS_LAYERS_ESRI_WORLD_IMAGERY_FALLBACK`| `world_imagery`                      |
    /// | `SMT_WMS_READ_TIMEOUT`                      | `600` (seconds)                      |
    /// | `SMT_OAM_API_URL`                           | `https://api.imagery.hotosm.org`     |
    /// | `SMT_USER_AGENT`                            | `sketch-map-tool`                    |
    /// | `SMT_OQT_URL`                               | `https://oqt.ohsome.org/api`         |
    /// | `SMT_WEIGHTS_DIR`                           | `./weights`                          |
    /// | `SMT_YOLO_OSM_OBJ` / `SMT_YOLO_OSM_CLS`     | `yolo-osm-obj.torchscript`, ...      |
    /// | `SMT_YOLO_ESRI_OBJ` / `SMT_YOLO_ESRI_CLS`   | `yolo-esri-obj.torchscript`, ...     |
    /// | `SMT_MODEL_TYPE_SAM`                        | `vit_b`                              |
    /// | `SMT_COLORS`                                | `red,blue,green,yellow,pink,turquoise,white` |
    /// | `SMT_POINT_AREA_THRESHOLD`                  | `0.00047`                            |
    /// | `SMT_CLIP_PLAUSIBILITY`                     | `1500,0` (`off` disables the filter) |
    pub fn from_env() -> Self {
        let name = std::env::var("SMT_WORKER_NAME")
            .unwrap_or_else(|_| format!("worker-{}", std::process::id()));
        let concurrency: usize = parse_env("SMT_WORKER_CONCURRENCY", "2");
        assert!(concurrency > 0, "SMT_WORKER_CONCURRENCY must be at least 1");
        let poll_ms: u64 = parse_env("SMT_WORKER_POLL_MS", "500");
        let task_kinds = match std::env::var("SMT_WORKER_TASKS") {
            Ok(raw) => parse_task_kinds(&raw).unwrap_or_else(|e| panic!("SMT_WORKER_TASKS is invalid: {e}")),
            Err(_) => ALL_TASK_KINDS.iter().map(|k| k.to_string()).collect(),
        };
        let stale_secs: u64 = parse_env("SMT_TASK_STALE_SECS", "3600");
        assert!(stale_secs > 0, "SMT_TASK_STALE_SECS must be at least 1");

        let user_agent = env_or("SMT_USER_AGENT", "sketch-map-tool");
        let esri_url = env_or("SMT_WMS_URL_ESRI_WORLD_IMAGERY", ESRI_WMS_URL);
        let esri_layers = env_or("SMT_WMS_LAYERS_ESRI_WORLD_IMAGERY", "world_imagery");
        let base_maps = BaseMapConfig {
            osm: WmsLayer {
                url: env_or("SMT_WMS_URL_OSM", OSM_WMS_URL),
                layers: env_or("SMT_WMS_LAYERS_OSM", "heigit:osm-carto@2xx"),
                format: "image/png".into(),
            },
            esri_world_imagery_fallback: WmsLayer {
                url: env_or("SMT_WMS_URL_ESRI_WORLD_IMAGERY_FALLBACK", &esri_url),
                layers: env_or("SMT_WMS_LAYERS_ESRI_WORLD_IMAGERY_FALLBACK", &esri_layers),
                format: "image/jpeg".into(),
            },
            esri_world_imagery: WmsLayer {
                url: esri_url,
                layers: esri_layers,
                format: "image/jpeg".into(),
            },
            read_timeout: Duration::from_secs(parse_env("SMT_WMS_READ_TIMEOUT", "600")),
            oam_api_url: env_or("SMT_OAM_API_URL", "https://api.imagery.hotosm.org"),
            user_agent,
        };

        let models = ModelConfig {
            weights_dir: PathBuf::from(env_or("SMT_WEIGHTS_DIR", "./weights")),
            yolo_osm_obj: env_or("SMT_YOLO_OSM_OBJ", "yolo-osm-obj.torchscript"),
            yolo_osm_cls: env_or("SMT_YOLO_OSM_CLS", "yolo-osm-cls.torchscript"),
            yolo_esri_obj: env_or("SMT_YOLO_ESRI_OBJ", "yolo-esri-obj.torchscript"),
            yolo_esri_cls: env_or("SMT_YOLO_ESRI_CLS", "yolo-esri-cls.torchscript"),
            sam_model_type: env_or("SMT_MODEL_TYPE_SAM", "vit_b"),
        };

        let catalogue = match std::env::var("SMT_COLORS") {
            Ok(raw) => ColorCatalogue::from_csv(&raw).unwrap_or_else(|e| panic!("SMT_COLORS is invalid: {e}")),
            Err(_) => ColorCatalogue::default(),
        };
        let point_area_threshold: f64 =
            parse_env("SMT_POINT_AREA_THRESHOLD", &DEFAULT_POINT_AREA_THRESHOLD.to_string());
        let mut digitize = DigitizeConfig {
            post: PostProcessConfig {
                catalogue,
                point_area_threshold,
            },
            ..DigitizeConfig::default()
        };
        if let Ok(raw) = std::env::var("SMT_CLIP_PLAUSIBILITY") {
            digitize.clip.plausibility = parse_plausibility(&raw)
                .unwrap_or_else(|| panic!("SMT_CLIP_PLAUSIBILITY is invalid: {raw}"));
        }

        Self {
            name,
            concurrency,
            poll_interval: Duration::from_millis(poll_ms),
            task_kinds,
            stale_after: Duration::from_secs(stale_secs),
            base_maps,
            oqt_url: env_or("SMT_OQT_URL", "https://oqt.ohsome.org/api"),
            models,
            digitize,
        }
    }

    pub fn serves(&self, kind: &str) -> bool {
        self.task_kinds.iter().any(|k| k == kind)
    }

    /// Vector digitize tasks need the marking models.
    pub fn needs_models(&self) -> bool {
        self.serves(TASK_VECTOR_FILE)
    }
}

/// Comma separated task kinds, each one of [`ALL_TASK_KINDS`].
fn parse_task_kinds(raw: &str) -> Result<Vec<String>, String> {
    let kinds: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_owned)
        .collect();
    if kinds.is_empty() {
        return Err("no task kinds given".into());
    }
    match kinds.iter().find(|k| !ALL_TASK_KINDS.contains(&k.as_str())) {
        Some(unknown) => Err(format!("unknown task kind '{unknown}'")),
        None => Ok(kinds),
    }
}

/// `"<max_tx>,<max_ty>"` or `off`. The outer `None` marks invalid input.
fn parse_plausibility(raw: &str) -> Option<Option<PlausibilityBand>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("off") {
        return Some(None);
    }
    let (tx, ty) = raw.split_once(',')?;
    Some(Some(PlausibilityBand {
        max_tx: tx.trim().parse().ok()?,
        max_ty: ty.trim().parse().ok()?,
    }))
}

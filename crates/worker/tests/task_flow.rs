//! Task runner tests against a throwaway database.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use serde_json::json;
use sketchmap_core::layer::Layer;
use sketchmap_core::qr_payload::QrPayload;
use sketchmap_core::request::{
    TASK_RASTER_BUNDLE, TASK_RASTER_FILE, TASK_SKETCH_MAP, TASK_VECTOR_FILE, TASK_VECTOR_MERGE,
};
use sketchmap_core::types::Bbox;
use sketchmap_core::VERSION;
use sketchmap_db::models::blob::NewBlob;
use sketchmap_db::models::map_frame::NewMapFrame;
use sketchmap_db::models::status::TaskStatus;
use sketchmap_db::models::task::NewTask;
use sketchmap_db::repositories::{BlobRepo, MapFrameRepo, TaskRepo};
use sketchmap_pipeline::detect::models::{
    BoundingBox, ColorClassifier, MarkingModels, ObjectDetector, PromptSegmenter,
};
use sketchmap_pipeline::detect::DetectError;
use sketchmap_pipeline::qr::render_payload;
use sketchmap_pipeline::raster::encode_png;
use sketchmap_worker::config::WorkerConfig;
use sketchmap_worker::context::WorkerContext;
use sketchmap_worker::models::ModelRegistry;
use sketchmap_worker::runner::{fail_stale_tasks, process_next, STALE_TASK_ERROR};
use sqlx::PgPool;
use uuid::Uuid;

fn context(pool: PgPool) -> WorkerContext {
    WorkerContext::new(pool, WorkerConfig::from_env(), None).unwrap()
}

fn is_red_pen(p: &Rgb<u8>) -> bool {
    p.0[0] > 150 && p.0[1] < 90 && p.0[2] < 90
}

/// Stand-in for the trained models: finds saturated red ink on the clipped
/// sketch and segments exactly those pixels.
struct RedPen;

impl ObjectDetector for RedPen {
    fn detect(&self, image: &RgbImage, _difference: &GrayImage) -> Result<Vec<BoundingBox>, DetectError> {
        let red: Vec<(u32, u32)> = image
            .enumerate_pixels()
            .filter(|(_, _, p)| is_red_pen(p))
            .map(|(x, y, _)| (x, y))
            .collect();
        if red.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            x0: red.iter().map(|p| p.0).min().unwrap_or(0) as f32,
            y0: red.iter().map(|p| p.1).min().unwrap_or(0) as f32,
            x1: red.iter().map(|p| p.0).max().unwrap_or(0) as f32 + 1.0,
            y1: red.iter().map(|p| p.1).max().unwrap_or(0) as f32 + 1.0,
        }])
    }
}

impl ColorClassifier for RedPen {
    fn classify(&self, _crop: &RgbImage) -> Result<usize, DetectError> {
        Ok(0)
    }
}

impl PromptSegmenter for RedPen {
    fn segment(&self, image: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<GrayImage>, DetectError> {
        Ok(boxes
            .iter()
            .map(|_| GrayImage::from_fn(image.width(), image.height(), |x, y| {
                Luma([if is_red_pen(image.get_pixel(x, y)) { 255 } else { 0 }])
            }))
            .collect())
    }
}

fn red_pen_context(pool: PgPool) -> WorkerContext {
    let models = MarkingModels {
        detector: Arc::new(RedPen),
        classifier: Arc::new(RedPen),
    };
    let registry = ModelRegistry::new(models.clone(), models, Arc::new(RedPen));
    WorkerContext::new(pool, WorkerConfig::from_env(), Some(registry)).unwrap()
}

/// Blank map frame template: dark blocks on paper colored background.
fn template() -> RgbImage {
    let mut img = RgbImage::from_pixel(320, 240, Rgb([235, 230, 220]));
    let mut state: u32 = 7;
    let mut next = |bound: u32| {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (state >> 16) % bound
    };
    for _ in 0..60 {
        let (rw, rh) = (6 + next(24), 6 + next(24));
        let (x0, y0) = (next(320 - rw), next(240 - rh));
        let shade = (10 + next(110)) as u8;
        for y in y0..y0 + rh {
            for x in x0..x0 + rw {
                img.put_pixel(x, y, Rgb([shade, shade / 2 + 20, 255 - shade]));
            }
        }
    }
    img
}

/// Store a map frame and return a photo of its printed page: the template
/// slightly enlarged and shifted on white paper, with the QR code next to it.
async fn printed_sketch(pool: &PgPool, with_red_line: bool) -> RgbImage {
    let uuid = Uuid::new_v4();
    let template = template();
    MapFrameRepo::insert(
        pool,
        &NewMapFrame {
            uuid,
            file: encode_png(&template).unwrap(),
            bbox: bbox(),
            lat: 49.39,
            lon: 8.67,
            format: "A4".into(),
            orientation: "landscape".into(),
            layer: "osm".into(),
            version: VERSION.to_string(),
        },
    )
    .await
    .unwrap();

    let mut photo = RgbImage::from_pixel(600, 320, Rgb([255, 255, 255]));
    let printed = image::imageops::resize(&template, 336, 252, image::imageops::FilterType::Triangle);
    image::imageops::replace(&mut photo, &printed, 20, 30);
    let payload = QrPayload {
        version: VERSION.to_string(),
        uuid,
        bbox: bbox(),
        layer: Layer::Osm,
    };
    let qr = DynamicImage::ImageLuma8(render_payload(&payload, 4).unwrap()).to_rgb8();
    image::imageops::replace(&mut photo, &qr, 380, 30);
    if with_red_line {
        for y in 140..148 {
            for x in 120..240 {
                photo.put_pixel(x, y, Rgb([220, 20, 20]));
            }
        }
    }
    photo
}

async fn run_until_idle(ctx: &WorkerContext) {
    for _ in 0..10 {
        if !process_next(ctx).await.unwrap() {
            return;
        }
    }
    panic!("queue did not drain");
}

fn bbox() -> Bbox {
    Bbox::new(964472.19, 6343459.03, 967434.6, 6345977.63).unwrap()
}

/// PNG holding nothing but the QR code of a map frame uuid.
fn qr_png(uuid: Uuid) -> Vec<u8> {
    let payload = QrPayload {
        version: VERSION.to_string(),
        uuid,
        bbox: bbox(),
        layer: Layer::Osm,
    };
    let gray = render_payload(&payload, 4).unwrap();
    encode_png(&DynamicImage::ImageLuma8(gray).to_rgb8()).unwrap()
}

async fn store_blob(pool: &PgPool, file: Vec<u8>) -> i64 {
    BlobRepo::insert(
        pool,
        &NewBlob {
            digitize_uuid: Uuid::new_v4(),
            file_name: "sketch.png".into(),
            file,
            consent: false,
        },
    )
    .await
    .unwrap()
}

async fn enqueue_group(pool: &PgPool, parent_kind: &'static str, child_kind: &'static str, n: usize) -> (NewTask, Vec<NewTask>) {
    let parent = NewTask::new(parent_kind, json!({}));
    let children: Vec<NewTask> = (0..n)
        .map(|i| NewTask::new(child_kind, json!({ "file_id": i as i64 + 1 })))
        .collect();
    let mut conn = pool.acquire().await.unwrap();
    TaskRepo::enqueue_group(&mut conn, &parent, &children).await.unwrap();
    (parent, children)
}

fn red_point_collection() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [8.67, 49.39] },
            "properties": { "color": "red", "name": "a.png" }
        }]
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Test: an empty queue yields nothing
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn empty_queue_processes_nothing(pool: PgPool) {
    let ctx = context(pool);
    assert!(!process_next(&ctx).await.unwrap());
}

// ---------------------------------------------------------------------------
// Test: per-file failures
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_map_frame_fails_the_file(pool: PgPool) {
    let file_id = store_blob(&pool, qr_png(Uuid::new_v4())).await;
    let task = NewTask::new(TASK_VECTOR_FILE, json!({ "file_id": file_id }));
    TaskRepo::enqueue(&pool, &task).await.unwrap();

    let ctx = context(pool.clone());
    assert!(process_next(&ctx).await.unwrap());

    let stored = TaskRepo::find(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TaskStatus::Failure);
    assert_matches!(stored.error.as_deref(), Some(e) if e.starts_with("CustomFileNotFoundError:"));
    assert_eq!(stored.recoverable, Some(true));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn upload_without_qr_code_fails_with_qr_error(pool: PgPool) {
    let blank = image::RgbImage::from_pixel(200, 150, image::Rgb([255, 255, 255]));
    let file_id = store_blob(&pool, encode_png(&blank).unwrap()).await;
    let task = NewTask::new(TASK_RASTER_FILE, json!({ "file_id": file_id }));
    TaskRepo::enqueue(&pool, &task).await.unwrap();

    let ctx = context(pool.clone());
    process_next(&ctx).await.unwrap();

    let stored = TaskRepo::find(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(stored.error.as_deref(), Some("QRCodeError: QR-Code could not be detected."));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn missing_blob_is_not_found(pool: PgPool) {
    let task = NewTask::new(TASK_VECTOR_FILE, json!({ "file_id": 4242 }));
    TaskRepo::enqueue(&pool, &task).await.unwrap();

    let ctx = context(pool.clone());
    process_next(&ctx).await.unwrap();

    let stored = TaskRepo::find(&pool, task.id).await.unwrap().unwrap();
    assert_matches!(stored.error.as_deref(), Some(e) if e.starts_with("UUIDNotFoundError:"));
}

// ---------------------------------------------------------------------------
// Test: group joins
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn merge_succeeds_with_errors_when_one_file_failed(pool: PgPool) {
    let (parent, children) = enqueue_group(&pool, TASK_VECTOR_MERGE, TASK_VECTOR_FILE, 2).await;
    TaskRepo::complete(&pool, children[0].id, &red_point_collection(), None)
        .await
        .unwrap();
    TaskRepo::fail(&pool, children[1].id, "QRCodeError: QR-Code could not be detected.", true)
        .await
        .unwrap();

    let ctx = context(pool.clone());
    assert!(process_next(&ctx).await.unwrap());

    let stored = TaskRepo::find(&pool, parent.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TaskStatus::Success);
    let meta = stored.result_meta.unwrap();
    assert_eq!(meta["errors"], json!(["QRCodeError: QR-Code could not be detected."]));
    assert_eq!(meta["progress"], json!({ "current": 2, "total": 2 }));

    let output = TaskRepo::output(&pool, parent.id).await.unwrap().unwrap();
    let merged: serde_json::Value = serde_json::from_slice(&output.result.unwrap()).unwrap();
    assert_eq!(merged["features"].as_array().unwrap().len(), 1);
    assert_eq!(merged["layers"], json!(["red"]));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn merge_fails_when_every_file_failed(pool: PgPool) {
    let (parent, children) = enqueue_group(&pool, TASK_VECTOR_MERGE, TASK_VECTOR_FILE, 1).await;
    TaskRepo::fail(
        &pool,
        children[0].id,
        "CustomFileNotFoundError: The map frame could not be found.",
        true,
    )
    .await
    .unwrap();

    let ctx = context(pool.clone());
    process_next(&ctx).await.unwrap();

    let stored = TaskRepo::find(&pool, parent.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TaskStatus::Failure);
    assert_eq!(
        stored.error.as_deref(),
        Some("CustomFileNotFoundError: The map frame could not be found.")
    );
    assert_eq!(stored.recoverable, Some(true));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn bundle_zips_successful_rasters(pool: PgPool) {
    let (parent, children) = enqueue_group(&pool, TASK_RASTER_BUNDLE, TASK_RASTER_FILE, 2).await;
    for child in &children {
        let meta = json!({
            "name": "sketch",
            "layer": "osm",
            "attribution": "Powered by OpenStreetMap\n©openstreetmap.org/copyright",
        });
        TaskRepo::complete(&pool, child.id, b"II*\0fake", Some(&meta))
            .await
            .unwrap();
    }

    let ctx = context(pool.clone());
    process_next(&ctx).await.unwrap();

    let stored = TaskRepo::find(&pool, parent.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TaskStatus::Success);
    let output = TaskRepo::output(&pool, parent.id).await.unwrap().unwrap();
    assert!(output.result.unwrap().starts_with(b"PK"));
}

// ---------------------------------------------------------------------------
// Test: the vector chain from uploaded photo to merged layers
// ---------------------------------------------------------------------------

async fn digitize_photo(pool: &PgPool, photo: &RgbImage) -> (Uuid, serde_json::Value) {
    let file_id = store_blob(pool, encode_png(photo).unwrap()).await;
    let parent = NewTask::new(TASK_VECTOR_MERGE, json!({}));
    let child = NewTask::new(TASK_VECTOR_FILE, json!({ "file_id": file_id }));
    let mut conn = pool.acquire().await.unwrap();
    TaskRepo::enqueue_group(&mut conn, &parent, std::slice::from_ref(&child))
        .await
        .unwrap();
    drop(conn);

    let ctx = red_pen_context(pool.clone());
    run_until_idle(&ctx).await;

    let child = TaskRepo::find(pool, child.id).await.unwrap().unwrap();
    assert_eq!(child.status(), TaskStatus::Success, "{:?}", child.error);
    let stored = TaskRepo::find(pool, parent.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TaskStatus::Success, "{:?}", stored.error);
    let output = TaskRepo::output(pool, parent.id).await.unwrap().unwrap();
    (parent.id, serde_json::from_slice(&output.result.unwrap()).unwrap())
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn red_line_on_photo_becomes_one_red_feature(pool: PgPool) {
    let photo = printed_sketch(&pool, true).await;
    let (_, merged) = digitize_photo(&pool, &photo).await;

    let features = merged["features"].as_array().unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0]["properties"]["color"], json!("red"));
    assert_eq!(features[0]["properties"]["name"], json!("sketch.png"));
    assert_eq!(merged["layers"], json!(["red"]));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unmarked_photo_merges_into_an_empty_layer(pool: PgPool) {
    let photo = printed_sketch(&pool, false).await;
    let (_, merged) = digitize_photo(&pool, &photo).await;

    assert!(merged["features"].as_array().unwrap().is_empty());
    assert_eq!(merged["layers"], json!(["sketch.png"]));
}

// ---------------------------------------------------------------------------
// Test: abandoned tasks are failed into their group
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn abandoned_file_is_failed_and_group_merges(pool: PgPool) {
    let (parent, children) = enqueue_group(&pool, TASK_VECTOR_MERGE, TASK_VECTOR_FILE, 2).await;
    TaskRepo::complete(&pool, children[0].id, &red_point_collection(), None)
        .await
        .unwrap();
    let stuck = TaskRepo::claim_next(&pool, "gone").await.unwrap().unwrap();
    assert_eq!(stuck.id, children[1].id);
    sqlx::query("UPDATE tasks SET claimed_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(stuck.id)
        .execute(&pool)
        .await
        .unwrap();

    let mut config = WorkerConfig::from_env();
    config.stale_after = Duration::from_secs(3600);
    let ctx = WorkerContext::new(pool.clone(), config, None).unwrap();
    assert_eq!(fail_stale_tasks(&ctx).await.unwrap(), 1);
    assert_eq!(fail_stale_tasks(&ctx).await.unwrap(), 0);

    assert!(process_next(&ctx).await.unwrap());
    let stored = TaskRepo::find(&pool, parent.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TaskStatus::Success);
    let meta = stored.result_meta.unwrap();
    assert_eq!(meta["errors"], json!([STALE_TASK_ERROR]));
}

// ---------------------------------------------------------------------------
// Test: workers only claim the task kinds they serve
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn create_only_worker_leaves_vector_tasks_queued(pool: PgPool) {
    let task = NewTask::new(TASK_VECTOR_FILE, json!({ "file_id": 1 }));
    TaskRepo::enqueue(&pool, &task).await.unwrap();

    let mut config = WorkerConfig::from_env();
    config.task_kinds = vec![TASK_SKETCH_MAP.to_string()];
    assert!(!config.needs_models());
    let ctx = WorkerContext::new(pool.clone(), config, None).unwrap();

    assert!(!process_next(&ctx).await.unwrap());
    let stored = TaskRepo::find(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), TaskStatus::Pending);
}

//! HTTP-level integration tests for the create flow and result polling.

mod common;

use axum::http::StatusCode;
use common::{body_bytes, body_json, build_test_app, get, post_form, redirect_uuid};
use sketchmap_core::request::{RequestType, TASK_QUALITY_REPORT, TASK_SKETCH_MAP};
use sketchmap_db::repositories::{TaskRepo, UuidMapRepo};
use sqlx::PgPool;

const FIELDS: [(&str, &str); 7] = [
    ("bbox", "[964472.19,6343459.03,967434.60,6345977.63]"),
    ("bboxWGS84", "[8.6638,49.3847,8.6904,49.3994]"),
    ("format", "A4"),
    ("orientation", "landscape"),
    ("size", r#"{"width":1716,"height":1436}"#),
    ("scale", "11545.12"),
    ("layer", "osm"),
];

fn fields_with(key: &str, value: &'static str) -> Vec<(&'static str, &'static str)> {
    FIELDS
        .iter()
        .map(|&(k, v)| if k == key { (k, value) } else { (k, v) })
        .collect()
}

// ---------------------------------------------------------------------------
// Test: a valid form enqueues both tasks and redirects
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn create_enqueues_tasks_and_redirects(pool: PgPool) {
    let response = post_form(build_test_app(pool.clone()), "/create/results", &FIELDS).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let uuid = redirect_uuid(&response, "/create/results/");
    assert_eq!(uuid.get_version_num(), 4);

    let entry = UuidMapRepo::find(&pool, uuid).await.unwrap().unwrap();
    let sketch_map = TaskRepo::find(&pool, entry.task_id(RequestType::SketchMap).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sketch_map.kind, TASK_SKETCH_MAP);
    assert_eq!(sketch_map.args["uuid"], uuid.to_string());
    assert_eq!(sketch_map.args["format"], "a4");
    assert_eq!(sketch_map.args["layer"], "osm");

    let report = TaskRepo::find(&pool, entry.task_id(RequestType::QualityReport).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.kind, TASK_QUALITY_REPORT);
}

// ---------------------------------------------------------------------------
// Test: invalid input is rejected with 400 and nothing is stored
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn invalid_bbox_returns_400(pool: PgPool) {
    let fields = fields_with("bbox", "[1,2,3]");
    let response = post_form(build_test_app(pool.clone()), "/create/results", &fields).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "ValueError");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn missing_field_returns_400(pool: PgPool) {
    let fields: Vec<_> = FIELDS.iter().copied().filter(|(k, _)| *k != "size").collect();
    let response = post_form(build_test_app(pool), "/create/results", &fields).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_layer_returns_400(pool: PgPool) {
    let fields = fields_with("layer", "google");
    let response = post_form(build_test_app(pool), "/create/results", &fields).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: results overview lists both result types
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn overview_lists_recorded_results(pool: PgPool) {
    let response = post_form(build_test_app(pool.clone()), "/create/results", &FIELDS).await;
    let uuid = redirect_uuid(&response, "/create/results/");

    let response = get(build_test_app(pool), &format!("/create/results/{uuid}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let results = json["data"]["results"].as_array().unwrap();
    let types: Vec<&str> = results.iter().map(|r| r["type"].as_str().unwrap()).collect();
    assert_eq!(types, ["sketch-map", "quality-report"]);
    assert_eq!(
        results[0]["status_href"],
        format!("/api/status/{uuid}/sketch-map")
    );
}

// ---------------------------------------------------------------------------
// Test: status is 202 while pending and 200 with href once finished
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn status_and_download_follow_task_state(pool: PgPool) {
    let response = post_form(build_test_app(pool.clone()), "/create/results", &FIELDS).await;
    let uuid = redirect_uuid(&response, "/create/results/");
    let status_uri = format!("/api/status/{uuid}/sketch-map");

    let response = get(build_test_app(pool.clone()), &status_uri).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "PENDING");
    assert_eq!(json["type"], "sketch-map");
    assert!(json.get("href").is_none());
    assert!(json.get("info").is_none());

    let download_uri = format!("/api/download/{uuid}/sketch-map");
    let response = get(build_test_app(pool.clone()), &download_uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let entry = UuidMapRepo::find(&pool, uuid).await.unwrap().unwrap();
    let task_id = entry.task_id(RequestType::SketchMap).unwrap();
    TaskRepo::complete(&pool, task_id, b"%PDF-1.4 test", None)
        .await
        .unwrap();

    let response = get(build_test_app(pool.clone()), &status_uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "SUCCESS");
    assert_eq!(json["href"], download_uri);

    let response = get(build_test_app(pool), &download_uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"sketch-map.pdf\""
    );
    assert_eq!(body_bytes(response).await, b"%PDF-1.4 test");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn failed_report_returns_500_with_error(pool: PgPool) {
    let response = post_form(build_test_app(pool.clone()), "/create/results", &FIELDS).await;
    let uuid = redirect_uuid(&response, "/create/results/");
    let entry = UuidMapRepo::find(&pool, uuid).await.unwrap().unwrap();
    let task_id = entry.task_id(RequestType::QualityReport).unwrap();
    TaskRepo::fail(&pool, task_id, "OQTReportError: service unavailable", false)
        .await
        .unwrap();

    let response = get(build_test_app(pool), &format!("/api/status/{uuid}/quality-report")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["status"], "FAILURE");
    assert_eq!(json["errors"][0], "OQTReportError: service unavailable");
}

// ---------------------------------------------------------------------------
// Test: malformed and unknown path parameters
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn status_rejects_bad_parameters(pool: PgPool) {
    let response = get(build_test_app(pool.clone()), "/api/status/not-a-uuid/sketch-map").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let unknown = uuid::Uuid::new_v4();
    let response = get(build_test_app(pool.clone()), &format!("/api/status/{unknown}/sketch-map")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "UUIDNotFoundError");

    let response = get(build_test_app(pool), &format!("/api/status/{unknown}/pdf")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("Allowed values are"));
}

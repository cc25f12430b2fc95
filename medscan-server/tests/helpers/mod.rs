//! Shared fixtures for medscan-server integration tests
//!
//! The classifier and compositor are replaced by small `sh` scripts written
//! into the test's temp directory, so every test crosses the real process
//! boundary.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use medscan_common::config::{ProcessConfig, RootLayout, TomlConfig};
use medscan_common::events::EventBus;
use medscan_common::{ScanIdentity, StoragePathResolver};
use medscan_server::db::scans::{self, NewScan};
use medscan_server::{build_router, AppState};

pub const CLASSIFIER_NORMAL: &str =
    r#"[ -f "$1" ] || exit 3
printf '%s' '{"predicted_class":"normal","probabilities":{"normal":0.6,"pneumonia":0.4},"gradcam":null}'"#;

pub const CLASSIFIER_ABNORMAL: &str =
    r#"printf '%s' '{"probabilities":{"normal":0.2,"pneumonia":0.8},"gradcam":"aGVhdG1hcA=="}'"#;

pub const CLASSIFIER_GARBAGE: &str = "echo 'model loaded'; echo 'not json'";

pub const CLASSIFIER_CRASH: &str = "echo 'Traceback (most recent call last)' >&2; exit 1";

pub const CLASSIFIER_HANG: &str = "exec sleep 30";

pub const COMPOSITOR_COPY: &str = r#"cp "$1" "$3""#;

pub const COMPOSITOR_SLOW_COPY: &str = r#"sleep 0.3; cp "$1" "$3""#;

pub const COMPOSITOR_FAIL: &str = "echo 'cannot read mask' >&2; exit 1";

pub const COMPOSITOR_NO_OUTPUT: &str = "exit 0";

/// A running service over a temp root folder
pub struct TestEnv {
    pub dir: TempDir,
    pub state: AppState,
    pub app: Router,
    pub paths: StoragePathResolver,
}

/// Write a script into `dir` and return a config that runs it with `sh`
pub fn script(dir: &Path, name: &str, body: &str) -> ProcessConfig {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    ProcessConfig {
        program: "sh".to_string(),
        args: vec![path.to_string_lossy().into_owned()],
        timeout_secs: 5,
        max_attempts: 1,
        retry_backoff_ms: 10,
    }
}

pub async fn setup(classifier: &str, compositor: &str) -> TestEnv {
    setup_with(classifier, compositor, |_| {}).await
}

/// Build a service, letting the caller adjust the config first
pub async fn setup_with(
    classifier: &str,
    compositor: &str,
    tweak: impl FnOnce(&mut TomlConfig),
) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let mut config = TomlConfig {
        classifier: script(dir.path(), "classifier.sh", classifier),
        compositor: script(dir.path(), "compositor.sh", compositor),
        ..TomlConfig::default()
    };
    tweak(&mut config);

    let (state, paths) = build_state(dir.path(), &config).await;
    let app = build_router(state.clone());

    TestEnv {
        dir,
        state,
        app,
        paths,
    }
}

/// Build state over `root` (re-using an existing database if present)
pub async fn build_state(root: &Path, config: &TomlConfig) -> (AppState, StoragePathResolver) {
    let layout = RootLayout::new(root.join("root"));
    layout.ensure_directory_exists().unwrap();
    let paths = StoragePathResolver::new(layout.storage_root());
    paths.ensure_layout().unwrap();

    let pool = medscan_server::db::init_database_pool(&layout.database_path())
        .await
        .unwrap();
    let state = AppState::new(pool, paths.clone(), config, EventBus::new(100));
    (state, paths)
}

pub fn identity() -> ScanIdentity {
    ScanIdentity::new("u1", "xray", "chest")
}

/// Register a scan and write its source image
pub async fn add_scan(env: &TestEnv, identity: &ScanIdentity) -> PathBuf {
    add_scan_sized(env, identity, 16, 12).await
}

pub async fn add_scan_sized(
    env: &TestEnv,
    identity: &ScanIdentity,
    width: u32,
    height: u32,
) -> PathBuf {
    let rel = env.paths.upload_path(identity, "png");
    let abs = env.paths.resolve(&rel).unwrap();
    RgbImage::from_pixel(width, height, Rgb([40, 40, 40]))
        .save(&abs)
        .unwrap();

    scans::insert_scan(
        &env.state.db,
        &NewScan {
            identity: identity.clone(),
            file_path: rel,
        },
    )
    .await
    .unwrap();
    abs
}

/// Leftover annotation attempts under the staging directory
pub fn staging_entries(env: &TestEnv) -> usize {
    std::fs::read_dir(env.paths.root().join(medscan_common::storage::STAGING_DIR))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// PNG data URL with a filled rectangle, as a drawing surface would send
pub fn mask_data_url(width: u32, height: u32) -> String {
    let mut mask = RgbaImage::new(width, height);
    for y in height / 4..height * 3 / 4 {
        for x in width / 4..width * 3 / 4 {
            mask.put_pixel(x, y, Rgba([255, 0, 0, 153]));
        }
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(mask)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "medscan.test:5780")
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, "medscan.test:5780")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// POST with a JSON content type and an arbitrary (possibly malformed) body
pub fn post_raw(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, "medscan.test:5780")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send a request and decode the JSON body (`Null` when empty)
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub fn predict_uri(id: &ScanIdentity) -> String {
    format!(
        "/scans/{}/{}/{}/ai/predict",
        id.owner_id, id.scan_type, id.custom_name
    )
}

pub fn feedback_uri(id: &ScanIdentity) -> String {
    format!(
        "/scans/{}/{}/{}/feedback",
        id.owner_id, id.scan_type, id.custom_name
    )
}

pub fn annotate_uri(id: &ScanIdentity) -> String {
    format!(
        "/annotations/{}/{}/{}/annotate",
        id.owner_id, id.scan_type, id.custom_name
    )
}

pub fn annotation_uri(id: &ScanIdentity) -> String {
    format!(
        "/annotations/{}/{}/{}",
        id.owner_id, id.scan_type, id.custom_name
    )
}

pub fn scan_uri(id: &ScanIdentity) -> String {
    format!("/scans/{}/{}/{}", id.owner_id, id.scan_type, id.custom_name)
}

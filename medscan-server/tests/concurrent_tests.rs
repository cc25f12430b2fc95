//! Concurrent access tests
//!
//! Write-once annotation under racing submitters, last-writer-wins
//! prediction, and detachment of external work from the caller.

#![cfg(unix)]

mod helpers;

use std::time::Duration;

use axum::http::StatusCode;
use helpers::*;
use medscan_common::PredictionResult;
use medscan_server::build_router;
use medscan_server::db::scans;
use serde_json::json;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_annotations_exactly_one_wins() {
    let env = setup(CLASSIFIER_NORMAL, COMPOSITOR_SLOW_COPY).await;
    let id = identity();
    add_scan(&env, &id).await;

    let mut join_set = JoinSet::new();
    for i in 0..8 {
        let app = env.app.clone();
        let uri = annotate_uri(&id);
        join_set.spawn(async move {
            let body = json!({ "maskData": mask_data_url(8, 6), "remarks": format!("r{}", i) });
            send(&app, post_json(&uri, body)).await
        });
    }

    let mut ok = Vec::new();
    let mut conflicts = 0;
    while let Some(result) = join_set.join_next().await {
        let (status, body) = result.expect("Task panicked");
        match status {
            StatusCode::OK => ok.push(body),
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {}: {}", other, body),
        }
    }

    assert_eq!(ok.len(), 1);
    assert_eq!(conflicts, 7);

    let stored = scans::find_scan(&env.state.db, &id)
        .await
        .unwrap()
        .unwrap()
        .annotation
        .unwrap();
    assert_eq!(ok[0]["annotation"]["remarks"], stored.remarks.as_str());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_write_once_holds_across_service_instances() {
    // Two services over one database do not share in-process locks;
    // the conditional update alone must keep the annotation single
    let env = setup(CLASSIFIER_NORMAL, COMPOSITOR_SLOW_COPY).await;
    let id = identity();
    add_scan(&env, &id).await;

    let config = medscan_common::config::TomlConfig {
        classifier: script(env.dir.path(), "classifier2.sh", CLASSIFIER_NORMAL),
        compositor: script(env.dir.path(), "compositor2.sh", COMPOSITOR_SLOW_COPY),
        ..Default::default()
    };
    let (other_state, _) = build_state(env.dir.path(), &config).await;
    let other_app = build_router(other_state);

    let first = {
        let app = env.app.clone();
        let uri = annotate_uri(&id);
        tokio::spawn(async move {
            send(&app, post_json(&uri, json!({ "maskData": mask_data_url(8, 6), "remarks": "a" }))).await
        })
    };
    let second = {
        let uri = annotate_uri(&id);
        tokio::spawn(async move {
            send(&other_app, post_json(&uri, json!({ "maskData": mask_data_url(30, 20), "remarks": "b" }))).await
        })
    };

    let (a, _) = first.await.unwrap();
    let (b, _) = second.await.unwrap();
    let statuses = [a, b];

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(),
        1
    );

    // The losing attempt must not have touched the winner's artifacts
    let stored = scans::find_scan(&env.state.db, &id)
        .await
        .unwrap()
        .unwrap()
        .annotation
        .unwrap();
    let expected = if a == StatusCode::OK { (8, 6) } else { (30, 20) };
    assert_eq!(stored.remarks, if a == StatusCode::OK { "a" } else { "b" });
    let mask = env.paths.resolve(&stored.mask_path).unwrap();
    assert_eq!(image::image_dimensions(&mask).unwrap(), expected);
    assert!(env.paths.resolve(&stored.processed_path).unwrap().exists());
    assert_eq!(staging_entries(&env), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_predictions_last_writer_wins() {
    let env = setup(CLASSIFIER_NORMAL, COMPOSITOR_COPY).await;
    let id = identity();
    add_scan(&env, &id).await;

    let mut join_set = JoinSet::new();
    for _ in 0..4 {
        let app = env.app.clone();
        let uri = predict_uri(&id);
        join_set.spawn(async move { send(&app, post_json(&uri, json!({}))).await });
    }
    while let Some(result) = join_set.join_next().await {
        let (status, _) = result.expect("Task panicked");
        assert_eq!(status, StatusCode::OK);
    }

    let scan = scans::find_scan(&env.state.db, &id).await.unwrap().unwrap();
    assert_eq!(scan.prediction.result, PredictionResult::Normal);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_caller_disconnect_does_not_cancel_prediction() {
    let slow = format!("sleep 1\n{}", CLASSIFIER_ABNORMAL);
    let env = setup(&slow, COMPOSITOR_COPY).await;
    let id = identity();
    add_scan(&env, &id).await;

    // Drop the request future while the classifier is still running
    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        send(&env.app, post_json(&predict_uri(&id), json!({}))),
    )
    .await;
    assert!(abandoned.is_err());

    let mut result = PredictionResult::Unknown;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        result = scans::find_scan(&env.state.db, &id)
            .await
            .unwrap()
            .unwrap()
            .prediction
            .result;
        if result != PredictionResult::Unknown {
            break;
        }
    }
    assert_eq!(result, PredictionResult::Abnormal);
}

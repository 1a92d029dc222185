//! Progress stream endpoint tests
//!
//! The stream ends after its terminal event, so whole bodies can be
//! collected and parsed.

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use helpers::{FakeFetcher, TestLibrary, VIDEO_ID};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

async fn open_stream(t: &TestLibrary, id: &str) -> Response {
    t.app()
        .oneshot(
            Request::builder()
                .uri(format!("/library/{}/progress", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

/// JSON payloads of all `data:` lines in an SSE body
async fn collect_events(response: Response) -> Vec<Value> {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec())
        .unwrap()
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_no_active_job_yields_finish() {
    let t = TestLibrary::new(FakeFetcher::new()).await;

    let response = open_stream(&t, VIDEO_ID).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(collect_events(response).await, vec![json!({"type": "finish"})]);
}

#[tokio::test]
async fn test_unknown_id_yields_finish() {
    let t = TestLibrary::new(FakeFetcher::new()).await;

    let events = collect_events(open_stream(&t, "whatever").await).await;

    assert_eq!(events, vec![json!({"type": "finish"})]);
}

#[tokio::test]
async fn test_subscribing_after_completion_yields_finish() {
    let t = TestLibrary::new(FakeFetcher::new()).await;
    t.import_completed(VIDEO_ID).await;

    let events = collect_events(open_stream(&t, VIDEO_ID).await).await;

    assert_eq!(events, vec![json!({"type": "finish"})]);
}

#[tokio::test]
async fn test_mid_job_stream_ends_with_finish() {
    let (fetcher, gate) = FakeFetcher::new()
        .with_progress(&[0.25, 0.75])
        .gated_download();
    let t = TestLibrary::new(fetcher).await;
    t.coordinator.import_track(VIDEO_ID).await.unwrap();

    let response = open_stream(&t, VIDEO_ID).await;
    gate.add_permits(1);
    let events = collect_events(response).await;

    let (terminal, progress) = events.split_last().unwrap();
    assert_eq!(terminal, &json!({"type": "finish"}));
    for event in progress {
        assert_eq!(event["type"], "progress");
        let fraction = event["progress"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&fraction));
    }
}

#[tokio::test]
async fn test_failed_job_stream_ends_with_error() {
    let (fetcher, gate) = FakeFetcher::new().failing_download().gated_download();
    let t = TestLibrary::new(fetcher).await;
    t.coordinator.import_track(VIDEO_ID).await.unwrap();

    let response = open_stream(&t, VIDEO_ID).await;
    gate.add_permits(1);
    let events = collect_events(response).await;

    assert_eq!(events.last(), Some(&json!({"type": "error"})));
    assert_eq!(
        events.iter().filter(|e| e["type"] != "progress").count(),
        1
    );
}

#[tokio::test]
async fn test_several_observers_each_get_one_terminal_event() {
    let (fetcher, gate) = FakeFetcher::new().with_progress(&[0.5]).gated_download();
    let t = TestLibrary::new(fetcher).await;
    t.coordinator.import_track(VIDEO_ID).await.unwrap();

    let first = open_stream(&t, VIDEO_ID).await;
    let second = open_stream(&t, VIDEO_ID).await;
    gate.add_permits(1);

    for events in [collect_events(first).await, collect_events(second).await] {
        assert_eq!(events.last(), Some(&json!({"type": "finish"})));
        assert_eq!(
            events.iter().filter(|e| e["type"] == "finish").count(),
            1
        );
    }
}

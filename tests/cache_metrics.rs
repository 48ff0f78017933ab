use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use cachet::application::Services;
use cachet::cache::{CacheConfig, KeyValueStore, MemoryStore};
use cachet::infra::{http::build_router, telemetry};
use metrics_util::debugging::DebuggingRecorder;
use tower::ServiceExt;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Room for one page and its card, so a second profile evicts.
    let store = Arc::new(MemoryStore::new(
        NonZeroUsize::new(2).expect("non-zero capacity"),
    ));
    let services = Services::build(store.clone(), CacheConfig::default());
    services.seed().await.expect("seed profiles");
    let app = build_router(services);

    for uri in ["/profiles/1", "/profiles/1", "/profiles/2"] {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Dropping the page alone leaves the card for a fragment hit.
    assert!(
        store
            .delete("views:/profiles/{id}:2")
            .await
            .expect("delete page")
    );
    let request = Request::builder()
        .method(Method::GET)
        .uri("/profiles/2")
        .body(Body::empty())
        .expect("request should build");
    let response = app.oneshot(request).await.expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "cachet_request_hit_total",
        "cachet_request_miss_total",
        "cachet_request_store_total",
        "cachet_fragment_hit_total",
        "cachet_fragment_miss_total",
        "cachet_store_evict_total",
        "cachet_object_load_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}

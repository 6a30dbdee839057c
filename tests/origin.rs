use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use mediaedge::fetch::{HttpOrigin, Origin};
use mediaedge::EdgeError;
use std::time::Duration;

const LIMIT: usize = 1024;

/// Serves a handful of fixed upstream behaviours on an ephemeral port.
async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/ok", get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![1u8, 2, 3]) }))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .route("/big", get(|| async { vec![0u8; LIMIT * 4] }))
        .route(
            "/stream",
            get(|| async {
                let chunks = (0..4).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![7u8; LIMIT / 2])));
                Body::from_stream(futures::stream::iter(chunks))
            }),
        )
        .route("/bad-type", get(|| async { ([(header::CONTENT_TYPE, "not a mime")], "x") }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}", addr)
}

fn origin() -> HttpOrigin {
    HttpOrigin::new(Duration::from_millis(300), LIMIT).unwrap()
}

#[tokio::test]
async fn test_success_returns_body_and_content_type() {
    let base = spawn_upstream().await;

    let resp = origin().fetch(&format!("{}/ok", base)).await.unwrap();
    assert_eq!(resp.bytes.as_ref(), &[1, 2, 3]);
    assert_eq!(resp.content_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn test_non_success_status_is_not_found() {
    let base = spawn_upstream().await;

    for path in ["/missing", "/broken"] {
        let err = origin().fetch(&format!("{}{}", base, path)).await.unwrap_err();
        assert!(matches!(err, EdgeError::NotFound(_)), "{}: {:?}", path, err);
    }
}

#[tokio::test]
async fn test_timeout_is_unreachable() {
    let base = spawn_upstream().await;

    let err = origin().fetch(&format!("{}/slow", base)).await.unwrap_err();
    assert!(matches!(err, EdgeError::Unreachable(_)), "{:?}", err);
}

#[tokio::test]
async fn test_refused_connection_is_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = origin().fetch(&format!("http://{}/ok", addr)).await.unwrap_err();
    assert!(matches!(err, EdgeError::Unreachable(_)), "{:?}", err);
}

#[tokio::test]
async fn test_declared_length_over_limit_is_invalid_input() {
    let base = spawn_upstream().await;

    let err = origin().fetch(&format!("{}/big", base)).await.unwrap_err();
    assert!(matches!(err, EdgeError::InvalidInput(_)), "{:?}", err);
}

#[tokio::test]
async fn test_streamed_body_over_limit_is_invalid_input() {
    let base = spawn_upstream().await;

    let err = origin().fetch(&format!("{}/stream", base)).await.unwrap_err();
    assert!(matches!(err, EdgeError::InvalidInput(_)), "{:?}", err);
}

#[tokio::test]
async fn test_streamed_body_within_limit_is_collected() {
    let base = spawn_upstream().await;

    let roomy = HttpOrigin::new(Duration::from_secs(2), LIMIT * 2).unwrap();
    let resp = roomy.fetch(&format!("{}/stream", base)).await.unwrap();
    assert_eq!(resp.bytes.len(), LIMIT * 2);
    assert!(resp.bytes.iter().all(|b| *b == 7));
}

#[tokio::test]
async fn test_malformed_content_type_is_dropped() {
    let base = spawn_upstream().await;

    let resp = origin().fetch(&format!("{}/bad-type", base)).await.unwrap();
    assert_eq!(resp.bytes.as_ref(), b"x");
    assert_eq!(resp.content_type, None);
}

//! Router-level tests of the node API against a mock store.
//!
//! The mock store speaks just enough of the loopback protocol for the
//! handlers under test: JSONPath reads answer with a canned peer list and
//! writes answer `OK`.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use tower::ServiceExt;

use shoggoth_node::config::NodeConfig;
use shoggoth_node::context::NodeCtx;
use shoggoth_node::server;
use shoggoth_node::supervisor;

#[derive(Clone)]
struct MockStore {
    peers_reply: String,
}

async fn mock_json_get(
    State(state): State<MockStore>,
    AxumPath((_key, path)): AxumPath<(String, String)>,
) -> String {
    if path.contains("@.pins") {
        format!("JSON {}", state.peers_reply)
    } else {
        "JSON []".to_string()
    }
}

async fn mock_get(AxumPath(_key): AxumPath<String>) -> String {
    "JSON []".to_string()
}

async fn mock_ok() -> String {
    "OK".to_string()
}

/// Binds a mock store on an ephemeral port and returns the port.
async fn spawn_mock_store(peers_reply: &str) -> u16 {
    let state = MockStore { peers_reply: peers_reply.to_string() };

    let router = Router::new()
        .route("/", get(|| async { "shogdb" }))
        .route("/get/:key", get(mock_get))
        .route("/set/:key", get(mock_ok))
        .route("/delete/:key", get(mock_ok))
        .route("/json_get/:key/:path", get(mock_json_get))
        .route("/json_set/:key/:path", get(mock_ok))
        .route("/json_append/:key/:path", get(mock_ok))
        .route("/json_delete/:key/:path", get(mock_ok))
        .route("/json_increment/:key/:path", get(mock_ok))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    port
}

/// A runtime directory with fresh keys plus a context wired to the mock
/// store.
fn test_ctx(runtime: &Path, store_port: u16) -> Arc<NodeCtx> {
    supervisor::prepare_runtime(runtime).unwrap();

    let config = NodeConfig::parse(&format!(
        r#"
        [network]
        host = "127.0.0.1"
        port = 0
        public_host = "http://node-a.shog.ai"

        [db]
        host = "127.0.0.1"
        port = {store_port}
        "#,
    ))
    .unwrap();

    NodeCtx::init(config, runtime.to_path_buf()).unwrap()
}

fn test_shoggoth_id() -> String {
    format!("SHOG{}", "ab".repeat(16))
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn clone_miss_redirects_to_an_advertising_peer() {
    let id = test_shoggoth_id();
    let peers = format!(
        r#"[{{"host":"http://node-b.shog.ai","node_id":"SHOGN{}","public_key":"k","unreachable_count":0,"pins":["{id}"]}}]"#,
        "b".repeat(32)
    );

    let port = spawn_mock_store(&peers).await;
    let runtime = tempfile::tempdir().unwrap();
    let app = server::build_router(test_ctx(runtime.path(), port));

    let response = app
        .oneshot(Request::builder().uri(format!("/api/clone/{id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get("Location").unwrap(),
        &format!("http://node-b.shog.ai/api/clone/{id}")
    );
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn clone_miss_without_a_holder_is_rejected() {
    let id = test_shoggoth_id();

    let port = spawn_mock_store("[]").await;
    let runtime = tempfile::tempdir().unwrap();
    let app = server::build_router(test_ctx(runtime.path(), port));

    let response = app
        .oneshot(Request::builder().uri(format!("/api/clone/{id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn clone_rejects_malformed_ids() {
    let port = spawn_mock_store("[]").await;
    let runtime = tempfile::tempdir().unwrap();
    let app = server::build_router(test_ctx(runtime.path(), port));

    let response = app
        .oneshot(Request::builder().uri("/api/clone/not-a-shoggoth-id").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert_eq!(body_text(response).await, "invalid Shoggoth ID");
}

#[tokio::test]
async fn manifest_route_serves_this_nodes_identity() {
    let port = spawn_mock_store("[]").await;
    let runtime = tempfile::tempdir().unwrap();
    let app = server::build_router(test_ctx(runtime.path(), port));

    let response = app
        .oneshot(Request::builder().uri("/api/get_manifest").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("Access-Control-Allow-Origin").unwrap(), "*");

    let manifest: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    let node_id = manifest["node_id"].as_str().unwrap();

    assert!(node_id.starts_with("SHOGN"));
    assert_eq!(node_id.len(), 37);
    assert_eq!(manifest["public_host"], "http://node-a.shog.ai");
}

#[tokio::test]
async fn get_pins_serves_the_pin_index() {
    let port = spawn_mock_store("[]").await;
    let runtime = tempfile::tempdir().unwrap();
    let app = server::build_router(test_ctx(runtime.path(), port));

    let response = app
        .oneshot(Request::builder().uri("/api/get_pins").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "[]");
}

/// Full chunked publish of a small resource, exercising negotiate, chunk,
/// finish and the already-published shortcut.
#[tokio::test]
async fn publish_round_trip_installs_the_pin() {
    let port = spawn_mock_store("[]").await;
    let runtime = tempfile::tempdir().unwrap();
    let ctx = test_ctx(runtime.path(), port);
    let app = server::build_router(ctx.clone());

    // A publisher with its own key pair.
    let publisher = tempfile::tempdir().unwrap();
    lib_crypto::generate_key_pair(
        &publisher.path().join("private.txt"),
        &publisher.path().join("public.txt"),
    )
    .unwrap();
    let private_pem = std::fs::read_to_string(publisher.path().join("private.txt")).unwrap();
    let public_pem = std::fs::read_to_string(publisher.path().join("public.txt")).unwrap();
    let stripped = lib_crypto::strip_public_key(&public_pem);

    // The resource to publish.
    let resource = publisher.path().join("resource");
    std::fs::create_dir_all(resource.join("code")).unwrap();
    std::fs::create_dir_all(resource.join(".shoggoth")).unwrap();
    std::fs::write(resource.join("code/main.py"), b"print('hi')\n").unwrap();
    std::fs::write(resource.join(".shoggoth/manifest.json"), b"{}").unwrap();

    let tarball = publisher.path().join("resource.tar");
    lib_pins::create_tarball(&resource, &tarball).unwrap();
    let bytes = std::fs::read(&tarball).unwrap();
    assert!(bytes.len() < 100_000, "fixture must fit one chunk");

    let scratch = publisher.path().join("scratch");
    std::fs::create_dir_all(&scratch).unwrap();
    let hash = lib_pins::hash_tarball(&scratch, &tarball).unwrap();
    let shoggoth_id = lib_crypto::shoggoth_id_from_hash(&hash);

    let fingerprint = lib_pins::Fingerprint {
        hash,
        public_key: stripped,
        shoggoth_id: shoggoth_id.clone(),
        timestamp: chrono::Utc::now().timestamp_millis().to_string(),
    };
    let fingerprint_text = fingerprint.to_canonical_json().unwrap();
    let signature = lib_crypto::sign_data(&private_pem, &fingerprint_text).unwrap();

    // Negotiate.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/publish")
                .header("shoggoth-id", &shoggoth_id)
                .header("upload-size", bytes.len().to_string())
                .header("chunk-count", "1")
                .header("chunk-size-limit", "100000")
                .header("fingerprint", &fingerprint_text)
                .header("signature", &signature)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let upload_id = body_text(response).await;
    assert!(uuid::Uuid::parse_str(&upload_id).is_ok());

    // Chunk 0 carries the whole tarball.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/publish_chunk")
                .header("upload-id", &upload_id)
                .header("chunk-id", "0")
                .header("chunk-size", bytes.len().to_string())
                .body(Body::from(bytes.clone()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // Finish runs the acceptance procedure.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/publish_finish")
                .header("upload-id", &upload_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "publish complete");

    let pin_dir = ctx.pin_store().pin_dir(&shoggoth_id);
    assert!(pin_dir.join("code/main.py").is_file());
    assert!(pin_dir.join(".shoggoth/fingerprint.json").is_file());
    assert!(pin_dir.join(".shoggoth/signature.txt").is_file());

    // The upload session is destroyed.
    assert!(!ctx.node_tmp_path().join(&upload_id).exists());

    // Re-publishing the unchanged resource is short-circuited.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/publish")
                .header("shoggoth-id", &shoggoth_id)
                .header("upload-size", bytes.len().to_string())
                .header("chunk-count", "1")
                .header("chunk-size-limit", "100000")
                .header("fingerprint", &fingerprint_text)
                .header("signature", &signature)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert!(body_text(response).await.contains("already been published"));

    // The published pin's fingerprint is served back verbatim.
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/get_fingerprint/{shoggoth_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, fingerprint_text);
}

#[tokio::test]
async fn publish_rejects_fingerprints_from_the_future() {
    let port = spawn_mock_store("[]").await;
    let runtime = tempfile::tempdir().unwrap();
    let app = server::build_router(test_ctx(runtime.path(), port));

    let id = test_shoggoth_id();
    let ten_minutes_ahead = chrono::Utc::now().timestamp_millis() as u64 + 600_000;
    let fingerprint_text = format!(
        r#"{{"hash":"{}","public_key":"k","shoggoth_id":"{id}","timestamp":"{ten_minutes_ahead}"}}"#,
        "c".repeat(64)
    );

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/publish")
                .header("shoggoth-id", &id)
                .header("upload-size", "100")
                .header("chunk-count", "1")
                .header("chunk-size-limit", "100000")
                .header("fingerprint", &fingerprint_text)
                .header("signature", "cafe")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert!(body_text(response).await.contains("time traveler"));
}

#[tokio::test]
async fn publish_rejects_unsupported_chunk_size_limits() {
    let port = spawn_mock_store("[]").await;
    let runtime = tempfile::tempdir().unwrap();
    let app = server::build_router(test_ctx(runtime.path(), port));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/publish")
                .header("shoggoth-id", test_shoggoth_id())
                .header("upload-size", "100")
                .header("chunk-count", "1")
                .header("chunk-size-limit", "999")
                .header("fingerprint", "{}")
                .header("signature", "cafe")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

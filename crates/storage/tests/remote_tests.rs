//! Azure store and HTTP client against a local axum server

use axum::body::Bytes as BodyBytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use paydesk_storage::{AzureBlobStore, BlobStore, HttpClient, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    query: Option<String>,
    blob_type: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

type Captures = Arc<Mutex<Vec<Captured>>>;

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn put_blob(
    State(captures): State<Captures>,
    Path((container, blob)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: BodyBytes,
) -> StatusCode {
    if container == "locked" {
        return StatusCode::FORBIDDEN;
    }
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    captures.lock().unwrap().push(Captured {
        path: format!("{}/{}", container, blob),
        query,
        blob_type: header("x-ms-blob-type"),
        content_type: header("content-type"),
        body: body.to_vec(),
    });
    StatusCode::CREATED
}

async fn blob_server() -> (String, Captures) {
    let captures: Captures = Arc::default();
    let app = Router::new()
        .route("/:container/*blob", put(put_blob))
        .with_state(captures.clone());
    (spawn(app).await, captures)
}

#[tokio::test]
async fn test_azure_upload_puts_block_blob() {
    let (url, captures) = blob_server().await;
    let store = AzureBlobStore::new(&url, "?sv=2021-08-06&sig=abc").unwrap();

    store
        .upload_blob(
            Bytes::from_static(b"id,name\n1,Acme\n"),
            "exports",
            "2024/01/merchants.csv",
        )
        .await
        .unwrap();

    let captured = captures.lock().unwrap().clone();
    assert_eq!(captured.len(), 1);
    let request = &captured[0];
    assert_eq!(request.path, "exports/2024/01/merchants.csv");
    assert_eq!(request.query.as_deref(), Some("sv=2021-08-06&sig=abc"));
    assert_eq!(request.blob_type.as_deref(), Some("BlockBlob"));
    assert_eq!(request.content_type.as_deref(), Some("text/csv"));
    assert_eq!(request.body, b"id,name\n1,Acme\n");
}

#[tokio::test]
async fn test_azure_rejection_is_api_error() {
    let (url, _captures) = blob_server().await;
    let store = AzureBlobStore::new(&url, "sig=abc").unwrap();

    let err = store
        .upload_blob(Bytes::from_static(b"x"), "locked", "a.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Api { status: 403, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_azure_unreachable_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let store = AzureBlobStore::new(&url, "sig=abc").unwrap();
    let err = store
        .upload_blob(Bytes::from_static(b"x"), "exports", "a.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Network { .. }));
    assert!(err.is_retryable());
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Scheme {
    code: String,
    enabled: bool,
}

async fn json_server() -> String {
    let app = Router::new()
        .route(
            "/api/schemes/visa",
            get(|| async {
                Json(Scheme {
                    code: "visa".to_string(),
                    enabled: true,
                })
            }),
        )
        .route(
            "/api/schemes",
            post(|Json(mut scheme): Json<Scheme>| async move {
                scheme.enabled = !scheme.enabled;
                (StatusCode::CREATED, Json(scheme))
            }),
        )
        .route(
            "/api/broken",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        )
        .route("/api/text", get(|| async { "not json" }));
    spawn(app).await
}

#[tokio::test]
async fn test_get_json() {
    let base = json_server().await;
    let client = HttpClient::new(&format!("{}/api", base)).unwrap();

    let scheme: Scheme = client.get_json("schemes/visa").await.unwrap();
    assert_eq!(
        scheme,
        Scheme {
            code: "visa".to_string(),
            enabled: true
        }
    );
}

#[tokio::test]
async fn test_post_json() {
    let base = json_server().await;
    let client = HttpClient::builder(&format!("{}/api/", base))
        .bearer_token("t0ken")
        .build()
        .unwrap();

    let created: Scheme = client
        .post_json(
            "/schemes",
            &Scheme {
                code: "amex".to_string(),
                enabled: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(created.code, "amex");
    assert!(!created.enabled);
}

#[tokio::test]
async fn test_non_success_is_error() {
    let base = json_server().await;
    let client = HttpClient::new(&format!("{}/api", base)).unwrap();

    let err = client
        .get_json::<serde_json::Value>("broken")
        .await
        .unwrap_err();
    match err {
        StorageError::Api {
            operation,
            status,
            body,
        } => {
            assert_eq!(operation, "GET broken");
            assert_eq!(status, 502);
            assert_eq!(body, "upstream down");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_undecodable_body() {
    let base = json_server().await;
    let client = HttpClient::new(&format!("{}/api", base)).unwrap();

    let err = client.get_json::<Scheme>("text").await.unwrap_err();
    assert!(matches!(err, StorageError::Decode { .. }));
}

use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use shared::protocol::PUSH_PATH;
use shared::types::{ScanKey, StoredScan};
use crate::api::push::receive_push;
use crate::config::IngestConfig;
use crate::ingest::processor::Processor;
use crate::store_manager::StoreHandle;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<Processor<StoreHandle>>,
    pub store: StoreHandle,
    pub config: Arc<IngestConfig>,
}

#[derive(Deserialize)]
pub struct ScanQuery {
    pub ip: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PUSH_PATH, post(receive_push))
        .route("/v1/scans", get(list_scans))
        .route("/v1/scans/:ip/:port/:service", get(get_scan))
        .with_state(state)
}

async fn list_scans(
    State(state): State<AppState>,
    Query(params): Query<ScanQuery>,
) -> Result<Json<Vec<StoredScan>>, StatusCode> {
    state
        .store
        .list_by_address(params.ip)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to query scans: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_scan(
    State(state): State<AppState>,
    Path((address, port, service)): Path<(String, u16, String)>,
) -> Result<Json<StoredScan>, StatusCode> {
    state
        .store
        .get(ScanKey { address, port, service })
        .await
        .map_err(|e| {
            tracing::error!("Failed to query scan: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;
    use tower::ServiceExt;
    use crate::config::StoreConfig;

    fn test_app(dir: &tempfile::TempDir, subscription: Option<&str>) -> (Router, StoreHandle) {
        let store = StoreHandle::spawn(&StoreConfig {
            db_path: dir.path().join("scans.db"),
            writers: 2,
            ..StoreConfig::default()
        })
        .unwrap();

        let state = AppState {
            processor: Arc::new(Processor::new(Arc::new(store.clone()))),
            store: store.clone(),
            config: Arc::new(IngestConfig {
                subscription: subscription.map(str::to_string),
                ..IngestConfig::default()
            }),
        };
        (router(state), store)
    }

    fn push_body(envelope: serde_json::Value, subscription: &str) -> Body {
        let data = STANDARD.encode(serde_json::to_vec(&envelope).unwrap());
        Body::from(
            serde_json::to_vec(&json!({
                "message": {"data": data, "messageId": "1", "attributes": {}},
                "subscription": subscription,
            }))
            .unwrap(),
        )
    }

    fn scan(version: i64, timestamp: i64, data: serde_json::Value) -> serde_json::Value {
        json!({
            "ip": "1.1.1.42",
            "port": 8080,
            "service": "HTTP",
            "timestamp": timestamp,
            "data_version": version,
            "data": data,
        })
    }

    async fn post_push(app: &Router, body: Body) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri(PUSH_PATH)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        app.clone().oneshot(request).await.unwrap().status()
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_push_acks_and_stores() {
        let dir = tempfile::tempdir().unwrap();
        let (app, store) = test_app(&dir, None);

        let status = post_push(&app, push_body(scan(2, 100, json!({"response_str": "initial"})), "sub")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // Stale replay is still a success for the broker
        let status = post_push(&app, push_body(scan(2, 100, json!({"response_str": "initial"})), "sub")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = get_json(&app, "/v1/scans/1.1.1.42/8080/HTTP").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["observed_at"], 100);
        assert_eq!(body["response"], "initial");
        assert_eq!(body["revision"], 1);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_nacks_undecodable_scans() {
        let dir = tempfile::tempdir().unwrap();
        let (app, store) = test_app(&dir, None);

        let status = post_push(&app, push_body(scan(9, 100, json!({"response_str": "x"})), "sub")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let status = post_push(&app, push_body(scan(1, 100, json!({})), "sub")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = get_json(&app, "/v1/scans/1.1.1.42/8080/HTTP").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_rejects_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (app, store) = test_app(&dir, Some("projects/p/subscriptions/scan-sub"));

        assert_eq!(post_push(&app, Body::from("not json")).await, StatusCode::BAD_REQUEST);

        let bad_data = Body::from(r#"{"message":{"data":"%%%"},"subscription":"projects/p/subscriptions/scan-sub"}"#);
        assert_eq!(post_push(&app, bad_data).await, StatusCode::BAD_REQUEST);

        let status = post_push(
            &app,
            push_body(scan(2, 100, json!({"response_str": "x"})), "projects/p/subscriptions/other"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let status = post_push(
            &app,
            push_body(scan(2, 100, json!({"response_str": "x"})), "projects/p/subscriptions/scan-sub"),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_scans_by_address() {
        let dir = tempfile::tempdir().unwrap();
        let (app, store) = test_app(&dir, None);

        post_push(&app, push_body(scan(2, 100, json!({"response_str": "old"})), "sub")).await;
        post_push(&app, push_body(scan(2, 200, json!({"response_str": "new"})), "sub")).await;

        let (status, body) = get_json(&app, "/v1/scans?ip=1.1.1.42").await;
        assert_eq!(status, StatusCode::OK);
        let scans = body.as_array().unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0]["response"], "new");
        assert_eq!(scans[0]["revision"], 2);

        let (status, body) = get_json(&app, "/v1/scans?ip=10.0.0.1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        store.shutdown().await.unwrap();
    }
}

// Product catalog handlers

use super::{AppState, error::ApiError};
use crate::catalog::{NewProduct, Product};
use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use tracing::debug;
use uuid::Uuid;

// --- POST /products ---
pub async fn create_product(
    State(state): State<AppState>,
    payload: Result<Json<NewProduct>, JsonRejection>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let Json(new_product) = payload.map_err(|rejection| {
        debug!(%rejection, "Rejected product payload");
        ApiError::BadRequest("Invalid product payload".to_string())
    })?;

    let product = state.products.create(new_product).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

// --- GET /products/{id} ---
pub async fn get_product(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Product>, ApiError> {
    let Path(id) = id.map_err(|_| ApiError::BadRequest("Invalid product id".to_string()))?;

    let product = state.products.get(id).await?;
    Ok(Json(product))
}

// --- GET /products ---
pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(state.products.list().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryProductRepository, ProductCache, ProductService};
    use crate::queue::WorkQueue;
    use crate::storage::LocalObjectStore;
    use crate::web::{RequestLimits, create_app};
    use axum::{Router, body::Body, http};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    async fn app() -> (TempDir, ProductService, Router) {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::open(dir.path().join("uploads"), 128, 8)
            .await
            .unwrap();
        let products = ProductService::new(
            Arc::new(InMemoryProductRepository::new()),
            Arc::new(ProductCache::new(8)),
        );
        let state = AppState {
            store: Arc::new(store),
            queue: WorkQueue::new(4),
            products: products.clone(),
            cleanup: tokio_util::task::TaskTracker::new(),
            abandon: tokio_util::sync::CancellationToken::new(),
        };
        let app = create_app(
            state,
            RequestLimits {
                max_body_size: 64 * 1024,
                request_timeout: Duration::from_secs(30),
            },
        );
        (dir, products, app)
    }

    async fn send(app: &Router, request: http::Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(body: Value) -> http::Request<Body> {
        http::Request::builder()
            .method("POST")
            .uri("/products")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> http::Request<Body> {
        http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_fetch_product() {
        let (_dir, _products, app) = app().await;

        let (status, created) = send(
            &app,
            post_json(json!({
                "name": "Widget",
                "description": "Blue",
                "price": 12.5,
                "imagePath": "uploads/widget.png"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "Widget");
        assert_eq!(created["imagePath"], "uploads/widget.png");

        let id = created["id"].as_str().unwrap();
        let (status, fetched) = send(&app, get(&format!("/products/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_list_products_in_creation_order() {
        let (_dir, _products, app) = app().await;
        for name in ["a", "b"] {
            let (status, _) = send(&app, post_json(json!({ "name": name, "price": 1 }))).await;
            assert_eq!(status, StatusCode::CREATED);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let (status, list) = send(&app, get("/products")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_invalid_payloads_are_rejected() {
        let (_dir, _products, app) = app().await;

        let (status, body) = send(&app, post_json(json!({ "price": 1 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid product payload" }));

        let (status, body) = send(&app, post_json(json!({ "name": "x", "price": -3 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "price must be a non-negative number" }));
    }

    #[tokio::test]
    async fn test_get_product_errors() {
        let (_dir, _products, app) = app().await;

        let (status, body) = send(&app, get("/products/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid product id" }));

        let (status, body) = send(&app, get(&format!("/products/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Product not found" }));
    }

    #[tokio::test]
    async fn test_closed_catalog_returns_503() {
        let (_dir, products, app) = app().await;
        products.close().await;

        let (status, body) = send(&app, get("/products")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({ "error": "Service shutting down" }));
    }
}

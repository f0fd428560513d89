use super::{AppState, RequestLimits, error::ApiError, handlers, products};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{Level, warn};

/// Drops the handler once the deadline passes and answers 408 in the usual
/// error shape.
async fn enforce_deadline(State(deadline): State<Duration>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, timeout = ?deadline, "Request deadline exceeded");
            ApiError::RequestTimeout.into_response()
        }
    }
}

pub fn create_app(state: AppState, limits: RequestLimits) -> Router {
    Router::new()
        .route("/", get(handlers::welcome))
        .route("/upload", post(handlers::upload_image))
        // Catalog
        .route(
            "/products",
            get(products::list_products).post(products::create_product),
        )
        .route("/products/{id}", get(products::get_product))
        // Whole-body cap; the multipart reader reports overflow as 413
        .layer(DefaultBodyLimit::max(limits.max_body_size))
        .layer(middleware::from_fn_with_state(limits.request_timeout, enforce_deadline))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
        .with_state(state)
}

//! HTTP surface: upload intake and the product catalog routes.

mod app;
mod error;
mod handlers;
mod listeners;
mod models;
mod products;

pub use app::create_app;
pub use listeners::create_listener;

use crate::catalog::ProductService;
use crate::queue::WorkQueue;
use crate::storage::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub queue: WorkQueue,
    pub products: ProductService,
    /// Deletes spawned for uploads whose request was dropped mid-flight.
    pub cleanup: TaskTracker,
    /// Cancelled once in-flight requests outlive the shutdown grace period.
    pub abandon: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_body_size: usize,
    pub request_timeout: Duration,
}

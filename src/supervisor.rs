// Builds every long-lived component in dependency order and tears them down in
// reverse once a shutdown signal arrives.

use crate::catalog::{InMemoryProductRepository, ProductCache, ProductService};
use crate::config::AppConfig;
use crate::queue::WorkQueue;
use crate::storage::{LocalObjectStore, ObjectStore, StorageError};
use crate::web::{AppState, create_app, create_listener};
use crate::worker::{ThumbnailProcessor, WorkerPool, WorkerStats};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to open object store: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to bind {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Server(#[source] std::io::Error),
}

/// Handles to a started server, in the order they have to be released.
pub struct RunningServer {
    local_addr: SocketAddr,
    stop_accepting: CancellationToken,
    abandon: CancellationToken,
    cleanup: TaskTracker,
    server: JoinHandle<std::io::Result<()>>,
    queue: WorkQueue,
    workers: WorkerPool,
    products: ProductService,
    grace: Duration,
}

/// Brings the service up: catalog, cache, object store, queue, listener, workers.
pub async fn start(config: &AppConfig) -> Result<RunningServer, LifecycleError> {
    let repository = Arc::new(InMemoryProductRepository::new());
    let cache = Arc::new(ProductCache::new(config.cache_capacity()));
    let products = ProductService::new(repository, cache);

    let store: Arc<dyn ObjectStore> = Arc::new(
        LocalObjectStore::open(
            &config.storage_root,
            config.max_filename_length(),
            config.key_attempts(),
        )
        .await?,
    );

    let queue = WorkQueue::new(config.queue_capacity());
    info!(capacity = queue.capacity(), "Work queue created");

    let (addr, listener) = create_listener(&config.host, config.port)
        .await
        .map_err(|source| LifecycleError::Bind {
            host: config.host.clone(),
            port: config.port,
            source,
        })?;
    let local_addr = listener.local_addr().map_err(LifecycleError::Server)?;

    let cleanup = TaskTracker::new();
    let abandon = CancellationToken::new();
    let state = AppState {
        store: store.clone(),
        queue: queue.clone(),
        products: products.clone(),
        cleanup: cleanup.clone(),
        abandon: abandon.clone(),
    };
    let app = create_app(state, config.request_limits());

    let stop_accepting = CancellationToken::new();
    let server = tokio::spawn(
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(stop_accepting.clone().cancelled_owned())
            .into_future(),
    );
    info!("Server listening on {}", addr);

    let processor = ThumbnailProcessor::new(config.thumbnail_sizes.clone());
    info!(sizes = ?processor.sizes(), "Thumbnail processor configured");
    let workers = WorkerPool::spawn(
        config.worker_count(),
        queue.clone(),
        store,
        Arc::new(processor),
        config.retry_policy(),
    );

    Ok(RunningServer {
        local_addr,
        stop_accepting,
        abandon,
        cleanup,
        server,
        queue,
        workers,
        products,
        grace: config.shutdown_grace(),
    })
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, waits for in-flight requests, closes the queue, drains
    /// the workers, then closes the catalog. Each wait is bounded by the grace
    /// period. Requests still running after the first wait are cancelled so
    /// their partial uploads get removed before the runtime goes away.
    pub async fn shutdown(self) -> Result<WorkerStats, LifecycleError> {
        let Self {
            stop_accepting,
            abandon,
            cleanup,
            mut server,
            queue,
            workers,
            products,
            grace,
            ..
        } = self;

        info!(grace_secs = grace.as_secs(), "Shutting down: no longer accepting connections");
        stop_accepting.cancel();

        let served = match tokio::time::timeout(grace, &mut server).await {
            Ok(Ok(result)) => result.map_err(LifecycleError::Server),
            Ok(Err(e)) => {
                error!(error = %e, "HTTP server task failed");
                Ok(())
            }
            Err(_) => {
                warn!("In-flight requests did not finish within the grace period, cancelling them");
                abandon.cancel();
                match tokio::time::timeout(grace, &mut server).await {
                    Ok(Ok(result)) => result.map_err(LifecycleError::Server),
                    Ok(Err(e)) => {
                        error!(error = %e, "HTTP server task failed");
                        Ok(())
                    }
                    Err(_) => {
                        warn!("HTTP server still busy after cancellation, aborting it");
                        server.abort();
                        Ok(())
                    }
                }
            }
        };

        cleanup.close();
        if tokio::time::timeout(grace, cleanup.wait()).await.is_err() {
            warn!(remaining = cleanup.len(), "Upload cleanup did not finish within the grace period");
        }

        let pending = queue.len();
        queue.close();
        info!(pending, "Work queue closed, draining workers");

        let stats = workers.shutdown(grace).await;

        products.close().await;

        served.map(|()| stats)
    }
}

/// Runs until `shutdown` resolves, then tears everything down.
pub async fn run(
    config: AppConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<(), LifecycleError> {
    let server = start(&config).await?;
    info!(addr = %server.local_addr(), "Serving until a shutdown signal arrives");
    shutdown.await;
    server.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn config(storage_root: &Path) -> AppConfig {
        AppConfig::try_parse_from([
            "product-server",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--shutdown-grace-secs",
            "5",
            "--storage-root",
            storage_root.to_str().unwrap(),
        ])
        .unwrap()
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_start_serve_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let server = start(&config(&dir.path().join("uploads"))).await.unwrap();

        let response = get(server.local_addr(), "/").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("Welcome to the Product Management!"));

        let stats = server.shutdown().await.unwrap();
        assert_eq!(stats, WorkerStats::default());
        assert!(dir.path().join("uploads").is_dir());
    }

    #[tokio::test]
    async fn test_shutdown_removes_upload_of_stalled_request() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let root_arg = root.to_str().unwrap();
        let config = AppConfig::try_parse_from([
            "product-server",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--shutdown-grace-secs",
            "1",
            "--storage-root",
            root_arg,
        ])
        .unwrap();
        let server = start(&config).await.unwrap();

        let body = "--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"stuck.png\"\r\n\r\n\
                    bytes\r\n--B\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nunfinished";
        let head = "POST /upload HTTP/1.1\r\nHost: localhost\r\n\
                    Content-Type: multipart/form-data; boundary=B\r\nContent-Length: 4096\r\n\r\n";
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(body.as_bytes()).await.unwrap();

        for _ in 0..200 {
            if root.join("stuck.png").exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(root.join("stuck.png").exists());

        server.shutdown().await.unwrap();
        assert!(!root.join("stuck.png").exists());
        drop(stream);
    }

    #[tokio::test]
    async fn test_unusable_storage_root_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let result = start(&config(&blocker.join("uploads"))).await;
        assert!(matches!(result, Err(LifecycleError::Storage(_))));
    }

    #[tokio::test]
    async fn test_run_returns_after_signal() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(config(dir.path()), async {}).await;
        assert!(result.is_ok());
    }
}

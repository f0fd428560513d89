// Upload and liveness handlers

use super::{
    AppState,
    error::ApiError,
    models::{MessageResponse, UploadResponse, WELCOME_MESSAGE},
};
use crate::queue::Job;
use crate::storage::{ObjectKey, ObjectLocation, ObjectStore, StorageError};
use axum::{
    Json,
    extract::{FromRequest, Multipart, Request, State, multipart::MultipartError},
    http::StatusCode,
};
use futures::TryStreamExt;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

// --- GET / ---
pub async fn welcome() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: WELCOME_MESSAGE,
    })
}

// --- POST /upload ---
// Stores the `file` part, then hands a job to the workers. The response is only
// sent once both steps succeeded; on any failure the stored object is removed.
// Uploads still running when shutdown gives up on them are cancelled here, so
// their cleanup is tracked by `state.cleanup`.
pub async fn upload_image(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<UploadResponse>, ApiError> {
    let abandon = state.abandon.clone();
    tokio::select! {
        biased;
        _ = abandon.cancelled() => {
            warn!("Upload cancelled by shutdown");
            Err(ApiError::ServiceUnavailable("Service shutting down".to_string()))
        }
        result = accept_upload(state, request) => result,
    }
}

async fn accept_upload(
    state: AppState,
    request: Request,
) -> Result<Json<UploadResponse>, ApiError> {
    let multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| {
            debug!(%rejection, "Rejected upload request");
            ApiError::NoFileUploaded
        })?;

    let upload = receive_file(&state.store, &state.cleanup, multipart).await?;

    if upload.size == 0 {
        debug!(key = %upload.key, "Uploaded 'file' field is empty");
        upload.rollback().await?;
        return Err(ApiError::NoFileUploaded);
    }

    let job = Job::new(upload.key.clone(), upload.location.clone());
    let job_id = job.id;
    if let Err((reason, _job)) = state.queue.try_submit(job) {
        warn!(key = %upload.key, ?reason, "Work queue rejected job, rolling back upload");
        upload.rollback().await?;
        return Err(ApiError::Busy);
    }

    let (key, location, size) = upload.commit();
    info!(key = %key, %job_id, size_bytes = size, "Upload accepted");

    Ok(Json(UploadResponse::new(location)))
}

// Streams the single `file` part into the store. Other parts are skipped.
async fn receive_file(
    store: &Arc<dyn ObjectStore>,
    cleanup: &TaskTracker,
    mut multipart: Multipart,
) -> Result<StoredUpload, ApiError> {
    let mut upload: Option<StoredUpload> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Failed to read multipart field");
                let err = ApiError::from_multipart(&e);
                if let Some(upload) = upload.take() {
                    upload.rollback().await?;
                }
                return Err(err);
            }
        };

        if field.name() != Some("file") {
            debug!(field = field.name().unwrap_or("unnamed"), "Ignoring multipart field");
            continue;
        }

        if let Some(first) = upload.take() {
            debug!("Multiple 'file' fields found in multipart request");
            drop(field);
            first.rollback().await?;
            return Err(ApiError::MultipleFiles);
        }

        let Some(filename) = field.file_name().map(str::to_owned) else {
            debug!("'file' field has no filename");
            return Err(ApiError::InvalidFileName);
        };

        let reader = StreamReader::new(field.map_err(std::io::Error::other));
        let (key, location, size) = store
            .put(&filename, Box::pin(reader))
            .await
            .map_err(|e| storage_error(&filename, e))?;

        upload = Some(StoredUpload {
            store: store.clone(),
            cleanup: cleanup.clone(),
            key,
            location,
            size,
            settled: false,
        });
    }

    upload.ok_or(ApiError::NoFileUploaded)
}

fn storage_error(filename: &str, err: StorageError) -> ApiError {
    match err {
        StorageError::InvalidKey(e) => {
            debug!(filename, error = %e, "Rejected upload filename");
            ApiError::InvalidFileName
        }
        StorageError::Source(e) => {
            let status = e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<MultipartError>())
                .map(MultipartError::status);
            debug!(filename, error = %e, "Upload stream ended abnormally");
            if status == Some(StatusCode::PAYLOAD_TOO_LARGE) {
                ApiError::PayloadTooLarge
            } else {
                ApiError::NoFileUploaded
            }
        }
        other => {
            error!(filename, error = %other, "Failed to save uploaded file");
            ApiError::SaveFailed
        }
    }
}

/// An object written during this request that is not yet handed off.
/// Dropped without `commit`/`rollback` (e.g. the request was cancelled), it
/// schedules its own deletion on `cleanup`, which shutdown waits for.
struct StoredUpload {
    store: Arc<dyn ObjectStore>,
    cleanup: TaskTracker,
    key: ObjectKey,
    location: ObjectLocation,
    size: u64,
    settled: bool,
}

impl StoredUpload {
    fn commit(mut self) -> (ObjectKey, ObjectLocation, u64) {
        self.settled = true;
        (self.key.clone(), self.location.clone(), self.size)
    }

    async fn rollback(mut self) -> Result<(), ApiError> {
        // Only settled once the delete has run; if this future is dropped
        // first, `Drop` schedules the delete again.
        let result = self.store.delete(&self.key).await;
        self.settled = true;
        result.map_err(|e| {
            error!(key = %self.key, error = %e, "Failed to roll back stored upload");
            ApiError::SaveFailed
        })
    }
}

impl Drop for StoredUpload {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "No runtime to remove abandoned upload");
            return;
        };
        let store = self.store.clone();
        let key = self.key.clone();
        self.cleanup.spawn_on(
            async move {
                match store.delete(&key).await {
                    Ok(()) => info!(key = %key, "Removed abandoned upload"),
                    Err(e) => error!(key = %key, error = %e, "Failed to remove abandoned upload"),
                }
            },
            &runtime,
        );
    }
}

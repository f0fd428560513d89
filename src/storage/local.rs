use super::{ByteReader, ObjectKey, ObjectLocation, ObjectStore, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Filesystem-backed object store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    // Root as reported to clients: `./uploads` is shown as `uploads`.
    display_root: PathBuf,
    max_filename_length: usize,
    key_attempts: usize,
}

impl LocalObjectStore {
    /// Creates the store, making sure the root directory exists.
    pub async fn open(
        root: impl Into<PathBuf>,
        max_filename_length: usize,
        key_attempts: usize,
    ) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::io("creating storage root", root.display(), e))?;

        let display_root = display_root_of(&root);

        info!(root = %root.display(), "Object store ready");

        Ok(Self {
            root,
            display_root,
            max_filename_length,
            key_attempts,
        })
    }

    fn path_of(&self, key: &ObjectKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Reserves a free key by exclusive creation, adding a random suffix on
    /// each collision.
    async fn create_unique(&self, base: &ObjectKey) -> StorageResult<(ObjectKey, PathBuf, File)> {
        let mut candidate = base.clone();
        for attempt in 0..self.key_attempts {
            if attempt > 0 {
                candidate = base.with_suffix(&short_suffix(), self.max_filename_length);
            }
            let path = self.path_of(&candidate);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((candidate, path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(key = %candidate, attempt, "Object key taken, retrying with suffix");
                }
                Err(e) => return Err(StorageError::io("creating", path.display(), e)),
            }
        }

        Err(StorageError::KeyExhausted {
            key: base.clone(),
            attempts: self.key_attempts,
        })
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        filename: &str,
        mut reader: ByteReader<'_>,
    ) -> StorageResult<(ObjectKey, ObjectLocation, u64)> {
        let base = ObjectKey::from_filename(filename, self.max_filename_length)?;
        let start = Instant::now();

        let (key, path, file) = self.create_unique(&base).await?;
        // Declared before `file` so the handle is closed before removal.
        let guard = PartialFile::new(path.clone());
        let mut file = file;

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut size: u64 = 0;
        loop {
            let n = reader.read(&mut buf).await.map_err(StorageError::Source)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| StorageError::io("writing", path.display(), e))?;
            size += n as u64;
        }

        file.flush()
            .await
            .map_err(|e| StorageError::io("flushing", path.display(), e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io("syncing", path.display(), e))?;
        drop(file);
        guard.commit();

        let location = self.location(&key);
        info!(
            key = %key,
            path = %path.display(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Stored object"
        );

        Ok((key, location, size))
    }

    async fn put_at(&self, key: &ObjectKey, data: Bytes) -> StorageResult<ObjectLocation> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io("creating", parent.display(), e))?;
        }

        // Write next to the target and rename so readers never see a torn artifact.
        let tmp_path = path.with_file_name(format!(".{}.tmp-{}", key.file_name(), short_suffix()));
        let guard = PartialFile::new(tmp_path.clone());
        let mut file = File::create(&tmp_path)
            .await
            .map_err(|e| StorageError::io("creating", tmp_path.display(), e))?;
        file.write_all(&data)
            .await
            .map_err(|e| StorageError::io("writing", tmp_path.display(), e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io("syncing", tmp_path.display(), e))?;
        drop(file);

        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StorageError::io("renaming", path.display(), e))?;
        guard.commit();

        debug!(key = %key, size_bytes = data.len(), "Stored artifact");
        Ok(self.location(key))
    }

    async fn open(&self, key: &ObjectKey) -> StorageResult<ByteReader<'static>> {
        let path = self.path_of(key);
        match File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.clone()))
            }
            Err(e) => Err(StorageError::io("opening", path.display(), e)),
        }
    }

    async fn delete(&self, key: &ObjectKey) -> StorageResult<()> {
        let path = self.path_of(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(key = %key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io("deleting", path.display(), e)),
        }
    }

    fn location(&self, key: &ObjectKey) -> ObjectLocation {
        let path = self.display_root.join(key.as_str());
        ObjectLocation::new(path.to_string_lossy().replace('\\', "/"))
    }
}

fn display_root_of(root: &Path) -> PathBuf {
    root.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

fn short_suffix() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Removes a file on drop unless committed. Covers error returns as well as
/// the owning future being dropped mid-write.
struct PartialFile {
    path: Option<PathBuf>,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn commit(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "Removed partially written file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove partially written file"
            ),
        }
    }
}

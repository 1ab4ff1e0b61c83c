// ── Thumbnail store ──
//
// Filesystem persistence for event thumbnails. Writes go through a temp
// file and an atomic rename inside the target directory, so a concurrent
// reader never observes a partial JPEG. A small auxiliary store carries
// captures for still-incomplete events across restarts.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::CameraId;

const PENDING_INDEX: &str = "pending_events.json";
const PENDING_DIR: &str = ".pending";

/// One unmerged capture persisted across a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingCapture {
    pub(crate) event_id: String,
    pub(crate) start: DateTime<Utc>,
    pub(crate) token: String,
    pub(crate) bytes: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingRecord {
    start: DateTime<Utc>,
    token: String,
    blob: String,
}

/// Per-camera thumbnail directories under one storage root.
///
/// A camera's directory defaults to `<root>/<camera_id>` and can be
/// redirected to a user-configured path.
#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    root: PathBuf,
    overrides: Arc<DashMap<CameraId, PathBuf>>,
}

impl ThumbnailStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            overrides: Arc::new(DashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Redirect one camera's thumbnails to a user-configured directory.
    /// `None` restores the derived default under the storage root.
    pub fn set_camera_dir(&self, camera: &CameraId, dir: Option<PathBuf>) {
        match dir {
            Some(dir) => {
                self.overrides.insert(camera.clone(), dir);
            }
            None => {
                self.overrides.remove(camera);
            }
        }
    }

    /// Where a given event's thumbnail lives (whether or not it exists).
    pub fn path_for(&self, camera: &CameraId, event_id: &str) -> PathBuf {
        self.camera_dir(camera).join(format!("{event_id}.jpg"))
    }

    /// Atomically persist one thumbnail. The camera directory is created
    /// lazily on first write.
    pub async fn save(
        &self,
        camera: &CameraId,
        event_id: &str,
        bytes: Bytes,
    ) -> Result<PathBuf, CoreError> {
        let dir = self.camera_dir(camera);
        let target = self.path_for(camera, event_id);
        run_blocking(move || {
            write_atomic(&dir, &target, &bytes)?;
            Ok(target)
        })
        .await
    }

    /// Path of a persisted thumbnail, `None` if nothing is on disk.
    pub async fn load(&self, camera: &CameraId, event_id: &str) -> Option<PathBuf> {
        let path = self.path_for(camera, event_id);
        tokio::fs::try_exists(&path)
            .await
            .unwrap_or(false)
            .then_some(path)
    }

    /// Delete thumbnails for events that started before `cutoff`.
    ///
    /// File stems are event ids (start timestamps in seconds); files that
    /// don't parse are left alone. Returns how many files were removed.
    pub async fn purge(&self, camera: &CameraId, cutoff: DateTime<Utc>) -> Result<usize, CoreError> {
        let dir = self.camera_dir(camera);
        let cutoff_secs = cutoff.timestamp();
        run_blocking(move || purge_dir(&dir, cutoff_secs)).await
    }

    /// Persist unmerged captures at shutdown: a JSON index plus one blob
    /// file per capture.
    pub(crate) async fn flush_pending(
        &self,
        pending: HashMap<CameraId, Vec<PendingCapture>>,
    ) -> Result<(), CoreError> {
        if pending.is_empty() {
            return Ok(());
        }
        let root = self.root.clone();
        run_blocking(move || write_pending(&root, &pending)).await
    }

    /// Reload captures persisted by a previous run. The auxiliary store is
    /// removed after a successful load so stale blobs cannot resurface.
    pub(crate) async fn load_pending(
        &self,
    ) -> Result<HashMap<CameraId, Vec<PendingCapture>>, CoreError> {
        let root = self.root.clone();
        run_blocking(move || read_pending(&root)).await
    }

    fn camera_dir(&self, camera: &CameraId) -> PathBuf {
        self.overrides.get(camera).map_or_else(
            || self.root.join(camera.to_string()),
            |dir| dir.value().clone(),
        )
    }
}

async fn run_blocking<T, F>(job: F) -> Result<T, CoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| CoreError::Task {
            message: err.to_string(),
        })?
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    // Temp files default to 0600; thumbnails get served directly.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(target)
        .map_err(|err| CoreError::Storage(err.error))?;
    Ok(())
}

fn purge_dir(dir: &Path, cutoff_secs: i64) -> Result<usize, CoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let Some(started) = parse_stem_seconds(&path) else {
            continue;
        };
        if started < cutoff_secs {
            std::fs::remove_file(&path)?;
            removed += 1;
            debug!(path = %path.display(), "aged thumbnail removed");
        }
    }
    Ok(removed)
}

/// Event start seconds from a thumbnail filename. Accepts the fractional
/// form older runs wrote.
#[allow(clippy::cast_possible_truncation)]
fn parse_stem_seconds(path: &Path) -> Option<i64> {
    let stem = path.file_stem()?.to_str()?;
    if let Ok(secs) = stem.parse::<i64>() {
        return Some(secs);
    }
    let secs = stem.parse::<f64>().ok()?;
    secs.is_finite().then(|| secs.trunc() as i64)
}

fn write_pending(
    root: &Path,
    pending: &HashMap<CameraId, Vec<PendingCapture>>,
) -> Result<(), CoreError> {
    let blob_root = root.join(PENDING_DIR);
    let mut index: HashMap<String, HashMap<String, PendingRecord>> = HashMap::new();
    for (camera, captures) in pending {
        let camera_key = camera.to_string();
        let dir = blob_root.join(&camera_key);
        std::fs::create_dir_all(&dir)?;
        let records = index.entry(camera_key.clone()).or_default();
        for capture in captures {
            let blob = format!("{camera_key}/{}", capture.event_id);
            std::fs::write(dir.join(&capture.event_id), &capture.bytes)?;
            records.insert(
                capture.event_id.clone(),
                PendingRecord {
                    start: capture.start,
                    token: capture.token.clone(),
                    blob,
                },
            );
        }
    }
    let body = serde_json::to_vec(&index).map_err(std::io::Error::other)?;
    write_atomic(root, &root.join(PENDING_INDEX), &body)?;
    Ok(())
}

fn read_pending(root: &Path) -> Result<HashMap<CameraId, Vec<PendingCapture>>, CoreError> {
    let index_path = root.join(PENDING_INDEX);
    let raw = match std::fs::read(&index_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(err.into()),
    };
    let blob_root = root.join(PENDING_DIR);
    let index: HashMap<String, HashMap<String, PendingRecord>> =
        match serde_json::from_slice(&raw) {
            Ok(index) => index,
            Err(err) => {
                // A corrupt index must not wedge startup; drop the store.
                warn!(error = %err, "pending thumbnail index unreadable; discarding");
                std::fs::remove_file(&index_path)?;
                let _ = std::fs::remove_dir_all(&blob_root);
                return Ok(HashMap::new());
            }
        };

    let mut out: HashMap<CameraId, Vec<PendingCapture>> = HashMap::new();
    for (camera_raw, records) in index {
        let Ok(camera) = camera_raw.parse::<CameraId>() else {
            warn!(camera = %camera_raw, "pending index names an unparseable camera; skipped");
            continue;
        };
        let mut captures = Vec::new();
        for (event_id, record) in records {
            match std::fs::read(blob_root.join(&record.blob)) {
                Ok(bytes) => captures.push(PendingCapture {
                    event_id,
                    start: record.start,
                    token: record.token,
                    bytes: Bytes::from(bytes),
                }),
                Err(err) => {
                    debug!(event = %event_id, error = %err, "pending blob missing; capture dropped");
                }
            }
        }
        if !captures.is_empty() {
            out.insert(camera, captures);
        }
    }
    std::fs::remove_file(&index_path)?;
    let _ = std::fs::remove_dir_all(&blob_root);
    Ok(out)
}

use crate::error::{BootstrapError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[cfg(test)]
use std::sync::atomic::AtomicU8;

#[cfg(test)]
static FAILPOINT: AtomicU8 = AtomicU8::new(0);

#[cfg(test)]
fn failpoint(step: u8) -> bool {
    FAILPOINT
        .compare_exchange(step, 0, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

#[cfg(test)]
struct FailpointGuard;

#[cfg(test)]
impl Drop for FailpointGuard {
    fn drop(&mut self) {
        FAILPOINT.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
fn failpoint_guard(step: u8) -> FailpointGuard {
    FAILPOINT.store(step, Ordering::SeqCst);
    FailpointGuard
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Created,
    Inited,
    Subscribed,
}

impl DatabaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Inited => "inited",
            Self::Subscribed => "subscribed",
        }
    }
}

// Field names match the status file written by earlier releases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(rename = "default_db_initialized", default)]
    pub primary_initialized: bool,
    #[serde(rename = "dbs_initialized", default)]
    pub databases: BTreeMap<String, DatabaseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn status(&self, database: &str) -> Option<DatabaseStatus> {
        self.databases.get(database).copied()
    }

    pub fn advance(&mut self, database: &str, status: DatabaseStatus) -> bool {
        if self.status(database).is_some_and(|current| current >= status) {
            return false;
        }
        self.databases.insert(database.to_string(), status);
        self.updated_at = Some(Utc::now());
        true
    }

    pub fn mark_primary_initialized(&mut self) -> bool {
        if self.primary_initialized {
            return false;
        }
        self.primary_initialized = true;
        self.updated_at = Some(Utc::now());
        true
    }
}

/// Durable home of [`Progress`].
///
/// `load` never fails: anything unreadable counts as "nothing done yet",
/// which is always safe because every phase is idempotent.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self) -> Progress;

    async fn save(&self, progress: &Progress) -> Result<()>;
}

pub struct FileProgressStore {
    path: PathBuf,
    ignore_existing: AtomicBool,
}

impl FileProgressStore {
    /// With `force_reset`, loads return empty progress until this run saves
    /// for the first time. The file itself is left alone until then.
    pub fn new(path: impl Into<PathBuf>, force_reset: bool) -> Self {
        Self {
            path: path.into(),
            ignore_existing: AtomicBool::new(force_reset),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn load(&self) -> Progress {
        if self.ignore_existing.load(Ordering::SeqCst) {
            return Progress::default();
        }
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Progress::default();
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "unable to read init status, treating as empty");
                return Progress::default();
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(progress) => progress,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "init status is not valid json, treating as empty");
                Progress::default()
            }
        }
    }

    async fn save(&self, progress: &Progress) -> Result<()> {
        let payload = serde_json::to_vec(progress)
            .map_err(|err| BootstrapError::Progress(format!("encode failed: {err}")))?;
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            create_status_dir(dir).await?;
        }
        let tmp_path = self.temp_path();
        let mut file = create_temp_file(&tmp_path).await?;
        write_status(&mut file, &payload).await?;
        sync_status_file(&mut file).await?;
        drop(file);
        rename_temp_file(&tmp_path, &self.path).await?;
        self.ignore_existing.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
fn failpoint_io_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "failpoint")
}

async fn create_status_dir(dir: &Path) -> Result<()> {
    let result = {
        #[cfg(test)]
        {
            if failpoint(1) {
                Err(failpoint_io_error())
            } else {
                fs::create_dir_all(dir).await
            }
        }
        #[cfg(not(test))]
        {
            fs::create_dir_all(dir).await
        }
    };
    result.map_err(|err| BootstrapError::Progress(format!("create dir failed: {err}")))
}

async fn create_temp_file(tmp_path: &Path) -> Result<fs::File> {
    let result = {
        #[cfg(test)]
        {
            if failpoint(2) {
                Err(failpoint_io_error())
            } else {
                fs::File::create(tmp_path).await
            }
        }
        #[cfg(not(test))]
        {
            fs::File::create(tmp_path).await
        }
    };
    result.map_err(|err| BootstrapError::Progress(format!("create temp failed: {err}")))
}

async fn write_status(file: &mut fs::File, payload: &[u8]) -> Result<()> {
    let result = {
        #[cfg(test)]
        {
            if failpoint(3) {
                Err(failpoint_io_error())
            } else {
                file.write_all(payload).await
            }
        }
        #[cfg(not(test))]
        {
            file.write_all(payload).await
        }
    };
    result.map_err(|err| BootstrapError::Progress(format!("write failed: {err}")))
}

async fn sync_status_file(file: &mut fs::File) -> Result<()> {
    file.sync_all()
        .await
        .map_err(|err| BootstrapError::Progress(format!("sync failed: {err}")))
}

async fn rename_temp_file(tmp_path: &Path, path: &Path) -> Result<()> {
    let result = {
        #[cfg(test)]
        {
            if failpoint(4) {
                Err(failpoint_io_error())
            } else {
                fs::rename(tmp_path, path).await
            }
        }
        #[cfg(not(test))]
        {
            fs::rename(tmp_path, path).await
        }
    };
    result.map_err(|err| BootstrapError::Progress(format!("rename failed: {err}")))
}

#[derive(Default)]
pub struct MemoryProgressStore {
    progress: Mutex<Progress>,
    saves: AtomicUsize,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(progress: Progress) -> Self {
        Self {
            progress: Mutex::new(progress),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> Progress {
        self.progress
            .lock()
            .map(|progress| progress.clone())
            .unwrap_or_default()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self) -> Progress {
        self.snapshot()
    }

    async fn save(&self, progress: &Progress) -> Result<()> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|_| BootstrapError::Progress("progress lock poisoned".into()))?;
        *guard = progress.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

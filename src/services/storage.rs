use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

use crate::models::job::{JobId, QualityPreset};

/// Directory under the download root holding per-job working directories.
const STAGING_DIR: &str = ".staging";

/// Longest title stem kept in an output name.
const MAX_STEM_LEN: usize = 80;

/// Maximum number of ` (n)` suffixes tried when a name is taken.
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// A stored artifact, as listed by `GET /api/downloads`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub path: String,
}

/// Shared download directory holding one file per completed job.
pub struct FileStore {
    root: PathBuf,
    reserved: Mutex<HashSet<PathBuf>>,
}

impl FileStore {
    /// Open the store, creating the download directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR))
            .await
            .map_err(|e| StorageError::io(&root, e))?;
        Ok(Self {
            root,
            reserved: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create an empty working directory for one job.
    pub async fn staging_dir(&self, job_id: JobId) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(STAGING_DIR).join(job_id.to_string());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        Ok(dir)
    }

    pub async fn cleanup_staging(&self, job_id: JobId) {
        let dir = self.root.join(STAGING_DIR).join(job_id.to_string());
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to remove staging directory");
            }
        }
    }

    /// Reserve a final path for `proposed_name`.
    ///
    /// The name is reserved until [`FileStore::finalize`] or
    /// [`FileStore::release`], so two jobs never receive the same path. An
    /// existing file is never chosen.
    pub async fn resolve(&self, job_id: JobId, proposed_name: &str) -> Result<PathBuf, StorageError> {
        let name = validate_name(proposed_name)?;
        let path = self.root.join(name);

        let mut reserved = self.reserved.lock().await;
        if is_free(&reserved, &path).await {
            reserved.insert(path.clone());
            return Ok(path);
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StorageError::InvalidName(proposed_name.to_string()))?;
        let extension = path.extension().and_then(|e| e.to_str());

        for i in 1..=MAX_RENAME_ATTEMPTS {
            let candidate = match extension {
                Some(ext) => self.root.join(format!("{} ({}).{}", stem, i, ext)),
                None => self.root.join(format!("{} ({})", stem, i)),
            };
            if is_free(&reserved, &candidate).await {
                tracing::debug!(
                    job_id = %job_id,
                    path = %candidate.display(),
                    "Output name taken, using suffixed name"
                );
                reserved.insert(candidate.clone());
                return Ok(candidate);
            }
        }

        Err(StorageError::Exhausted(proposed_name.to_string()))
    }

    /// Move a produced file to its resolved path and drop the reservation.
    pub async fn finalize(&self, staged: &Path, final_path: &Path) -> Result<(), StorageError> {
        let result = move_file(staged, final_path).await;
        self.release(final_path).await;
        result
    }

    pub async fn release(&self, final_path: &Path) {
        self.reserved.lock().await.remove(final_path);
    }

    /// Open a stored artifact for streaming.
    pub async fn open(&self, name: &str) -> Result<(ReaderStream<File>, u64), StorageError> {
        let path = self.root.join(validate_name(name)?);
        let file = File::open(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => StorageError::io(&path, e),
        })?;
        let len = file
            .metadata()
            .await
            .map_err(|e| StorageError::io(&path, e))?
            .len();
        Ok((ReaderStream::new(file), len))
    }

    /// Regular files in the download directory, sorted by name.
    pub async fn list(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.root, e))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| StorageError::io(&entry.path(), e))?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(StoredFile {
                path: format!("/files/{}", name),
                name,
                size: metadata.len(),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.root.join(validate_name(name)?);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(StorageError::NotFound(name.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => return Err(StorageError::io(&path, e)),
        }
        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))
    }

    /// Delete every stored artifact. Returns how many files were removed.
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let files = self.list().await?;
        let mut deleted = 0;
        for file in files {
            match self.delete(&file.name).await {
                Ok(()) => deleted += 1,
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }
}

async fn is_free(reserved: &HashSet<PathBuf>, path: &Path) -> bool {
    !reserved.contains(path) && !fs::try_exists(path).await.unwrap_or(true)
}

/// Move `from` to `to` without ever replacing an existing file at `to`.
async fn move_file(from: &Path, to: &Path) -> Result<(), StorageError> {
    match fs::hard_link(from, to).await {
        Ok(()) => fs::remove_file(from)
            .await
            .map_err(|e| StorageError::io(from, e)),
        Err(e) if matches!(
            e.kind(),
            io::ErrorKind::CrossesDevices | io::ErrorKind::Unsupported
        ) =>
        {
            copy_new(from, to).await
        }
        Err(e) => Err(StorageError::io(to, e)),
    }
}

/// Copy into a file that must not exist yet. A partial target is removed.
async fn copy_new(from: &Path, to: &Path) -> Result<(), StorageError> {
    let mut source = File::open(from)
        .await
        .map_err(|e| StorageError::io(from, e))?;
    let mut target = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)
        .await
        .map_err(|e| StorageError::io(to, e))?;

    let copied = async {
        tokio::io::copy(&mut source, &mut target).await?;
        target.sync_all().await
    }
    .await;
    if let Err(e) = copied {
        drop(target);
        let _ = fs::remove_file(to).await;
        return Err(StorageError::io(to, e));
    }

    fs::remove_file(from)
        .await
        .map_err(|e| StorageError::io(from, e))
}

/// Reject anything that is not a single plain file name.
fn validate_name(name: &str) -> Result<&str, StorageError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if invalid {
        Err(StorageError::InvalidName(name.to_string()))
    } else {
        Ok(name)
    }
}

/// Restrict a title to a portable file-name stem.
pub fn sanitize_stem(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
            out.push(c);
        } else if c.is_whitespace() {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let stem = trimmed.chars().take(MAX_STEM_LEN).collect::<String>();
    if stem.is_empty() {
        "download".to_string()
    } else {
        stem
    }
}

/// Output name for a job: `<title>_<quality>_<short id>.<ext>`.
pub fn output_name(title: &str, quality: QualityPreset, job_id: JobId, extension: Option<&str>) -> String {
    let stem = sanitize_stem(title);
    match extension.filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}_{}_{}.{}", stem, quality, job_id.short(), sanitize_stem(ext)),
        None => format!("{}_{}_{}", stem, quality, job_id.short()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("no free file name for {0}")]
    Exhausted(String),
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

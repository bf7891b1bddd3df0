use crate::config::StorageConfig;
use std::{
    fmt,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid prediction id: {0}")]
    InvalidId(String),
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),
    #[error("File not found: {0}")]
    NotFound(String),
}

/// Identifier shared by an upload and everything derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PredictionId(Uuid);

impl PredictionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| StoreError::InvalidId(value.to_string()))
    }
}

impl Default for PredictionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PredictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Uploads,
    Results,
    Videos,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Uploads, Bucket::Results, Bucket::Videos];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Bucket::Uploads => "uploads",
            Bucket::Results => "results",
            Bucket::Videos => "temp_videos",
        }
    }

    pub fn url_prefix(&self) -> &'static str {
        match self {
            Bucket::Uploads => "/uploads",
            Bucket::Results => "/results",
            Bucket::Videos => "/videos",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    /// Public path the file is served under.
    pub url: String,
}

/// Lower-cased extension of a client supplied file name, with its leading dot.
/// Falls back to `default` for missing or unusual extensions.
pub fn sanitize_extension(file_name: Option<&str>, default: &str) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| default.to_string())
}

fn validate_file_name(file_name: &str) -> Result<(), StoreError> {
    let valid = !file_name.is_empty()
        && !file_name.contains(|c: char| c == '/' || c == '\\')
        && !file_name.contains("..")
        && !file_name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidFileName(file_name.to_string()))
    }
}

/// Identifier-keyed file storage under `uploads/`, `results/` and `temp_videos/`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn new(config: &StorageConfig) -> Result<Self, StoreError> {
        let store = Self {
            root: config.root.clone(),
        };
        for bucket in Bucket::ALL {
            let dir = store.dir(bucket);
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Storage directory ready: {:?}", dir);
        }
        Ok(store)
    }

    pub fn dir(&self, bucket: Bucket) -> PathBuf {
        self.root.join(bucket.dir_name())
    }

    pub fn path(&self, bucket: Bucket, file_name: &str) -> Result<PathBuf, StoreError> {
        validate_file_name(file_name)?;
        Ok(self.dir(bucket).join(file_name))
    }

    pub fn url(&self, bucket: Bucket, file_name: &str) -> String {
        format!("{}/{}", bucket.url_prefix(), file_name)
    }

    pub async fn save(
        &self,
        bucket: Bucket,
        file_name: &str,
        data: &[u8],
    ) -> Result<StoredFile, StoreError> {
        let path = self.path(bucket, file_name)?;
        fs::write(&path, data).await?;
        tracing::debug!("Stored {} bytes at {:?}", data.len(), path);
        Ok(StoredFile {
            path,
            url: self.url(bucket, file_name),
        })
    }

    pub async fn read(&self, bucket: Bucket, file_name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path(bucket, file_name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(file_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every file derived from `id` in every bucket and returns how
    /// many were removed. Unknown ids remove nothing and still succeed.
    pub async fn remove(&self, id: &PredictionId) -> Result<usize, StoreError> {
        let id = id.to_string();
        let mut removed = 0;

        for bucket in Bucket::ALL {
            let mut entries = match fs::read_dir(self.dir(bucket)).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                let belongs_to_id = name
                    .strip_prefix(id.as_str())
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('_'));
                if !belongs_to_id {
                    continue;
                }

                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(removed)
    }
}

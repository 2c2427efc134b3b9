use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufReader};

use super::error::StorageError;
use super::traits::{BoxReader, FileMeta, FileVault};

/// Filesystem-backed, path-addressed file vault.
///
/// Files live under `{base_path}/{vault path}`; writes go through
/// `{base_path}/.tmp` and are published with an atomic rename.
pub struct FilesystemVault {
    base_path: PathBuf,
    max_size: u64,
}

impl FilesystemVault {
    /// Create a new filesystem vault rooted at `base_path`.
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Map a vault path onto the filesystem, rejecting anything that could
    /// escape the base directory.
    fn file_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        if path.is_empty() {
            return Err(StorageError::InvalidPath("empty path".into()));
        }
        if path.contains('\0') || path.contains('\\') {
            return Err(StorageError::InvalidPath(path.into()));
        }
        for segment in path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::InvalidPath(path.into()));
            }
        }
        Ok(self.base_path.join(path))
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl FileVault for FilesystemVault {
    async fn put_stream(&self, path: &str, mut reader: BoxReader) -> Result<u64, StorageError> {
        let file_path = self.file_path(path)?;
        let temp_path = self.temp_path();

        let mut total_bytes: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024]; // 64KB read buffer
        let mut temp_file = fs::File::create(&temp_path).await?;

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    drop(temp_file);
                    let _ = fs::remove_file(&temp_path).await;
                    return Err(e.into());
                }
            };
            if n == 0 {
                break;
            }

            total_bytes += n as u64;
            if total_bytes > self.max_size {
                drop(temp_file);
                let _ = fs::remove_file(&temp_path).await;
                return Err(StorageError::SizeLimitExceeded {
                    actual: total_bytes,
                    limit: self.max_size,
                });
            }

            tokio::io::AsyncWriteExt::write_all(&mut temp_file, &buf[..n]).await?;
        }

        tokio::io::AsyncWriteExt::flush(&mut temp_file).await?;
        drop(temp_file);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::rename(&temp_path, &file_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(total_bytes)
    }

    async fn get_stream(&self, path: &str) -> Result<BoxReader, StorageError> {
        let file_path = self.file_path(path)?;
        match fs::File::open(&file_path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_range(
        &self,
        path: &str,
        start: u64,
        len: u64,
    ) -> Result<BoxReader, StorageError> {
        let file_path = self.file_path(path)?;
        let mut file = match fs::File::open(&file_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.into()));
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(start)).await?;
        Ok(Box::new(BufReader::new(file.take(len))))
    }

    async fn meta(&self, path: &str) -> Result<FileMeta, StorageError> {
        let file_path = self.file_path(path)?;
        match fs::metadata(&file_path).await {
            Ok(meta) => {
                let modified = meta.modified().map(DateTime::<Utc>::from)?;
                Ok(FileMeta {
                    length: meta.len(),
                    modified,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let file_path = self.file_path(path)?;
        Ok(fs::try_exists(&file_path).await?)
    }
}

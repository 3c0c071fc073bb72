use super::{ObjectStore, StorageError};
use bytes::Bytes;
use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            other => Err(format!("unknown compression '{other}' (expected none or gzip)")),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
        })
    }
}

/// Stores each object as a newline-delimited file below a root directory.
///
/// Objects are written to a temporary sibling and renamed into place, so a
/// reader never observes a partial object.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    compression: Compression,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, compression: Compression) -> Self {
        Self {
            root: root.into(),
            compression,
        }
    }

    /// Like [`FileStore::new`] but creates the root directory first.
    pub async fn create(root: impl Into<PathBuf>, compression: Compression) -> Result<Self, StorageError> {
        let store = Self::new(root, compression);
        fs::create_dir_all(&store.root).await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Maps a logical object path to its file, refusing anything that could
    /// escape the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if path.is_empty() || relative.is_absolute() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        let mut resolved = self.root.join(relative);
        if self.compression == Compression::Gzip {
            let mut name = resolved.file_name().unwrap_or_default().to_os_string();
            name.push(".gz");
            resolved.set_file_name(name);
        }
        Ok(resolved)
    }

    fn encode(&self, records: &[Bytes]) -> Result<Vec<u8>, StorageError> {
        let capacity = records.iter().map(|r| r.len() + 1).sum();
        let mut body = Vec::with_capacity(capacity);
        for record in records {
            body.extend_from_slice(record);
            if !record.ends_with(b"\n") {
                body.push(b'\n');
            }
        }

        match self.compression {
            Compression::None => Ok(body),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), GzLevel::fast());
                encoder.write_all(&body)?;
                Ok(encoder.finish()?)
            }
        }
    }

    async fn write(&self, path: &str, records: &[Bytes]) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        let data = self.encode(records)?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".tmp-{}", Uuid::new_v4()));
        let tmp = target.with_file_name(tmp_name);

        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            // Linking fails on an existing target, so an object is never replaced.
            fs::hard_link(&tmp, &target).await
        }
        .await;

        if let Err(e) = fs::remove_file(&tmp).await
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(path = %tmp.display(), "Failed to remove temporary file: {}", e);
        }

        match result {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::Rejected {
                    path: path.to_string(),
                    reason: "object already exists".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(
            path = %target.display(),
            records = records.len(),
            bytes = data.len(),
            "Object written"
        );
        Ok(())
    }
}

impl ObjectStore for FileStore {
    fn write_batch<'a>(
        &'a self,
        path: &'a str,
        records: &'a [Bytes],
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.write(path, records))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{ObjectLocation, ObjectStore, StorageResult};

/// Filesystem-backed object store.
///
/// Layout: `<root>/<bucket>/<key>`. Keys may contain `/`, which map onto
/// subdirectories.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a new `FsObjectStore` rooted at `root`. Creates `root` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path backing `location`.
    pub fn object_path(&self, location: &ObjectLocation) -> StorageResult<PathBuf> {
        location.validate()?;
        Ok(self.root.join(&location.bucket).join(&location.key))
    }
}

fn not_found(location: &ObjectLocation) -> StorageError {
    StorageError::NotFound {
        bucket: location.bucket.clone(),
        key: location.key.clone(),
    }
}

fn open_object(path: &Path, location: &ObjectLocation) -> StorageResult<File> {
    File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            not_found(location)
        } else {
            StorageError::Io(e)
        }
    })
}

/// Stream `reader` into `path` through a temp file in the same directory.
fn write_atomically(reader: &mut impl io::Read, path: &Path) -> StorageResult<u64> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    let bytes = io::copy(reader, tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(bytes)
}

async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Unavailable(format!("blocking task failed: {e}")))?
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, location: &ObjectLocation) -> StorageResult<Vec<u8>> {
        let path = self.object_path(location)?;
        let location = location.clone();
        blocking(move || {
            fs::read(&path).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    not_found(&location)
                } else {
                    StorageError::Io(e)
                }
            })
        })
        .await
    }

    async fn put(&self, location: &ObjectLocation, data: &[u8]) -> StorageResult<()> {
        let path = self.object_path(location)?;
        let data = data.to_vec();
        blocking(move || {
            let bytes = write_atomically(&mut data.as_slice(), &path)?;
            debug!(path = %path.display(), bytes = bytes, "object written");
            Ok(())
        })
        .await
    }

    async fn delete(&self, location: &ObjectLocation) -> StorageResult<()> {
        let path = self.object_path(location)?;
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        })
        .await
    }

    async fn exists(&self, location: &ObjectLocation) -> StorageResult<bool> {
        let path = self.object_path(location)?;
        blocking(move || Ok(path.is_file())).await
    }

    async fn size(&self, location: &ObjectLocation) -> StorageResult<u64> {
        let path = self.object_path(location)?;
        let location = location.clone();
        blocking(move || {
            let file = open_object(&path, &location)?;
            let metadata = file.metadata()?;
            if !metadata.is_file() {
                return Err(not_found(&location));
            }
            Ok(metadata.len())
        })
        .await
    }

    async fn get_to_path(&self, location: &ObjectLocation, dest: &Path) -> StorageResult<u64> {
        let path = self.object_path(location)?;
        let location = location.clone();
        let dest = dest.to_path_buf();
        blocking(move || {
            let mut src = io::BufReader::new(open_object(&path, &location)?);
            let bytes = write_atomically(&mut src, &dest)?;
            debug!(object = %location, dest = %dest.display(), bytes = bytes, "object downloaded");
            Ok(bytes)
        })
        .await
    }

    async fn copy(&self, from: &ObjectLocation, to: &ObjectLocation) -> StorageResult<()> {
        let src_path = self.object_path(from)?;
        let dst_path = self.object_path(to)?;
        let from = from.clone();
        blocking(move || {
            let mut src = io::BufReader::new(open_object(&src_path, &from)?);
            let bytes = write_atomically(&mut src, &dst_path)?;
            debug!(path = %dst_path.display(), bytes = bytes, "object copied");
            Ok(())
        })
        .await
    }
}

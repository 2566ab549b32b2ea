//! Package retrieval and extraction.
//!
//! Streams the source archive into the run's scratch directory, unpacks it
//! (plain or gzip-compressed tar) into `<scratch>/extracted`, removes the
//! archive and enumerates the payload of the bag found at
//! `<scratch>/extracted/<refid>`. The archive never lives inside the
//! extraction root, so no entry can overwrite it mid-read.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use av_storage::{ObjectLocation, ObjectStore, StorageError};
use flate2::read::GzDecoder;
use tracing::debug;

use crate::bag;
use crate::error::FetchError;
use crate::package::{MediaType, Package, RefId};
use crate::retry::{with_retry, with_retry_within, RetryPolicy};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Scratch subdirectory archives are unpacked into.
pub const EXTRACT_DIR: &str = "extracted";

pub struct PackageFetcher {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl PackageFetcher {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Fetch and unpack `source` into `scratch`, returning the extracted package.
    pub async fn fetch(
        &self,
        source: &ObjectLocation,
        refid: &RefId,
        media_type: MediaType,
        scratch: &Path,
    ) -> Result<Package, FetchError> {
        let store = self.store.as_ref();
        let missing = |e: StorageError| match e {
            StorageError::NotFound { .. } => FetchError::ObjectNotFound(source.clone()),
            other => FetchError::Storage(other),
        };

        let size = with_retry(&self.retry, "size", || store.size(source))
            .await
            .map_err(missing)?;
        let archive_path = scratch.join(source.file_name());
        let deadline = self.retry.transfer_timeout_ms(size);
        let bytes = with_retry_within(&self.retry, "download", deadline, || {
            store.get_to_path(source, &archive_path)
        })
        .await
        .map_err(missing)?;
        debug!(source = %source, bytes = bytes, deadline_ms = deadline, "archive downloaded");

        let extract_dir = scratch.join(EXTRACT_DIR);
        let root = extract_dir.join(refid.as_str());
        let (entries, payload) = {
            let root = root.clone();
            tokio::task::spawn_blocking(move || -> Result<_, FetchError> {
                fs::create_dir_all(&extract_dir)?;
                let entries = extract_archive(&archive_path, &extract_dir)?;
                fs::remove_file(&archive_path)?;
                if !root.is_dir() {
                    return Err(FetchError::BagRootMissing(root));
                }
                let payload = bag::list_payload(&root)?;
                Ok((entries, payload))
            })
            .await
            .map_err(|e| FetchError::Io(io::Error::other(e)))??
        };

        let payload: Vec<PathBuf> = payload.into_keys().map(PathBuf::from).collect();
        debug!(
            refid = %refid,
            entries = entries,
            payload_files = payload.len(),
            "archive extracted"
        );

        Ok(Package {
            refid: refid.clone(),
            media_type,
            root,
            payload,
        })
    }
}

/// Unpack a tar or tar.gz archive into `dest`. Returns the number of files
/// written.
///
/// Entries with absolute paths, `..` segments, drive prefixes or NUL bytes are
/// rejected, as are links, devices and fifos.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<usize, FetchError> {
    let mut file = File::open(archive_path)?;
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    drop(file);

    let reader = BufReader::new(File::open(archive_path)?);
    if read == 2 && magic == GZIP_MAGIC {
        unpack(GzDecoder::new(reader), dest)
    } else {
        unpack(reader, dest)
    }
}

fn unpack<R: Read>(reader: R, dest: &Path) -> Result<usize, FetchError> {
    let corrupt = |e: io::Error| FetchError::CorruptArchive(e.to_string());

    let mut archive = tar::Archive::new(reader);
    let entries = archive.entries().map_err(corrupt)?;
    let mut written = 0;

    for entry in entries {
        let mut entry = entry.map_err(corrupt)?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_pax_global_extensions()
            || entry_type.is_pax_local_extensions()
            || entry_type.is_gnu_longname()
            || entry_type.is_gnu_longlink()
        {
            continue;
        }

        let raw_path = {
            let path = entry.path().map_err(corrupt)?;
            path.to_str()
                .ok_or_else(|| FetchError::UnsafeEntry("non UTF-8 entry path".to_string()))?
                .to_string()
        };

        if entry_type.is_symlink()
            || entry_type.is_hard_link()
            || entry_type.is_character_special()
            || entry_type.is_block_special()
            || entry_type.is_fifo()
        {
            return Err(FetchError::UnsafeEntry(format!(
                "{raw_path}: links and special files are not allowed"
            )));
        }

        let normalized = match normalize_entry_path(&raw_path) {
            Some(path) => path,
            // `./` root entries from `tar -C <dir> .`
            None if entry_type.is_dir() && raw_path.trim_end_matches('/') == "." => continue,
            None => return Err(FetchError::UnsafeEntry(raw_path)),
        };
        let target = dest.join(&normalized);

        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if !entry_type.is_file() {
            return Err(FetchError::UnsafeEntry(format!(
                "{raw_path}: unsupported entry type"
            )));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out).map_err(corrupt)?;
        written += 1;
    }

    Ok(written)
}

/// Normalise an archive entry path to `a/b/c` form, or `None` if it is unsafe.
pub fn normalize_entry_path(raw: &str) -> Option<String> {
    let mut path = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => path.push('/'),
            '\0' => return None,
            _ => path.push(ch),
        }
    }

    if path.starts_with('/') {
        return None;
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return None;
    }

    let mut segments = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => continue,
            ".." => return None,
            _ => segments.push(seg),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_storage::fakes::{MemoryObjectStore, StoreOp};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    const REFID: &str = "b90862f3baceaae3b7418c78f9d50d52";

    fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut out);
            for (path, data) in entries {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_entry_type(tar::EntryType::Regular);
                header.set_cksum();
                builder
                    .append_data(&mut header, *path, Cursor::new(*data))
                    .unwrap();
            }
            builder.finish().unwrap();
        }
        out
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn refid() -> RefId {
        RefId::try_from(REFID.to_string()).unwrap()
    }

    fn fetcher(store: Arc<MemoryObjectStore>) -> PackageFetcher {
        PackageFetcher::new(
            store,
            RetryPolicy {
                max_retries: 2,
                backoff_base_ms: 1,
                attempt_timeout_ms: 5_000,
                ..RetryPolicy::default()
            },
        )
    }

    #[test]
    fn normalizes_safe_paths() {
        assert_eq!(normalize_entry_path("./a/b.wav").as_deref(), Some("a/b.wav"));
        assert_eq!(normalize_entry_path("a\\b").as_deref(), Some("a/b"));
        assert_eq!(normalize_entry_path("a//b/").as_deref(), Some("a/b"));
    }

    #[test]
    fn rejects_unsafe_paths() {
        for bad in ["/etc/passwd", "../x", "a/../../x", "C:/x", "c:x", "a\0b", ""] {
            assert_eq!(normalize_entry_path(bad), None, "{bad:?}");
        }
    }

    #[tokio::test]
    async fn fetches_gzip_archive() {
        let name_a = format!("{REFID}/data/{REFID}_a.mp3");
        let name_b = format!("{REFID}/data/{REFID}_ma.wav");
        let bagit = format!("{REFID}/bagit.txt");
        let archive = gzip(&tar_bytes(&[
            (bagit.as_str(), &b"BagIt-Version: 0.97\n"[..]),
            (name_b.as_str(), &b"wav"[..]),
            (name_a.as_str(), &b"mp3"[..]),
        ]));

        let store = Arc::new(MemoryObjectStore::new());
        let source = ObjectLocation::new("audio", format!("{REFID}.tar.gz"));
        store.insert(source.clone(), archive);
        let scratch = tempfile::tempdir().unwrap();

        let package = fetcher(store)
            .fetch(&source, &refid(), MediaType::Audio, scratch.path())
            .await
            .unwrap();

        assert_eq!(package.root, scratch.path().join(EXTRACT_DIR).join(REFID));
        assert_eq!(
            package.payload,
            vec![
                PathBuf::from(format!("data/{REFID}_a.mp3")),
                PathBuf::from(format!("data/{REFID}_ma.wav")),
            ]
        );
        assert!(!scratch.path().join(format!("{REFID}.tar.gz")).exists());
    }

    #[tokio::test]
    async fn plain_tar_is_accepted() {
        let path = format!("{REFID}/data/{REFID}_a.mp4");
        let store = Arc::new(MemoryObjectStore::new());
        let source = ObjectLocation::new("video", format!("{REFID}.tar"));
        store.insert(source.clone(), tar_bytes(&[(path.as_str(), &b"mp4"[..])]));
        let scratch = tempfile::tempdir().unwrap();

        let package = fetcher(store)
            .fetch(&source, &refid(), MediaType::Video, scratch.path())
            .await
            .unwrap();
        assert_eq!(package.payload.len(), 1);
    }

    #[tokio::test]
    async fn missing_object_is_not_retried() {
        let store = Arc::new(MemoryObjectStore::new());
        let source = ObjectLocation::new("audio", format!("{REFID}.tar.gz"));
        let scratch = tempfile::tempdir().unwrap();

        let err = fetcher(store.clone())
            .fetch(&source, &refid(), MediaType::Audio, scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ObjectNotFound(_)));
        assert_eq!(store.call_count(StoreOp::Size), 1);
        assert_eq!(store.call_count(StoreOp::Download), 0);
    }

    #[tokio::test]
    async fn transient_download_failures_are_retried() {
        let path = format!("{REFID}/data/{REFID}_a.mp4");
        let store = Arc::new(MemoryObjectStore::new());
        let source = ObjectLocation::new("video", format!("{REFID}.tar"));
        store.insert(source.clone(), tar_bytes(&[(path.as_str(), &b"mp4"[..])]));
        store.fail_next(StoreOp::Download, 2);
        let scratch = tempfile::tempdir().unwrap();

        fetcher(store.clone())
            .fetch(&source, &refid(), MediaType::Video, scratch.path())
            .await
            .unwrap();
        assert_eq!(store.call_count(StoreOp::Download), 3);
        assert_eq!(store.call_count(StoreOp::Get), 0);
    }

    #[tokio::test]
    async fn entry_named_like_the_archive_cannot_clobber_it() {
        let archive_name = format!("{REFID}.tar");
        let inner = format!("{REFID}/data/{REFID}_a.mp4");
        let tail = format!("{REFID}/data/{REFID}_b.mp4");
        let store = Arc::new(MemoryObjectStore::new());
        let source = ObjectLocation::new("video", archive_name.clone());
        store.insert(
            source.clone(),
            tar_bytes(&[
                (archive_name.as_str(), &b"not the archive"[..]),
                (inner.as_str(), &b"mp4"[..]),
                (tail.as_str(), &b"mp4"[..]),
            ]),
        );
        let scratch = tempfile::tempdir().unwrap();

        let package = fetcher(store)
            .fetch(&source, &refid(), MediaType::Video, scratch.path())
            .await
            .unwrap();
        assert_eq!(package.payload.len(), 2);
        assert!(!scratch.path().join(&archive_name).exists());
        assert_eq!(
            fs::read(scratch.path().join(EXTRACT_DIR).join(&archive_name)).unwrap(),
            b"not the archive"
        );
    }

    #[tokio::test]
    async fn wrong_bag_root_is_rejected() {
        let store = Arc::new(MemoryObjectStore::new());
        let source = ObjectLocation::new("audio", format!("{REFID}.tar"));
        store.insert(source.clone(), tar_bytes(&[("other/data/x.wav", &b"x"[..])]));
        let scratch = tempfile::tempdir().unwrap();

        let err = fetcher(store)
            .fetch(&source, &refid(), MediaType::Audio, scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::BagRootMissing(_)));
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("x.tar.gz");
        fs::write(&archive, [0x1f, 0x8b, 0x00, 0x01, 0x02]).unwrap();
        let err = extract_archive(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, FetchError::CorruptArchive(_)), "{err}");
    }

    #[test]
    fn symlink_entries_are_rejected() {
        let mut out = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut out);
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_mode(0o777);
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_cksum();
            builder
                .append_link(&mut header, "bag/data/link", "/etc/passwd")
                .unwrap();
            builder.finish().unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("x.tar");
        fs::write(&archive, out).unwrap();

        let err = extract_archive(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, FetchError::UnsafeEntry(_)));
        assert!(!dir.path().join("bag/data/link").exists());
    }

    #[test]
    fn traversal_entries_are_rejected() {
        let mut header = tar::Header::new_old();
        let name = b"../escape.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(1);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();

        let mut out = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut out);
            builder.append(&header, &b"x"[..]).unwrap();
            builder.finish().unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scratch");
        fs::create_dir_all(&nested).unwrap();
        let archive = nested.join("x.tar");
        fs::write(&archive, out).unwrap();

        let err = extract_archive(&archive, &nested).unwrap_err();
        assert!(matches!(err, FetchError::UnsafeEntry(_)));
        assert!(!dir.path().join("escape.txt").exists());
    }
}

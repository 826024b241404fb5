//! src/services/object_store.rs
//!
//! ObjectStore — payload bytes on disk, addressed as `base_path/{bucket}/{key}`.
//!
//! Uploads are streamed into a staging file under `base_path/.staging` and only
//! become visible when the registry publishes them with an atomic rename. The
//! staging directory name can never be a valid bucket name, and neither can
//! `lost+found`, where startup recovery moves payloads no catalog row claims.

use crate::services::error::{StorageError, StorageResult};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
};
use tempfile::TempPath;
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
    task,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Largest payload accepted by a single upload (1 GiB).
pub const MAX_OBJECT_SIZE: u64 = 1 << 30;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

pub const STAGING_DIR: &str = ".staging";
pub const LOST_FOUND_DIR: &str = "lost+found";
/// `.backup~{bucket}~{key}~{uuid}`; `~` never appears in a valid name.
const BACKUP_PREFIX: &str = ".backup~";
const SNIFF_LEN: usize = 512;
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// A fully written, fsynced upload that has not been published yet.
///
/// Dropping it deletes the staging file.
#[derive(Debug)]
pub struct StagedObject {
    path: TempPath,
    content_length: u64,
    content_type: String,
}

impl StagedObject {
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

/// A previous payload moved out of the way during a replacement.
///
/// Dropping it deletes the old bytes; [`ObjectStore::restore`] puts them back.
#[derive(Debug)]
pub struct SetAside(TempPath);

/// A set-aside payload found in staging at startup: a replacement was
/// interrupted before it could either commit or roll back.
#[derive(Debug)]
pub struct OrphanedBackup {
    pub bucket: String,
    pub key: String,
    pub content_length: u64,
    path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ObjectStore {
    base_path: PathBuf,
    staging: PathBuf,
}

impl ObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        let staging = base_path.join(STAGING_DIR);
        Self { base_path, staging }
    }

    /// Create the staging directory and purge uploads orphaned by a crash.
    ///
    /// Set-aside payloads are kept and returned; only the registry knows
    /// whether they still hold the catalogued bytes.
    pub async fn prepare(&self) -> StorageResult<Vec<OrphanedBackup>> {
        fs::create_dir_all(&self.staging).await?;
        let mut entries = fs::read_dir(&self.staging).await?;
        let mut backups = Vec::new();
        let mut purged = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            match parse_backup_name(&name) {
                Some((bucket, key)) => backups.push(OrphanedBackup {
                    bucket,
                    key,
                    content_length: entry.metadata().await?.len(),
                    path: entry.path(),
                }),
                None => {
                    fs::remove_file(entry.path()).await?;
                    purged += 1;
                }
            }
        }
        if purged > 0 {
            info!("purged {} orphaned staging files", purged);
        }
        Ok(backups)
    }

    /// Put an orphaned backup back in place of whatever payload is there now.
    pub async fn reinstate(&self, backup: OrphanedBackup) -> StorageResult<()> {
        let target = self.object_path(&backup.bucket, &backup.key);
        fs::rename(&backup.path, &target).await?;
        warn!(
            "restored previous payload of `{}/{}` from an interrupted replacement",
            backup.bucket, backup.key
        );
        Ok(())
    }

    pub async fn discard(&self, backup: OrphanedBackup) -> StorageResult<()> {
        fs::remove_file(&backup.path).await?;
        debug!("discarded backup of `{}/{}`", backup.bucket, backup.key);
        Ok(())
    }

    /// Move an entry of a bucket directory to `lost+found/{bucket}/`.
    pub async fn quarantine(&self, bucket: &str, name: &str) -> StorageResult<PathBuf> {
        let dir = self.base_path.join(LOST_FOUND_DIR).join(bucket);
        fs::create_dir_all(&dir).await?;
        let mut target = dir.join(name);
        if fs::try_exists(&target).await? {
            target = dir.join(format!("{}.{}", name, Uuid::new_v4()));
        }
        fs::rename(self.base_path.join(bucket).join(name), &target).await?;
        warn!(
            "moved untracked `{}/{}` to {}",
            bucket,
            name,
            target.display()
        );
        Ok(target)
    }

    /// On-disk size of a payload, `None` if it is missing.
    pub async fn payload_len(&self, bucket: &str, key: &str) -> StorageResult<Option<u64>> {
        match fs::metadata(self.object_path(bucket, key)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Fully-qualified payload path. Parent directories may not exist yet.
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.base_path.join(bucket).join(key)
    }

    /// Stream an upload body into a staging file.
    ///
    /// - The length must be declared up front and stay within [`MAX_OBJECT_SIZE`].
    /// - Bytes go through a bounded write buffer, never held whole in memory.
    /// - The body must carry exactly the declared number of bytes.
    /// - Without an explicit content type, one is sniffed from the first bytes.
    pub async fn stage<S>(
        &self,
        declared_length: Option<u64>,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<StagedObject>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let declared = admit_length(declared_length)?;

        let (file, path) = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(&self.staging)?
            .into_parts();
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, File::from_std(file));

        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut received: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            if received > declared {
                return Err(StorageError::BodyLengthMismatch {
                    expected: declared,
                    received,
                });
            }
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            writer.write_all(&chunk).await?;
        }
        if received != declared {
            return Err(StorageError::BodyLengthMismatch {
                expected: declared,
                received,
            });
        }
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        let content_type = content_type
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| sniff_content_type(&head));
        debug!(
            "staged {} bytes ({}) at {}",
            received,
            content_type,
            path.display()
        );

        Ok(StagedObject {
            path,
            content_length: received,
            content_type,
        })
    }

    /// Atomically move a staged upload into place, replacing any payload there.
    pub async fn publish(&self, staged: StagedObject, bucket: &str, key: &str) -> StorageResult<()> {
        persist(staged.path, self.object_path(bucket, key)).await
    }

    /// Move the current payload into staging so it can be restored if the
    /// replacing upload fails to commit. `None` if there was no payload.
    pub async fn set_aside(&self, bucket: &str, key: &str) -> StorageResult<Option<SetAside>> {
        let backup = self.staging.join(backup_name(bucket, key));
        match fs::rename(self.object_path(bucket, key), &backup).await {
            Ok(()) => Ok(Some(SetAside(TempPath::try_from_path(backup)?))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn restore(&self, previous: SetAside, bucket: &str, key: &str) -> StorageResult<()> {
        persist(previous.0, self.object_path(bucket, key)).await
    }

    /// Open a payload for reading, returning the handle and its on-disk size.
    pub async fn open(&self, bucket: &str, key: &str) -> StorageResult<(File, u64)> {
        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Io(err)
                }
            })?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    /// Delete a payload. Deleting a missing payload succeeds; the return value
    /// reports whether anything was removed.
    pub async fn delete(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match fs::remove_file(self.object_path(bucket, key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Rename a temp path onto `target` off the async runtime.
async fn persist(path: TempPath, target: PathBuf) -> StorageResult<()> {
    task::spawn_blocking(move || path.persist(target).map_err(|err| err.error))
        .await
        .map_err(io::Error::other)??;
    Ok(())
}

fn backup_name(bucket: &str, key: &str) -> String {
    format!("{}{}~{}~{}", BACKUP_PREFIX, bucket, key, Uuid::new_v4())
}

fn parse_backup_name(name: &str) -> Option<(String, String)> {
    let mut parts = name.strip_prefix(BACKUP_PREFIX)?.splitn(3, '~');
    let bucket = parts.next()?;
    let key = parts.next()?;
    parts.next()?;
    Some((bucket.to_string(), key.to_string()))
}

/// Check a declared upload length against the upload limits.
pub fn admit_length(declared_length: Option<u64>) -> StorageResult<u64> {
    let declared = declared_length.ok_or(StorageError::UndefinedLength)?;
    if declared > MAX_OBJECT_SIZE {
        return Err(StorageError::TooLarge {
            declared,
            max: MAX_OBJECT_SIZE,
        });
    }
    Ok(declared)
}

/// Infer a MIME type from the leading bytes of a payload.
///
/// Magic-byte signatures win; otherwise valid UTF-8 is plain text and anything
/// else is an opaque byte stream.
pub fn sniff_content_type(head: &[u8]) -> String {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    let text = match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut off by the sniff window is still text.
        Err(err) => err.error_len().is_none() && head.len() == SNIFF_LEN,
    };
    if text {
        TEXT_CONTENT_TYPE.to_string()
    } else {
        DEFAULT_CONTENT_TYPE.to_string()
    }
}

//! src/services/catalog.rs
//!
//! Catalog — durable CSV metadata for the registry.
//!
//! Layout beneath the storage root:
//! - `buckets.csv` — one `name,created,modified,status` row per bucket
//! - `{bucket}/objects.csv` — one `key,length,content-type,modified` row per object
//!
//! Catalogs are never patched in place. Every save rewrites the whole file into
//! a temp file next to it, fsyncs, and renames it over the old one, so a crash
//! leaves either the previous or the next version on disk.

use crate::{
    models::{
        bucket::{Bucket, BucketStatus},
        object::ObjectRecord,
    },
    services::error::{StorageError, StorageResult},
    validation::validate_name,
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use std::{
    collections::{HashMap, HashSet},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, info, warn};

pub const BUCKET_CATALOG: &str = "buckets.csv";
pub const OBJECT_CATALOG: &str = "objects.csv";

/// Prefix of the temp files a catalog save renames into place.
const CATALOG_TEMP_PREFIX: &str = ".catalog-";

const BUCKET_FIELDS: usize = 4;
const OBJECT_FIELDS: usize = 4;

/// Storage roots that would overlap the project's own directories.
const PROHIBITED_STORAGE_PATHS: [&str; 7] = ["", ".", "src", "target", "tests", "demos", ".git"];

/// Names that can never be used as bucket names or object keys because they
/// would shadow a catalog file.
pub fn is_reserved(name: &str) -> bool {
    name == BUCKET_CATALOG || name == OBJECT_CATALOG
}

/// Current time at the precision the catalogs persist, so an in-memory record
/// and its reloaded copy compare equal.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Reject storage roots on the deny-list.
pub fn validate_storage_path(root: &Path) -> StorageResult<()> {
    let raw = root.to_string_lossy();
    let normalized = raw.trim_start_matches("./").trim_end_matches('/');
    if PROHIBITED_STORAGE_PATHS.contains(&normalized) {
        return Err(StorageError::ProhibitedStoragePath(raw.into_owned()));
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    pub fn bucket_catalog_path(&self) -> PathBuf {
        self.root.join(BUCKET_CATALOG)
    }

    pub fn object_catalog_path(&self, bucket: &str) -> PathBuf {
        self.bucket_dir(bucket).join(OBJECT_CATALOG)
    }

    /// Hydrate the registry map from disk.
    ///
    /// Creates the storage root and any missing catalog file or bucket
    /// directory. Malformed rows, duplicate names and unparsable fields are
    /// reported as `Corruption`; the caller must not serve with a partial map.
    pub async fn load(&self) -> StorageResult<HashMap<String, Bucket>> {
        validate_storage_path(&self.root)?;
        if !fs::try_exists(&self.root).await? {
            fs::create_dir_all(&self.root).await?;
            info!("created storage directory {}", self.root.display());
        }

        let path = self.bucket_catalog_path();
        let bytes = read_or_create(&path).await?;

        let mut buckets = HashMap::new();
        for row in parse_bucket_rows(&path, &bytes)? {
            if buckets.contains_key(&row.name) {
                return Err(StorageError::corruption(
                    &path,
                    row.line,
                    format!("duplicate bucket `{}`", row.name),
                ));
            }

            let objects = self.load_objects(&row.name).await?;
            let bucket = Bucket {
                name: row.name,
                created_at: row.created_at,
                last_modified: row.last_modified,
                objects,
            };
            if bucket.status() != row.status {
                warn!(
                    bucket = %bucket.name,
                    stored = %row.status,
                    derived = %bucket.status(),
                    "stored bucket status disagrees with its objects, using derived status"
                );
            }
            buckets.insert(bucket.name.clone(), bucket);
        }

        info!(
            buckets = buckets.len(),
            objects = buckets.values().map(|b| b.objects.len()).sum::<usize>(),
            "loaded catalog from {}",
            self.root.display()
        );
        Ok(buckets)
    }

    async fn load_objects(&self, bucket: &str) -> StorageResult<Vec<ObjectRecord>> {
        let dir = self.bucket_dir(bucket);
        if !fs::try_exists(&dir).await? {
            fs::create_dir_all(&dir).await?;
            warn!("recreated missing directory for bucket `{}`", bucket);
        }

        let path = self.object_catalog_path(bucket);
        let bytes = read_or_create(&path).await?;
        let objects = parse_object_rows(&path, &bytes)?;

        for object in &objects {
            match fs::metadata(dir.join(&object.key)).await {
                Ok(meta) if meta.len() == object.content_length => {}
                Ok(meta) => warn!(
                    bucket,
                    key = %object.key,
                    catalog = object.content_length,
                    disk = meta.len(),
                    "payload size differs from catalog"
                ),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    warn!(bucket, key = %object.key, "payload missing for catalogued object")
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(objects)
    }

    /// Create a bucket directory holding an empty object catalog.
    ///
    /// An existing directory is reused (e.g. left behind by an interrupted
    /// delete); its catalog is reset to empty.
    pub async fn create_bucket_dir(&self, bucket: &str) -> StorageResult<()> {
        let dir = self.bucket_dir(bucket);
        match fs::create_dir(&dir).await {
            Ok(()) => debug!("created bucket directory {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!("bucket directory {} already exists", dir.display())
            }
            Err(err) => return Err(err.into()),
        }
        write_atomic(self.object_catalog_path(bucket), Vec::new()).await
    }

    /// First directory entry that is not the object catalog, if any.
    pub async fn stray_entry(&self, bucket: &str) -> StorageResult<Option<String>> {
        let mut entries = match fs::read_dir(self.bucket_dir(bucket)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name != OBJECT_CATALOG {
                return Ok(Some(name.to_string_lossy().into_owned()));
            }
        }
        Ok(None)
    }

    /// Clean a bucket directory at startup: delete catalog temp files left by
    /// an interrupted save and return the entries no object record claims.
    pub async fn sweep(&self, bucket: &Bucket) -> StorageResult<Vec<String>> {
        let dir = self.bucket_dir(&bucket.name);
        let mut entries = fs::read_dir(&dir).await?;
        let mut untracked = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == OBJECT_CATALOG || bucket.object(&name).is_some() {
                continue;
            }
            if name.starts_with(CATALOG_TEMP_PREFIX) {
                fs::remove_file(entry.path()).await?;
                debug!("removed stale catalog temp file {}", entry.path().display());
                continue;
            }
            untracked.push(name);
        }
        Ok(untracked)
    }

    /// Names listed in `buckets.csv` as it is on disk right now.
    pub async fn read_bucket_names(&self) -> StorageResult<Vec<String>> {
        let path = self.bucket_catalog_path();
        let bytes = fs::read(&path).await?;
        Ok(parse_bucket_rows(&path, &bytes)?
            .into_iter()
            .map(|row| row.name)
            .collect())
    }

    /// Remove a bucket's object catalog and its (then empty) directory.
    pub async fn remove_bucket_dir(&self, bucket: &str) -> StorageResult<()> {
        remove_if_present(fs::remove_file(self.object_catalog_path(bucket)).await)?;
        remove_if_present(fs::remove_dir(self.bucket_dir(bucket)).await)?;
        Ok(())
    }

    /// Rewrite `buckets.csv` from the given records.
    pub async fn write_buckets<'a, I>(&self, buckets: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a Bucket>,
    {
        let bytes = encode_buckets(buckets)?;
        write_atomic(self.bucket_catalog_path(), bytes).await
    }

    /// Rewrite `{bucket}/objects.csv` from the given records.
    pub async fn write_objects(&self, bucket: &str, objects: &[ObjectRecord]) -> StorageResult<()> {
        let bytes = encode_objects(objects)?;
        write_atomic(self.object_catalog_path(bucket), bytes).await
    }
}

struct BucketRow {
    line: u64,
    name: String,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    status: BucketStatus,
}

fn encode_buckets<'a>(buckets: impl IntoIterator<Item = &'a Bucket>) -> StorageResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for bucket in buckets {
        let created = format_time(&bucket.created_at);
        let modified = format_time(&bucket.last_modified);
        writer.write_record([
            bucket.name.as_str(),
            created.as_str(),
            modified.as_str(),
            bucket.status().as_str(),
        ])?;
    }
    writer.into_inner().map_err(|err| err.into_error().into())
}

fn encode_objects(objects: &[ObjectRecord]) -> StorageResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for object in objects {
        let length = object.content_length.to_string();
        let modified = format_time(&object.last_modified);
        writer.write_record([
            object.key.as_str(),
            length.as_str(),
            object.content_type.as_str(),
            modified.as_str(),
        ])?;
    }
    writer.into_inner().map_err(|err| err.into_error().into())
}

fn parse_bucket_rows(path: &Path, bytes: &[u8]) -> StorageResult<Vec<BucketRow>> {
    let mut rows = Vec::new();
    for (line, record) in read_records(path, bytes, BUCKET_FIELDS)? {
        let name = &record[0];
        check_name(path, line, name)?;
        let status = BucketStatus::parse(&record[3]).ok_or_else(|| {
            StorageError::corruption(path, line, format!("unknown status `{}`", &record[3]))
        })?;
        rows.push(BucketRow {
            line,
            name: name.to_string(),
            created_at: parse_time(path, line, &record[1])?,
            last_modified: parse_time(path, line, &record[2])?,
            status,
        });
    }
    Ok(rows)
}

fn parse_object_rows(path: &Path, bytes: &[u8]) -> StorageResult<Vec<ObjectRecord>> {
    let mut objects = Vec::new();
    let mut seen = HashSet::new();
    for (line, record) in read_records(path, bytes, OBJECT_FIELDS)? {
        let key = &record[0];
        check_name(path, line, key)?;
        if !seen.insert(key.to_string()) {
            return Err(StorageError::corruption(
                path,
                line,
                format!("duplicate object `{}`", key),
            ));
        }
        let content_length = record[1].parse::<u64>().map_err(|err| {
            StorageError::corruption(
                path,
                line,
                format!("content length `{}` is not a number: {}", &record[1], err),
            )
        })?;
        objects.push(ObjectRecord {
            key: key.to_string(),
            content_length,
            content_type: record[2].to_string(),
            last_modified: parse_time(path, line, &record[3])?,
        });
    }
    Ok(objects)
}

/// Read every row, insisting on exactly `fields` columns.
fn read_records(
    path: &Path,
    bytes: &[u8],
    fields: usize,
) -> StorageResult<Vec<(u64, csv::StringRecord)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| {
            let line = err.position().map(|p| p.line()).unwrap_or(0);
            StorageError::corruption(path, line, err.to_string())
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.len() != fields {
            return Err(StorageError::corruption(
                path,
                line,
                format!("expected {} fields, found {}", fields, record.len()),
            ));
        }
        records.push((line, record));
    }
    Ok(records)
}

fn check_name(path: &Path, line: u64, name: &str) -> StorageResult<()> {
    if is_reserved(name) {
        return Err(StorageError::corruption(
            path,
            line,
            format!("reserved name `{}`", name),
        ));
    }
    validate_name(name).map_err(|err| StorageError::corruption(path, line, err.to_string()))
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(path: &Path, line: u64, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            StorageError::corruption(path, line, format!("bad timestamp `{}`: {}", value, err))
        })
}

async fn read_or_create(path: &Path) -> StorageResult<Vec<u8>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            fs::write(path, b"").await?;
            info!("created catalog file {}", path.display());
            Ok(Vec::new())
        }
        Err(err) => Err(err.into()),
    }
}

fn remove_if_present(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Crash-only write: temp file in the target's directory, fsync, rename.
async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> StorageResult<()> {
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::other("catalog path has no parent directory"))?;
        let mut temp = tempfile::Builder::new()
            .prefix(CATALOG_TEMP_PREFIX)
            .tempfile_in(parent)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|err| err.error)?;
        Ok(())
    })
    .await
    .map_err(io::Error::other)??;
    Ok(())
}

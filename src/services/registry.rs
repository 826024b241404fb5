//! src/services/registry.rs
//!
//! Registry — the in-memory index of buckets and their objects, and the only
//! code allowed to change it.
//!
//! Every structural mutation runs under the registry's write lock and follows
//! the same shape: build a candidate copy of the affected bucket, persist the
//! candidate (payload rename, per-bucket catalog, bucket catalog), and only
//! then swap it into the map. A failed persist leaves memory untouched and
//! rolls the disk back as far as it can, so the map never runs ahead of disk.

use crate::{
    models::{bucket::Bucket, object::ObjectRecord},
    services::{
        catalog::{self, Catalog},
        error::{StorageError, StorageResult},
        object_store::{ObjectStore, OrphanedBackup, SetAside, StagedObject},
    },
};
use std::{
    collections::HashMap,
    iter,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs::File, sync::RwLock, time};
use tracing::{debug, error, info, warn};

type BucketMap = HashMap<String, Bucket>;

pub struct Registry {
    buckets: RwLock<BucketMap>,
    catalog: Catalog,
    objects: ObjectStore,
}

impl Registry {
    /// Load the catalogs under `base_path` and prepare the object store.
    ///
    /// Fails on any catalog corruption; the server must not start with a
    /// registry that disagrees with disk.
    pub async fn open(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        let catalog = Catalog::new(&base_path);
        let objects = ObjectStore::new(&base_path);

        let buckets = catalog.load().await?;
        let backups = objects.prepare().await?;

        let registry = Self {
            buckets: RwLock::new(buckets),
            catalog,
            objects,
        };
        registry.recover(backups).await?;
        Ok(registry)
    }

    /// Repair what a crash mid-mutation can leave on disk.
    ///
    /// A set-aside payload is reinstated when it matches the catalogued length
    /// and the payload in place does not (the replacing upload was published
    /// but its catalog write never landed); otherwise it is dropped. Bucket
    /// entries no record claims are moved to `lost+found`.
    async fn recover(&self, backups: Vec<OrphanedBackup>) -> StorageResult<()> {
        let buckets = self.buckets.read().await;

        for backup in backups {
            let catalogued = buckets
                .get(&backup.bucket)
                .and_then(|b| b.object(&backup.key))
                .map(|o| o.content_length);
            let on_disk = self.objects.payload_len(&backup.bucket, &backup.key).await?;
            match catalogued {
                Some(len) if len == backup.content_length && on_disk != Some(len) => {
                    self.objects.reinstate(backup).await?
                }
                _ => self.objects.discard(backup).await?,
            }
        }

        for bucket in buckets.values() {
            for name in self.catalog.sweep(bucket).await? {
                self.objects.quarantine(&bucket.name, &name).await?;
            }
        }
        Ok(())
    }

    /// Confirm the registry is usable: the lock is obtainable within `wait`
    /// and `buckets.csv` on disk names exactly the buckets held in memory.
    pub async fn verify(&self, wait: Duration) -> StorageResult<usize> {
        let buckets = time::timeout(wait, self.buckets.read())
            .await
            .map_err(|_| StorageError::LockTimeout(wait))?;
        let names = self.catalog.read_bucket_names().await?;
        if let Some(missing) = names.iter().find(|name| !buckets.contains_key(*name)) {
            return Err(StorageError::CatalogMismatch {
                path: self.catalog.bucket_catalog_path(),
                reason: format!("bucket `{}` is not loaded", missing),
            });
        }
        if names.len() != buckets.len() {
            return Err(StorageError::CatalogMismatch {
                path: self.catalog.bucket_catalog_path(),
                reason: format!(
                    "{} buckets on disk, {} in memory",
                    names.len(),
                    buckets.len()
                ),
            });
        }
        Ok(buckets.len())
    }

    pub fn base_path(&self) -> &Path {
        self.catalog.root()
    }

    pub fn object_store(&self) -> &ObjectStore {
        &self.objects
    }

    /// Snapshot of every bucket, in no particular order.
    pub async fn list_buckets(&self) -> Vec<Bucket> {
        self.buckets.read().await.values().cloned().collect()
    }

    /// Snapshot of one bucket.
    pub async fn bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.buckets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::BucketNotFound(name.to_string()))
    }

    /// Create an empty bucket.
    ///
    /// The directory, its empty object catalog and the bucket catalog row are
    /// all written before the bucket becomes visible.
    pub async fn create_bucket(&self, name: &str) -> StorageResult<Bucket> {
        if catalog::is_reserved(name) {
            return Err(StorageError::ProhibitedName(name.to_string()));
        }

        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(name) {
            return Err(StorageError::BucketAlreadyExists(name.to_string()));
        }

        self.catalog.create_bucket_dir(name).await?;
        let bucket = Bucket::new(name, catalog::now());
        if let Err(err) = self
            .catalog
            .write_buckets(buckets.values().chain(iter::once(&bucket)))
            .await
        {
            if let Err(cleanup) = self.catalog.remove_bucket_dir(name).await {
                warn!("failed to clean up directory of bucket `{}`: {}", name, cleanup);
            }
            return Err(err);
        }

        buckets.insert(name.to_string(), bucket.clone());
        info!("bucket `{}` created", name);
        Ok(bucket)
    }

    /// Delete an empty bucket.
    ///
    /// Emptiness means an empty object list. A directory that still holds
    /// anything besides the object catalog is refused as well, before any
    /// file is touched.
    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .get(name)
            .ok_or_else(|| StorageError::BucketNotFound(name.to_string()))?;
        if !bucket.objects.is_empty() {
            return Err(StorageError::BucketNotEmpty(name.to_string()));
        }
        if let Some(entry) = self.catalog.stray_entry(name).await? {
            return Err(StorageError::BucketDirectoryNotClean {
                bucket: name.to_string(),
                entry,
            });
        }

        self.catalog.remove_bucket_dir(name).await?;
        if let Err(err) = self
            .catalog
            .write_buckets(buckets.values().filter(|b| b.name != name))
            .await
        {
            // The bucket is still catalogued and still in memory; give it its
            // directory back.
            if let Err(restore) = self.catalog.create_bucket_dir(name).await {
                error!("failed to restore directory of bucket `{}`: {}", name, restore);
            }
            return Err(err);
        }

        buckets.remove(name);
        info!("bucket `{}` deleted", name);
        Ok(())
    }

    pub async fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let buckets = self.buckets.read().await;
        let bucket_rec = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        Ok(bucket_rec.object(key).is_some())
    }

    /// Metadata of one object.
    pub async fn object(&self, bucket: &str, key: &str) -> StorageResult<ObjectRecord> {
        let buckets = self.buckets.read().await;
        find_object(&buckets, bucket, key).cloned()
    }

    /// Metadata plus an open payload handle and its on-disk size.
    ///
    /// The file is opened while the read lock is held, so a concurrent
    /// replacement cannot swap the payload between lookup and open.
    pub async fn open_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectRecord, File, u64)> {
        let buckets = self.buckets.read().await;
        let object = find_object(&buckets, bucket, key)?.clone();
        let (file, size) = self.objects.open(bucket, key).await?;
        if size != object.content_length {
            warn!(
                bucket,
                key,
                catalog = object.content_length,
                disk = size,
                "payload size differs from catalog"
            );
        }
        Ok((object, file, size))
    }

    /// Publish a staged payload as `bucket/key` and record it.
    ///
    /// An existing object with the same key is replaced: its record is evicted
    /// and its payload set aside until the new catalogs are durable. Returns the
    /// new record and whether an object was replaced.
    pub async fn record_object_upload(
        &self,
        bucket: &str,
        key: &str,
        staged: StagedObject,
    ) -> StorageResult<(ObjectRecord, bool)> {
        if catalog::is_reserved(key) {
            return Err(StorageError::ProhibitedName(key.to_string()));
        }

        let mut buckets = self.buckets.write().await;
        let current = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        let now = catalog::now();
        let record = ObjectRecord {
            key: key.to_string(),
            content_length: staged.content_length(),
            content_type: staged.content_type().to_string(),
            last_modified: now,
        };

        let mut candidate = current.clone();
        let replaced = match candidate.position(key) {
            Some(index) => {
                candidate.objects.remove(index);
                true
            }
            None => false,
        };
        candidate.objects.push(record.clone());
        candidate.last_modified = now;

        let previous = if replaced {
            self.objects.set_aside(bucket, key).await?
        } else {
            None
        };
        if let Err(err) = self.objects.publish(staged, bucket, key).await {
            self.roll_back_payload(bucket, key, previous, false).await;
            return Err(err);
        }
        if let Err(err) = self.persist(&buckets, current, &candidate).await {
            self.roll_back_payload(bucket, key, previous, true).await;
            return Err(err);
        }
        // Discards the old bytes.
        drop(previous);

        buckets.insert(bucket.to_string(), candidate);
        info!(
            "object `{}/{}` {} ({} bytes, {})",
            bucket,
            key,
            if replaced { "replaced" } else { "created" },
            record.content_length,
            record.content_type
        );
        Ok((record, replaced))
    }

    /// Remove `bucket/key` from the registry, then delete its payload.
    pub async fn record_object_delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<ObjectRecord> {
        let mut buckets = self.buckets.write().await;
        let current = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        let index = current
            .position(key)
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        let mut candidate = current.clone();
        let removed = candidate.objects.swap_remove(index);
        candidate.last_modified = catalog::now();

        self.persist(&buckets, current, &candidate).await?;
        buckets.insert(bucket.to_string(), candidate);

        // The record is gone for good; a payload that fails to delete is only
        // an orphaned file.
        match self.objects.delete(bucket, key).await {
            Ok(true) => debug!("removed payload of `{}/{}`", bucket, key),
            Ok(false) => warn!("payload of `{}/{}` was already missing", bucket, key),
            Err(err) => warn!("failed to remove payload of `{}/{}`: {}", bucket, key, err),
        }
        info!("object `{}/{}` deleted", bucket, key);
        Ok(removed)
    }

    /// Write `candidate`'s object catalog and the bucket catalog with
    /// `candidate` in place of `previous`.
    async fn persist(
        &self,
        buckets: &BucketMap,
        previous: &Bucket,
        candidate: &Bucket,
    ) -> StorageResult<()> {
        self.catalog
            .write_objects(&candidate.name, &candidate.objects)
            .await?;

        let others = buckets.values().filter(|b| b.name != candidate.name);
        if let Err(err) = self
            .catalog
            .write_buckets(others.chain(iter::once(candidate)))
            .await
        {
            if let Err(restore) = self
                .catalog
                .write_objects(&previous.name, &previous.objects)
                .await
            {
                error!(
                    "failed to restore object catalog of bucket `{}`: {}",
                    previous.name, restore
                );
            }
            return Err(err);
        }
        Ok(())
    }

    /// Undo a payload publish: put the replaced bytes back, or remove the new
    /// ones when nothing was replaced.
    async fn roll_back_payload(
        &self,
        bucket: &str,
        key: &str,
        previous: Option<SetAside>,
        published: bool,
    ) {
        let result = match previous {
            Some(previous) => self.objects.restore(previous, bucket, key).await,
            None if published => self.objects.delete(bucket, key).await.map(|_| ()),
            None => Ok(()),
        };
        if let Err(err) = result {
            error!("failed to roll back payload of `{}/{}`: {}", bucket, key, err);
        }
    }
}

fn find_object<'a>(buckets: &'a BucketMap, bucket: &str, key: &str) -> StorageResult<&'a ObjectRecord> {
    buckets
        .get(bucket)
        .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?
        .object(key)
        .ok_or_else(|| StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
}

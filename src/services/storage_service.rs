//! src/services/storage_service.rs
//!
//! StorageService — the operations the HTTP handlers call, composed from the
//! registry (metadata) and the object store (payload bytes).
//!
//! Uploads follow a fixed order: length limits, bucket lookup, stream the body
//! into staging without holding any lock, then a short registry commit. A slow
//! client therefore never blocks other requests to the same bucket.

use crate::{
    models::{bucket::Bucket, object::ObjectRecord},
    services::{
        error::StorageResult,
        object_store,
        registry::Registry,
    },
};
use bytes::Bytes;
use futures::Stream;
use std::{io, path::Path, sync::Arc};
use tokio::fs::File;
use tracing::debug;

/// Cheap to clone; every clone shares the same registry.
#[derive(Clone)]
pub struct StorageService {
    pub registry: Arc<Registry>,
}

impl StorageService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn base_path(&self) -> &Path {
        self.registry.base_path()
    }

    /// All buckets, sorted by name for stable listings.
    pub async fn list_buckets(&self) -> Vec<Bucket> {
        let mut buckets = self.registry.list_buckets().await;
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        buckets
    }

    pub async fn get_bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.registry.bucket(name).await
    }

    pub async fn create_bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.registry.create_bucket(name).await
    }

    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        self.registry.delete_bucket(name).await
    }

    /// Stream-upload an object and record it.
    ///
    /// Returns the stored record and whether it replaced an existing object.
    pub async fn upload_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        declared_length: Option<u64>,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<(ObjectRecord, bool)>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        object_store::admit_length(declared_length)?;
        // Fail before reading the body if the bucket is unknown.
        let existed = self.registry.object_exists(bucket, key).await?;

        let staged = self
            .registry
            .object_store()
            .stage(declared_length, content_type, stream)
            .await?;
        let (record, replaced) = self.registry.record_object_upload(bucket, key, staged).await?;
        if replaced != existed {
            debug!("`{}/{}` changed concurrently during upload", bucket, key);
        }
        Ok((record, replaced))
    }

    /// Metadata plus an open payload handle and its on-disk size.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectRecord, File, u64)> {
        self.registry.open_object(bucket, key).await
    }

    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> StorageResult<ObjectRecord> {
        self.registry.object(bucket, key).await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectRecord> {
        self.registry.record_object_delete(bucket, key).await
    }
}

//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a single object (blob) within a bucket.
///
/// The `ObjectRecord` describes the payload; the bytes themselves live in
/// `<storage_dir>/<bucket>/<key>` and are owned by the object store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Object key, unique within its owning bucket.
    pub key: String,

    /// Size of the stored payload in bytes.
    pub content_length: u64,

    /// MIME type, either client-supplied or sniffed at upload time.
    pub content_type: String,

    /// Timestamp of the last (re)upload.
    pub last_modified: DateTime<Utc>,
}

//! Represents a logical bucket — a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::object::ObjectRecord;

/// Derived activity flag of a bucket.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BucketStatus {
    /// The bucket holds at least one object.
    Active,
    /// The bucket is empty.
    Inactive,
}

impl BucketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BucketStatus::Active => "active",
            BucketStatus::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(BucketStatus::Active),
            "inactive" => Some(BucketStatus::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for BucketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storage bucket.
///
/// Buckets own their object records by value; the list is only ever mutated
/// through the registry, which persists each change before committing it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// Bucket name, also the name of its directory under the storage root.
    pub name: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    /// Last structural change to the bucket's object set.
    pub last_modified: DateTime<Utc>,

    /// Objects currently stored in the bucket, in upload order.
    pub objects: Vec<ObjectRecord>,
}

impl Bucket {
    /// A fresh, empty bucket stamped with `now`.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            created_at: now,
            last_modified: now,
            objects: Vec::new(),
        }
    }

    /// Status is always derived from the object list, never stored.
    pub fn status(&self) -> BucketStatus {
        if self.objects.is_empty() {
            BucketStatus::Inactive
        } else {
            BucketStatus::Active
        }
    }

    pub fn object(&self, key: &str) -> Option<&ObjectRecord> {
        self.objects.iter().find(|o| o.key == key)
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.objects.iter().position(|o| o.key == key)
    }
}

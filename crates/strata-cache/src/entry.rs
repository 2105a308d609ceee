//! Cache keys and entries

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use strata_common::ContentHash;

/// Key of one memoized result
///
/// Derived from `(file path, content hash, scope, target)`. Because the
/// content hash is part of the key, editing a file makes every earlier
/// entry for it unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(ContentHash);

impl CacheKey {
    /// Derive the key for a lookup triple at a given file content
    #[must_use]
    pub fn derive(file_path: &str, content_hash: &ContentHash, scope: &str, target: &str) -> Self {
        Self(ContentHash::compute_parts([
            file_path.as_bytes(),
            content_hash.as_bytes(),
            scope.as_bytes(),
            target.as_bytes(),
        ]))
    }

    /// Underlying digest
    #[inline]
    #[must_use]
    pub fn hash(&self) -> &ContentHash {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.short())
    }
}

#[derive(Debug, Clone, Copy)]
struct Access {
    last_accessed: DateTime<Utc>,
    count: u64,
}

/// A stored result plus access metadata
#[derive(Debug)]
pub struct CacheEntry {
    key: CacheKey,
    file_path: String,
    content_hash: ContentHash,
    scope: String,
    target: String,
    payload: Value,
    created_at: DateTime<Utc>,
    access: Mutex<Access>,
}

impl CacheEntry {
    pub(crate) fn new(
        file_path: String,
        content_hash: ContentHash,
        scope: &str,
        target: &str,
        payload: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: CacheKey::derive(&file_path, &content_hash, scope, target),
            file_path,
            content_hash,
            scope: scope.to_string(),
            target: target.to_string(),
            payload,
            created_at: now,
            access: Mutex::new(Access {
                last_accessed: now,
                count: 1,
            }),
        }
    }

    /// Key this entry is stored under
    #[must_use]
    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// File the result was computed from
    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Content hash of the file at store time
    #[must_use]
    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    /// Analysis scope
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Target within the file
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Stored payload
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Creation time
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last time the entry was stored or served
    #[must_use]
    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.access.lock().last_accessed
    }

    /// Times stored or served
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access.lock().count
    }

    /// Rough in-memory footprint
    pub(crate) fn approximate_size(&self) -> u64 {
        let payload = serde_json::to_vec(&self.payload).map_or(0, |v| v.len());
        (payload + self.file_path.len() + self.scope.len() + self.target.len() + 128) as u64
    }

    pub(crate) fn touch(&self) -> CacheHit {
        let mut access = self.access.lock();
        access.last_accessed = Utc::now();
        access.count += 1;
        CacheHit {
            key: self.key,
            payload: self.payload.clone(),
            created_at: self.created_at,
            access_count: access.count,
        }
    }

    pub(crate) fn to_record(&self) -> EntryRecord {
        let access = *self.access.lock();
        EntryRecord {
            file_path: self.file_path.clone(),
            content_hash: self.content_hash,
            scope: self.scope.clone(),
            target: self.target.clone(),
            payload: self.payload.clone(),
            created_at: self.created_at,
            last_accessed: access.last_accessed,
            access_count: access.count,
        }
    }

    pub(crate) fn from_record(record: EntryRecord) -> Self {
        Self {
            key: CacheKey::derive(
                &record.file_path,
                &record.content_hash,
                &record.scope,
                &record.target,
            ),
            file_path: record.file_path,
            content_hash: record.content_hash,
            scope: record.scope,
            target: record.target,
            payload: record.payload,
            created_at: record.created_at,
            access: Mutex::new(Access {
                last_accessed: record.last_accessed,
                count: record.access_count,
            }),
        }
    }
}

/// Result of a successful lookup
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    /// Key that matched
    pub key: CacheKey,
    /// Stored payload
    pub payload: Value,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// Access count including this hit
    pub access_count: u64,
}

/// Serialized form of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EntryRecord {
    pub(crate) file_path: String,
    pub(crate) content_hash: ContentHash,
    pub(crate) scope: String,
    pub(crate) target: String,
    pub(crate) payload: Value,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_accessed: DateTime<Utc>,
    pub(crate) access_count: u64,
}

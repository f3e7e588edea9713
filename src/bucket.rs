//! Rank-partitioned record storage.
//!
//! Every bucket covers a fixed-size range of ranks and lives in its own
//! `{root}/{start}to{end}/data.json`. Buckets are loaded lazily, kept in memory for the
//! rest of the run and written back with [`BucketStore::flush_dirty`] or
//! [`BucketStore::flush_all`].
//!
//! A record is bucketed by the rank it has in the update at hand. When its rank moves to
//! another range the entry in the old bucket is left as it was, so one identifier can end
//! up in two bucket files.
// TODO: evict clean buckets once the cache grows past a limit; the whole board is held today.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::parse::{self, Record};
use crate::persist::{atomic_write_json, load_json};
use crate::{Result, BUCKET_FILE};

/// Inclusive rank range `start..=end` of one bucket. `(0, 0)` holds records without a usable rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub start: u64,
    pub end: u64,
}

impl BucketKey {
    pub const UNRANKED: BucketKey = BucketKey { start: 0, end: 0 };

    /// Bucket of `rank` for buckets `size` ranks wide.
    pub fn for_rank(rank: i64, size: u64) -> Self {
        if rank <= 0 || size == 0 {
            return Self::UNRANKED;
        }
        let start = ((rank as u64 - 1) / size) * size + 1;
        BucketKey {
            start,
            end: start + size - 1,
        }
    }

    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(self.to_string()).join(BUCKET_FILE)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}to{}", self.start, self.end)
    }
}

/// Latest observation of one identifier and every page it was seen on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub latest: Record,
    pub pages: Vec<u64>,
}

/// Identifier -> record, as stored in one bucket file.
pub type Bucket = BTreeMap<String, BucketRecord>;

#[derive(Debug, Default)]
struct CachedBucket {
    records: Bucket,
    dirty: bool,
}

/// Write-back cache over the bucket files below one storage root.
#[derive(Debug)]
pub struct BucketStore {
    root: PathBuf,
    bucket_size: u64,
    cache: HashMap<BucketKey, CachedBucket>,
}

impl BucketStore {
    pub fn new(root: impl Into<PathBuf>, bucket_size: u64) -> Self {
        Self {
            root: root.into(),
            bucket_size,
            cache: HashMap::new(),
        }
    }

    /// Records `record` as the latest version of `id` and notes that it was seen on `page`.
    /// Applying the same update twice changes nothing the second time.
    pub async fn update(&mut self, id: &str, record: Record, page: u64) -> Result<BucketKey> {
        let key = BucketKey::for_rank(parse::rank(&record), self.bucket_size);
        let bucket = self.load(key).await?;

        match bucket.records.get_mut(id) {
            Some(entry) => {
                entry.latest = record;
                if !entry.pages.contains(&page) {
                    entry.pages.push(page);
                }
            }
            None => {
                bucket.records.insert(
                    id.to_string(),
                    BucketRecord {
                        latest: record,
                        pages: vec![page],
                    },
                );
            }
        }
        bucket.dirty = true;
        Ok(key)
    }

    /// Writes every bucket changed since its last write.
    pub async fn flush_dirty(&mut self) -> Result<usize> {
        let mut written = 0;
        for (key, bucket) in self.cache.iter_mut().filter(|(_, b)| b.dirty) {
            atomic_write_json(&key.path(&self.root), &bucket.records).await?;
            bucket.dirty = false;
            written += 1;
        }
        debug!(written, "flushed dirty buckets");
        Ok(written)
    }

    /// Writes every loaded bucket, changed or not.
    pub async fn flush_all(&mut self) -> Result<usize> {
        for (key, bucket) in self.cache.iter_mut() {
            atomic_write_json(&key.path(&self.root), &bucket.records).await?;
            bucket.dirty = false;
        }
        debug!(written = self.cache.len(), "flushed all buckets");
        Ok(self.cache.len())
    }

    /// Number of identifiers across all loaded buckets.
    pub fn collected(&self) -> usize {
        self.cache.values().map(|b| b.records.len()).sum()
    }

    pub fn bucket(&self, key: &BucketKey) -> Option<&Bucket> {
        self.cache.get(key).map(|b| &b.records)
    }

    pub fn is_dirty(&self, key: &BucketKey) -> bool {
        self.cache.get(key).is_some_and(|b| b.dirty)
    }

    /// A bucket file that cannot be read is an error, so it is never overwritten blindly.
    async fn load(&mut self, key: BucketKey) -> Result<&mut CachedBucket> {
        if !self.cache.contains_key(&key) {
            let path = key.path(&self.root);
            let records: Bucket = load_json(&path).await?.unwrap_or_default();
            debug!(bucket = %key, entries = records.len(), "loaded bucket");
            self.cache.insert(
                key,
                CachedBucket {
                    records,
                    dirty: false,
                },
            );
        }
        Ok(self.cache.entry(key).or_default())
    }
}

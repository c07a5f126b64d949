//! Local range cache for remote files.
//!
//! Each URL maps to a buffer plus the set of byte ranges known to be valid.
//! Ranges only ever grow; nothing is evicted. Two overlapping fetches of the
//! same range may both land, the later one winning; their bytes are identical
//! unless the origin changed in between.

use crate::error::StoreResult;
use crate::store::range_end;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;

/// Sorted, non-overlapping, non-adjacent half-open intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<Range<u64>>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        let mut merged = range;
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;
        for r in self.ranges.drain(..) {
            if r.end < merged.start {
                out.push(r);
            } else if merged.end < r.start {
                if !placed {
                    out.push(merged.clone());
                    placed = true;
                }
                out.push(r);
            } else {
                merged = merged.start.min(r.start)..merged.end.max(r.end);
            }
        }
        if !placed {
            out.push(merged);
        }
        self.ranges = out;
    }

    /// Sub-ranges of `range` not covered by the set, in order.
    pub fn missing(&self, range: Range<u64>) -> Vec<Range<u64>> {
        let mut gaps = Vec::new();
        let mut cursor = range.start;
        for r in &self.ranges {
            if r.end <= cursor {
                continue;
            }
            if r.start >= range.end {
                break;
            }
            if r.start > cursor {
                gaps.push(cursor..r.start);
            }
            cursor = r.end;
            if cursor >= range.end {
                break;
            }
        }
        if cursor < range.end {
            gaps.push(cursor..range.end);
        }
        gaps
    }

    pub fn contains(&self, range: Range<u64>) -> bool {
        range.is_empty() || self.missing(range).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<u64>> {
        self.ranges.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[derive(Debug, Default)]
struct CacheEntry {
    data: Vec<u8>,
    valid: RangeSet,
}

/// Result of a cache lookup. `data` is only meaningful when `missing` is
/// empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRange {
    pub data: Bytes,
    pub missing: Vec<Range<u64>>,
}

impl CachedRange {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RangeCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self, url: &str, range: Range<u64>) -> CachedRange {
        let entries = self.entries.lock();
        let Some(entry) = entries.get(url) else {
            return CachedRange {
                data: Bytes::new(),
                missing: if range.is_empty() { Vec::new() } else { vec![range] },
            };
        };
        let missing = entry.valid.missing(range.clone());
        let data = if missing.is_empty() && !range.is_empty() {
            Bytes::copy_from_slice(&entry.data[range.start as usize..range.end as usize])
        } else {
            Bytes::new()
        };
        CachedRange { data, missing }
    }

    /// Merge `data` at `offset` into the entry for `url`.
    ///
    /// Fails without touching the cache when the range does not fit a
    /// 32-bit file size.
    pub fn insert(&self, url: &str, offset: u64, data: &[u8]) -> StoreResult<()> {
        let end = range_end(offset, data.len())?;
        let start = end - data.len();
        let mut entries = self.entries.lock();
        let entry = entries.entry(url.to_string()).or_default();
        if entry.data.len() < end {
            entry.data.resize(end, 0);
        }
        entry.data[start..end].copy_from_slice(data);
        entry.valid.insert(offset..end as u64);
        debug!(url, offset, len = data.len(), "cached range");
        Ok(())
    }

    /// Mark an empty file as fully cached.
    pub fn insert_empty(&self, url: &str) {
        self.entries.lock().entry(url.to_string()).or_default();
    }

    pub fn remove(&self, url: &str) -> bool {
        self.entries.lock().remove(url).is_some()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.lock().contains_key(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_set_merges() {
        let mut set = RangeSet::new();
        set.insert(10..20);
        set.insert(30..40);
        set.insert(0..5);
        assert_eq!(set.iter().cloned().collect::<Vec<_>>(), vec![0..5, 10..20, 30..40]);

        // adjacent ranges coalesce
        set.insert(20..30);
        assert_eq!(set.iter().cloned().collect::<Vec<_>>(), vec![0..5, 10..40]);

        set.insert(3..12);
        assert_eq!(set.iter().cloned().collect::<Vec<_>>(), vec![0..40]);

        set.insert(7..7);
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn test_range_set_missing() {
        let mut set = RangeSet::new();
        set.insert(10..20);
        set.insert(30..40);

        assert_eq!(set.missing(0..50), vec![0..10, 20..30, 40..50]);
        assert_eq!(set.missing(12..18), Vec::<Range<u64>>::new());
        assert_eq!(set.missing(15..35), vec![20..30]);
        assert!(set.contains(31..39));
        assert!(!set.contains(19..21));
        assert!(set.contains(5..5));
    }

    #[test]
    fn test_cache_query() {
        let cache = RangeCache::new();
        let miss = cache.query("http://o/a", 0..4);
        assert_eq!(miss.missing, vec![0..4]);

        cache.insert("http://o/a", 2, b"cdef").unwrap();
        let partial = cache.query("http://o/a", 0..6);
        assert_eq!(partial.missing, vec![0..2]);
        assert!(!partial.is_complete());

        cache.insert("http://o/a", 0, b"ab").unwrap();
        let hit = cache.query("http://o/a", 1..5);
        assert!(hit.is_complete());
        assert_eq!(hit.data, Bytes::from_static(b"bcde"));

        assert!(cache.remove("http://o/a"));
        assert!(!cache.contains("http://o/a"));
    }

    #[test]
    fn test_empty_entry_answers_empty_ranges() {
        let cache = RangeCache::new();
        cache.insert_empty("http://o/empty");
        let hit = cache.query("http://o/empty", 0..0);
        assert!(hit.is_complete());
        assert!(hit.data.is_empty());
    }

    #[test]
    fn test_insert_rejects_unaddressable_range() {
        let cache = RangeCache::new();
        assert!(cache.insert("http://o/big", u64::MAX - 1, b"zz").is_err());
        assert!(!cache.contains("http://o/big"));
    }
}

// ============================================================================
// ROUTE CACHE
// ============================================================================
// Memoizes match index + autogen results per series. The key is the series
// hash plus the template revision and cache bucket the result was computed
// under; a lookup under any other revision or bucket misses, so a template
// reload or build sequence recovery invalidates stale routes without a flush.
//
// Empty binding lists are negative entries: the series was evaluated and
// matched nothing.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use ahash::AHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::route::RouteBinding;
use crate::series::SeriesIdentity;

/// Build sequence component of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheBucket {
    /// No build sequence rollback has been observed yet
    Unbucketed,
    /// Recovery epoch; advances on every build sequence recovery
    Bucket(u64),
}

impl Display for CacheBucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CacheBucket::Unbucketed => write!(f, "unbucketed"),
            CacheBucket::Bucket(seq) => write!(f, "{seq}"),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    id: SeriesIdentity,
    revision: u64,
    bucket: CacheBucket,
    bindings: Arc<[RouteBinding]>,
    seen_seq: Option<u64>,
}

/// Per-series route memo.
#[derive(Debug, Default)]
pub struct RouteCache {
    // Hash collisions are resolved by the full series ID.
    entries: AHashMap<u64, SmallVec<[CacheEntry; 1]>>,
    len: usize,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached series
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cache `bindings` for a series, replacing any previous entry for it.
    pub fn store(
        &mut self,
        id: &SeriesIdentity,
        revision: u64,
        bucket: CacheBucket,
        bindings: impl Into<Arc<[RouteBinding]>>,
    ) {
        let entry = CacheEntry {
            id: id.clone(),
            revision,
            bucket,
            bindings: bindings.into(),
            seen_seq: None,
        };

        let slot = self.entries.entry(id.hash64).or_default();
        match slot.iter_mut().find(|e| e.id == *id) {
            Some(existing) => *existing = entry,
            None => {
                slot.push(entry);
                self.len += 1;
            }
        }
    }

    /// Cached bindings for a series, or `None` when not cached under this
    /// revision and bucket. A negative entry returns an empty slice.
    pub fn lookup(&self, id: &SeriesIdentity, revision: u64, bucket: CacheBucket) -> Option<Arc<[RouteBinding]>> {
        let entry = self.entries.get(&id.hash64)?.iter().find(|e| e.id == *id)?;
        if entry.revision != revision || entry.bucket != bucket {
            return None;
        }
        Some(Arc::clone(&entry.bindings))
    }

    /// Mark a cached series as seen in `seq`; no-op if not cached.
    pub fn mark_seen_if_present(&mut self, id: &SeriesIdentity, seq: u64) {
        if let Some(entry) = self
            .entries
            .get_mut(&id.hash64)
            .and_then(|slot| slot.iter_mut().find(|e| e.id == *id))
        {
            entry.seen_seq = Some(seq);
        }
    }

    /// Drop every entry not marked seen in `seq`.
    pub fn retain_seen(&mut self, seq: u64) -> usize {
        let before = self.len;
        self.entries.retain(|_, slot| {
            slot.retain(|e| e.seen_seq == Some(seq));
            !slot.is_empty()
        });
        self.len = self.entries.values().map(SmallVec::len).sum();

        let pruned = before - self.len;
        if pruned > 0 {
            trace!(target: "chartengine::cache", seq, pruned, remaining = self.len, "Route cache pruned");
        }
        pruned
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.len = 0;
    }
}

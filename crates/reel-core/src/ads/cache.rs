//! Pre-created ad blocks keyed by break point, category and attempt index

use crate::ads::block::AdBlock;
use crate::types::AdCategory;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub point: Duration,
    pub category: AdCategory,
    pub index: u32,
}

impl CacheKey {
    pub fn new(point: Duration, category: AdCategory, index: u32) -> Self {
        Self {
            point,
            category,
            index,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.point.as_secs_f64(), self.category, self.index)
    }
}

#[derive(Debug, Default)]
pub struct AdCache {
    entries: BTreeMap<CacheKey, AdBlock>,
}

impl AdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a block, replacing any previous one under the same key
    pub fn insert(&mut self, key: CacheKey, block: AdBlock) -> Option<AdBlock> {
        self.entries.insert(key, block)
    }

    pub fn get(&self, key: &CacheKey) -> Option<AdBlock> {
        self.entries.get(key).cloned()
    }

    pub fn take(&mut self, key: &CacheKey) -> Option<AdBlock> {
        self.entries.remove(key)
    }

    /// True if `key` still maps to this very block
    pub fn holds(&self, key: &CacheKey, block: &AdBlock) -> bool {
        self.entries
            .get(key)
            .is_some_and(|cached| cached.id() == block.id())
    }

    /// True if any attempt for this point is cached
    pub fn contains_point(&self, point: Duration, category: AdCategory) -> bool {
        self.entries
            .keys()
            .any(|k| k.point == point && k.category == category)
    }

    /// Drop every entry whose point lies more than `max_offset` behind
    /// `now`. Returns the number of entries removed.
    pub fn evict(&mut self, now: Duration, max_offset: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, block| {
            let keep = now <= key.point + max_offset;
            if !keep {
                debug!(key = %key, "Evicting cached ad block");
                block.deactivate();
            }
            keep
        });
        before - self.entries.len()
    }

    /// Deactivate and drop every entry
    pub fn clear(&mut self) {
        for block in self.entries.values() {
            block.deactivate();
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.keys()
    }
}

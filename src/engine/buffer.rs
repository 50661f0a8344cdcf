use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use super::storage::PAGE_SIZE;

/// Write-through LRU cache of raw pages, keyed by page id.
///
/// The cache sits inside the `Pager` and never changes what is on
/// disk: every page write goes to the file and is fsynced first, and
/// the cached copy is updated in the same call. A hit therefore
/// always returns bytes identical to the file, and eviction never
/// needs a write-back.
///
/// Page 0 and the tail page of the table currently being inserted
/// into are the main beneficiaries; both are re-read on nearly every
/// operation.
#[derive(Debug)]
pub struct PageCache {
    cache: Mutex<LruCache<u32, Vec<u8>>>,
}

impl PageCache {
    /// Creates a cache holding at most `cap_pages` pages.
    pub fn new(cap_pages: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cap_pages).expect("cache capacity must be nonzero"),
            )),
        }
    }

    /// Returns a copy of the cached page, marking it recently used.
    pub fn get(&self, page_id: u32) -> Option<Vec<u8>> {
        self.cache.lock().get(&page_id).cloned()
    }

    /// Inserts or refreshes a page. The evicted entry, if any, is
    /// simply dropped; the file already has the authoritative bytes.
    pub fn put(&self, page_id: u32, page: Vec<u8>) {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        self.cache.lock().put(page_id, page);
    }
}

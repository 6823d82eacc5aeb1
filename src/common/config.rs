use std::fmt;
use std::sync::Arc;

use crate::index::KeyComparator;

/// Default size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Smallest page size accepted for a new file
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page size accepted; free-space bounds are stored as u16
pub const MAX_PAGE_SIZE: usize = 32768;

/// Minimum number of keys a page is laid out to hold. Values of
/// `page_size / MIN_KEYS` bytes or more are moved to overflow pages.
pub const MIN_KEYS: usize = 4;

/// Magic number stored in the header page
pub const MAGIC: u32 = 0xB3DB_B3DB;

/// On-disk format version
pub const VERSION: u32 = 4;

/// Longest key accepted by insert, remove and lookups
pub const MAX_KEY_SIZE: usize = 255;

/// Longest key accepted on pages of `page_size` bytes. Two leaf nodes
/// carrying such a key and the largest inline value must fit on one page
/// together, otherwise a full page cannot always be split in two.
pub fn max_key_size(page_size: usize) -> usize {
    let largest_inline = page_size / MIN_KEYS - 1;
    // half the page after its 12 byte header, less a 7 byte node header
    // and a 2 byte offset entry
    let per_node = (page_size - 12) / 2 - 9;
    MAX_KEY_SIZE.min(per_node - largest_inline)
}

/// Maximum number of dirty pages written by a single batched write
pub const COMMIT_PAGES: usize = 64;

/// Default bound on the number of cached pages
pub const DEFAULT_MAX_CACHE: usize = 1024;

/// Pages filled below this many per-mille are rebalanced after a delete
pub const FILL_THRESHOLD: u32 = 250;

/// Default K value for the cache replacer (1 means plain LRU)
pub const DEFAULT_LRUK_K: usize = 1;

/// Options used when opening a tree.
#[derive(Clone)]
pub struct Config {
    /// Page size used when a new file is created
    pub page_size: usize,
    /// Upper bound on cached clean pages
    pub max_cache: usize,
    /// K for the LRU-K replacer
    pub lru_k: usize,
    /// Compare keys byte-wise from the end instead of the front
    pub reverse_keys: bool,
    /// Skip fsync after commit
    pub no_sync: bool,
    /// Open the backing file without write access
    pub read_only: bool,
    /// Custom ordering; disables prefix compression
    pub comparator: Option<Arc<dyn KeyComparator>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_cache: DEFAULT_MAX_CACHE,
            lru_k: DEFAULT_LRUK_K,
            reverse_keys: false,
            no_sync: false,
            read_only: false,
            comparator: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn max_cache(mut self, max_cache: usize) -> Self {
        self.max_cache = max_cache;
        self
    }

    pub fn lru_k(mut self, k: usize) -> Self {
        self.lru_k = k;
        self
    }

    pub fn reverse_keys(mut self, reverse: bool) -> Self {
        self.reverse_keys = reverse;
        self
    }

    pub fn no_sync(mut self, no_sync: bool) -> Self {
        self.no_sync = no_sync;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn comparator(mut self, cmp: Arc<dyn KeyComparator>) -> Self {
        self.comparator = Some(cmp);
        self
    }

    /// Returns the flags that describe this configuration.
    pub fn flags(&self) -> OpenFlags {
        OpenFlags {
            reverse_keys: self.reverse_keys,
            no_sync: self.no_sync,
            read_only: self.read_only,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("page_size", &self.page_size)
            .field("max_cache", &self.max_cache)
            .field("lru_k", &self.lru_k)
            .field("reverse_keys", &self.reverse_keys)
            .field("no_sync", &self.no_sync)
            .field("read_only", &self.read_only)
            .field("comparator", &self.comparator.is_some())
            .finish()
    }
}

/// Flags a tree was opened with, as reported by `CowTree::flags`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub reverse_keys: bool,
    pub no_sync: bool,
    pub read_only: bool,
}

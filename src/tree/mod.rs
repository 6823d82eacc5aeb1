//! The tree handle.
//!
//! `CowTree` owns the backing store, the page cache and the state of the
//! single write transaction. The B-tree algorithms themselves live in
//! `crate::index` as further `impl CowTree` blocks.

mod compact;
mod recovery;
mod txn;

pub use txn::Txn;
pub(crate) use txn::WriteState;

use std::fs::File;
use std::path::Path;

use tracing::{debug, trace};

use crate::buffer::{MPage, MPageId, PageCache};
use crate::common::{
    max_key_size, Config, CowError, OpenFlags, PageId, Result, INVALID_PAGE_ID, MAX_PAGE_SIZE,
    MIN_PAGE_SIZE,
};
use crate::index::KeyOrder;
use crate::storage::disk::{DiskManager, MemStore, PageStore};
use crate::storage::page::{
    FileHeader, Meta, Page, HEAD_RECORD_END, HEAD_REVERSE_KEYS, PAGE_BRANCH, PAGE_LEAF,
    PAGE_OVERFLOW,
};

/// Statistics reported by `CowTree::stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStat {
    /// Page lookups answered from the cache
    pub hits: u64,
    /// Pages read from the store
    pub reads: u64,
    pub max_cache: usize,
    pub cache_size: usize,
    pub branch_pages: u32,
    pub leaf_pages: u32,
    pub overflow_pages: u32,
    /// Number of commits since the file was created or compacted
    pub revisions: u32,
    pub depth: u32,
    pub entries: u64,
    pub page_size: usize,
    /// Unix time of the last commit
    pub created_at: i64,
}

/// An append-only copy-on-write B-tree stored in a single file.
pub struct CowTree {
    pub(crate) store: Box<dyn PageStore>,
    pub(crate) cache: PageCache,
    pub(crate) order: KeyOrder,
    pub(crate) config: Config,
    pub(crate) page_size: usize,
    /// Last meta record read from or written to the store
    pub(crate) meta: Meta,
    /// Page holding `meta`, invalid until one has been found
    pub(crate) meta_pgno: PageId,
    /// Store length when `meta` was last refreshed
    pub(crate) size: u64,
    /// The store ends in a partial page that the next commit pads out
    pub(crate) fix_padding: bool,
    pub(crate) writer: Option<WriteState>,
    pub(crate) next_txn_id: u64,
}

impl CowTree {
    /// Opens or creates the tree stored at `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let store = DiskManager::open(path, config.read_only)?;
        Self::with_store(Box::new(store), config)
    }

    /// Uses an already opened file as the backing store.
    pub fn from_file(file: File, config: Config) -> Result<Self> {
        Self::with_store(Box::new(DiskManager::from_file(file)), config)
    }

    /// Creates a tree backed by memory only.
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::with_store(Box::new(MemStore::new()), config)
    }

    /// Opens a tree on an arbitrary page store. An empty store gets a new
    /// header page; otherwise the header is validated and the latest meta
    /// page is located.
    pub fn with_store(store: Box<dyn PageStore>, config: Config) -> Result<Self> {
        let header = if store.is_empty()? {
            if config.read_only {
                return Err(CowError::invalid("cannot create a tree on a read-only store"));
            }
            if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&config.page_size) {
                return Err(CowError::invalid(format!(
                    "page size {} outside {}..={}",
                    config.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
                )));
            }
            let flags = if config.reverse_keys { HEAD_REVERSE_KEYS } else { 0 };
            let header = FileHeader::new(config.page_size, flags);
            store.write_pages(PageId::new(0), config.page_size, header.to_page().as_bytes())?;
            if !config.no_sync {
                store.sync()?;
            }
            debug!(page_size = config.page_size, "wrote new file header");
            header
        } else {
            let mut buf = [0u8; HEAD_RECORD_END];
            let n = store.read_at(0, &mut buf)?;
            let header = FileHeader::decode(&buf[..n])?;
            let page_size = header.page_size as usize;
            if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
                return Err(CowError::corrupt(format!("invalid page size {}", page_size)));
            }
            header
        };

        let mut config = config;
        config.page_size = header.page_size as usize;
        config.reverse_keys |= header.flags & HEAD_REVERSE_KEYS != 0;

        let order = match (&config.comparator, config.reverse_keys) {
            (Some(cmp), _) => KeyOrder::Custom(cmp.clone()),
            (None, true) => KeyOrder::Reverse,
            (None, false) => KeyOrder::Forward,
        };

        let mut tree = Self {
            store,
            cache: PageCache::new(config.max_cache, config.lru_k),
            order,
            page_size: config.page_size,
            config,
            meta: Meta::default(),
            meta_pgno: INVALID_PAGE_ID,
            size: 0,
            fix_padding: false,
            writer: None,
            next_txn_id: 1,
        };
        tree.read_meta()?;
        debug!(
            page_size = tree.page_size,
            root = %tree.meta.root,
            entries = tree.meta.entries,
            "opened tree"
        );
        Ok(tree)
    }

    pub fn flags(&self) -> OpenFlags {
        self.config.flags()
    }

    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Longest key this tree accepts, which depends on its page size.
    pub fn max_key_size(&self) -> usize {
        max_key_size(self.page_size)
    }

    /// Changes the cache bound, evicting pages if the cache is over it.
    pub fn set_cache_size(&mut self, max_cache: usize) {
        self.cache.set_max_cache(max_cache);
        self.cache.prune();
    }

    /// Reports cache counters and the statistics of the latest commit.
    pub fn stat(&mut self) -> Result<TreeStat> {
        self.read_meta()?;
        Ok(TreeStat {
            hits: self.cache.hits(),
            reads: self.cache.reads(),
            max_cache: self.cache.max_cache(),
            cache_size: self.cache.len(),
            branch_pages: self.meta.branch_pages,
            leaf_pages: self.meta.leaf_pages,
            overflow_pages: self.meta.overflow_pages,
            revisions: self.meta.revisions,
            depth: self.meta.depth,
            entries: self.meta.entries,
            page_size: self.page_size,
            created_at: self.meta.created_at,
        })
    }

    /// Returns the cached page `pgno`, reading it from the store on a miss.
    pub(crate) fn get_page(&mut self, pgno: PageId) -> Result<MPageId> {
        if let Some(id) = self.cache.lookup(pgno) {
            return Ok(id);
        }
        if !pgno.is_valid() {
            return Err(CowError::corrupt("reference to an invalid page"));
        }

        let page = self.store.read_page(pgno, self.page_size)?;
        self.cache.record_read();
        if page.pgno() != pgno {
            return Err(CowError::corrupt(format!(
                "page {} carries page number {}",
                pgno,
                page.pgno()
            )));
        }
        page.validate()?;
        trace!(%pgno, "read page");

        let id = self.cache.insert(MPage::new(page));
        self.cache.add(id)?;
        Ok(id)
    }

    /// Allocates a dirty page of the given type at the end of the file.
    pub(crate) fn new_page(&mut self, flags: u32) -> Result<MPageId> {
        let w = self.writer_mut()?;
        let pgno = w.next_pgno;
        w.next_pgno = PageId::new(pgno.as_u32() + 1);
        if flags & PAGE_BRANCH != 0 {
            w.meta.branch_pages += 1;
        } else if flags & PAGE_LEAF != 0 {
            w.meta.leaf_pages += 1;
        } else if flags & PAGE_OVERFLOW != 0 {
            w.meta.overflow_pages += 1;
        }

        let mut page = Page::new(self.page_size);
        page.init(pgno, flags);
        let mut mp = MPage::new(page);
        mp.dirty = true;

        let id = self.cache.insert(mp);
        self.cache.add(id)?;
        self.writer_mut()?.dirty.push(id);
        trace!(%pgno, flags, "allocated page");
        Ok(id)
    }

    /// Makes a page writable in the running transaction.
    ///
    /// A clean page gets the next free page number. If nothing references
    /// it, it is renumbered in place; otherwise the referenced version is
    /// left untouched and a copy is made. The parent's pointer is updated,
    /// so the parent must already be dirty.
    pub(crate) fn touch(&mut self, id: MPageId) -> Result<MPageId> {
        let (dirty, refs, old_pgno) = {
            let mp = self.cache.get(id)?;
            (mp.dirty, mp.refs, mp.pgno())
        };
        if dirty {
            return Ok(id);
        }

        let w = self.writer_mut()?;
        let pgno = w.next_pgno;
        w.next_pgno = PageId::new(pgno.as_u32() + 1);

        let id = if refs == 0 {
            self.cache.remove(id)?;
            id
        } else {
            let copy = self.cache.get(id)?.duplicate();
            self.cache.insert(copy)
        };

        let (parent, parent_index) = {
            let mp = self.cache.get_mut(id)?;
            mp.page.set_pgno(pgno);
            mp.dirty = true;
            (mp.parent, mp.parent_index)
        };
        self.writer_mut()?.dirty.push(id);
        self.cache.add(id)?;

        if let Some(parent) = parent {
            let pmp = self.cache.get_mut(parent)?;
            debug_assert!(pmp.dirty, "touching a page below a clean parent");
            pmp.page.set_node_pgno(parent_index, pgno);
        }
        trace!(old = %old_pgno, new = %pgno, copied = refs > 0, "touched page");
        Ok(id)
    }

    pub(crate) fn writer_mut(&mut self) -> Result<&mut WriteState> {
        self.writer
            .as_mut()
            .ok_or_else(|| CowError::internal("no write transaction is active"))
    }

    pub(crate) fn writer_ref(&self) -> Result<&WriteState> {
        self.writer
            .as_ref()
            .ok_or_else(|| CowError::internal("no write transaction is active"))
    }
}

impl Drop for CowTree {
    fn drop(&mut self) {
        if self.writer.is_some() {
            debug!("aborting write transaction left open at close");
            self.abort_writer();
        }
    }
}

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::common::{CowError, PageId, Result, INVALID_PAGE_ID};
use crate::storage::disk::{DiskManager, PageStore};
use crate::storage::page::{Page, META_TOMBSTONE};

use super::CowTree;

impl CowTree {
    /// Rewrites the live tree into a fresh file that replaces the current
    /// one, dropping every page older commits left behind.
    ///
    /// The old file gets a tombstone meta page, so other handles still
    /// open on it see `CowError::Stale` and know to re-open. This handle
    /// switches to the new file.
    pub fn compact(&mut self) -> Result<()> {
        let path = self
            .store
            .path()
            .ok_or_else(|| CowError::invalid("compaction needs a tree opened from a path"))?
            .to_path_buf();

        let txn = self.txn_begin(false)?;
        let target = match DiskManager::create_beside(&path) {
            Ok(store) => store,
            Err(e) => {
                self.txn_abort(txn)?;
                return Err(e);
            }
        };
        let Some(tmp_path) = target.path().map(Path::to_path_buf) else {
            self.txn_abort(txn)?;
            return Err(CowError::internal("compaction file has no path"));
        };
        info!(from = %path.display(), to = %tmp_path.display(), "compacting");

        let result = self
            .copy_live_pages(target)
            .and_then(|()| fs::rename(&tmp_path, &path).map_err(CowError::from));
        if let Err(e) = result {
            warn!(error = %e, "compaction failed");
            if let Err(rm) = fs::remove_file(&tmp_path) {
                debug!(error = %rm, "could not remove compaction file");
            }
            self.txn_abort(txn)?;
            return Err(e);
        }

        // The new file is in place; retire the old one.
        let tombstone = self
            .write_meta(INVALID_PAGE_ID, META_TOMBSTONE)
            .and_then(|()| self.store.sync());
        self.finish_writer();
        drop(txn);
        tombstone?;

        self.reopen(&path)
    }

    fn reopen(&mut self, path: &Path) -> Result<()> {
        let store = DiskManager::open(path, self.config.read_only)?;
        let reopened = CowTree::with_store(Box::new(store), self.config.clone())?;
        *self = reopened;
        debug!(root = %self.meta.root, "re-opened compacted file");
        Ok(())
    }

    /// Writes a header, the live tree and one meta page into `target`.
    fn copy_live_pages(&mut self, target: DiskManager) -> Result<()> {
        let mut target = CowTree::with_store(Box::new(target), self.config.clone())?;
        let ttxn = target.txn_begin(false)?;

        let mut meta = self.meta;
        meta.revisions = 0;
        target.writer_mut()?.meta = meta;

        let root = if self.meta.root.is_valid() {
            self.compact_subtree(self.meta.root, &mut target)?
        } else {
            INVALID_PAGE_ID
        };

        target.write_meta(root, 0)?;
        target.store.sync()?;
        target.finish_writer();
        drop(ttxn);
        debug!(root = %root, pages = target.meta_pgno.as_u32(), "copied live pages");
        Ok(())
    }

    /// Copies a subtree, children first, and returns the new page number
    /// of its root.
    fn compact_subtree(&mut self, pgno: PageId, target: &mut CowTree) -> Result<PageId> {
        let id = self.get_page(pgno)?;
        let mut page = self.cache.get(id)?.page.clone();

        if page.is_branch() {
            for i in 0..page.num_keys() {
                let child = self.compact_subtree(page.node_pgno(i), target)?;
                page.set_node_pgno(i, child);
            }
        } else {
            for i in 0..page.num_keys() {
                if page.node_is_big(i) {
                    let chain = self.compact_overflow(page.node_overflow_pgno(i), target)?;
                    page.set_node_overflow_pgno(i, chain);
                }
            }
        }

        if self.cache.len() > self.cache.max_cache() {
            self.cache.prune();
        }
        target.append_page(page)
    }

    /// Copies an overflow chain, tail first, and returns its new head.
    fn compact_overflow(&mut self, head: PageId, target: &mut CowTree) -> Result<PageId> {
        let mut chain = Vec::new();
        let mut next = Some(head);
        while let Some(pgno) = next {
            let id = self.get_page(pgno)?;
            let page = self.cache.get(id)?.page.clone();
            if !page.is_overflow() {
                return Err(CowError::corrupt(format!("{} is not an overflow page", pgno)));
            }
            next = page.next_pgno();
            chain.push(page);
        }

        let mut link = None;
        for mut page in chain.into_iter().rev() {
            page.set_next_pgno(link);
            link = Some(target.append_page(page)?);
        }
        link.ok_or_else(|| CowError::internal("empty overflow chain"))
    }

    /// Writes a page image at the writer's next page number.
    fn append_page(&mut self, mut page: Page) -> Result<PageId> {
        let w = self.writer_mut()?;
        let pgno = w.next_pgno;
        w.next_pgno = PageId::new(pgno.as_u32() + 1);
        page.set_pgno(pgno);
        self.store.write_pages(pgno, self.page_size, page.as_bytes())?;
        Ok(pgno)
    }
}

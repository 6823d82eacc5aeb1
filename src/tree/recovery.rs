use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::common::{CowError, PageId, Result, INVALID_PAGE_ID};
use crate::storage::page::Meta;

use super::CowTree;

impl CowTree {
    /// Brings the committed meta up to date with the store and returns the
    /// first page number a writer may allocate.
    ///
    /// The newest meta page is found by scanning backwards from the end of
    /// the file. Pages that cannot be read or that fail validation are left
    /// behind by an interrupted commit and are skipped.
    pub(crate) fn read_meta(&mut self) -> Result<PageId> {
        let size = self.store.len()?;
        if size < self.size {
            return Err(CowError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("file shrunk from {} to {} bytes", self.size, size),
            )));
        }

        let page_size = self.page_size as u64;
        if size < page_size {
            return Err(CowError::corrupt(format!("file of {} bytes has no header page", size)));
        }
        if size == page_size {
            self.size = size;
            self.meta = Meta::default();
            self.meta_pgno = INVALID_PAGE_ID;
            return Ok(PageId::new(1));
        }

        let mut next = size / page_size;
        let mut meta_pgno = next - 1;
        if size % page_size != 0 {
            debug!(size, "file ends in a partial page");
            self.fix_padding = true;
            next += 1;
        }
        let next = PageId::new(next as u32);

        if size == self.size {
            if self.meta.is_tombstone() {
                return Err(CowError::Stale);
            }
            return Ok(next);
        }
        self.size = size;

        while meta_pgno > 0 {
            let pgno = PageId::new(meta_pgno as u32);
            match self.store.read_page(pgno, self.page_size) {
                Ok(page) => {
                    self.cache.record_read();
                    if page.pgno() == pgno && Meta::is_valid_meta_page(&page) {
                        self.meta = Meta::read_from(&page);
                        self.meta_pgno = pgno;
                        debug!(meta = %pgno, root = %self.meta.root, "found meta page");
                        if self.meta.is_tombstone() {
                            info!("file was superseded by compaction");
                            return Err(CowError::Stale);
                        }
                        return Ok(next);
                    }
                }
                Err(e) => warn!(page = %pgno, error = %e, "skipping unreadable page"),
            }
            meta_pgno -= 1;
        }

        Err(CowError::corrupt("no valid meta page found"))
    }

    /// Appends a meta page describing `root` with the writer's statistics.
    pub(crate) fn write_meta(&mut self, root: PageId, flags: u32) -> Result<()> {
        let prev_meta = self.meta_pgno;
        let page_size = self.page_size;
        let w = self.writer_mut()?;

        let mut meta = w.meta;
        meta.flags = flags;
        meta.root = root;
        meta.prev_meta = prev_meta;
        meta.created_at = now();
        meta.revisions += 1;

        let pgno = w.next_pgno;
        w.next_pgno = PageId::new(pgno.as_u32() + 1);
        w.meta = meta;

        let page = meta.to_page(pgno, page_size);
        self.store.write_pages(pgno, page_size, page.as_bytes())?;

        self.meta = meta;
        self.meta_pgno = pgno;
        self.size = self.store.len()?;
        debug!(meta = %pgno, root = %root, flags, "wrote meta page");
        Ok(())
    }

    /// Truncates the file at the root of the last commit, so the commit
    /// before it becomes the latest one again.
    pub fn revert(&mut self) -> Result<()> {
        let txn = self.txn_begin(false)?;

        let cut = if self.meta.root.is_valid() {
            Some(self.meta.root)
        } else if self.meta_pgno.is_valid() {
            Some(self.meta_pgno)
        } else {
            None
        };

        let result = match cut {
            Some(pgno) => {
                info!(at = %pgno, "reverting last commit");
                self.store.set_len(pgno.offset(self.page_size))
            }
            None => Ok(()),
        };

        self.txn_abort(txn)?;
        result?;

        self.cache.clear();
        self.size = 0;
        self.read_meta()?;
        Ok(())
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::buffer::MPageId;
use crate::common::{CowError, PageId, Result, COMMIT_PAGES};
use crate::storage::page::Meta;

use super::CowTree;

/// A transaction handle.
///
/// A read-only transaction pins the root that was committed when it
/// began. A write transaction owns the file's writer lock until it is
/// committed or aborted; dropping it without either leaves the lock
/// held until the next write transaction on the same tree discards it.
#[must_use = "a write transaction holds the writer lock until committed or aborted"]
#[derive(Debug)]
pub struct Txn {
    pub(crate) id: u64,
    pub(crate) read_only: bool,
    pub(crate) root: PageId,
    _alive: Arc<()>,
}

impl Txn {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// State of the write transaction in progress.
pub(crate) struct WriteState {
    pub id: u64,
    pub root: PageId,
    pub next_pgno: PageId,
    /// Pages modified by this transaction, in allocation order
    pub dirty: Vec<MPageId>,
    /// Set when an operation failed after modifying pages
    pub failed: bool,
    /// Statistics as they will be committed
    pub meta: Meta,
    alive: Weak<()>,
}

impl CowTree {
    /// Begins a transaction.
    ///
    /// A write transaction takes the writer lock without waiting; if it is
    /// held elsewhere the call fails with `CowError::Busy`.
    pub fn txn_begin(&mut self, read_only: bool) -> Result<Txn> {
        let id = self.next_txn_id;
        self.next_txn_id += 1;
        let alive = Arc::new(());

        if read_only {
            self.read_meta()?;
            return Ok(Txn {
                id,
                read_only,
                root: self.meta.root,
                _alive: alive,
            });
        }

        if self.config.read_only {
            return Err(CowError::invalid("tree was opened read-only"));
        }
        if let Some(w) = &self.writer {
            if w.alive.upgrade().is_some() {
                return Err(CowError::Busy);
            }
            warn!(txn = w.id, "discarding abandoned write transaction");
            self.abort_writer();
        }

        self.store.try_lock()?;
        let next_pgno = match self.read_meta() {
            Ok(next) => next,
            Err(e) => {
                if let Err(unlock_err) = self.store.unlock() {
                    warn!(error = %unlock_err, "failed to release writer lock");
                }
                return Err(e);
            }
        };

        self.writer = Some(WriteState {
            id,
            root: self.meta.root,
            next_pgno,
            dirty: Vec::new(),
            failed: false,
            meta: self.meta,
            alive: Arc::downgrade(&alive),
        });
        debug!(txn = id, root = %self.meta.root, next = %next_pgno, "began write transaction");

        Ok(Txn {
            id,
            read_only,
            root: self.meta.root,
            _alive: alive,
        })
    }

    /// Writes every dirty page and a new meta page. On failure the
    /// transaction is aborted.
    pub fn txn_commit(&mut self, txn: Txn) -> Result<()> {
        if txn.read_only {
            return Err(CowError::invalid("cannot commit a read-only transaction"));
        }
        let w = self.check_writer(&txn)?;
        if w.failed {
            self.abort_writer();
            return Err(CowError::invalid("transaction failed and was aborted"));
        }
        if w.dirty.is_empty() {
            debug!(txn = txn.id, "nothing to commit");
            self.finish_writer();
            return Ok(());
        }

        match self.flush_writer() {
            Ok(()) => {
                self.finish_writer();
                self.cache.prune();
                debug!(
                    txn = txn.id,
                    root = %self.meta.root,
                    revisions = self.meta.revisions,
                    "committed"
                );
                Ok(())
            }
            Err(e) => {
                warn!(txn = txn.id, error = %e, "commit failed, aborting");
                self.abort_writer();
                Err(e)
            }
        }
    }

    /// Discards the changes of a write transaction. Releasing a read-only
    /// transaction is a no-op.
    pub fn txn_abort(&mut self, txn: Txn) -> Result<()> {
        if txn.read_only {
            return Ok(());
        }
        self.check_writer(&txn)?;
        self.abort_writer();
        Ok(())
    }

    /// Returns the writer state belonging to `txn`.
    pub(crate) fn check_writer(&self, txn: &Txn) -> Result<&WriteState> {
        match &self.writer {
            Some(w) if w.id == txn.id && !txn.read_only => Ok(w),
            _ if txn.read_only => Err(CowError::invalid("transaction is read-only")),
            _ => Err(CowError::invalid(format!(
                "transaction {} is not active",
                txn.id
            ))),
        }
    }

    /// Runs `f` inside `txn`, or inside a transaction of its own that is
    /// committed on success. Errors that leave pages half-modified mark an
    /// explicit transaction as failed.
    pub(crate) fn with_write_txn<T>(
        &mut self,
        txn: Option<&mut Txn>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        match txn {
            Some(txn) => {
                if self.check_writer(txn)?.failed {
                    return Err(CowError::invalid("transaction has failed"));
                }
                let result = f(self);
                if let Err(e) = &result {
                    if poisons_txn(e) {
                        warn!(txn = txn.id, error = %e, "marking transaction as failed");
                        self.writer_mut()?.failed = true;
                    }
                }
                result
            }
            None => {
                let txn = self.txn_begin(false)?;
                match f(self) {
                    Ok(value) => {
                        self.txn_commit(txn)?;
                        Ok(value)
                    }
                    Err(e) => {
                        self.txn_abort(txn)?;
                        Err(e)
                    }
                }
            }
        }
    }

    fn flush_writer(&mut self) -> Result<()> {
        let page_size = self.page_size;

        if self.fix_padding {
            let len = self.store.len()?;
            let padded = len.div_ceil(page_size as u64) * page_size as u64;
            debug!(from = len, to = padded, "padding partial trailing page");
            self.store.set_len(padded)?;
            self.fix_padding = false;
        }

        let mut dirty = std::mem::take(&mut self.writer_mut()?.dirty);
        dirty.sort_by_key(|id| {
            self.cache
                .get(*id)
                .map(|mp| mp.pgno())
                .unwrap_or(PageId::new(0))
        });

        let mut batch: Vec<u8> = Vec::with_capacity(COMMIT_PAGES * page_size);
        let mut batch_ids: Vec<MPageId> = Vec::with_capacity(COMMIT_PAGES);
        let mut batch_start = PageId::new(0);
        let result = (|| -> Result<()> {
            for &id in &dirty {
                let pgno = self.cache.get(id)?.pgno();
                let contiguous = batch_start.as_u32() + batch_ids.len() as u32 == pgno.as_u32();
                if !batch_ids.is_empty() && (!contiguous || batch_ids.len() == COMMIT_PAGES) {
                    self.write_batch(batch_start, &batch, &batch_ids)?;
                    batch.clear();
                    batch_ids.clear();
                }
                if batch_ids.is_empty() {
                    batch_start = pgno;
                }
                batch.extend_from_slice(self.cache.get(id)?.page.as_bytes());
                batch_ids.push(id);
            }
            if !batch_ids.is_empty() {
                self.write_batch(batch_start, &batch, &batch_ids)?;
            }

            if !self.config.no_sync {
                self.store.sync()?;
            }
            let root = self.writer_ref()?.root;
            self.write_meta(root, 0)?;
            if !self.config.no_sync {
                self.store.sync()?;
            }
            Ok(())
        })();

        // abort needs the full list to release what was not written
        self.writer_mut()?.dirty = dirty;
        result
    }

    fn write_batch(&mut self, start: PageId, data: &[u8], ids: &[MPageId]) -> Result<()> {
        self.store.write_pages(start, self.page_size, data)?;
        for &id in ids {
            self.cache.get_mut(id)?.dirty = false;
        }
        Ok(())
    }

    /// Drops the writer state after a commit and releases the lock.
    pub(crate) fn finish_writer(&mut self) {
        if let Some(w) = self.writer.take() {
            for id in w.dirty {
                if let Ok(mp) = self.cache.get_mut(id) {
                    mp.dirty = false;
                }
            }
            if let Err(e) = self.store.unlock() {
                warn!(error = %e, "failed to release writer lock");
            }
        }
    }

    /// Throws away every page the writer modified and releases the lock.
    pub(crate) fn abort_writer(&mut self) {
        let Some(w) = self.writer.take() else {
            return;
        };
        for id in w.dirty {
            let referenced = self.cache.get(id).map(|mp| mp.refs > 0).unwrap_or(false);
            if self.cache.remove(id).is_err() {
                continue;
            }
            if referenced {
                // released by the last unpin
                if let Ok(mp) = self.cache.get_mut(id) {
                    mp.dirty = false;
                }
            } else {
                self.cache.release(id);
            }
        }
        if let Err(e) = self.store.unlock() {
            warn!(error = %e, "failed to release writer lock");
        }
        debug!(txn = w.id, "aborted write transaction");
    }
}

/// Errors reported before any page was changed leave the transaction
/// usable.
fn poisons_txn(e: &CowError) -> bool {
    !matches!(
        e,
        CowError::NotFound | CowError::AlreadyExists | CowError::InvalidArgument(_) | CowError::Busy
    )
}

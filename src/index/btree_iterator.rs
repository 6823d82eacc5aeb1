use bytes::Bytes;

use crate::buffer::MPageId;
use crate::common::{CowError, PageId, Result};
use crate::tree::{CowTree, Txn};

use super::btree_index::check_key;

/// Cursor positioning operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp<'k> {
    /// First key greater than or equal to the given key
    Set(&'k [u8]),
    /// Exactly the given key
    SetExact(&'k [u8]),
    /// Smallest key in the tree
    First,
    /// Key after the current position; `First` on a fresh cursor
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorSource {
    /// Latest committed tree, refreshed on every positioning
    Committed,
    /// Root pinned by a read-only transaction
    Snapshot(PageId),
    /// Working tree of a write transaction
    Writer(u64),
}

#[derive(Debug, Clone, Copy)]
struct CursorFrame {
    page: MPageId,
    index: usize,
}

/// A position in the tree, kept as the stack of pages from the root to a
/// leaf. Pages on the stack are pinned in the cache, so a writer copies
/// them instead of changing them in place.
///
/// A cursor must be closed with `CowTree::cursor_close`; a cursor that is
/// simply dropped leaves its pages pinned.
#[derive(Debug)]
pub struct Cursor {
    source: CursorSource,
    stack: Vec<CursorFrame>,
    initialized: bool,
    eof: bool,
}

impl Cursor {
    pub(crate) fn set_top_index(&mut self, index: usize) {
        if let Some(top) = self.stack.last_mut() {
            top.index = index;
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

impl CowTree {
    /// Opens a cursor reading through `txn`, or through the latest commit.
    pub fn cursor_open(&mut self, txn: Option<&Txn>) -> Result<Cursor> {
        let source = match txn {
            None => CursorSource::Committed,
            Some(txn) if txn.read_only => CursorSource::Snapshot(txn.root),
            Some(txn) => {
                self.check_writer(txn)?;
                CursorSource::Writer(txn.id)
            }
        };
        Ok(Cursor {
            source,
            stack: Vec::new(),
            initialized: false,
            eof: false,
        })
    }

    /// Releases the pages held by a cursor.
    pub fn cursor_close(&mut self, mut cursor: Cursor) {
        self.cursor_reset(&mut cursor);
        self.cache.prune();
    }

    /// Positions the cursor and returns the key and value under it.
    /// Moving past the last key yields `CowError::NotFound`.
    pub fn cursor_get(&mut self, cursor: &mut Cursor, op: CursorOp<'_>) -> Result<(Bytes, Bytes)> {
        match op {
            CursorOp::Set(key) => self.cursor_set(cursor, key, false),
            CursorOp::SetExact(key) => self.cursor_set(cursor, key, true),
            CursorOp::First => self.cursor_first(cursor),
            CursorOp::Next => {
                if !cursor.initialized {
                    self.cursor_first(cursor)
                } else {
                    self.cursor_next(cursor)
                }
            }
        }
    }

    pub(crate) fn cursor_push(&mut self, cursor: &mut Cursor, id: MPageId) -> Result<()> {
        self.cache.pin(id)?;
        cursor.stack.push(CursorFrame { page: id, index: 0 });
        Ok(())
    }

    fn cursor_pop(&mut self, cursor: &mut Cursor) -> Option<CursorFrame> {
        let frame = cursor.stack.pop()?;
        self.cache.unpin(frame.page);
        Some(frame)
    }

    fn cursor_reset(&mut self, cursor: &mut Cursor) {
        while self.cursor_pop(cursor).is_some() {}
        cursor.initialized = false;
        cursor.eof = false;
    }

    fn cursor_root(&mut self, cursor: &Cursor) -> Result<PageId> {
        match cursor.source {
            CursorSource::Committed => {
                self.read_meta()?;
                Ok(self.meta.root)
            }
            CursorSource::Snapshot(root) => Ok(root),
            CursorSource::Writer(id) => match &self.writer {
                Some(w) if w.id == id && !w.failed => Ok(w.root),
                _ => Err(CowError::invalid("cursor's transaction is no longer usable")),
            },
        }
    }

    fn cursor_set(&mut self, cursor: &mut Cursor, key: &[u8], exact: bool) -> Result<(Bytes, Bytes)> {
        check_key(key, self.max_key_size())?;
        self.cursor_reset(cursor);
        let root = self.cursor_root(cursor)?;
        let leaf = self.search_page(root, Some(key), Some(cursor), false)?;

        match self.search_node(leaf, key)? {
            Some((_, false)) if exact => return Err(CowError::NotFound),
            Some((index, _)) => cursor.set_top_index(index),
            None if exact => return Err(CowError::NotFound),
            None => {
                // every key on this leaf is smaller; the answer starts the next leaf
                if let Err(e) = self.cursor_sibling(cursor) {
                    self.cursor_reset(cursor);
                    return Err(e);
                }
            }
        }

        cursor.initialized = true;
        cursor.eof = false;
        self.cursor_current(cursor)
    }

    fn cursor_first(&mut self, cursor: &mut Cursor) -> Result<(Bytes, Bytes)> {
        self.cursor_reset(cursor);
        let root = self.cursor_root(cursor)?;
        let leaf = self.search_page(root, None, Some(cursor), false)?;
        if self.cache.get(leaf)?.page.num_keys() == 0 {
            return Err(CowError::NotFound);
        }

        cursor.initialized = true;
        cursor.eof = false;
        self.cursor_current(cursor)
    }

    fn cursor_next(&mut self, cursor: &mut Cursor) -> Result<(Bytes, Bytes)> {
        if cursor.eof {
            return Err(CowError::NotFound);
        }
        let top = *cursor
            .stack
            .last()
            .ok_or_else(|| CowError::internal("positioned cursor without pages"))?;

        if top.index + 1 < self.cache.get(top.page)?.page.num_keys() {
            cursor.set_top_index(top.index + 1);
        } else {
            match self.cursor_sibling(cursor) {
                Ok(()) => {}
                Err(CowError::NotFound) => {
                    cursor.eof = true;
                    return Err(CowError::NotFound);
                }
                Err(e) => {
                    cursor.eof = true;
                    return Err(e);
                }
            }
        }
        self.cursor_current(cursor)
    }

    /// Replaces the top of the stack with the page to its right, climbing
    /// as far as needed. Fails with `CowError::NotFound` at the rightmost
    /// leaf.
    fn cursor_sibling(&mut self, cursor: &mut Cursor) -> Result<()> {
        if cursor.stack.len() < 2 {
            return Err(CowError::NotFound);
        }
        self.cursor_pop(cursor);

        let parent = *cursor
            .stack
            .last()
            .ok_or_else(|| CowError::internal("cursor stack underflow"))?;
        if parent.index + 1 >= self.cache.get(parent.page)?.page.num_keys() {
            self.cursor_sibling(cursor)?;
        } else {
            cursor.set_top_index(parent.index + 1);
        }

        self.relink_stack(cursor)?;
        let parent = *cursor
            .stack
            .last()
            .ok_or_else(|| CowError::internal("cursor stack underflow"))?;
        let child_pgno = self.cache.get(parent.page)?.page.node_pgno(parent.index);
        let child = self.get_page(child_pgno)?;
        {
            let mp = self.cache.get_mut(child)?;
            mp.parent = Some(parent.page);
            mp.parent_index = parent.index;
        }
        self.find_common_prefix(child)?;
        self.cursor_push(cursor, child)
    }

    /// Points the parent links of the stacked pages along the cursor's
    /// path, since other operations may have reached the same pages
    /// through a different version of the tree.
    fn relink_stack(&mut self, cursor: &Cursor) -> Result<()> {
        if let Some(root) = cursor.stack.first() {
            let mp = self.cache.get_mut(root.page)?;
            mp.parent = None;
            mp.parent_index = 0;
        }
        for pair in cursor.stack.windows(2) {
            let mp = self.cache.get_mut(pair[1].page)?;
            mp.parent = Some(pair[0].page);
            mp.parent_index = pair[0].index;
        }
        Ok(())
    }

    fn cursor_current(&mut self, cursor: &Cursor) -> Result<(Bytes, Bytes)> {
        let top = *cursor
            .stack
            .last()
            .ok_or_else(|| CowError::internal("positioned cursor without pages"))?;
        let key = self.expand_key(top.page, top.index)?;
        let value = self.read_data(top.page, top.index)?;
        Ok((Bytes::from(key), value))
    }

    /// Iterates over every key and value in order. The cursor behind the
    /// iterator is closed when it is dropped.
    pub fn iter(&mut self, txn: Option<&Txn>) -> Result<TreeIter<'_>> {
        let cursor = self.cursor_open(txn)?;
        Ok(TreeIter {
            tree: self,
            cursor: Some(cursor),
            start: None,
            done: false,
        })
    }

    /// Iterates from the first key greater than or equal to `start`.
    pub fn range_from<'t>(&'t mut self, txn: Option<&Txn>, start: &[u8]) -> Result<TreeIter<'t>> {
        check_key(start, self.max_key_size())?;
        let cursor = self.cursor_open(txn)?;
        Ok(TreeIter {
            tree: self,
            cursor: Some(cursor),
            start: Some(start.to_vec()),
            done: false,
        })
    }
}

/// Ordered iterator over a tree.
pub struct TreeIter<'a> {
    tree: &'a mut CowTree,
    cursor: Option<Cursor>,
    start: Option<Vec<u8>>,
    done: bool,
}

impl<'a> TreeIter<'a> {
    pub fn next(&mut self) -> Result<Option<(Bytes, Bytes)>> {
        if self.done {
            return Ok(None);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let start = self.start.take();
        let op = match &start {
            Some(key) => CursorOp::Set(key),
            None => CursorOp::Next,
        };
        match self.tree.cursor_get(cursor, op) {
            Ok(item) => Ok(Some(item)),
            Err(CowError::NotFound) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        match TreeIter::next(self) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<'a> Drop for TreeIter<'a> {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            self.tree.cursor_close(cursor);
        }
    }
}

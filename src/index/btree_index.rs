use std::cmp::Ordering;

use bytes::Bytes;
use tracing::trace;

use crate::buffer::MPageId;
use crate::common::{CowError, PageId, Result, MIN_KEYS};
use crate::storage::page::{
    node_size, NodeBody, NODE_HEADER_SIZE, PAGE_BRANCH, PAGE_HEADER_SIZE, PAGE_LEAF, PAGE_OVERFLOW,
};
use crate::tree::{CowTree, Txn};

use super::btree_iterator::Cursor;
use super::prefix::FullEntry;

/// Options for `CowTree::insert`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertFlags {
    /// Fail with `CowError::AlreadyExists` instead of replacing a value
    pub no_overwrite: bool,
}

impl InsertFlags {
    pub const NONE: InsertFlags = InsertFlags { no_overwrite: false };
    pub const NO_OVERWRITE: InsertFlags = InsertFlags { no_overwrite: true };
}

/// The node being placed by a split.
enum NewNode<'a> {
    Leaf(&'a [u8]),
    Branch(PageId),
}

pub(crate) fn check_key(key: &[u8], max: usize) -> Result<()> {
    if key.is_empty() || key.len() > max {
        return Err(CowError::invalid(format!(
            "key length {} outside 1..={}",
            key.len(),
            max
        )));
    }
    Ok(())
}

impl CowTree {
    /// Looks up the value stored under `key`.
    pub fn at(&mut self, txn: Option<&Txn>, key: &[u8]) -> Result<Bytes> {
        check_key(key, self.max_key_size())?;
        let root = self.read_root(txn)?;
        let leaf = self.search_page(root, Some(key), None, false)?;
        let value = match self.search_node(leaf, key)? {
            Some((i, true)) => self.read_data(leaf, i),
            _ => Err(CowError::NotFound),
        };
        self.cache.prune();
        value
    }

    /// Stores `value` under `key`, replacing any previous value unless
    /// `flags.no_overwrite` is set. Without a transaction the change is
    /// committed before returning.
    pub fn insert(
        &mut self,
        txn: Option<&mut Txn>,
        key: &[u8],
        value: &[u8],
        flags: InsertFlags,
    ) -> Result<()> {
        check_key(key, self.max_key_size())?;
        if value.len() > u32::MAX as usize {
            return Err(CowError::invalid("value too large"));
        }
        self.with_write_txn(txn, |tree| tree.insert_inner(key, value, flags))
    }

    /// Root a read should start from: the pinned root of a read-only
    /// transaction, the working root of the write transaction, or the
    /// latest committed root.
    pub(crate) fn read_root(&mut self, txn: Option<&Txn>) -> Result<PageId> {
        match txn {
            Some(txn) if txn.read_only => Ok(txn.root),
            Some(txn) => {
                let w = self.check_writer(txn)?;
                if w.failed {
                    return Err(CowError::invalid("transaction has failed"));
                }
                Ok(w.root)
            }
            None => {
                self.read_meta()?;
                Ok(self.meta.root)
            }
        }
    }

    /// Binary search within one page. Returns the index of the first node
    /// not less than `key` and whether it matched exactly, or `None` if
    /// every node is less. Index 0 of a branch page is never compared.
    pub(crate) fn search_node(&self, id: MPageId, key: &[u8]) -> Result<Option<(usize, bool)>> {
        let mp = self.cache.get(id)?;
        let page = &mp.page;
        let n = page.num_keys();

        let mut low = if page.is_leaf() { 0 } else { 1 };
        let mut high = n;
        while low < high {
            let mid = (low + high) / 2;
            match self.order.compare_stored(key, page.node_key(mid), &mp.prefix) {
                Ordering::Equal => return Ok(Some((mid, true))),
                Ordering::Greater => low = mid + 1,
                Ordering::Less => high = mid,
            }
        }

        if low >= n {
            Ok(None)
        } else {
            Ok(Some((low, false)))
        }
    }

    /// Descends from `root` to the leaf that holds or would hold `key`, or
    /// to the leftmost leaf when no key is given.
    ///
    /// Every page on the way gets its parent link and prefix refreshed.
    /// With `modify` each page is touched, so the returned path is
    /// writable. With a cursor each page is pushed on its stack.
    pub(crate) fn search_page(
        &mut self,
        root: PageId,
        key: Option<&[u8]>,
        mut cursor: Option<&mut Cursor>,
        modify: bool,
    ) -> Result<MPageId> {
        if !root.is_valid() {
            return Err(CowError::NotFound);
        }

        let mut id = self.get_page(root)?;
        {
            let mp = self.cache.get_mut(id)?;
            mp.parent = None;
            mp.parent_index = 0;
            mp.prefix.clear();
        }
        if modify {
            id = self.touch(id)?;
            let pgno = self.cache.get(id)?.pgno();
            self.writer_mut()?.root = pgno;
        }

        loop {
            if let Some(cursor) = cursor.as_deref_mut() {
                self.cursor_push(cursor, id)?;
            }

            let (is_branch, n) = {
                let page = &self.cache.get(id)?.page;
                (page.is_branch(), page.num_keys())
            };
            if !is_branch {
                return Ok(id);
            }
            if n == 0 {
                return Err(CowError::corrupt("branch page without keys"));
            }

            let index = match key {
                None => 0,
                Some(key) => match self.search_node(id, key)? {
                    None => n - 1,
                    Some((i, true)) => i,
                    Some((i, false)) => i - 1,
                },
            };
            if let Some(cursor) = cursor.as_deref_mut() {
                cursor.set_top_index(index);
            }

            let child_pgno = self.cache.get(id)?.page.node_pgno(index);
            let mut child = self.get_page(child_pgno)?;
            {
                let mp = self.cache.get_mut(child)?;
                mp.parent = Some(id);
                mp.parent_index = index;
            }
            self.find_common_prefix(child)?;
            if modify {
                child = self.touch(child)?;
            }
            id = child;
        }
    }

    /// Copies the value of a leaf node, following its overflow chain.
    pub(crate) fn read_data(&mut self, id: MPageId, index: usize) -> Result<Bytes> {
        let (size, head) = {
            let page = &self.cache.get(id)?.page;
            if !page.node_is_big(index) {
                return Ok(Bytes::copy_from_slice(page.node_data(index)));
            }
            (page.node_data_size(index), page.node_overflow_pgno(index))
        };

        let mut data = Vec::with_capacity(size.min(self.page_size * 64));
        let mut next = Some(head);
        while data.len() < size {
            let pgno = next.ok_or_else(|| CowError::corrupt("overflow chain ends early"))?;
            let ov = self.get_page(pgno)?;
            let page = &self.cache.get(ov)?.page;
            if !page.is_overflow() {
                return Err(CowError::corrupt(format!("{} is not an overflow page", pgno)));
            }
            let n = (size - data.len()).min(page.overflow_data().len());
            data.extend_from_slice(&page.overflow_data()[..n]);
            next = page.next_pgno();
        }
        Ok(Bytes::from(data))
    }

    /// Writes a value into a new chain of overflow pages and returns the
    /// first page.
    fn write_overflow(&mut self, data: &[u8]) -> Result<PageId> {
        let chunk = self.page_size - PAGE_HEADER_SIZE;
        let mut head = None;
        let mut prev: Option<MPageId> = None;

        for part in data.chunks(chunk) {
            let id = self.new_page(PAGE_OVERFLOW)?;
            let mp = self.cache.get_mut(id)?;
            mp.page.overflow_data_mut()[..part.len()].copy_from_slice(part);
            let pgno = mp.pgno();

            match prev {
                Some(prev) => self.cache.get_mut(prev)?.page.set_next_pgno(Some(pgno)),
                None => head = Some(pgno),
            }
            prev = Some(id);
        }

        trace!(bytes = data.len(), head = ?head, "wrote overflow chain");
        head.ok_or_else(|| CowError::internal("empty overflow value"))
    }

    fn is_big_value(&self, len: usize) -> bool {
        len >= self.page_size / MIN_KEYS
    }

    /// Size of a leaf node without its offset entry.
    fn leaf_node_size(&self, key_len: usize, value_len: usize) -> usize {
        let payload = if self.is_big_value(value_len) { 4 } else { value_len };
        NODE_HEADER_SIZE + key_len + payload
    }

    fn leaf_body(&mut self, value: &[u8]) -> Result<NodeBody> {
        if self.is_big_value(value.len()) {
            let pgno = self.write_overflow(value)?;
            Ok(NodeBody::Overflow {
                pgno,
                size: value.len() as u32,
            })
        } else {
            Ok(NodeBody::Inline(value.to_vec()))
        }
    }

    fn insert_inner(&mut self, key: &[u8], value: &[u8], flags: InsertFlags) -> Result<()> {
        let root = self.writer_ref()?.root;
        let leaf = match self.search_page(root, Some(key), None, true) {
            Ok(id) => id,
            Err(CowError::NotFound) => {
                let id = self.new_page(PAGE_LEAF)?;
                let pgno = self.cache.get(id)?.pgno();
                let w = self.writer_mut()?;
                w.root = pgno;
                w.meta.depth += 1;
                trace!(root = %pgno, "created root leaf");
                id
            }
            Err(e) => return Err(e),
        };

        let (index, exact) = match self.search_node(leaf, key)? {
            Some(found) => found,
            None => (self.cache.get(leaf)?.page.num_keys(), false),
        };

        if exact {
            if flags.no_overwrite {
                return Err(CowError::AlreadyExists);
            }
            self.cache.get_mut(leaf)?.page.remove_node(index);
        }

        let (local_len, room) = {
            let mp = self.cache.get(leaf)?;
            (self.order.strip(key, mp.prefix.len()).len(), mp.page.size_left())
        };
        if self.leaf_node_size(local_len, value.len()) + 2 > room {
            self.split(leaf, index, key, NewNode::Leaf(value))?;
        } else {
            let body = self.leaf_body(value)?;
            let order = self.order.clone();
            let mp = self.cache.get_mut(leaf)?;
            let local = order.strip(key, mp.prefix.len());
            mp.page.insert_node(index, local, &body)?;
        }

        if !exact {
            self.writer_mut()?.meta.entries += 1;
        }
        Ok(())
    }

    /// Splits a full page into itself and a new right sibling while
    /// placing a new node at `new_index`. Returns the page and index where
    /// the new node ended up.
    fn split(
        &mut self,
        id: MPageId,
        new_index: usize,
        new_key: &[u8],
        new_node: NewNode<'_>,
    ) -> Result<(MPageId, usize)> {
        let (flags, is_leaf, n) = {
            let page = &self.cache.get(id)?.page;
            (page.flags() & (PAGE_BRANCH | PAGE_LEAF), page.is_leaf(), page.num_keys())
        };

        let body = match new_node {
            NewNode::Leaf(value) => self.leaf_body(value)?,
            NewNode::Branch(pgno) => NodeBody::Child(pgno),
        };
        let mut entries = self.full_entries(id)?;
        entries.insert(
            new_index,
            FullEntry {
                key: new_key.to_vec(),
                body,
            },
        );

        // a root split grows the tree by one level
        if self.cache.get(id)?.parent.is_none() {
            let root = self.new_page(PAGE_BRANCH)?;
            let pgno = self.cache.get(id)?.pgno();
            self.cache
                .get_mut(root)?
                .page
                .insert_node(0, &[], &NodeBody::Child(pgno))?;
            let root_pgno = self.cache.get(root)?.pgno();
            {
                let mp = self.cache.get_mut(id)?;
                mp.parent = Some(root);
                mp.parent_index = 0;
            }
            let w = self.writer_mut()?;
            w.root = root_pgno;
            w.meta.depth += 1;
            trace!(root = %root_pgno, "grew tree");
        }

        let (parent, parent_index) = {
            let mp = self.cache.get(id)?;
            (
                mp.parent.ok_or_else(|| CowError::internal("split page lost its parent"))?,
                mp.parent_index,
            )
        };

        let right = self.new_page(flags)?;
        let right_pgno = self.cache.get(right)?.pgno();
        {
            let mp = self.cache.get_mut(right)?;
            mp.parent = Some(parent);
            mp.parent_index = parent_index + 1;
        }

        let split_index = n / 2 + 1;
        let preferred = if new_index < split_index {
            split_index + 1
        } else {
            split_index
        }
        .clamp(1, entries.len() - 1);
        let left_count = self.split_point(id, &entries, preferred)?;

        let separator = if is_leaf {
            self.order
                .reduce_separator(&entries[left_count - 1].key, &entries[left_count].key)
        } else {
            entries[left_count].key.clone()
        };
        trace!(
            page = %self.cache.get(id)?.pgno(),
            right = %right_pgno,
            left_count,
            total = entries.len(),
            "splitting page"
        );

        // link the right sibling into the parent, splitting it if needed
        let (parent_prefix_len, parent_room) = {
            let pmp = self.cache.get(parent)?;
            (pmp.prefix.len(), pmp.page.size_left())
        };
        let sep_len = self.order.strip(&separator, parent_prefix_len).len();
        if node_size(sep_len, &NodeBody::Child(right_pgno)) + 2 > parent_room {
            let (new_parent, index) =
                self.split(parent, parent_index + 1, &separator, NewNode::Branch(right_pgno))?;
            {
                let mp = self.cache.get_mut(right)?;
                mp.parent = Some(new_parent);
                mp.parent_index = index;
            }
            if new_parent != parent && parent_index >= self.cache.get(parent)?.page.num_keys() {
                let mp = self.cache.get_mut(id)?;
                mp.parent = Some(new_parent);
                mp.parent_index = index - 1;
            }
        } else {
            let order = self.order.clone();
            let pmp = self.cache.get_mut(parent)?;
            let local = order.strip(&separator, pmp.prefix.len());
            pmp.page
                .insert_node(parent_index + 1, local, &NodeBody::Child(right_pgno))?;
        }

        self.find_common_prefix(id)?;
        self.find_common_prefix(right)?;

        let right_entries = entries.split_off(left_count);
        self.rebuild_page(id, &entries)?;
        self.rebuild_page(right, &right_entries)?;

        if new_index < left_count {
            Ok((id, new_index))
        } else {
            Ok((right, new_index - left_count))
        }
    }

    /// Nearest position to `preferred` that leaves both halves small
    /// enough for a page. Sizes are measured with the page's current
    /// prefix, which the narrower halves can only lengthen.
    fn split_point(&self, id: MPageId, entries: &[FullEntry], preferred: usize) -> Result<usize> {
        let (branch, prefix_len, capacity) = {
            let mp = self.cache.get(id)?;
            (mp.page.is_branch(), mp.prefix.len(), mp.page.capacity())
        };
        let fits = |at: usize| {
            self.entries_size(&entries[..at], branch, prefix_len) <= capacity
                && self.entries_size(&entries[at..], branch, prefix_len) <= capacity
        };

        for distance in 0..entries.len() {
            let candidates = [preferred.checked_sub(distance), preferred.checked_add(distance)];
            for at in candidates.into_iter().flatten() {
                if (1..entries.len()).contains(&at) && fits(at) {
                    return Ok(at);
                }
            }
        }
        Err(CowError::no_room(
            self.entries_size(entries, branch, prefix_len),
            2 * capacity,
        ))
    }
}

use bytes::Bytes;
use tracing::{trace, warn};

use crate::buffer::MPageId;
use crate::common::{CowError, Result, FILL_THRESHOLD, INVALID_PAGE_ID};
use crate::storage::page::NodeBody;
use crate::tree::{CowTree, Txn};

use super::btree_index::check_key;

impl CowTree {
    /// Deletes `key`. Fails with `CowError::NotFound` if it is absent.
    pub fn remove(&mut self, txn: Option<&mut Txn>, key: &[u8]) -> Result<()> {
        check_key(key, self.max_key_size())?;
        self.with_write_txn(txn, |tree| tree.remove_inner(key, false))
            .map(|_| ())
    }

    /// Deletes `key` and returns the value it held.
    pub fn take(&mut self, txn: Option<&mut Txn>, key: &[u8]) -> Result<Bytes> {
        check_key(key, self.max_key_size())?;
        self.with_write_txn(txn, |tree| tree.remove_inner(key, true))?
            .ok_or_else(|| CowError::internal("removed value was not read"))
    }

    fn remove_inner(&mut self, key: &[u8], want_value: bool) -> Result<Option<Bytes>> {
        let root = self.writer_ref()?.root;
        let leaf = self.search_page(root, Some(key), None, true)?;
        let index = match self.search_node(leaf, key)? {
            Some((i, true)) => i,
            _ => return Err(CowError::NotFound),
        };

        let value = if want_value {
            Some(self.read_data(leaf, index)?)
        } else {
            None
        };

        self.cache.get_mut(leaf)?.page.remove_node(index);
        let w = self.writer_mut()?;
        w.meta.entries = w.meta.entries.saturating_sub(1);

        self.rebalance(leaf)?;
        Ok(value)
    }

    /// Restores the fill of a page after a deletion by borrowing a node
    /// from a neighbor or merging with it.
    fn rebalance(&mut self, id: MPageId) -> Result<()> {
        let (fill, n, is_branch, parent, parent_index) = {
            let mp = self.cache.get(id)?;
            (
                mp.page.fill(),
                mp.page.num_keys(),
                mp.page.is_branch(),
                mp.parent,
                mp.parent_index,
            )
        };
        trace!(page = %self.cache.get(id)?.pgno(), fill, n, "rebalancing");
        if fill >= FILL_THRESHOLD {
            return Ok(());
        }

        let Some(parent) = parent else {
            return self.shrink_root(id, n, is_branch);
        };

        // an only child has no neighbor to pair with
        if self.cache.get(parent)?.page.num_keys() < 2 {
            return Ok(());
        }

        // the leftmost child pairs with its right neighbor, others with the left
        let neighbor_index = if parent_index == 0 { 1 } else { parent_index - 1 };
        let neighbor_pgno = self.cache.get(parent)?.page.node_pgno(neighbor_index);
        let neighbor = self.get_page(neighbor_pgno)?;
        {
            let mp = self.cache.get_mut(neighbor)?;
            mp.parent = Some(parent);
            mp.parent_index = neighbor_index;
        }
        self.find_common_prefix(neighbor)?;

        let (neighbor_fill, neighbor_keys) = {
            let page = &self.cache.get(neighbor)?.page;
            (page.fill(), page.num_keys())
        };

        if neighbor_fill >= FILL_THRESHOLD && neighbor_keys >= 2 {
            let moved = if parent_index == 0 {
                self.move_node(neighbor, 0, id, n)?
            } else {
                self.move_node(neighbor, neighbor_keys - 1, id, 0)?
            };
            if moved {
                return Ok(());
            }
        }

        let merged = if parent_index == 0 {
            self.merge(neighbor, id)?
        } else {
            self.merge(id, neighbor)?
        };
        if !merged {
            if n == 0 {
                return Err(CowError::internal("empty page cannot be merged"));
            }
            warn!(page = %self.cache.get(id)?.pgno(), fill, "pages too full to merge");
        }
        Ok(())
    }

    /// Removes an empty root, or a branch root with a single child.
    fn shrink_root(&mut self, id: MPageId, n: usize, is_branch: bool) -> Result<()> {
        if n == 0 {
            let w = self.writer_mut()?;
            w.root = INVALID_PAGE_ID;
            w.meta.depth = w.meta.depth.saturating_sub(1);
            if is_branch {
                w.meta.branch_pages = w.meta.branch_pages.saturating_sub(1);
            } else {
                w.meta.leaf_pages = w.meta.leaf_pages.saturating_sub(1);
            }
            trace!("tree is empty");
        } else if is_branch && n == 1 {
            let child_pgno = self.cache.get(id)?.page.node_pgno(0);
            let child = self.get_page(child_pgno)?;
            {
                let mp = self.cache.get_mut(child)?;
                mp.parent = None;
                mp.parent_index = 0;
                mp.prefix.clear();
            }
            let w = self.writer_mut()?;
            w.root = child_pgno;
            w.meta.depth = w.meta.depth.saturating_sub(1);
            w.meta.branch_pages = w.meta.branch_pages.saturating_sub(1);
            trace!(root = %child_pgno, "collapsed root");
        }
        Ok(())
    }

    /// Moves one node between two neighbors under the same parent and
    /// fixes the separator that bounds them. Returns false, changing
    /// nothing, if the new separator does not fit on the parent.
    fn move_node(
        &mut self,
        src: MPageId,
        src_index: usize,
        dst: MPageId,
        dst_index: usize,
    ) -> Result<bool> {
        let (parent, src_pi, dst_pi, is_branch) = {
            let s = self.cache.get(src)?;
            let d = self.cache.get(dst)?;
            let parent = s
                .parent
                .ok_or_else(|| CowError::internal("moving a node out of the root"))?;
            (parent, s.parent_index, d.parent_index, s.page.is_branch())
        };

        let mut src_entries = self.full_entries(src)?;
        let mut dst_entries = self.full_entries(dst)?;
        let mut moved = src_entries.remove(src_index);
        if is_branch && src_index == 0 {
            moved.key = self.expand_key(parent, src_pi)?;
        }
        if is_branch && dst_index == 0 && !dst_entries.is_empty() {
            dst_entries[0].key = self.expand_key(parent, dst_pi)?;
        }

        // branch separators bound whole subtrees and must stay exact; leaf
        // separators only need to fall between the two pages
        let update = if src_index == 0 && src_pi > 0 {
            let first = src_entries
                .first()
                .ok_or_else(|| CowError::internal("moved the last node of a page"))?;
            let separator = if is_branch {
                first.key.clone()
            } else {
                self.order.reduce_separator(&moved.key, &first.key)
            };
            Some((src_pi, separator))
        } else if dst_index == 0 && dst_pi > 0 {
            let separator = if is_branch {
                moved.key.clone()
            } else {
                let last = src_entries
                    .last()
                    .ok_or_else(|| CowError::internal("moved the last node of a page"))?;
                self.order.reduce_separator(&last.key, &moved.key)
            };
            Some((dst_pi, separator))
        } else {
            None
        };

        if let Some((index, separator)) = &update {
            let pmp = self.cache.get(parent)?;
            let new_len = self.order.strip(separator, pmp.prefix.len()).len();
            let old_len = pmp.page.node_key_size(*index);
            if new_len > old_len + pmp.page.size_left() {
                trace!(page = %pmp.pgno(), new_len, old_len, "no room for new separator");
                return Ok(false);
            }
        }

        // the receiving page's range widens, so its prefix may shrink to
        // what both pages share
        let moved_body = moved.body.clone();
        dst_entries.insert(dst_index, moved);
        let (prefix_len, capacity) = {
            let s = self.cache.get(src)?;
            let d = self.cache.get(dst)?;
            (self.order.common_prefix(&d.prefix, &s.prefix).len(), d.page.capacity())
        };
        let needed = self.entries_size(&dst_entries, is_branch, prefix_len);
        if needed > capacity {
            trace!(needed, capacity, "no room to move node");
            return Ok(false);
        }

        // a moved subtree keeps its prefix if it is positioned with it
        let moved_child = match &moved_body {
            NodeBody::Child(pgno) => {
                let child = self.get_page(*pgno)?;
                let mp = self.cache.get_mut(child)?;
                mp.parent = Some(src);
                mp.parent_index = src_index;
                self.find_common_prefix(child)?;
                Some(child)
            }
            _ => None,
        };

        let src = self.touch(src)?;
        let dst = self.touch(dst)?;
        trace!(
            src = %self.cache.get(src)?.pgno(),
            dst = %self.cache.get(dst)?.pgno(),
            src_index,
            dst_index,
            "moving node"
        );

        if let Some((index, separator)) = update {
            self.update_separator(parent, index, &separator)?;
        }

        self.find_common_prefix(src)?;
        self.rebuild_page(src, &src_entries)?;
        self.find_common_prefix(dst)?;
        self.rebuild_page(dst, &dst_entries)?;

        if let Some(child) = moved_child {
            {
                let mp = self.cache.get_mut(child)?;
                mp.parent = Some(dst);
                mp.parent_index = dst_index;
            }
            self.adjust_prefix(child)?;
        }
        Ok(true)
    }

    /// Appends every node of `src` to its left neighbor `dst`, unlinks
    /// `src` from the parent and rebalances the parent. Returns false,
    /// changing nothing, if the nodes do not fit on one page.
    fn merge(&mut self, src: MPageId, dst: MPageId) -> Result<bool> {
        let (parent, src_pi, is_branch) = {
            let mp = self.cache.get(src)?;
            let parent = mp
                .parent
                .ok_or_else(|| CowError::internal("merging the root"))?;
            (parent, mp.parent_index, mp.page.is_branch())
        };

        let mut src_entries = self.full_entries(src)?;
        if is_branch && !src_entries.is_empty() {
            src_entries[0].key = self.expand_key(parent, src_pi)?;
        }
        let dst_entries = self.full_entries(dst)?;

        let prefix_len = {
            let s = &self.cache.get(src)?.prefix;
            let d = &self.cache.get(dst)?.prefix;
            self.order.common_prefix(d, s).len()
        };
        let mut merged = dst_entries;
        merged.extend(src_entries);
        let needed = self.entries_size(&merged, is_branch, prefix_len);
        let capacity = self.cache.get(dst)?.page.capacity();
        if needed > capacity {
            return Ok(false);
        }

        let dst = self.touch(dst)?;
        trace!(
            src = %self.cache.get(src)?.pgno(),
            dst = %self.cache.get(dst)?.pgno(),
            nodes = merged.len(),
            "merging pages"
        );

        {
            let page = &mut self.cache.get_mut(parent)?.page;
            page.remove_node(src_pi);
            if src_pi == 0 && page.num_keys() > 0 {
                page.update_key(0, &[])?;
            }
        }
        {
            let w = self.writer_mut()?;
            if is_branch {
                w.meta.branch_pages = w.meta.branch_pages.saturating_sub(1);
            } else {
                w.meta.leaf_pages = w.meta.leaf_pages.saturating_sub(1);
            }
        }

        self.find_common_prefix(dst)?;
        self.rebuild_page(dst, &merged)?;
        self.rebalance(parent)?;
        Ok(true)
    }

    /// Replaces the separator key at `index` of a branch page.
    fn update_separator(&mut self, parent: MPageId, index: usize, key: &[u8]) -> Result<()> {
        let order = self.order.clone();
        let mp = self.cache.get_mut(parent)?;
        let local = order.strip(key, mp.prefix.len());
        mp.page.update_key(index, local)
    }
}

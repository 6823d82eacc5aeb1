//! Prefix compression.
//!
//! Every page stores its keys without the prefix shared by the lowest and
//! highest key that could ever be placed under the page's position in the
//! tree. The bounds come from the nearest ancestor separators on each
//! side. For reverse-ordered keys the shared part is a suffix.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::buffer::MPageId;
use crate::common::{CowError, Result};
use crate::storage::page::{node_size, NodeBody};
use crate::tree::CowTree;

use super::key_comparator::KeyComparator;

/// How keys are ordered in a tree.
#[derive(Clone)]
pub enum KeyOrder {
    /// Byte-wise from the front
    Forward,
    /// Byte-wise from the end
    Reverse,
    /// User-supplied ordering, without prefix compression
    Custom(Arc<dyn KeyComparator>),
}

impl KeyOrder {
    /// Whether keys are stored prefix-compressed.
    pub fn compresses(&self) -> bool {
        !matches!(self, KeyOrder::Custom(_))
    }

    /// Compares two full keys.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyOrder::Forward => a.cmp(b),
            KeyOrder::Reverse => a.iter().rev().cmp(b.iter().rev()),
            KeyOrder::Custom(cmp) => cmp.compare(a, b),
        }
    }

    /// Compares a full search key against a key stored on a page whose
    /// keys share `prefix`.
    pub fn compare_stored(&self, key: &[u8], stored: &[u8], prefix: &[u8]) -> Ordering {
        match self {
            KeyOrder::Forward => match key.strip_prefix(prefix) {
                Some(rest) => rest.cmp(stored),
                None => key.cmp(prefix),
            },
            KeyOrder::Reverse => match key.strip_suffix(prefix) {
                Some(rest) => self.compare(rest, stored),
                None => self.compare(key, prefix),
            },
            KeyOrder::Custom(cmp) => cmp.compare(key, stored),
        }
    }

    /// Longest prefix (suffix for reverse order) shared by two keys.
    pub fn common_prefix(&self, min: &[u8], max: &[u8]) -> Vec<u8> {
        match self {
            KeyOrder::Forward => {
                let n = min.iter().zip(max).take_while(|(a, b)| a == b).count();
                max[..n].to_vec()
            }
            KeyOrder::Reverse => {
                let n = min
                    .iter()
                    .rev()
                    .zip(max.iter().rev())
                    .take_while(|(a, b)| a == b)
                    .count();
                max[max.len() - n..].to_vec()
            }
            KeyOrder::Custom(_) => Vec::new(),
        }
    }

    /// Strips `len` prefix bytes from a full key.
    pub fn strip<'k>(&self, key: &'k [u8], len: usize) -> &'k [u8] {
        let len = len.min(key.len());
        match self {
            KeyOrder::Forward => &key[len..],
            KeyOrder::Reverse => &key[..key.len() - len],
            KeyOrder::Custom(_) => key,
        }
    }

    /// Rebuilds a full key from a page prefix and a stored suffix.
    pub fn expand(&self, prefix: &[u8], stored: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + stored.len());
        match self {
            KeyOrder::Forward => {
                key.extend_from_slice(prefix);
                key.extend_from_slice(stored);
            }
            KeyOrder::Reverse => {
                key.extend_from_slice(stored);
                key.extend_from_slice(prefix);
            }
            KeyOrder::Custom(_) => key.extend_from_slice(stored),
        }
        key
    }

    /// Shortens `sep` to the fewest bytes that still sort after `min`.
    /// Both keys must be full keys with `min < sep`.
    pub fn reduce_separator(&self, min: &[u8], sep: &[u8]) -> Vec<u8> {
        match self {
            KeyOrder::Forward => {
                let n = min.iter().zip(sep).take_while(|(a, b)| a == b).count();
                sep[..(n + 1).min(sep.len())].to_vec()
            }
            KeyOrder::Reverse => {
                let n = min
                    .iter()
                    .rev()
                    .zip(sep.iter().rev())
                    .take_while(|(a, b)| a == b)
                    .count();
                let keep = (n + 1).min(sep.len());
                sep[sep.len() - keep..].to_vec()
            }
            KeyOrder::Custom(_) => sep.to_vec(),
        }
    }
}

/// A node with its full key, used while rearranging pages.
#[derive(Debug, Clone)]
pub(crate) struct FullEntry {
    pub key: Vec<u8>,
    pub body: NodeBody,
}

impl CowTree {
    /// Full key of node `index` on a page.
    pub(crate) fn expand_key(&self, id: MPageId, index: usize) -> Result<Vec<u8>> {
        let mp = self.cache.get(id)?;
        Ok(self.order.expand(&mp.prefix, mp.page.node_key(index)))
    }

    /// Recomputes and stores the prefix of a page from its current
    /// position in the tree. The page's parent chain must be up to date.
    pub(crate) fn find_common_prefix(&mut self, id: MPageId) -> Result<()> {
        let prefix = self.compute_prefix(id)?;
        self.cache.get_mut(id)?.prefix = prefix;
        Ok(())
    }

    fn compute_prefix(&self, id: MPageId) -> Result<Vec<u8>> {
        if !self.order.compresses() {
            return Ok(Vec::new());
        }

        let mut lower = None;
        let mut cur = self.cache.get(id)?;
        while let Some(parent) = cur.parent {
            if cur.parent_index > 0 {
                lower = Some((parent, cur.parent_index));
                break;
            }
            cur = self.cache.get(parent)?;
        }

        let mut upper = None;
        let mut cur = self.cache.get(id)?;
        while let Some(parent) = cur.parent {
            let pmp = self.cache.get(parent)?;
            if cur.parent_index + 1 < pmp.page.num_keys() {
                upper = Some((parent, cur.parent_index + 1));
                break;
            }
            cur = pmp;
        }

        match (lower, upper) {
            (Some((lp, li)), Some((up, ui))) => {
                let lbound = self.expand_key(lp, li)?;
                let ubound = self.expand_key(up, ui)?;
                Ok(self.order.common_prefix(&lbound, &ubound))
            }
            _ => match self.cache.get(id)?.parent {
                Some(parent) => Ok(self.cache.get(parent)?.prefix.clone()),
                None => Ok(Vec::new()),
            },
        }
    }

    /// Copies every node of a page with its key expanded. Index 0 of a
    /// branch page keeps its empty key.
    pub(crate) fn full_entries(&self, id: MPageId) -> Result<Vec<FullEntry>> {
        let mp = self.cache.get(id)?;
        let page = &mp.page;
        Ok((0..page.num_keys())
            .map(|i| FullEntry {
                key: if page.is_branch() && i == 0 {
                    Vec::new()
                } else {
                    self.order.expand(&mp.prefix, page.node_key(i))
                },
                body: page.node_body(i),
            })
            .collect())
    }

    /// Bytes `entries` would take on a page with a prefix of `prefix_len`.
    pub(crate) fn entries_size(&self, entries: &[FullEntry], branch: bool, prefix_len: usize) -> usize {
        entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let key_len = if branch && i == 0 {
                    0
                } else {
                    self.order.strip(&e.key, prefix_len).len()
                };
                node_size(key_len, &e.body) + 2
            })
            .sum()
    }

    /// Replaces the contents of a page with `entries`, stripping the
    /// page's current prefix from every key.
    pub(crate) fn rebuild_page(&mut self, id: MPageId, entries: &[FullEntry]) -> Result<()> {
        let (branch, prefix_len, capacity) = {
            let mp = self.cache.get(id)?;
            (mp.page.is_branch(), mp.prefix.len(), mp.page.capacity())
        };
        let needed = self.entries_size(entries, branch, prefix_len);
        if needed > capacity {
            return Err(CowError::no_room(needed, capacity));
        }

        let order = self.order.clone();
        let mp = self.cache.get_mut(id)?;
        mp.page.clear();
        for (i, e) in entries.iter().enumerate() {
            let key: &[u8] = if branch && i == 0 {
                &[]
            } else {
                order.strip(&e.key, prefix_len)
            };
            mp.page.insert_node(i, key, &e.body)?;
        }
        Ok(())
    }

    /// Re-encodes every key on a page after its position in the tree
    /// changed. The page is touched only if its prefix changed; the
    /// returned handle is the one to use afterwards.
    pub(crate) fn adjust_prefix(&mut self, id: MPageId) -> Result<MPageId> {
        let entries = self.full_entries(id)?;
        let old_prefix = self.cache.get(id)?.prefix.clone();
        self.find_common_prefix(id)?;
        if self.cache.get(id)?.prefix == old_prefix {
            return Ok(id);
        }
        let id = self.touch(id)?;
        self.rebuild_page(id, &entries)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BytewiseComparator;

    #[test]
    fn test_common_prefix() {
        let fwd = KeyOrder::Forward;
        assert_eq!(fwd.common_prefix(b"apple", b"apricot"), b"ap");
        assert_eq!(fwd.common_prefix(b"abc", b"abcdef"), b"abc");
        assert_eq!(fwd.common_prefix(b"", b"abc"), b"");
        assert_eq!(fwd.common_prefix(b"x", b"y"), b"");

        let rev = KeyOrder::Reverse;
        assert_eq!(rev.common_prefix(b"running", b"jumping"), b"ing");
        assert_eq!(rev.common_prefix(b"ab", b"b"), b"b");

        let custom = KeyOrder::Custom(Arc::new(BytewiseComparator));
        assert_eq!(custom.common_prefix(b"abc", b"abd"), b"");
    }

    #[test]
    fn test_strip_and_expand() {
        let fwd = KeyOrder::Forward;
        assert_eq!(fwd.strip(b"prefix-key", 7), b"key");
        assert_eq!(fwd.expand(b"prefix-", b"key"), b"prefix-key");

        let rev = KeyOrder::Reverse;
        assert_eq!(rev.strip(b"key.txt", 4), b"key");
        assert_eq!(rev.expand(b".txt", b"key"), b"key.txt");

        let custom = KeyOrder::Custom(Arc::new(BytewiseComparator));
        assert_eq!(custom.strip(b"abc", 2), b"abc");
    }

    #[test]
    fn test_compare_stored() {
        let fwd = KeyOrder::Forward;
        assert_eq!(fwd.compare_stored(b"user42", b"42", b"user"), Ordering::Equal);
        assert_eq!(fwd.compare_stored(b"user5", b"42", b"user"), Ordering::Greater);
        // keys outside the prefix range order against the prefix itself
        assert_eq!(fwd.compare_stored(b"aaa", b"", b"user"), Ordering::Less);
        assert_eq!(fwd.compare_stored(b"zzz", b"", b"user"), Ordering::Greater);
        assert_eq!(fwd.compare_stored(b"us", b"", b"user"), Ordering::Less);

        let rev = KeyOrder::Reverse;
        assert_eq!(rev.compare_stored(b"a.txt", b"a", b".txt"), Ordering::Equal);
        assert_eq!(rev.compare_stored(b"b.txt", b"a", b".txt"), Ordering::Greater);
        assert_eq!(rev.compare_stored(b"a.rs", b"a", b".txt"), Ordering::Less);
    }

    #[test]
    fn test_reduce_separator() {
        let fwd = KeyOrder::Forward;
        assert_eq!(fwd.reduce_separator(b"apple", b"banana"), b"b");
        assert_eq!(fwd.reduce_separator(b"apple", b"apricot"), b"apr");
        assert_eq!(fwd.reduce_separator(b"app", b"apple"), b"appl");

        let rev = KeyOrder::Reverse;
        assert_eq!(rev.reduce_separator(b"xa", b"yb"), b"b");
        assert_eq!(rev.reduce_separator(b"cab", b"dzab"), b"zab");
    }
}

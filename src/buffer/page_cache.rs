use std::collections::BTreeMap;

use tracing::trace;

use crate::common::{CowError, PageId, Result};

use super::{LruKReplacer, MPage, MPageId};

struct Slot {
    generation: u32,
    page: Option<MPage>,
}

/// PageCache owns every in-memory page. Pages live in an arena addressed
/// by `MPageId` handles; the page table maps page numbers to the handle
/// currently caching them. A page may sit in the arena without being in
/// the page table while it is being renumbered.
pub struct PageCache {
    /// Arena of page slots
    slots: Vec<Slot>,
    /// Released slots available for reuse
    free_slots: Vec<u32>,
    /// Page table: maps page numbers to cached pages
    page_table: BTreeMap<PageId, MPageId>,
    /// Eviction order for clean, unreferenced pages
    replacer: LruKReplacer,
    /// Bound on the number of cached pages enforced by `prune`
    max_cache: usize,
    hits: u64,
    reads: u64,
}

impl PageCache {
    pub fn new(max_cache: usize, k: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            page_table: BTreeMap::new(),
            replacer: LruKReplacer::new(k),
            max_cache,
            hits: 0,
            reads: 0,
        }
    }

    /// Places a page in the arena without indexing it.
    pub fn insert(&mut self, mp: MPage) -> MPageId {
        match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.page = Some(mp);
                MPageId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    page: Some(mp),
                });
                MPageId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    /// Frees an arena slot. The page must no longer be in the page table.
    pub fn release(&mut self, id: MPageId) -> Option<MPage> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.page.is_none() {
            return None;
        }
        let mp = slot.page.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        mp
    }

    #[cfg(test)]
    pub fn contains(&self, id: MPageId) -> bool {
        self.get(id).is_ok()
    }

    pub fn get(&self, id: MPageId) -> Result<&MPage> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.page.as_ref())
            .ok_or_else(|| CowError::internal(format!("stale page handle {}", id)))
    }

    pub fn get_mut(&mut self, id: MPageId) -> Result<&mut MPage> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.page.as_mut())
            .ok_or_else(|| CowError::internal(format!("stale page handle {}", id)))
    }

    /// Finds a cached page, counting a hit and refreshing its recency.
    pub fn lookup(&mut self, pgno: PageId) -> Option<MPageId> {
        let id = *self.page_table.get(&pgno)?;
        self.hits += 1;
        self.replacer.record_access(pgno);
        Some(id)
    }

    /// Indexes an arena page under its page number.
    pub fn add(&mut self, id: MPageId) -> Result<()> {
        let pgno = self.get(id)?.pgno();
        if let Some(existing) = self.page_table.get(&pgno) {
            if *existing != id {
                return Err(CowError::internal(format!("{} is already cached", pgno)));
            }
        }
        self.page_table.insert(pgno, id);
        self.replacer.record_access(pgno);
        Ok(())
    }

    /// Drops the page table entry for an arena page, if it has one.
    pub fn remove(&mut self, id: MPageId) -> Result<()> {
        let pgno = self.get(id)?.pgno();
        if self.page_table.get(&pgno) == Some(&id) {
            self.page_table.remove(&pgno);
            self.replacer.remove(pgno);
        }
        Ok(())
    }

    /// Takes a reference on a page, pinning it in the cache.
    pub fn pin(&mut self, id: MPageId) -> Result<()> {
        self.get_mut(id)?.refs += 1;
        Ok(())
    }

    /// Drops a reference. Unpinning a released page is a no-op. A page
    /// that was dropped from the page table while referenced is released
    /// with its last reference.
    pub fn unpin(&mut self, id: MPageId) {
        let (refs, pgno) = match self.get_mut(id) {
            Ok(mp) => {
                mp.refs = mp.refs.saturating_sub(1);
                (mp.refs, mp.pgno())
            }
            Err(_) => return,
        };
        if refs == 0 && self.page_table.get(&pgno) != Some(&id) {
            self.release(id);
        }
    }

    /// Evicts least recently used clean, unreferenced pages until the
    /// cache is back under its bound.
    pub fn prune(&mut self) {
        if self.page_table.len() <= self.max_cache {
            return;
        }

        for (pgno, id) in self.page_table.iter() {
            let evictable = self.slots[id.index as usize]
                .page
                .as_ref()
                .map(MPage::is_evictable)
                .unwrap_or(true);
            self.replacer.set_evictable(*pgno, evictable);
        }

        while self.page_table.len() > self.max_cache {
            let Some(pgno) = self.replacer.evict() else {
                break;
            };
            if let Some(id) = self.page_table.remove(&pgno) {
                trace!(%pgno, "evicting page");
                self.release(id);
            }
        }
    }

    /// Drops every unreferenced page, clean or not, and resets the arena
    /// slots they occupied.
    pub fn clear(&mut self) {
        let ids: Vec<MPageId> = self.page_table.values().copied().collect();
        for id in ids {
            let keep = self.get(id).map(|mp| mp.refs > 0).unwrap_or(false);
            if !keep && self.remove(id).is_ok() {
                self.release(id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.page_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page_table.is_empty()
    }

    pub fn max_cache(&self) -> usize {
        self.max_cache
    }

    pub fn set_max_cache(&mut self, max_cache: usize) {
        self.max_cache = max_cache;
    }

    pub fn record_read(&mut self) {
        self.reads += 1;
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{Page, PAGE_LEAF};

    fn leaf(pgno: u32) -> MPage {
        let mut page = Page::new(512);
        page.init(PageId::new(pgno), PAGE_LEAF);
        MPage::new(page)
    }

    #[test]
    fn test_cache_add_lookup() {
        let mut cache = PageCache::new(10, 1);
        let id = cache.insert(leaf(3));
        cache.add(id).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(PageId::new(3)), Some(id));
        assert_eq!(cache.lookup(PageId::new(4)), None);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_cache_duplicate_pgno_rejected() {
        let mut cache = PageCache::new(10, 1);
        let a = cache.insert(leaf(3));
        let b = cache.insert(leaf(3));
        cache.add(a).unwrap();
        assert!(cache.add(b).is_err());
        cache.add(a).unwrap();
    }

    #[test]
    fn test_cache_stale_handle() {
        let mut cache = PageCache::new(10, 1);
        let id = cache.insert(leaf(1));
        cache.release(id).unwrap();
        assert!(cache.get(id).is_err());
        assert!(cache.release(id).is_none());

        // the slot is reused under a new generation
        let reused = cache.insert(leaf(2));
        assert_eq!(reused.index, id.index);
        assert_ne!(reused.generation, id.generation);
        assert!(cache.get(id).is_err());
        assert_eq!(cache.get(reused).unwrap().pgno(), PageId::new(2));
    }

    #[test]
    fn test_cache_prune_lru_order() {
        let mut cache = PageCache::new(2, 1);
        let ids: Vec<MPageId> = (1..=4)
            .map(|n| {
                let id = cache.insert(leaf(n));
                cache.add(id).unwrap();
                id
            })
            .collect();

        // touch page 1 so pages 2 and 3 are the least recently used
        cache.lookup(PageId::new(1));
        cache.prune();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(ids[0]));
        assert!(!cache.contains(ids[1]));
        assert!(!cache.contains(ids[2]));
        assert!(cache.contains(ids[3]));
    }

    #[test]
    fn test_cache_prune_keeps_pinned_and_dirty() {
        let mut cache = PageCache::new(0, 1);
        let pinned = cache.insert(leaf(1));
        let dirty = cache.insert(leaf(2));
        let clean = cache.insert(leaf(3));
        for id in [pinned, dirty, clean] {
            cache.add(id).unwrap();
        }
        cache.pin(pinned).unwrap();
        cache.get_mut(dirty).unwrap().dirty = true;

        cache.prune();
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(pinned));
        assert!(cache.contains(dirty));
        assert!(!cache.contains(clean));

        cache.unpin(pinned);
        cache.prune();
        assert!(!cache.contains(pinned));
        assert!(cache.contains(dirty));
    }

    #[test]
    fn test_cache_remove_keeps_arena_page() {
        let mut cache = PageCache::new(10, 1);
        let id = cache.insert(leaf(5));
        cache.add(id).unwrap();
        cache.remove(id).unwrap();
        assert_eq!(cache.len(), 0);
        assert!(cache.contains(id));
        assert_eq!(cache.lookup(PageId::new(5)), None);
    }

    #[test]
    fn test_cache_clear_keeps_pinned() {
        let mut cache = PageCache::new(10, 1);
        let pinned = cache.insert(leaf(1));
        let dirty = cache.insert(leaf(2));
        for id in [pinned, dirty] {
            cache.add(id).unwrap();
        }
        cache.pin(pinned).unwrap();
        cache.get_mut(dirty).unwrap().dirty = true;

        cache.clear();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(PageId::new(1)), Some(pinned));
        assert!(!cache.contains(dirty));
        assert_eq!(cache.lookup(PageId::new(2)), None);
    }
}

use std::collections::{HashMap, VecDeque};

use crate::common::{PageId, Timestamp};

/// Tracks access history for a single cached page
#[derive(Debug)]
struct PageAccessInfo {
    /// History of access timestamps (most recent at back)
    history: VecDeque<Timestamp>,
    /// Whether this page may currently be evicted
    is_evictable: bool,
}

impl PageAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Backward k-distance, or `None` (+inf) with fewer than k accesses.
    fn k_distance(&self, current_timestamp: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(current_timestamp - self.history[self.history.len() - k])
        }
    }

    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

/// LRU-K replacement policy over cached pages.
///
/// The victim is the evictable page whose backward k-distance is the
/// largest. Pages with fewer than k recorded accesses have +inf distance
/// and among those the earliest accessed page goes first. With k = 1 this
/// is plain least-recently-used ordering.
pub struct LruKReplacer {
    k: usize,
    current_timestamp: Timestamp,
    page_info: HashMap<PageId, PageAccessInfo>,
    num_evictable: usize,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            current_timestamp: 0,
            page_info: HashMap::new(),
            num_evictable: 0,
        }
    }

    /// Evicts the page with the largest backward k-distance.
    /// Returns None if there are no evictable pages.
    pub fn evict(&mut self) -> Option<PageId> {
        if self.num_evictable == 0 {
            return None;
        }

        let current_ts = self.current_timestamp;
        let mut victim: Option<PageId> = None;
        let mut victim_k_dist: Option<Timestamp> = None;
        let mut victim_earliest_ts: Option<Timestamp> = None;

        for (pgno, info) in self.page_info.iter() {
            if !info.is_evictable {
                continue;
            }

            let k_dist = info.k_distance(current_ts, self.k);
            let earliest_ts = info.earliest_timestamp();

            let should_replace = match (victim_k_dist, k_dist) {
                (None, Some(_)) => false,
                (Some(_), None) => true,
                (None, None) => match (victim_earliest_ts, earliest_ts) {
                    (Some(v_ts), Some(c_ts)) => c_ts < v_ts,
                    (None, Some(_)) => true,
                    _ => false,
                },
                (Some(v_dist), Some(c_dist)) => c_dist > v_dist,
            };

            if victim.is_none() || should_replace {
                victim = Some(*pgno);
                victim_k_dist = k_dist;
                victim_earliest_ts = earliest_ts;
            }
        }

        if let Some(pgno) = victim {
            self.page_info.remove(&pgno);
            self.num_evictable -= 1;
        }

        victim
    }

    /// Records that the given page was accessed now.
    pub fn record_access(&mut self, pgno: PageId) {
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;
        self.page_info
            .entry(pgno)
            .or_insert_with(PageAccessInfo::new)
            .record_access(timestamp, self.k);
    }

    /// Sets whether a page may be evicted. Dirty and referenced pages
    /// must stay resident.
    pub fn set_evictable(&mut self, pgno: PageId, is_evictable: bool) {
        match self.page_info.get_mut(&pgno) {
            Some(info) => {
                if info.is_evictable != is_evictable {
                    if is_evictable {
                        self.num_evictable += 1;
                    } else {
                        self.num_evictable -= 1;
                    }
                    info.is_evictable = is_evictable;
                }
            }
            None if is_evictable => {
                let mut info = PageAccessInfo::new();
                info.is_evictable = true;
                self.page_info.insert(pgno, info);
                self.num_evictable += 1;
            }
            None => {}
        }
    }

    /// Forgets a page entirely.
    pub fn remove(&mut self, pgno: PageId) {
        if let Some(info) = self.page_info.remove(&pgno) {
            if info.is_evictable {
                self.num_evictable -= 1;
            }
        }
    }

    /// Returns the number of evictable pages.
    pub fn size(&self) -> usize {
        self.num_evictable
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

//! Integration tests for the LRU-K page replacer

use cowbt::buffer::LruKReplacer;
use cowbt::common::PageId;

#[test]
fn test_lru_k_eviction_order() {
    let mut replacer = LruKReplacer::new(2);

    // Access pages in order
    for i in 0..5 {
        replacer.record_access(PageId::new(i));
        replacer.set_evictable(PageId::new(i), true);
    }

    assert_eq!(replacer.size(), 5);

    // All pages have only 1 access (< k=2), so all have +inf distance
    // Should evict in order of earliest timestamp (FIFO for +inf pages)
    for i in 0..5 {
        assert_eq!(replacer.evict(), Some(PageId::new(i)));
    }

    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_respects_k_distance() {
    let mut replacer = LruKReplacer::new(2);

    // Page 0: accessed once (will have +inf k-distance)
    replacer.record_access(PageId::new(0));

    // Page 1: accessed twice (will have finite k-distance)
    replacer.record_access(PageId::new(1));
    replacer.record_access(PageId::new(1));

    // Page 2: accessed twice (will have finite k-distance, but more recent)
    replacer.record_access(PageId::new(2));
    replacer.record_access(PageId::new(2));

    replacer.set_evictable(PageId::new(0), true);
    replacer.set_evictable(PageId::new(1), true);
    replacer.set_evictable(PageId::new(2), true);

    // Page 0 has +inf k-distance, should be evicted first
    assert_eq!(replacer.evict(), Some(PageId::new(0)));

    // Between pages 1 and 2, page 1 has larger k-distance (accessed earlier)
    assert_eq!(replacer.evict(), Some(PageId::new(1)));

    // Page 2 is last
    assert_eq!(replacer.evict(), Some(PageId::new(2)));
}

#[test]
fn test_lru_k_pinned_pages_not_evicted() {
    let mut replacer = LruKReplacer::new(2);

    replacer.record_access(PageId::new(0));
    replacer.record_access(PageId::new(1));
    replacer.record_access(PageId::new(2));

    // Only mark pages 1 and 2 as evictable
    replacer.set_evictable(PageId::new(1), true);
    replacer.set_evictable(PageId::new(2), true);

    assert_eq!(replacer.size(), 2);

    // Page 0 should never be evicted
    assert_eq!(replacer.evict(), Some(PageId::new(1)));
    assert_eq!(replacer.evict(), Some(PageId::new(2)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_toggle_evictable() {
    let mut replacer = LruKReplacer::new(2);

    replacer.record_access(PageId::new(0));
    replacer.set_evictable(PageId::new(0), true);
    assert_eq!(replacer.size(), 1);

    // Toggle off
    replacer.set_evictable(PageId::new(0), false);
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);

    // Toggle back on
    replacer.set_evictable(PageId::new(0), true);
    assert_eq!(replacer.size(), 1);
    assert_eq!(replacer.evict(), Some(PageId::new(0)));
}

#[test]
fn test_lru_k_remove() {
    let mut replacer = LruKReplacer::new(2);

    replacer.record_access(PageId::new(0));
    replacer.record_access(PageId::new(1));
    replacer.set_evictable(PageId::new(0), true);
    replacer.set_evictable(PageId::new(1), true);

    assert_eq!(replacer.size(), 2);

    // Remove page 0
    replacer.remove(PageId::new(0));
    assert_eq!(replacer.size(), 1);

    // Only page 1 should be evictable
    assert_eq!(replacer.evict(), Some(PageId::new(1)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_multiple_inf_distance() {
    let mut replacer = LruKReplacer::new(3);

    // All pages have fewer than k=3 accesses
    replacer.record_access(PageId::new(0));

    replacer.record_access(PageId::new(1));
    replacer.record_access(PageId::new(1));

    replacer.record_access(PageId::new(2));

    for i in 0..3 {
        replacer.set_evictable(PageId::new(i), true);
    }

    // All have +inf k-distance, so evict by earliest timestamp
    // Page 0 was accessed first
    assert_eq!(replacer.evict(), Some(PageId::new(0)));

    // Page 1's first access was second overall
    assert_eq!(replacer.evict(), Some(PageId::new(1)));

    // Page 2 was accessed last
    assert_eq!(replacer.evict(), Some(PageId::new(2)));
}

#[test]
fn test_lru_k_history_limit() {
    let mut replacer = LruKReplacer::new(2);

    // Access page 0 many times
    for _ in 0..10 {
        replacer.record_access(PageId::new(0));
    }

    // Access page 1 twice
    replacer.record_access(PageId::new(1));
    replacer.record_access(PageId::new(1));

    replacer.set_evictable(PageId::new(0), true);
    replacer.set_evictable(PageId::new(1), true);

    // Page 0's k-distance is based on its most recent k accesses
    // Page 1 was accessed more recently, so page 0 should have larger k-distance
    assert_eq!(replacer.evict(), Some(PageId::new(0)));
    assert_eq!(replacer.evict(), Some(PageId::new(1)));
}

#[test]
fn test_lru_k_with_k_one_is_lru() {
    let mut replacer = LruKReplacer::new(1);

    for i in 0..3 {
        replacer.record_access(PageId::new(i));
    }
    // touching page 0 again makes page 1 the least recently used
    replacer.record_access(PageId::new(0));

    for i in 0..3 {
        replacer.set_evictable(PageId::new(i), true);
    }

    assert_eq!(replacer.evict(), Some(PageId::new(1)));
    assert_eq!(replacer.evict(), Some(PageId::new(2)));
    assert_eq!(replacer.evict(), Some(PageId::new(0)));
}

#[test]
fn test_lru_k_unknown_page_becomes_evictable() {
    let mut replacer = LruKReplacer::new(2);

    // a page marked evictable without recorded accesses is tracked too
    replacer.set_evictable(PageId::new(9), true);
    replacer.set_evictable(PageId::new(10), false);
    assert_eq!(replacer.size(), 1);
    assert_eq!(replacer.evict(), Some(PageId::new(9)));
    assert_eq!(replacer.evict(), None);
}

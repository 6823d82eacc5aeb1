use std::fmt;

use crate::common::PageId;
use crate::storage::page::Page;

/// Handle to an in-memory page slot in the page cache.
///
/// The generation changes every time a slot is reused, so a handle kept
/// past the release of its page is detected instead of aliasing a newer
/// page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MPageId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for MPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MPage({}#{})", self.index, self.generation)
    }
}

/// A cached page together with the bookkeeping the tree algorithms need.
pub struct MPage {
    /// The page image
    pub page: Page,
    /// Parent page on the path the page was last reached through
    pub parent: Option<MPageId>,
    /// Index of this page's node within the parent
    pub parent_index: usize,
    /// Common prefix of every key stored on this page
    pub prefix: Vec<u8>,
    /// Number of cursors (or other readers) holding the page
    pub refs: u32,
    /// Modified by the running write transaction
    pub dirty: bool,
}

impl MPage {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            parent: None,
            parent_index: 0,
            prefix: Vec::new(),
            refs: 0,
            dirty: false,
        }
    }

    pub fn pgno(&self) -> PageId {
        self.page.pgno()
    }

    /// Copies the page image and prefix into a fresh, unreferenced page.
    pub fn duplicate(&self) -> Self {
        Self {
            page: self.page.clone(),
            parent: self.parent,
            parent_index: self.parent_index,
            prefix: self.prefix.clone(),
            refs: 0,
            dirty: false,
        }
    }

    /// A page may be dropped from the cache only when nothing holds it and
    /// it has no unwritten changes.
    pub fn is_evictable(&self) -> bool {
        self.refs == 0 && !self.dirty
    }
}

use std::fmt;

/// Page number - the addressing unit of the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn is_valid(&self) -> bool {
        *self != INVALID_PAGE_ID
    }

    /// Byte offset of this page in a store with the given page size.
    pub fn offset(&self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Page number marking an empty tree or a missing page
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Timestamp type for LRU-K tracking
pub type Timestamp = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_offset() {
        assert_eq!(PageId::new(0).offset(4096), 0);
        assert_eq!(PageId::new(3).offset(512), 1536);
        assert!(!INVALID_PAGE_ID.is_valid());
        assert!(PageId::new(7).is_valid());
        assert_eq!(PageId::new(7).to_string(), "PageId(7)");
    }
}

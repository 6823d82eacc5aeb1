use crate::common::{CowError, PageId, Result, INVALID_PAGE_ID, MAGIC, VERSION};

use super::page::{Page, PAGE_HEADER, PAGE_HEADER_SIZE, PAGE_META};

// File header record, stored after the page header of page 0.
const HEAD_MAGIC_OFFSET: usize = PAGE_HEADER_SIZE;
const HEAD_VERSION_OFFSET: usize = PAGE_HEADER_SIZE + 4;
const HEAD_FLAGS_OFFSET: usize = PAGE_HEADER_SIZE + 8;
const HEAD_PSIZE_OFFSET: usize = PAGE_HEADER_SIZE + 12;

/// Bytes needed to decode the file header without knowing the page size
pub const HEAD_RECORD_END: usize = PAGE_HEADER_SIZE + 16;

// Meta record, laid out with natural alignment of its fields.
const META_FLAGS_OFFSET: usize = PAGE_HEADER_SIZE;
const META_ROOT_OFFSET: usize = PAGE_HEADER_SIZE + 4;
const META_PREV_OFFSET: usize = PAGE_HEADER_SIZE + 8;
const META_CREATED_OFFSET: usize = PAGE_HEADER_SIZE + 16;
const META_BRANCH_OFFSET: usize = PAGE_HEADER_SIZE + 24;
const META_LEAF_OFFSET: usize = PAGE_HEADER_SIZE + 28;
const META_OVERFLOW_OFFSET: usize = PAGE_HEADER_SIZE + 32;
const META_REVISIONS_OFFSET: usize = PAGE_HEADER_SIZE + 36;
const META_DEPTH_OFFSET: usize = PAGE_HEADER_SIZE + 40;
const META_ENTRIES_OFFSET: usize = PAGE_HEADER_SIZE + 48;

/// Meta flag: the file image has been superseded by a compacted copy
pub const META_TOMBSTONE: u32 = 0x01;

/// Header flag: keys compare byte-wise from the end
pub const HEAD_REVERSE_KEYS: u32 = 0x08;

fn get_u32(data: &[u8], offset: usize) -> u32 {
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    u32::from_le_bytes(bytes)
}

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Contents of the header page (page 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
    pub page_size: u32,
}

impl FileHeader {
    pub fn new(page_size: usize, flags: u32) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags,
            page_size: page_size as u32,
        }
    }

    /// Builds the full header page.
    pub fn to_page(&self) -> Page {
        let mut page = Page::new(self.page_size as usize);
        page.init(PageId::new(0), PAGE_HEADER);
        let data = page.as_bytes_mut();
        put_u32(data, HEAD_MAGIC_OFFSET, self.magic);
        put_u32(data, HEAD_VERSION_OFFSET, self.version);
        put_u32(data, HEAD_FLAGS_OFFSET, self.flags);
        put_u32(data, HEAD_PSIZE_OFFSET, self.page_size);
        page
    }

    /// Decodes and validates a header from the leading bytes of a file.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEAD_RECORD_END {
            return Err(CowError::corrupt("header page is truncated"));
        }
        if get_u32(data, 4) & PAGE_HEADER == 0 {
            return Err(CowError::corrupt(format!(
                "page {} is not a header page",
                get_u32(data, 0)
            )));
        }
        let header = Self {
            magic: get_u32(data, HEAD_MAGIC_OFFSET),
            version: get_u32(data, HEAD_VERSION_OFFSET),
            flags: get_u32(data, HEAD_FLAGS_OFFSET),
            page_size: get_u32(data, HEAD_PSIZE_OFFSET),
        };
        if header.magic != MAGIC {
            return Err(CowError::corrupt("header has invalid magic"));
        }
        if header.version != VERSION {
            return Err(CowError::corrupt(format!(
                "database has unsupported version {}",
                header.version
            )));
        }
        if (header.page_size as usize) < HEAD_RECORD_END {
            return Err(CowError::corrupt(format!(
                "invalid page size {}",
                header.page_size
            )));
        }
        Ok(header)
    }
}

/// Contents of a meta page: the committed root and tree statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub flags: u32,
    pub root: PageId,
    pub prev_meta: PageId,
    pub created_at: i64,
    pub branch_pages: u32,
    pub leaf_pages: u32,
    pub overflow_pages: u32,
    pub revisions: u32,
    pub depth: u32,
    pub entries: u64,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            flags: 0,
            root: INVALID_PAGE_ID,
            prev_meta: INVALID_PAGE_ID,
            created_at: 0,
            branch_pages: 0,
            leaf_pages: 0,
            overflow_pages: 0,
            revisions: 0,
            depth: 0,
            entries: 0,
        }
    }
}

impl Meta {
    pub fn is_tombstone(&self) -> bool {
        self.flags & META_TOMBSTONE != 0
    }

    /// A page holds a usable meta record if it is flagged as meta and its
    /// root lies strictly before it (or the tree is empty).
    pub fn is_valid_meta_page(page: &Page) -> bool {
        if !page.is_meta() {
            return false;
        }
        let root = PageId::new(get_u32(page.as_bytes(), META_ROOT_OFFSET));
        root < page.pgno() || !root.is_valid()
    }

    pub fn read_from(page: &Page) -> Self {
        let data = page.as_bytes();
        let created: [u8; 8] = data[META_CREATED_OFFSET..META_CREATED_OFFSET + 8]
            .try_into()
            .unwrap();
        let entries: [u8; 8] = data[META_ENTRIES_OFFSET..META_ENTRIES_OFFSET + 8]
            .try_into()
            .unwrap();
        Self {
            flags: get_u32(data, META_FLAGS_OFFSET),
            root: PageId::new(get_u32(data, META_ROOT_OFFSET)),
            prev_meta: PageId::new(get_u32(data, META_PREV_OFFSET)),
            created_at: i64::from_le_bytes(created),
            branch_pages: get_u32(data, META_BRANCH_OFFSET),
            leaf_pages: get_u32(data, META_LEAF_OFFSET),
            overflow_pages: get_u32(data, META_OVERFLOW_OFFSET),
            revisions: get_u32(data, META_REVISIONS_OFFSET),
            depth: get_u32(data, META_DEPTH_OFFSET),
            entries: u64::from_le_bytes(entries),
        }
    }

    /// Builds a meta page with the given page number.
    pub fn to_page(&self, pgno: PageId, page_size: usize) -> Page {
        let mut page = Page::new(page_size);
        page.init(pgno, PAGE_META);
        let data = page.as_bytes_mut();
        put_u32(data, META_FLAGS_OFFSET, self.flags);
        put_u32(data, META_ROOT_OFFSET, self.root.as_u32());
        put_u32(data, META_PREV_OFFSET, self.prev_meta.as_u32());
        data[META_CREATED_OFFSET..META_CREATED_OFFSET + 8]
            .copy_from_slice(&self.created_at.to_le_bytes());
        put_u32(data, META_BRANCH_OFFSET, self.branch_pages);
        put_u32(data, META_LEAF_OFFSET, self.leaf_pages);
        put_u32(data, META_OVERFLOW_OFFSET, self.overflow_pages);
        put_u32(data, META_REVISIONS_OFFSET, self.revisions);
        put_u32(data, META_DEPTH_OFFSET, self.depth);
        data[META_ENTRIES_OFFSET..META_ENTRIES_OFFSET + 8]
            .copy_from_slice(&self.entries.to_le_bytes());
        page
    }
}

use crate::common::{CowError, PageId, Result};

/// Page layout shared by branch, leaf, meta and header pages:
///
/// +------------------+
/// | pgno      (u32)  |
/// | flags     (u32)  |
/// | lower     (u16)  |  end of the offset table
/// | upper     (u16)  |  start of the node records
/// +------------------+
/// | Offset Table     |  (grows upward)
/// | [ptr 0]          |
/// | [ptr 1]          |
/// | ...              |
/// +------------------+
/// |                  |
/// | Free Space       |  (upper - lower bytes)
/// |                  |
/// +------------------+
/// | Node Records     |  (grows downward from the end of the page)
/// | [node n-1]       |
/// | ...              |
/// | [node 0]         |
/// +------------------+
///
/// Overflow pages reuse the lower/upper slot as a single u32 link to the
/// next page of the chain (0 terminates it) and hold raw value bytes from
/// `PAGE_HEADER_SIZE` to the end of the page.
///
/// Each node record contains:
///   - field: u32 (child page number on branch pages, data size on leaves)
///   - ksize: u16 (length of the stored key suffix)
///   - flags: u8  (`NODE_BIGDATA` when the data lives in an overflow chain)
///   - key bytes, then inline data or a u32 overflow page number
pub const PAGE_HEADER_SIZE: usize = 12;

/// Size of a node record header in bytes
pub const NODE_HEADER_SIZE: usize = 7;

/// Size of one offset table entry
const PTR_SIZE: usize = 2;

const PGNO_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 4;
const LOWER_OFFSET: usize = 8;
const UPPER_OFFSET: usize = 10;
const NEXT_PGNO_OFFSET: usize = 8;

const NODE_FIELD_OFFSET: usize = 0;
const NODE_KSIZE_OFFSET: usize = 4;
const NODE_FLAGS_OFFSET: usize = 6;

pub const PAGE_BRANCH: u32 = 0x01;
pub const PAGE_LEAF: u32 = 0x02;
pub const PAGE_OVERFLOW: u32 = 0x04;
pub const PAGE_META: u32 = 0x08;
pub const PAGE_HEADER: u32 = 0x10;

/// Node flag: data is stored in an overflow chain
pub const NODE_BIGDATA: u8 = 0x01;

/// What a node points at besides its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    /// Branch node: child page number
    Child(PageId),
    /// Leaf node with its value stored inline
    Inline(Vec<u8>),
    /// Leaf node whose value starts at the given overflow page
    Overflow { pgno: PageId, size: u32 },
}

impl NodeBody {
    fn payload_len(&self) -> usize {
        match self {
            NodeBody::Child(_) => 0,
            NodeBody::Inline(data) => data.len(),
            NodeBody::Overflow { .. } => 4,
        }
    }
}

/// Bytes a node with the given key length and body occupies, excluding
/// its offset table entry.
pub fn node_size(key_len: usize, body: &NodeBody) -> usize {
    NODE_HEADER_SIZE + key_len + body.payload_len()
}

/// A fixed-size page image.
#[derive(Clone)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Creates a zero-filled page.
    pub fn new(page_size: usize) -> Self {
        Self {
            data: vec![0u8; page_size].into_boxed_slice(),
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    /// Initializes an empty page of the given type.
    pub fn init(&mut self, pgno: PageId, flags: u32) {
        self.data.fill(0);
        self.set_pgno(pgno);
        self.set_flags(flags);
        if flags & PAGE_OVERFLOW == 0 {
            self.set_lower(PAGE_HEADER_SIZE as u16);
            self.set_upper(self.data.len() as u16);
        }
    }

    /// Drops every node while keeping the page number and type.
    pub fn clear(&mut self) {
        let pgno = self.pgno();
        let flags = self.flags();
        self.init(pgno, flags);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    fn read_u16(&self, offset: usize) -> u16 {
        let bytes: [u8; 2] = self.data[offset..offset + 2].try_into().unwrap();
        u16::from_le_bytes(bytes)
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let bytes: [u8; 4] = self.data[offset..offset + 4].try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn pgno(&self) -> PageId {
        PageId::new(self.read_u32(PGNO_OFFSET))
    }

    pub fn set_pgno(&mut self, pgno: PageId) {
        self.write_u32(PGNO_OFFSET, pgno.as_u32());
    }

    pub fn flags(&self) -> u32 {
        self.read_u32(FLAGS_OFFSET)
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.write_u32(FLAGS_OFFSET, flags);
    }

    pub fn is_branch(&self) -> bool {
        self.flags() & PAGE_BRANCH != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.flags() & PAGE_LEAF != 0
    }

    pub fn is_overflow(&self) -> bool {
        self.flags() & PAGE_OVERFLOW != 0
    }

    pub fn is_meta(&self) -> bool {
        self.flags() & PAGE_META != 0
    }

    pub fn is_header(&self) -> bool {
        self.flags() & PAGE_HEADER != 0
    }

    pub fn lower(&self) -> u16 {
        self.read_u16(LOWER_OFFSET)
    }

    fn set_lower(&mut self, lower: u16) {
        self.write_u16(LOWER_OFFSET, lower);
    }

    pub fn upper(&self) -> u16 {
        self.read_u16(UPPER_OFFSET)
    }

    fn set_upper(&mut self, upper: u16) {
        self.write_u16(UPPER_OFFSET, upper);
    }

    /// Next page of an overflow chain, or `None` at the end of the chain.
    pub fn next_pgno(&self) -> Option<PageId> {
        match self.read_u32(NEXT_PGNO_OFFSET) {
            0 => None,
            next => Some(PageId::new(next)),
        }
    }

    pub fn set_next_pgno(&mut self, next: Option<PageId>) {
        self.write_u32(NEXT_PGNO_OFFSET, next.map(|p| p.as_u32()).unwrap_or(0));
    }

    /// Payload area of an overflow page.
    pub fn overflow_data(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    pub fn overflow_data_mut(&mut self) -> &mut [u8] {
        &mut self.data[PAGE_HEADER_SIZE..]
    }

    pub fn num_keys(&self) -> usize {
        (self.lower() as usize).saturating_sub(PAGE_HEADER_SIZE) / PTR_SIZE
    }

    /// Free bytes between the offset table and the node records.
    pub fn size_left(&self) -> usize {
        (self.upper() as usize).saturating_sub(self.lower() as usize)
    }

    /// Bytes available to nodes on an empty page.
    pub fn capacity(&self) -> usize {
        self.data.len() - PAGE_HEADER_SIZE
    }

    /// Used space in per-mille of the page capacity.
    pub fn fill(&self) -> u32 {
        let used = self.capacity() - self.size_left();
        (1000 * used / self.capacity()) as u32
    }

    fn ptr(&self, index: usize) -> usize {
        self.read_u16(PAGE_HEADER_SIZE + index * PTR_SIZE) as usize
    }

    fn set_ptr(&mut self, index: usize, offset: usize) {
        self.write_u16(PAGE_HEADER_SIZE + index * PTR_SIZE, offset as u16);
    }

    fn node_offset(&self, index: usize) -> usize {
        debug_assert!(index < self.num_keys(), "node index out of range");
        self.ptr(index)
    }

    /// Child page number of a branch node.
    pub fn node_pgno(&self, index: usize) -> PageId {
        PageId::new(self.read_u32(self.node_offset(index) + NODE_FIELD_OFFSET))
    }

    pub fn set_node_pgno(&mut self, index: usize, pgno: PageId) {
        let offset = self.node_offset(index);
        self.write_u32(offset + NODE_FIELD_OFFSET, pgno.as_u32());
    }

    /// Total value size of a leaf node (inline or in overflow pages).
    pub fn node_data_size(&self, index: usize) -> usize {
        self.read_u32(self.node_offset(index) + NODE_FIELD_OFFSET) as usize
    }

    pub fn node_key_size(&self, index: usize) -> usize {
        self.read_u16(self.node_offset(index) + NODE_KSIZE_OFFSET) as usize
    }

    pub fn node_flags(&self, index: usize) -> u8 {
        self.data[self.node_offset(index) + NODE_FLAGS_OFFSET]
    }

    pub fn node_is_big(&self, index: usize) -> bool {
        self.node_flags(index) & NODE_BIGDATA != 0
    }

    /// Page-local key of a node.
    pub fn node_key(&self, index: usize) -> &[u8] {
        let start = self.node_offset(index) + NODE_HEADER_SIZE;
        &self.data[start..start + self.node_key_size(index)]
    }

    /// Inline value of a leaf node.
    pub fn node_data(&self, index: usize) -> &[u8] {
        let start = self.node_offset(index) + NODE_HEADER_SIZE + self.node_key_size(index);
        let len = if self.node_is_big(index) {
            4
        } else {
            self.node_data_size(index)
        };
        &self.data[start..start + len]
    }

    /// First overflow page of a big-data leaf node.
    pub fn node_overflow_pgno(&self, index: usize) -> PageId {
        let bytes: [u8; 4] = self.node_data(index)[..4].try_into().unwrap();
        PageId::new(u32::from_le_bytes(bytes))
    }

    pub fn set_node_overflow_pgno(&mut self, index: usize, pgno: PageId) {
        debug_assert!(self.node_is_big(index));
        let start = self.node_offset(index) + NODE_HEADER_SIZE + self.node_key_size(index);
        self.write_u32(start, pgno.as_u32());
    }

    /// Bytes the node occupies, excluding its offset table entry.
    pub fn node_size_at(&self, index: usize) -> usize {
        let payload = if self.is_branch() {
            0
        } else if self.node_is_big(index) {
            4
        } else {
            self.node_data_size(index)
        };
        NODE_HEADER_SIZE + self.node_key_size(index) + payload
    }

    pub fn node_body(&self, index: usize) -> NodeBody {
        if self.is_branch() {
            NodeBody::Child(self.node_pgno(index))
        } else if self.node_is_big(index) {
            NodeBody::Overflow {
                pgno: self.node_overflow_pgno(index),
                size: self.node_data_size(index) as u32,
            }
        } else {
            NodeBody::Inline(self.node_data(index).to_vec())
        }
    }

    /// Checks a page read from the store: a single known type, and for
    /// branch and leaf pages free-space bounds and node records that lie
    /// inside the page. Node accessors assume a page that passed this.
    pub fn validate(&self) -> Result<()> {
        let flags = self.flags();
        let kind = flags & (PAGE_BRANCH | PAGE_LEAF | PAGE_OVERFLOW | PAGE_META | PAGE_HEADER);
        if flags != kind || kind.count_ones() != 1 {
            return Err(CowError::corrupt(format!(
                "page {} has flags {:#x}",
                self.pgno(),
                flags
            )));
        }
        if !self.is_branch() && !self.is_leaf() {
            return Ok(());
        }

        let size = self.data.len();
        let (lower, upper) = (self.lower() as usize, self.upper() as usize);
        if lower < PAGE_HEADER_SIZE
            || (lower - PAGE_HEADER_SIZE) % PTR_SIZE != 0
            || lower > upper
            || upper > size
        {
            return Err(CowError::corrupt(format!(
                "page {} has free space bounds {}..{}",
                self.pgno(),
                lower,
                upper
            )));
        }
        if self.is_branch() && self.num_keys() == 0 {
            return Err(CowError::corrupt(format!("branch page {} is empty", self.pgno())));
        }

        for i in 0..self.num_keys() {
            let offset = self.ptr(i);
            if offset < upper || offset + NODE_HEADER_SIZE > size {
                return Err(CowError::corrupt(format!(
                    "node {} of page {} starts at {}",
                    i,
                    self.pgno(),
                    offset
                )));
            }
            let node_flags = self.data[offset + NODE_FLAGS_OFFSET];
            if node_flags & !NODE_BIGDATA != 0 || (self.is_branch() && node_flags != 0) {
                return Err(CowError::corrupt(format!(
                    "node {} of page {} has flags {:#x}",
                    i,
                    self.pgno(),
                    node_flags
                )));
            }
            if offset + self.node_size_at(i) > size {
                return Err(CowError::corrupt(format!(
                    "node {} of page {} runs past the end of the page",
                    i,
                    self.pgno()
                )));
            }
        }
        Ok(())
    }

    /// Inserts a node at `index`, shifting later offset table entries.
    /// Fails without modifying the page if there is not enough room.
    pub fn insert_node(&mut self, index: usize, key: &[u8], body: &NodeBody) -> Result<()> {
        let num_keys = self.num_keys();
        if index > num_keys {
            return Err(CowError::internal(format!(
                "node index {} beyond {} keys",
                index, num_keys
            )));
        }
        let size = node_size(key.len(), body);
        if size + PTR_SIZE > self.size_left() {
            return Err(CowError::no_room(size + PTR_SIZE, self.size_left()));
        }

        for i in (index..num_keys).rev() {
            let ptr = self.ptr(i);
            self.set_ptr(i + 1, ptr);
        }

        let offset = self.upper() as usize - size;
        self.set_ptr(index, offset);
        self.set_upper(offset as u16);
        self.set_lower(self.lower() + PTR_SIZE as u16);

        let (field, flags) = match body {
            NodeBody::Child(pgno) => (pgno.as_u32(), 0),
            NodeBody::Inline(data) => (data.len() as u32, 0),
            NodeBody::Overflow { size, .. } => (*size, NODE_BIGDATA),
        };
        self.write_u32(offset + NODE_FIELD_OFFSET, field);
        self.write_u16(offset + NODE_KSIZE_OFFSET, key.len() as u16);
        self.data[offset + NODE_FLAGS_OFFSET] = flags;

        let key_start = offset + NODE_HEADER_SIZE;
        self.data[key_start..key_start + key.len()].copy_from_slice(key);
        let data_start = key_start + key.len();
        match body {
            NodeBody::Child(_) => {}
            NodeBody::Inline(data) => {
                self.data[data_start..data_start + data.len()].copy_from_slice(data);
            }
            NodeBody::Overflow { pgno, .. } => {
                self.write_u32(data_start, pgno.as_u32());
            }
        }
        Ok(())
    }

    /// Removes the node at `index`, compacting both the offset table and
    /// the node records.
    pub fn remove_node(&mut self, index: usize) {
        let num_keys = self.num_keys();
        debug_assert!(index < num_keys);

        let removed = self.ptr(index);
        let size = self.node_size_at(index);

        let mut j = 0;
        for i in 0..num_keys {
            if i == index {
                continue;
            }
            let ptr = self.ptr(i);
            let moved = if ptr < removed { ptr + size } else { ptr };
            self.set_ptr(j, moved);
            j += 1;
        }

        let upper = self.upper() as usize;
        self.data.copy_within(upper..removed, upper + size);
        self.set_upper((upper + size) as u16);
        self.set_lower(self.lower() - PTR_SIZE as u16);
    }

    /// Replaces the key of the node at `index`, moving the records below
    /// it when the key changes length.
    pub fn update_key(&mut self, index: usize, key: &[u8]) -> Result<()> {
        let offset = self.node_offset(index);
        let old_len = self.node_key_size(index);
        let delta = key.len() as isize - old_len as isize;

        if delta > 0 && delta as usize > self.size_left() {
            return Err(CowError::no_room(delta as usize, self.size_left()));
        }

        let mut offset = offset;
        if delta != 0 {
            let num_keys = self.num_keys();
            for i in 0..num_keys {
                let ptr = self.ptr(i);
                if ptr <= offset {
                    self.set_ptr(i, (ptr as isize - delta) as usize);
                }
            }
            let upper = self.upper() as usize;
            let end = offset + NODE_HEADER_SIZE;
            let dest = (upper as isize - delta) as usize;
            self.data.copy_within(upper..end, dest);
            self.set_upper(dest as u16);
            offset = (offset as isize - delta) as usize;
            self.write_u16(offset + NODE_KSIZE_OFFSET, key.len() as u16);
        }

        let key_start = offset + NODE_HEADER_SIZE;
        self.data[key_start..key_start + key.len()].copy_from_slice(key);
        Ok(())
    }
}

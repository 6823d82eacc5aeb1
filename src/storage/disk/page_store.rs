use std::path::Path;

use crate::common::{CowError, PageId, Result};
use crate::storage::page::Page;

/// A backing medium holding the page image: a plain file, or a
/// byte-addressable region such as a memory pool.
///
/// Offsets are in bytes. Page-level helpers are provided on top of the
/// byte-level primitives.
pub trait PageStore: Send {
    /// Reads up to `buf.len()` bytes at `offset`, returning the number of
    /// bytes read. A short count means the end of the image was reached.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes all of `data` at `offset`, growing the image if needed.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current length of the image in bytes.
    fn len(&self) -> Result<u64>;

    /// Truncates or extends the image.
    fn set_len(&self, len: u64) -> Result<()>;

    /// Makes previous writes durable.
    fn sync(&self) -> Result<()>;

    /// Takes the exclusive writer lock without blocking. Fails with
    /// `CowError::Busy` if another holder has it.
    fn try_lock(&self) -> Result<()>;

    /// Releases the writer lock.
    fn unlock(&self) -> Result<()>;

    /// Path of the backing file, if there is one.
    fn path(&self) -> Option<&Path>;

    /// Number of read operations performed.
    fn num_reads(&self) -> u32;

    /// Number of write operations performed.
    fn num_writes(&self) -> u32;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads one full page. A short read is an I/O error.
    fn read_page(&self, pgno: PageId, page_size: usize) -> Result<Page> {
        let mut data = vec![0u8; page_size];
        let n = self.read_at(pgno.offset(page_size), &mut data)?;
        if n != page_size {
            return Err(CowError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short read of page {}: {} of {} bytes", pgno, n, page_size),
            )));
        }
        Ok(Page::from_bytes(data))
    }

    /// Writes contiguous pages starting at `start` in one operation.
    /// `data` must hold a whole number of pages.
    fn write_pages(&self, start: PageId, page_size: usize, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len() % page_size, 0, "partial page write");
        self.write_at(start.offset(page_size), data)
    }
}

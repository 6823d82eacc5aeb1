use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{CowError, Result};

use super::page_store::PageStore;

/// A page image held in memory. Useful for tests and for trees that do
/// not need to outlive the process.
#[derive(Default)]
pub struct MemStore {
    image: Mutex<Vec<u8>>,
    locked: AtomicBool,
    num_reads: AtomicU32,
    num_writes: AtomicU32,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.image.lock().clone()
    }

    /// Creates a store from a previously captured image.
    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            image: Mutex::new(image),
            ..Self::default()
        }
    }
}

impl PageStore for MemStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let image = self.image.lock();
        let start = (offset as usize).min(image.len());
        let n = buf.len().min(image.len() - start);
        buf[..n].copy_from_slice(&image[start..start + n]);
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(n)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut image = self.image.lock();
        let start = offset as usize;
        if image.len() < start + data.len() {
            image.resize(start + data.len(), 0);
        }
        image[start..start + data.len()].copy_from_slice(data);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.image.lock().len() as u64)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.image.lock().resize(len as usize, 0);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn try_lock(&self) -> Result<()> {
        if self.locked.swap(true, Ordering::AcqRel) {
            return Err(CowError::Busy);
        }
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        self.locked.store(false, Ordering::Release);
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }
}

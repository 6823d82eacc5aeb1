use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::common::{CowError, Result};

use super::page_store::PageStore;

/// DiskManager stores the page image in a single file. Reads and writes
/// are positioned; batches of contiguous pages are written with one call.
/// The writer lock is an advisory exclusive lock on the file itself.
pub struct DiskManager {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file, unknown when opened from a handle
    db_path: Option<PathBuf>,
    /// Number of disk reads performed (counts each I/O operation, not pages)
    num_reads: AtomicU32,
    /// Number of disk writes performed (counts each I/O operation, not pages)
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at the given path, creating it unless
    /// `read_only` is set.
    pub fn open<P: AsRef<Path>>(db_path: P, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .truncate(false)
            .open(db_path.as_ref())?;

        debug!(path = %db_path.as_ref().display(), read_only, "opened database file");
        Ok(Self::with_path(file, Some(db_path.as_ref().to_path_buf())))
    }

    /// Wraps an already open file. Operations that need the path, such as
    /// compaction, are unavailable.
    pub fn from_file(file: File) -> Self {
        Self::with_path(file, None)
    }

    /// Creates a fresh file next to `path`, named `<path>.compact.<suffix>`.
    pub fn create_beside<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base = path.as_ref().as_os_str().to_string_lossy().to_string();
        let pid = process::id();
        for attempt in 0..100u32 {
            let candidate = PathBuf::from(format!("{}.compact.{:06}", base, pid.wrapping_add(attempt)));
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(file) => return Ok(Self::with_path(file, Some(candidate))),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CowError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free compaction file name beside {}", base),
        )))
    }

    fn with_path(file: File, db_path: Option<PathBuf>) -> Self {
        Self {
            db_file: Mutex::new(file),
            db_path,
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        }
    }
}

impl PageStore for DiskManager {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(total)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.db_file.lock().metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.db_file.lock().set_len(len)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.db_file.lock().sync_all()?;
        Ok(())
    }

    fn try_lock(&self) -> Result<()> {
        let file = self.db_file.lock();
        match FileExt::try_lock_exclusive(&*file) {
            Ok(()) => {
                debug!(path = ?self.db_path, "acquired writer lock");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(CowError::Busy),
            // EWOULDBLOCK on Linux, EAGAIN on macOS
            Err(e) if e.raw_os_error() == Some(11) || e.raw_os_error() == Some(35) => {
                Err(CowError::Busy)
            }
            Err(e) => {
                error!(path = ?self.db_path, error = %e, "failed to take writer lock");
                Err(e.into())
            }
        }
    }

    fn unlock(&self) -> Result<()> {
        let file = self.db_file.lock();
        FileExt::unlock(&*file)?;
        debug!(path = ?self.db_path, "released writer lock");
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }
}

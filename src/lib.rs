//! cowbt - an embedded single-file copy-on-write B-tree
//!
//! The whole database is one file of fixed-size pages. Pages are never
//! overwritten: a write transaction copies every page it changes to the
//! end of the file and finishes by appending a meta page that names the
//! new root. Readers keep using the root that was current when they
//! started, and a crash before the meta page is written leaves the
//! previous commit in place.
//!
//! # Architecture
//!
//! The crate is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Handles I/O and page layout
//!   - `PageStore`: Byte-level access to a backing medium
//!   - `DiskManager`: File-backed store with an advisory writer lock
//!   - `MemStore`: In-memory store
//!   - `Page`: Node records addressed through an offset table
//!   - `FileHeader`/`Meta`: Header page and commit records
//!
//! - **Page Cache** (`buffer`): In-memory pages
//!   - `PageCache`: Arena of pages indexed by page number
//!   - `LruKReplacer`: LRU-K eviction of clean, unreferenced pages
//!   - `MPage`: A page with its parent link, prefix and pin count
//!
//! - **Index** (`index`): The B-tree algorithms
//!   - Search, insert and split with prefix compression
//!   - Delete with rebalancing by node moves and merges
//!   - `Cursor` and `TreeIter` for ordered scans
//!
//! - **Tree** (`tree`): The handle tying it together
//!   - `CowTree`: Open, transactions, commit and recovery
//!   - Compaction and revert
//!
//! # Example
//!
//! ```rust,no_run
//! use cowbt::{Config, CowTree, InsertFlags};
//!
//! let mut tree = CowTree::open("test.db", Config::new()).unwrap();
//!
//! // Single operations commit on their own
//! tree.insert(None, b"hello", b"world", InsertFlags::NONE).unwrap();
//! assert_eq!(&tree.at(None, b"hello").unwrap()[..], b"world");
//!
//! // Group changes in a transaction
//! let mut txn = tree.txn_begin(false).unwrap();
//! tree.insert(Some(&mut txn), b"a", b"1", InsertFlags::NONE).unwrap();
//! tree.insert(Some(&mut txn), b"b", b"2", InsertFlags::NONE).unwrap();
//! tree.txn_commit(txn).unwrap();
//!
//! for item in tree.iter(None).unwrap() {
//!     let (key, value) = item.unwrap();
//!     println!("{:?} = {:?}", key, value);
//! }
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;
pub mod tree;

// Re-export commonly used types at the crate root
pub use common::{Config, CowError, OpenFlags, PageId, Result};
pub use index::{
    BytewiseComparator, Cursor, CursorOp, InsertFlags, IntegerComparator, KeyComparator,
    ReverseBytewiseComparator, TreeIter,
};
pub use tree::{CowTree, TreeStat, Txn};

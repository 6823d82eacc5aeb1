pub mod btree_index;
pub mod btree_iterator;
pub mod btree_rebalance;
pub mod key_comparator;
pub mod prefix;

pub use btree_index::InsertFlags;
pub use btree_iterator::{Cursor, CursorOp, TreeIter};
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator, ReverseBytewiseComparator};
pub use prefix::KeyOrder;

use tempfile::TempDir;

use cowbt::{Config, CowError, CowTree, CursorOp, InsertFlags};

fn create_tree() -> (CowTree, TempDir) {
    let dir = TempDir::new().unwrap();
    let tree = CowTree::open(dir.path().join("txn.db"), Config::new()).unwrap();
    (tree, dir)
}

#[test]
fn test_commit_makes_changes_visible() {
    let (mut tree, _dir) = create_tree();

    let mut txn = tree.txn_begin(false).unwrap();
    assert!(!txn.is_read_only());
    for i in 0..100u32 {
        let key = format!("k{:03}", i);
        tree.insert(Some(&mut txn), key.as_bytes(), b"v", InsertFlags::NONE)
            .unwrap();
    }
    tree.remove(Some(&mut txn), b"k050").unwrap();

    // not committed yet
    assert!(matches!(tree.at(None, b"k001"), Err(CowError::NotFound)));
    tree.txn_commit(txn).unwrap();

    let stat = tree.stat().unwrap();
    assert_eq!(stat.entries, 99);
    assert_eq!(stat.revisions, 1);
    assert!(matches!(tree.at(None, b"k050"), Err(CowError::NotFound)));
    assert_eq!(&tree.at(None, b"k099").unwrap()[..], b"v");
}

#[test]
fn test_abort_discards_changes() {
    let (mut tree, _dir) = create_tree();
    tree.insert(None, b"keep", b"1", InsertFlags::NONE).unwrap();
    let before = tree.stat().unwrap();

    let mut txn = tree.txn_begin(false).unwrap();
    tree.insert(Some(&mut txn), b"drop", b"2", InsertFlags::NONE).unwrap();
    tree.insert(Some(&mut txn), b"keep", b"changed", InsertFlags::NONE).unwrap();
    tree.remove(Some(&mut txn), b"keep").unwrap();
    tree.txn_abort(txn).unwrap();

    assert_eq!(&tree.at(None, b"keep").unwrap()[..], b"1");
    assert!(matches!(tree.at(None, b"drop"), Err(CowError::NotFound)));

    let after = tree.stat().unwrap();
    assert_eq!(after.entries, before.entries);
    assert_eq!(after.revisions, before.revisions);
    assert_eq!(after.leaf_pages, before.leaf_pages);

    // the writer lock was released
    tree.insert(None, b"next", b"3", InsertFlags::NONE).unwrap();
}

#[test]
fn test_empty_commit_writes_nothing() {
    let (mut tree, dir) = create_tree();
    tree.insert(None, b"a", b"1", InsertFlags::NONE).unwrap();
    let len = std::fs::metadata(dir.path().join("txn.db")).unwrap().len();

    let txn = tree.txn_begin(false).unwrap();
    tree.txn_commit(txn).unwrap();

    assert_eq!(std::fs::metadata(dir.path().join("txn.db")).unwrap().len(), len);
    assert_eq!(tree.stat().unwrap().revisions, 1);
}

#[test]
fn test_one_writer_per_tree() {
    let (mut tree, _dir) = create_tree();

    let txn = tree.txn_begin(false).unwrap();
    assert!(matches!(tree.txn_begin(false), Err(CowError::Busy)));
    // auto-transactions need the writer too
    assert!(matches!(
        tree.insert(None, b"k", b"v", InsertFlags::NONE),
        Err(CowError::Busy)
    ));
    // reads do not
    let ro = tree.txn_begin(true).unwrap();
    tree.txn_abort(ro).unwrap();

    tree.txn_abort(txn).unwrap();
    let txn = tree.txn_begin(false).unwrap();
    tree.txn_commit(txn).unwrap();
}

#[test]
fn test_writer_lock_is_shared_across_handles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lock.db");
    let mut a = CowTree::open(&path, Config::new()).unwrap();
    let mut b = CowTree::open(&path, Config::new()).unwrap();

    let txn = a.txn_begin(false).unwrap();
    assert!(matches!(b.txn_begin(false), Err(CowError::Busy)));
    assert!(matches!(
        b.insert(None, b"k", b"v", InsertFlags::NONE),
        Err(CowError::Busy)
    ));
    a.txn_commit(txn).unwrap();

    b.insert(None, b"k", b"v", InsertFlags::NONE).unwrap();
    assert_eq!(&a.at(None, b"k").unwrap()[..], b"v");
}

#[test]
fn test_abandoned_writer_is_discarded() {
    let (mut tree, _dir) = create_tree();

    let mut txn = tree.txn_begin(false).unwrap();
    tree.insert(Some(&mut txn), b"lost", b"1", InsertFlags::NONE).unwrap();
    drop(txn);

    let mut txn = tree.txn_begin(false).unwrap();
    assert!(matches!(tree.at(Some(&txn), b"lost"), Err(CowError::NotFound)));
    tree.insert(Some(&mut txn), b"kept", b"2", InsertFlags::NONE).unwrap();
    tree.txn_commit(txn).unwrap();

    assert!(matches!(tree.at(None, b"lost"), Err(CowError::NotFound)));
    assert_eq!(&tree.at(None, b"kept").unwrap()[..], b"2");
}

#[test]
fn test_closing_tree_aborts_writer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("close.db");

    {
        let mut tree = CowTree::open(&path, Config::new()).unwrap();
        tree.insert(None, b"committed", b"1", InsertFlags::NONE).unwrap();
        let mut txn = tree.txn_begin(false).unwrap();
        tree.insert(Some(&mut txn), b"pending", b"2", InsertFlags::NONE).unwrap();
        std::mem::forget(txn);
    }

    let mut tree = CowTree::open(&path, Config::new()).unwrap();
    assert!(tree.at(None, b"committed").is_ok());
    assert!(matches!(tree.at(None, b"pending"), Err(CowError::NotFound)));
    // the lock went away with the handle
    tree.insert(None, b"more", b"3", InsertFlags::NONE).unwrap();
}

#[test]
fn test_read_only_snapshot() {
    let (mut tree, _dir) = create_tree();
    tree.insert(None, b"a", b"1", InsertFlags::NONE).unwrap();

    let mut ro = tree.txn_begin(true).unwrap();
    assert!(ro.is_read_only());

    tree.insert(None, b"a", b"2", InsertFlags::NONE).unwrap();
    tree.insert(None, b"b", b"3", InsertFlags::NONE).unwrap();

    assert_eq!(&tree.at(Some(&ro), b"a").unwrap()[..], b"1");
    assert!(matches!(tree.at(Some(&ro), b"b"), Err(CowError::NotFound)));
    assert_eq!(&tree.at(None, b"a").unwrap()[..], b"2");

    let mut cursor = tree.cursor_open(Some(&ro)).unwrap();
    let (key, value) = tree.cursor_get(&mut cursor, CursorOp::First).unwrap();
    assert_eq!((&key[..], &value[..]), (&b"a"[..], &b"1"[..]));
    assert!(matches!(tree.cursor_get(&mut cursor, CursorOp::Next), Err(CowError::NotFound)));
    tree.cursor_close(cursor);

    // mutations through a read-only transaction are refused
    let result = tree.insert(Some(&mut ro), b"c", b"4", InsertFlags::NONE);
    assert!(matches!(result, Err(CowError::InvalidArgument(_))));
    let result = tree.remove(Some(&mut ro), b"a");
    assert!(matches!(result, Err(CowError::InvalidArgument(_))));

    assert!(matches!(tree.txn_commit(ro), Err(CowError::InvalidArgument(_))));
}

#[test]
fn test_failed_operations_keep_txn_usable() {
    let (mut tree, _dir) = create_tree();
    tree.insert(None, b"a", b"1", InsertFlags::NONE).unwrap();

    let mut txn = tree.txn_begin(false).unwrap();
    assert!(matches!(tree.remove(Some(&mut txn), b"zzz"), Err(CowError::NotFound)));
    assert!(matches!(
        tree.insert(Some(&mut txn), b"a", b"x", InsertFlags::NO_OVERWRITE),
        Err(CowError::AlreadyExists)
    ));
    assert!(matches!(
        tree.insert(Some(&mut txn), b"", b"x", InsertFlags::NONE),
        Err(CowError::InvalidArgument(_))
    ));
    tree.insert(Some(&mut txn), b"b", b"2", InsertFlags::NONE).unwrap();
    tree.txn_commit(txn).unwrap();

    assert_eq!(&tree.at(None, b"a").unwrap()[..], b"1");
    assert_eq!(&tree.at(None, b"b").unwrap()[..], b"2");
}

#[test]
fn test_read_only_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ro.db");

    assert!(CowTree::open(&path, Config::new().read_only(true)).is_err());

    {
        let mut tree = CowTree::open(&path, Config::new()).unwrap();
        tree.insert(None, b"k", b"v", InsertFlags::NONE).unwrap();
    }

    let mut tree = CowTree::open(&path, Config::new().read_only(true)).unwrap();
    assert!(tree.flags().read_only);
    assert_eq!(&tree.at(None, b"k").unwrap()[..], b"v");
    assert!(matches!(tree.txn_begin(false), Err(CowError::InvalidArgument(_))));
    assert!(matches!(
        tree.insert(None, b"k2", b"v", InsertFlags::NONE),
        Err(CowError::InvalidArgument(_))
    ));
    assert!(matches!(tree.compact(), Err(CowError::InvalidArgument(_))));
}

#[test]
fn test_txn_ids_increase() {
    let (mut tree, _dir) = create_tree();
    let first = tree.txn_begin(true).unwrap();
    let second = tree.txn_begin(false).unwrap();
    assert!(second.id() > first.id());
    tree.txn_abort(second).unwrap();
    tree.txn_abort(first).unwrap();
}

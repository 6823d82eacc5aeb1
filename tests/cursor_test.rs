use tempfile::TempDir;

use cowbt::{Config, CowError, CowTree, CursorOp, InsertFlags};

fn create_tree(page_size: usize) -> (CowTree, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = Config::new().page_size(page_size).no_sync(true);
    let tree = CowTree::open(dir.path().join("cursor.db"), config).unwrap();
    (tree, dir)
}

/// Fills a tree with keys "k0000", "k0002", ... up to but excluding `2 * n`.
fn fill_even(tree: &mut CowTree, n: u32) {
    let mut txn = tree.txn_begin(false).unwrap();
    for i in 0..n {
        let key = format!("k{:04}", i * 2);
        tree.insert(Some(&mut txn), key.as_bytes(), key.as_bytes(), InsertFlags::NONE)
            .unwrap();
    }
    tree.txn_commit(txn).unwrap();
}

#[test]
fn test_cursor_first_next() {
    let (mut tree, _dir) = create_tree(512);
    fill_even(&mut tree, 300);

    let mut cursor = tree.cursor_open(None).unwrap();
    let (key, value) = tree.cursor_get(&mut cursor, CursorOp::First).unwrap();
    assert_eq!(&key[..], b"k0000");
    assert_eq!(key, value);

    let mut count = 1;
    let mut last = key;
    loop {
        match tree.cursor_get(&mut cursor, CursorOp::Next) {
            Ok((key, _)) => {
                assert!(key > last, "cursor went backwards");
                last = key;
                count += 1;
            }
            Err(CowError::NotFound) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(count, 300);
    assert_eq!(&last[..], b"k0598");
    assert!(cursor.is_eof());

    // stays at the end
    assert!(matches!(tree.cursor_get(&mut cursor, CursorOp::Next), Err(CowError::NotFound)));
    tree.cursor_close(cursor);
}

#[test]
fn test_cursor_next_on_fresh_cursor_starts_at_first() {
    let (mut tree, _dir) = create_tree(4096);
    fill_even(&mut tree, 10);

    let mut cursor = tree.cursor_open(None).unwrap();
    let (key, _) = tree.cursor_get(&mut cursor, CursorOp::Next).unwrap();
    assert_eq!(&key[..], b"k0000");
    let (key, _) = tree.cursor_get(&mut cursor, CursorOp::Next).unwrap();
    assert_eq!(&key[..], b"k0002");
    tree.cursor_close(cursor);
}

#[test]
fn test_cursor_set() {
    let (mut tree, _dir) = create_tree(512);
    fill_even(&mut tree, 300);

    let mut cursor = tree.cursor_open(None).unwrap();

    // exact hit
    let (key, _) = tree.cursor_get(&mut cursor, CursorOp::Set(b"k0100")).unwrap();
    assert_eq!(&key[..], b"k0100");

    // between two keys: lands on the next one
    let (key, _) = tree.cursor_get(&mut cursor, CursorOp::Set(b"k0101")).unwrap();
    assert_eq!(&key[..], b"k0102");
    let (key, _) = tree.cursor_get(&mut cursor, CursorOp::Next).unwrap();
    assert_eq!(&key[..], b"k0104");

    // before every key
    let (key, _) = tree.cursor_get(&mut cursor, CursorOp::Set(b"a")).unwrap();
    assert_eq!(&key[..], b"k0000");

    // after every key
    let result = tree.cursor_get(&mut cursor, CursorOp::Set(b"z"));
    assert!(matches!(result, Err(CowError::NotFound)));
    tree.cursor_close(cursor);
}

#[test]
fn test_cursor_set_crosses_leaf_boundaries() {
    let (mut tree, _dir) = create_tree(512);
    fill_even(&mut tree, 300);

    // every odd key sits between two stored keys, some of them on
    // different leaves
    let mut cursor = tree.cursor_open(None).unwrap();
    for i in 0..299u32 {
        let probe = format!("k{:04}", i * 2 + 1);
        let (key, _) = tree.cursor_get(&mut cursor, CursorOp::Set(probe.as_bytes())).unwrap();
        assert_eq!(key, format!("k{:04}", i * 2 + 2).as_bytes(), "probe {}", probe);
    }
    tree.cursor_close(cursor);
}

#[test]
fn test_cursor_set_exact() {
    let (mut tree, _dir) = create_tree(4096);
    fill_even(&mut tree, 50);

    let mut cursor = tree.cursor_open(None).unwrap();
    let (key, value) = tree.cursor_get(&mut cursor, CursorOp::SetExact(b"k0040")).unwrap();
    assert_eq!(&key[..], b"k0040");
    assert_eq!(&value[..], b"k0040");

    let result = tree.cursor_get(&mut cursor, CursorOp::SetExact(b"k0041"));
    assert!(matches!(result, Err(CowError::NotFound)));
    tree.cursor_close(cursor);
}

#[test]
fn test_cursor_on_empty_tree() {
    let (mut tree, _dir) = create_tree(4096);

    let mut cursor = tree.cursor_open(None).unwrap();
    assert!(matches!(tree.cursor_get(&mut cursor, CursorOp::First), Err(CowError::NotFound)));
    assert!(matches!(tree.cursor_get(&mut cursor, CursorOp::Set(b"a")), Err(CowError::NotFound)));
    tree.cursor_close(cursor);
}

#[test]
fn test_cursor_in_write_txn_sees_uncommitted() {
    let (mut tree, _dir) = create_tree(4096);
    fill_even(&mut tree, 5);

    let mut txn = tree.txn_begin(false).unwrap();
    tree.insert(Some(&mut txn), b"k0001", b"new", InsertFlags::NONE).unwrap();

    let mut cursor = tree.cursor_open(Some(&txn)).unwrap();
    let (key, _) = tree.cursor_get(&mut cursor, CursorOp::First).unwrap();
    assert_eq!(&key[..], b"k0000");
    let (key, value) = tree.cursor_get(&mut cursor, CursorOp::Next).unwrap();
    assert_eq!(&key[..], b"k0001");
    assert_eq!(&value[..], b"new");
    tree.cursor_close(cursor);

    // the committed tree does not have it yet
    let mut cursor = tree.cursor_open(None).unwrap();
    let (key, _) = tree.cursor_get(&mut cursor, CursorOp::Set(b"k0001")).unwrap();
    assert_eq!(&key[..], b"k0002");
    tree.cursor_close(cursor);

    tree.txn_commit(txn).unwrap();
}

#[test]
fn test_cursor_survives_writes() {
    let (mut tree, _dir) = create_tree(512);
    fill_even(&mut tree, 200);

    let mut txn = tree.txn_begin(true).unwrap();
    let mut cursor = tree.cursor_open(Some(&txn)).unwrap();
    let (key, _) = tree.cursor_get(&mut cursor, CursorOp::Set(b"k0100")).unwrap();
    assert_eq!(&key[..], b"k0100");

    // rewrite the pages under the cursor
    for i in 0..200u32 {
        let key = format!("k{:04}", i * 2);
        tree.insert(None, key.as_bytes(), b"changed", InsertFlags::NONE).unwrap();
    }
    tree.remove(None, b"k0102").unwrap();

    // the snapshot still reads the old version
    let (key, value) = tree.cursor_get(&mut cursor, CursorOp::Next).unwrap();
    assert_eq!(&key[..], b"k0102");
    assert_eq!(&value[..], b"k0102");
    tree.cursor_close(cursor);
    tree.txn_abort(txn).unwrap();

    txn = tree.txn_begin(true).unwrap();
    assert!(matches!(tree.at(Some(&txn), b"k0102"), Err(CowError::NotFound)));
    assert_eq!(&tree.at(Some(&txn), b"k0104").unwrap()[..], b"changed");
    tree.txn_abort(txn).unwrap();
}

#[test]
fn test_iter_and_range_from() {
    let (mut tree, _dir) = create_tree(512);
    fill_even(&mut tree, 100);

    let all: Vec<_> = tree.iter(None).unwrap().map(|r| r.unwrap().0).collect();
    assert_eq!(all.len(), 100);
    assert_eq!(&all[0][..], b"k0000");
    assert_eq!(&all[99][..], b"k0198");

    let tail: Vec<_> = tree
        .range_from(None, b"k0151")
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(tail.len(), 24);
    assert_eq!(&tail[0][..], b"k0152");

    let none: Vec<_> = tree.range_from(None, b"z").unwrap().collect();
    assert!(none.is_empty());

    // stopping early releases the cursor
    let first_three: Vec<_> = tree.iter(None).unwrap().take(3).map(|r| r.unwrap().0).collect();
    assert_eq!(first_three.len(), 3);
    tree.insert(None, b"k0001", b"x", InsertFlags::NONE).unwrap();
    assert_eq!(&tree.at(None, b"k0001").unwrap()[..], b"x");
}

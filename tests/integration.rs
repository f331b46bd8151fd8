//! BITLEAF - Integration Tests
//! End-to-end tests across the public API:
//! build leaves → write snapshot → attach → copy-on-write → append.

use bitleaf::{
    Allocator, Array, ArrayIntNull, ArrayString, BitleafError, BpTreeLeaf, Config, LeafType,
    NodeFlags, SnapshotWriter, TreeInsert,
};

mod common {
    use bitleaf::{Allocator, Config};

    pub fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Allocator with a fixed null seed so runs are reproducible.
    pub fn allocator() -> Allocator {
        init_logging();
        Allocator::new(Config::new().with_null_seed(7)).unwrap()
    }
}

/// A has-refs top node over an integer leaf, a nullable leaf and a string
/// leaf.
fn build_group(alloc: &Allocator) -> Array {
    let mut ints = Array::new(alloc.clone());
    ints.create(NodeFlags::normal()).unwrap();
    for i in 0..100 {
        ints.add(if i % 10 == 0 { 1 << 40 } else { 7 }).unwrap();
    }

    let mut nullable = ArrayIntNull::new(alloc.clone());
    nullable.create().unwrap();
    for i in 0..20 {
        nullable.add(if i % 3 == 0 { None } else { Some(i) }).unwrap();
    }

    let mut strings = ArrayString::new(alloc.clone());
    strings.create().unwrap();
    strings.add(Some("short")).unwrap();
    strings.add(None).unwrap();
    strings.add(Some("a value long enough for a medium leaf")).unwrap();

    let mut top = Array::new(alloc.clone());
    top.create(NodeFlags::has_refs()).unwrap();
    top.add(ints.get_ref() as i64).unwrap();
    top.add(nullable.get_ref() as i64).unwrap();
    top.add(strings.get_ref() as i64).unwrap();
    top
}

#[test]
fn test_snapshot_round_trip_with_compression() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("group.bitleaf");

    let writer_alloc = common::allocator();
    let top = build_group(&writer_alloc);
    let mut writer = SnapshotWriter::new();
    let top_ref = top.write(&mut writer, true, false, true).unwrap();
    let written = writer.commit(&path, top_ref).unwrap();
    assert!(written > 0);

    let alloc = common::allocator();
    let top_ref = alloc.attach_file(&path).unwrap();
    let top = Array::from_ref(alloc.clone(), top_ref).unwrap();
    assert!(top.has_refs());
    assert_eq!(top.size(), 3);

    let ints = Array::from_ref(alloc.clone(), top.get_as_ref(0)).unwrap();
    assert!(ints.is_compressed());
    assert_eq!(ints.size(), 100);
    assert_eq!(ints.get(0), 1 << 40);
    assert_eq!(ints.get(1), 7);
    assert_eq!(ints.find_first(1 << 40, 1, usize::MAX), Some(10));

    let nullable = ArrayIntNull::from_ref(alloc.clone(), top.get_as_ref(1)).unwrap();
    assert_eq!(nullable.size(), 20);
    assert_eq!(nullable.get(0), None);
    assert_eq!(nullable.get(1), Some(1));

    let strings = ArrayString::from_ref(alloc.clone(), top.get_as_ref(2)).unwrap();
    assert_eq!(strings.leaf_type(), LeafType::Medium);
    assert_eq!(strings.get(0).as_deref(), Some("short"));
    assert_eq!(strings.get(1), None);
}

#[test]
fn test_copy_on_write_and_append() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("v1.bitleaf");
    let second = dir.path().join("v2.bitleaf");

    let writer_alloc = common::allocator();
    let top = build_group(&writer_alloc);
    let mut writer = SnapshotWriter::new();
    let top_ref = top.write(&mut writer, true, false, false).unwrap();
    writer.commit(&first, top_ref).unwrap();

    // Attach and modify one child; the others stay in the image.
    let alloc = common::allocator();
    let top_ref = alloc.attach_file(&first).unwrap();
    let mut top = Array::from_ref(alloc.clone(), top_ref).unwrap();
    let strings_ref = top.get_as_ref(2);

    let mut ints = Array::from_ref(alloc.clone(), top.get_as_ref(0)).unwrap();
    let old_ints_ref = ints.get_ref();
    assert!(alloc.is_read_only(old_ints_ref));
    ints.set(5, -3).unwrap();
    assert_ne!(ints.get_ref(), old_ints_ref);
    assert!(!alloc.is_read_only(ints.get_ref()));
    top.set_as_ref(0, ints.get_ref()).unwrap();
    assert!(!alloc.is_read_only(top.get_ref()));

    // The image itself is untouched.
    let pristine = Array::from_ref(alloc.clone(), old_ints_ref).unwrap();
    assert_eq!(pristine.get(5), 7);

    let mut writer = SnapshotWriter::append_to(&alloc);
    let new_top = top.write(&mut writer, true, true, false).unwrap();
    writer.commit(&second, new_top).unwrap();

    let reader = common::allocator();
    let top_ref = reader.attach_file(&second).unwrap();
    let top = Array::from_ref(reader.clone(), top_ref).unwrap();
    assert_eq!(top.get_as_ref(2), strings_ref);
    let ints = Array::from_ref(reader.clone(), top.get_as_ref(0)).unwrap();
    assert_eq!(ints.get(5), -3);
    assert_eq!(ints.get(10), 1 << 40);
    let strings = ArrayString::from_ref(reader.clone(), top.get_as_ref(2)).unwrap();
    assert_eq!(strings.size(), 3);
}

#[test]
fn test_corrupted_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.bitleaf");

    let alloc = common::allocator();
    let top = build_group(&alloc);
    let mut writer = SnapshotWriter::new();
    let top_ref = top.write(&mut writer, true, false, false).unwrap();
    let mut image = writer.finish(top_ref).unwrap().to_vec();
    image[40] ^= 0x55;
    std::fs::write(&path, &image).unwrap();

    let reader = common::allocator();
    let err = reader.attach_file(&path).unwrap_err();
    assert!(matches!(err, BitleafError::Corruption(_)));

    let missing = reader.attach_file(dir.path().join("missing")).unwrap_err();
    assert!(matches!(missing, BitleafError::Io(_)));
}

#[test]
fn test_string_leaf_upgrades_keep_values() {
    let alloc = common::allocator();
    let mut leaf = ArrayString::new(alloc.clone());
    leaf.create().unwrap();

    let mut expected = Vec::new();
    for len in [0usize, 3, 15, 16, 40, 63, 64, 300] {
        let value = "s".repeat(len);
        leaf.add(Some(&value)).unwrap();
        expected.push(Some(value));
        assert_eq!(leaf.to_vec(), expected);
        for (i, v) in expected.iter().enumerate() {
            assert_eq!(leaf.find_first(v.as_deref(), 0, usize::MAX), Some(i));
        }
    }
    assert_eq!(leaf.leaf_type(), LeafType::Big);
}

#[test]
fn test_leaf_splits_until_full_column() {
    common::init_logging();
    let alloc = Allocator::new(Config::new().with_max_bpnode_size(8)).unwrap();

    // Append-only inserts split off a one-element leaf every time.
    let mut leaves = vec![{
        let mut leaf = Array::new(alloc.clone());
        leaf.create(NodeFlags::normal()).unwrap();
        leaf
    }];
    for v in 0..30i64 {
        let last = leaves.last_mut().unwrap();
        let mut state = TreeInsert::default();
        let size = last.leaf_size();
        if let Some(new_ref) = last.bptree_leaf_insert(size, v, &mut state).unwrap() {
            assert_eq!(state.split_offset, 8);
            assert_eq!(state.split_size, 9);
            leaves.push(Array::from_ref(alloc.clone(), new_ref).unwrap());
        }
    }
    let sizes: Vec<usize> = leaves.iter().map(|l| l.leaf_size()).collect();
    assert_eq!(sizes, vec![8, 8, 8, 6]);
    let all: Vec<i64> = leaves.iter().flat_map(|l| l.to_vec()).collect();
    assert_eq!(all, (0..30).collect::<Vec<_>>());
}

#[test]
fn test_nullable_sentinel_collision_scenario() {
    let alloc = common::allocator();
    let mut leaf = ArrayIntNull::new(alloc.clone());
    leaf.create().unwrap();
    leaf.add(Some(100)).unwrap();
    leaf.add(None).unwrap();
    assert_eq!(leaf.width(), 8);
    let sentinel = leaf.null_value();

    leaf.add(Some(sentinel)).unwrap();
    assert!(leaf.width() > 8);
    assert_ne!(leaf.null_value(), sentinel);
    assert_eq!(leaf.to_vec(), vec![Some(100), None, Some(sentinel)]);

    leaf.add(Some(255)).unwrap();
    assert_eq!(leaf.get(3), Some(255));
    assert!(leaf.is_null(1));
}

#[test]
fn test_out_of_memory_is_reported() {
    let alloc = Allocator::new(Config::new().with_max_arena_size(4096)).unwrap();
    let mut leaf = Array::new(alloc);
    leaf.create(NodeFlags::normal()).unwrap();
    let err = (0..10_000)
        .map(|i| leaf.add(i64::MAX - i))
        .find_map(Result::err)
        .unwrap();
    assert!(matches!(err, BitleafError::OutOfMemory { limit: 4096, .. }));
}

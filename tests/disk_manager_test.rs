//! Integration tests for the disk manager

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use basalt::common::{BasaltError, PageId, PAGE_SIZE};
use basalt::storage::disk::{DiskManager, BITMAP_SIZE};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_fresh_file_has_no_pages() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    assert_eq!(dm.num_allocated_pages(), 0);
    assert_eq!(dm.num_extents(), 0);
    assert!(dm.is_page_free(PageId::new(0)).unwrap());
}

#[test]
fn test_allocate_free_allocate_reuses_lowest() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let n = 100u32;
    let mut ids: Vec<u32> = (0..n).map(|_| dm.allocate_page().unwrap().as_u32()).collect();
    assert_eq!(ids, (0..n).collect::<Vec<_>>());

    let mut rng = StdRng::seed_from_u64(7);
    ids.shuffle(&mut rng);
    let (freed, kept) = ids.split_at(40);
    for &id in freed {
        dm.deallocate_page(PageId::new(id)).unwrap();
        assert!(dm.is_page_free(PageId::new(id)).unwrap());
    }
    for &id in kept {
        assert!(!dm.is_page_free(PageId::new(id)).unwrap());
    }
    assert_eq!(dm.num_allocated_pages(), n - 40);

    // Reallocation hands the freed ids back in ascending order
    let mut expected: Vec<u32> = freed.to_vec();
    expected.sort_unstable();
    for id in expected {
        assert_eq!(dm.allocate_page().unwrap(), PageId::new(id));
    }
    assert_eq!(dm.num_allocated_pages(), n);
    assert_eq!(dm.extent_used_pages(0), Some(n));
}

#[test]
fn test_double_free_is_rejected() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let page_id = dm.allocate_page().unwrap();
    dm.deallocate_page(page_id).unwrap();
    assert!(matches!(
        dm.deallocate_page(page_id),
        Err(BasaltError::PageNotAllocated(id)) if id == page_id
    ));
}

#[test]
fn test_allocation_spills_into_second_extent() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    for i in 0..BITMAP_SIZE {
        assert_eq!(dm.allocate_page().unwrap(), PageId::new(i));
    }
    assert_eq!(dm.num_extents(), 1);

    let spilled = dm.allocate_page().unwrap();
    assert_eq!(spilled, PageId::new(BITMAP_SIZE));
    assert_eq!(dm.num_extents(), 2);
    assert_eq!(dm.extent_used_pages(0), Some(BITMAP_SIZE));
    assert_eq!(dm.extent_used_pages(1), Some(1));

    // A hole in the first extent is filled before the second grows
    dm.deallocate_page(PageId::new(17)).unwrap();
    assert_eq!(dm.allocate_page().unwrap(), PageId::new(17));

    let data = vec![0x5Au8; PAGE_SIZE];
    dm.write_page(spilled, &data).unwrap();
    let mut buf = vec![0u8; PAGE_SIZE];
    dm.read_page(spilled, &mut buf).unwrap();
    assert_eq!(buf, data);
}

#[test]
fn test_allocations_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("alloc.db");

    {
        let dm = DiskManager::new(&path).unwrap();
        for _ in 0..10 {
            dm.allocate_page().unwrap();
        }
        dm.deallocate_page(PageId::new(3)).unwrap();

        let mut data = vec![0u8; PAGE_SIZE];
        data[..5].copy_from_slice(b"basal");
        dm.write_page(PageId::new(9), &data).unwrap();
        dm.close().unwrap();
    }

    let dm = DiskManager::new(&path).unwrap();
    assert_eq!(dm.num_allocated_pages(), 9);
    assert!(dm.is_page_free(PageId::new(3)).unwrap());
    assert!(!dm.is_page_free(PageId::new(9)).unwrap());

    let mut buf = vec![0u8; PAGE_SIZE];
    dm.read_page(PageId::new(9), &mut buf).unwrap();
    assert_eq!(&buf[..5], b"basal");

    assert_eq!(dm.allocate_page().unwrap(), PageId::new(3));
}

#[test]
fn test_concurrent_allocation_hands_out_unique_ids() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dm = Arc::clone(&dm);
            thread::spawn(move || (0..50).map(|_| dm.allocate_page().unwrap()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "page {} handed out twice", id);
        }
    }
    assert_eq!(seen.len(), 200);
    assert_eq!(dm.num_allocated_pages(), 200);
}

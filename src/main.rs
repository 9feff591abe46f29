use basalt::common::{ReplacerPolicy, RowId, StorageConfig};
use basalt::index::KeyManager;
use basalt::storage::StorageEngine;
use basalt::PageId;

fn main() -> basalt::Result<()> {
    println!("Basalt - pages, a buffer pool and a B+ tree");
    println!("===========================================\n");

    let db_path = "demo.db";

    // A small pool makes the clock replacer do some work
    let config = StorageConfig::default()
        .with_pool_size(16)
        .with_replacer(ReplacerPolicy::Clock);
    let engine = StorageEngine::open(db_path, config)?;
    println!("Opened {} with a 16-frame clock pool", db_path);

    let km = KeyManager::integer(4);
    let mut tree = engine.open_index_with_max_sizes(1, km.clone(), 4, 4)?;

    for key in [15, 3, 42, 8, 23, 4, 16, 1, 30, 11] {
        let rid = RowId::new(PageId::new(100 + key as u32), key as u32);
        tree.insert(&km.encode_i32(key), rid)?;
    }
    println!("Inserted 10 keys, root is {}", tree.root_page_id());

    if let Some(rid) = tree.get_value(&km.encode_i32(23))? {
        println!("Key 23 -> {}", rid);
    }

    tree.remove(&km.encode_i32(8))?;
    println!("Removed key 8");

    println!("\nKeys from 10 upwards:");
    for item in tree.begin_at(&km.encode_i32(10))? {
        let (key, rid) = item?;
        println!("  {} -> {}", km.decode_i32(&key), rid);
    }

    tree.validate()?;
    println!("\nTree structure (Graphviz):");
    let mut dot = Vec::new();
    tree.write_dot(&mut dot)?;
    println!("{}", String::from_utf8_lossy(&dot));

    engine.flush()?;
    println!(
        "Disk: {} pages allocated, {} reads, {} writes",
        engine.disk_manager().num_allocated_pages(),
        engine.disk_manager().num_reads(),
        engine.disk_manager().num_writes()
    );

    drop(tree);
    drop(engine);
    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
    Ok(())
}

use offheapmap::{
    AnonAllocator, BytesBytesMap, BytesHolder, EntryCodec, FixedBytes, IntIntCodec, IntIntMap,
    MapConfig, MmapAllocator, Result,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== OffHeapMap Demo ===\n");

    demo_int_map()?;
    demo_bytes_map()?;
    demo_mmap_map()?;
    Ok(())
}

fn demo_int_map() -> Result<()> {
    println!("1. IntIntMap on anonymous memory:");
    let mut map = IntIntMap::new(IntIntCodec::new(), AnonAllocator, 1, 0.66)?;
    println!("   start: capacity {} threshold {}", map.capacity(), map.threshold());

    for k in 0..100 {
        map.put(&k, &(k * k), None)?;
    }
    println!("   after 100 puts: {map:?}");

    let mut value = 0;
    map.get(&9, &mut value)?;
    println!("   9 -> {value}");

    let mut previous = 0;
    map.put(&9, &-9, Some(&mut previous))?;
    println!("   replaced 9 -> {previous} with -9");

    // 0 is the empty-slot marker, stored off to the side
    let mut removed = 0;
    map.remove(&0, Some(&mut removed))?;
    println!("   removed 0 -> {removed}, {} entries left\n", map.len());
    map.close()
}

fn demo_bytes_map() -> Result<()> {
    println!("2. BytesBytesMap with 5-byte keys and 10-byte values:");
    let mut map = BytesBytesMap::new(FixedBytes::new(5, 10), AnonAllocator, 10, 0.66)?;

    let key = BytesHolder::from(b"abcde");
    map.put(&key, &BytesHolder::from(b"abcdefghij"), None)?;

    let mut out = map.codec().new_value();
    map.get(&key, &mut out)?;
    println!("   {key:?} -> {out:?}");

    match map.put(&BytesHolder::from(b"abc"), &out, None) {
        Ok(_) => println!("   unexpected success"),
        Err(err) => println!("   short key rejected: {err}\n"),
    }
    map.close()
}

fn demo_mmap_map() -> Result<()> {
    println!("3. IntIntMap over memory-mapped files:");
    let dir = std::env::temp_dir().join("offheap_map_demo");
    std::fs::create_dir_all(&dir)?;

    let config = MapConfig::new(64, 0.66).with_max_segment_bytes(4096);
    let mut map = IntIntMap::with_config(IntIntCodec::new(), MmapAllocator::new(&dir), config)?;
    for k in 1..=10_000 {
        map.put(&k, &-k, None)?;
    }
    let files = std::fs::read_dir(&dir)?.count();
    println!(
        "   {} entries across {} segments ({files} files in {})",
        map.len(),
        map.segment_count(),
        dir.display()
    );

    map.close()?;
    println!("   files left after close: {}", std::fs::read_dir(&dir)?.count());
    std::fs::remove_dir(&dir)?;
    Ok(())
}

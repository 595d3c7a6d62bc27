//! Integration tests for promotion, eviction and the stale-copy window.

use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use blockfs_tier::cache::block::{BlockAddr, SlotIndex, BLOCK_SIZE, BLOCK_SIZE_U64};
use blockfs_tier::cache::pager::Pager;
use blockfs_tier::cache::slot_map::SlotHashing;
use blockfs_tier::config::Config;
use blockfs_tier::transfer::device::{Device, DeviceRole};
use tempfile::TempDir;

/// Backing block `i` is filled with byte `i + 1`; the cache starts as 0xEE.
fn make_images(tmp: &TempDir, backing_blocks: usize, cache_blocks: usize) -> (PathBuf, PathBuf) {
    let backing = tmp.path().join("backing.img");
    let mut data = vec![0u8; backing_blocks * BLOCK_SIZE];
    for (i, chunk) in data.chunks_mut(BLOCK_SIZE).enumerate() {
        chunk.fill(i as u8 + 1);
    }
    std::fs::write(&backing, data).unwrap();

    let cache = tmp.path().join("cache.img");
    std::fs::write(&cache, vec![0xEEu8; cache_blocks * BLOCK_SIZE]).unwrap();
    (backing, cache)
}

fn open_pager(backing: &Path, cache: &Path, config: &Config) -> Pager {
    Pager::new(
        Device::open(backing, DeviceRole::Backing).unwrap(),
        Device::open(cache, DeviceRole::Cache).unwrap(),
        config,
    )
    .unwrap()
}

fn read_block(pager: &Pager, addr: u64) -> Vec<u8> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    assert_eq!(pager.read(addr * BLOCK_SIZE_U64, &mut buf).unwrap(), BLOCK_SIZE);
    buf
}

fn read_slot(cache: &Path, slot: u64) -> Vec<u8> {
    let file = std::fs::File::open(cache).unwrap();
    let mut buf = vec![0u8; BLOCK_SIZE];
    file.read_exact_at(&mut buf, slot * BLOCK_SIZE_U64).unwrap();
    buf
}

fn all(buf: &[u8], byte: u8) -> bool {
    buf.iter().all(|&b| b == byte)
}

#[test]
fn test_promotion_happens_on_512th_read() {
    let tmp = TempDir::new().unwrap();
    let (backing, cache) = make_images(&tmp, 4, 1);
    let pager = open_pager(&backing, &cache, &Config::default());

    for _ in 0..511 {
        read_block(&pager, 0);
    }
    assert!(!pager.is_cached(BlockAddr(0)));
    assert_eq!(pager.occupant(SlotIndex(0)), None);

    read_block(&pager, 0);
    assert!(pager.is_cached(BlockAddr(0)));
    assert_eq!(pager.occupant(SlotIndex(0)), Some(BlockAddr(0)));
    assert!(all(&read_slot(&cache, 0), 1));
}

#[test]
fn test_equal_scores_keep_incumbent() {
    let tmp = TempDir::new().unwrap();
    let (backing, cache) = make_images(&tmp, 4, 1);
    let pager = open_pager(&backing, &cache, &Config::default());

    for _ in 0..600 {
        read_block(&pager, 0);
    }
    // Block 2 shares slot 0 and also scores 1.0: never strictly better.
    for _ in 0..700 {
        read_block(&pager, 2);
    }
    assert_eq!(pager.occupant(SlotIndex(0)), Some(BlockAddr(0)));
    assert!(!pager.is_cached(BlockAddr(2)));
    assert_eq!(pager.stats().promotions, 1);
}

#[test]
fn test_degraded_incumbent_is_evicted() {
    let tmp = TempDir::new().unwrap();
    let (backing, cache) = make_images(&tmp, 4, 1);
    let pager = open_pager(&backing, &cache, &Config::default());

    for _ in 0..600 {
        read_block(&pager, 0);
    }
    assert!(pager.is_cached(BlockAddr(0)));

    // 600 reads -> write_count grows by 420, score drops to ~0.176.
    pager.write(0, &vec![0x55u8; BLOCK_SIZE]).unwrap();
    let rec = pager.record(BlockAddr(0));
    assert!((rec.write_count - 420.0).abs() < 1e-9);
    assert!(rec.cached);

    for _ in 0..700 {
        read_block(&pager, 2);
    }
    assert!(pager.is_cached(BlockAddr(2)));
    assert!(!pager.is_cached(BlockAddr(0)));
    assert_eq!(pager.occupant(SlotIndex(0)), Some(BlockAddr(2)));
    assert!(all(&read_slot(&cache, 0), 3));

    // Block 0 now comes from the backing store, which holds the write.
    let hits_before = pager.stats().cache_hits;
    assert!(all(&read_block(&pager, 0), 0x55));
    assert_eq!(pager.stats().cache_hits, hits_before);

    let stats = pager.stats();
    assert_eq!(stats.promotions, 2);
    assert_eq!(stats.evictions, 1);
    assert!(pager.coherence_violations().is_empty());
}

#[test]
fn test_write_to_cached_block_leaves_stale_copy() {
    let tmp = TempDir::new().unwrap();
    let (backing, cache) = make_images(&tmp, 4, 1);
    let pager = open_pager(&backing, &cache, &Config::default());

    for _ in 0..512 {
        read_block(&pager, 0);
    }
    assert!(pager.is_cached(BlockAddr(0)));

    pager.write(0, &vec![0x55u8; BLOCK_SIZE]).unwrap();

    // Still marked cached, cache copy untouched, slot map unchanged.
    assert!(pager.is_cached(BlockAddr(0)));
    assert_eq!(pager.occupant(SlotIndex(0)), Some(BlockAddr(0)));
    assert!(all(&read_slot(&cache, 0), 1));

    // Reads keep returning the stale cached bytes.
    assert!(all(&read_block(&pager, 0), 1));

    // The backing store does hold the new data.
    let file = std::fs::File::open(&backing).unwrap();
    let mut on_disk = vec![0u8; BLOCK_SIZE];
    file.read_exact_at(&mut on_disk, 0).unwrap();
    assert!(all(&on_disk, 0x55));
}

#[test]
fn test_round_trip_on_uncached_block() {
    let tmp = TempDir::new().unwrap();
    let (backing, cache) = make_images(&tmp, 4, 1);
    let pager = open_pager(&backing, &cache, &Config::default());

    let data: Vec<u8> = (0..2 * BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
    assert_eq!(pager.write(2 * BLOCK_SIZE_U64, &data).unwrap(), data.len());

    let mut back = vec![0u8; data.len()];
    pager.read(2 * BLOCK_SIZE_U64, &mut back).unwrap();
    assert_eq!(back, data);
    assert!(!pager.is_cached(BlockAddr(2)));
}

#[test]
fn test_write_heavy_block_never_promoted() {
    let tmp = TempDir::new().unwrap();
    let (backing, cache) = make_images(&tmp, 2, 1);
    let mut config = Config::default();
    config.policy.min_access_count = 4.0;
    let pager = open_pager(&backing, &cache, &config);

    read_block(&pager, 1);
    // write_count grows to 0.7; read dominance is gone.
    pager.write(BLOCK_SIZE_U64, &[1u8; 16]).unwrap();
    for _ in 0..3 {
        read_block(&pager, 1);
    }
    // 4 reads, 0.7 writes: score (3.3 / 4.7) ~ 0.70 < 0.8.
    assert!(!pager.is_cached(BlockAddr(1)));
    assert_eq!(pager.stats().promotions, 0);
}

#[test]
fn test_mask_hashing_shares_slots() {
    let tmp = TempDir::new().unwrap();
    let (backing, cache) = make_images(&tmp, 8, 2);
    let mut config = Config::default();
    config.policy.min_access_count = 2.0;
    config.slots.hashing = SlotHashing::Mask;
    let pager = open_pager(&backing, &cache, &config);

    assert_eq!(pager.slot_of(BlockAddr(1)), SlotIndex(1));
    assert_eq!(pager.slot_of(BlockAddr(3)), SlotIndex(1));
    assert_eq!(pager.slot_of(BlockAddr(6)), SlotIndex(0));

    read_block(&pager, 3);
    read_block(&pager, 3);
    read_block(&pager, 6);
    read_block(&pager, 6);
    assert_eq!(pager.occupant(SlotIndex(1)), Some(BlockAddr(3)));
    assert_eq!(pager.occupant(SlotIndex(0)), Some(BlockAddr(6)));
    assert!(all(&read_slot(&cache, 1), 4));
    assert!(all(&read_slot(&cache, 0), 7));

    // Served from the cache now.
    assert!(all(&read_block(&pager, 3), 4));
    assert_eq!(pager.stats().cache_hits, 1);
}

#[test]
fn test_mask_hashing_rejects_odd_cache() {
    let tmp = TempDir::new().unwrap();
    let (backing, cache) = make_images(&tmp, 8, 3);
    let mut config = Config::default();
    config.slots.hashing = SlotHashing::Mask;
    let result = Pager::new(
        Device::open(&backing, DeviceRole::Backing).unwrap(),
        Device::open(&cache, DeviceRole::Cache).unwrap(),
        &config,
    );
    assert!(result.is_err());
}

#[test]
fn test_restart_starts_cold() {
    let tmp = TempDir::new().unwrap();
    let (backing, cache) = make_images(&tmp, 2, 1);
    let mut config = Config::default();
    config.policy.min_access_count = 2.0;

    {
        let pager = open_pager(&backing, &cache, &config);
        read_block(&pager, 1);
        read_block(&pager, 1);
        assert!(pager.is_cached(BlockAddr(1)));
    }

    let pager = open_pager(&backing, &cache, &config);
    assert!(!pager.is_cached(BlockAddr(1)));
    assert_eq!(pager.occupant(SlotIndex(0)), None);
    assert_eq!(pager.record(BlockAddr(1)).read_count, 0.0);
}

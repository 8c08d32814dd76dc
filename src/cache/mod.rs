//! The sharded CLOCK block cache (§4.2): bounds the memory used by parsed blocks while exposing
//! reference-counted handles so readers can pin a block across an I/O boundary. Shards are
//! selected by the top bits of the key's hash so unrelated keys rarely contend on the same
//! mutex; each shard is otherwise a self-contained open-addressed table plus eviction ring, see
//! [`shard::CacheShard`].

mod key;
mod shard;

pub use self::key::{BlockCacheKey, SessionId};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::BlockCacheOptions;
use crate::error::Error;
use self::shard::CacheShard;

/// A pinned external reference to a cached value. The value stays alive regardless of
/// eviction as long as a handle to it exists; callers must [`BlockCache::release`] it when
/// done, mirroring the reference-counted pin/unpin cycle readers use across I/O boundaries.
pub struct CacheHandle<T> {
    value:      Arc<T>,
    shard:      u32,
    slot:       u32,
    generation: u32,
}

impl<T> CacheHandle<T> {
    #[must_use]
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }
}

pub struct BlockCache<T> {
    shards:     Vec<Mutex<CacheShard<T>>>,
    shard_bits: u32,
}

impl<T> BlockCache<T> {
    #[must_use]
    pub fn new(options: &BlockCacheOptions) -> Self {
        let shard_bits = u32::from(options.num_shard_bits.unwrap_or_else(|| default_shard_bits(options.capacity)));
        let num_shards = 1usize << shard_bits;
        let per_shard_capacity = options.capacity.div_ceil(num_shards);

        let shards = (0..num_shards)
            .map(|_| {
                Mutex::new(CacheShard::new(per_shard_capacity, options.strict_capacity_limit, options.metadata_charge_policy))
            })
            .collect();

        Self { shards, shard_bits }
    }

    fn shard_index(&self, key: BlockCacheKey) -> usize {
        if self.shard_bits == 0 {
            return 0;
        }
        (key.shard_selector() >> (32 - self.shard_bits)) as usize
    }

    /// See [`CacheShard::insert`]. `want_handle` requests an external reference back; without
    /// it the entry is placed straight onto the CLOCK ring as an unreferenced, evictable entry.
    pub fn insert(
        &self,
        key: BlockCacheKey,
        value: T,
        charge: usize,
        want_handle: bool,
    ) -> Result<Option<CacheHandle<T>>, Error> {
        let shard = self.shard_index(key);
        let (result, freed) = self.shards[shard].lock().insert(key, value, charge, want_handle);
        drop(freed);
        result.map(|handle| {
            handle.map(|h| CacheHandle { value: h.value, shard: shard as u32, slot: h.slot, generation: h.generation })
        })
    }

    /// See [`CacheShard::lookup`]. Never fails; a miss returns `None`.
    pub fn lookup(&self, key: BlockCacheKey) -> Option<CacheHandle<T>> {
        let shard = self.shard_index(key);
        let handle = self.shards[shard].lock().lookup(key)?;
        Some(CacheHandle { value: handle.value, shard: shard as u32, slot: handle.slot, generation: handle.generation })
    }

    /// Takes an additional external reference on an already-pinned handle.
    pub fn ref_handle(&self, handle: &CacheHandle<T>) -> bool {
        self.shards[handle.shard as usize].lock().ref_handle(handle.slot, handle.generation)
    }

    /// See [`CacheShard::release`]. Returns whether this was the entry's last reference and it
    /// was removed from the cache outright (as opposed to going back onto the CLOCK ring).
    pub fn release(&self, handle: CacheHandle<T>, erase_if_last_ref: bool) -> bool {
        let CacheHandle { value, shard, slot, generation } = handle;
        let (erased, freed) = self.shards[shard as usize].lock().release(slot, generation, erase_if_last_ref);
        drop(value);
        drop(freed);
        erased
    }

    /// See [`CacheShard::erase`].
    pub fn erase(&self, key: BlockCacheKey) {
        let shard = self.shard_index(key);
        let freed = self.shards[shard].lock().erase(key);
        drop(freed);
    }

    #[must_use]
    pub fn usage(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().usage()).sum()
    }

    #[must_use]
    pub fn pinned_usage(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().pinned_usage()).sum()
    }
}

/// Picks enough shards to keep each one's slice of capacity above roughly a mebibyte, without
/// going so fine-grained that tiny caches end up with mostly-empty shards.
fn default_shard_bits(capacity: usize) -> u8 {
    let mut bits = 0u8;
    while bits < 6 && (capacity >> (bits + 1)) >= 1024 * 1024 {
        bits += 1;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FileNumber;

    fn options(capacity: usize) -> BlockCacheOptions {
        BlockCacheOptions { capacity, num_shard_bits: Some(0), ..BlockCacheOptions::default() }
    }

    #[test]
    fn insert_and_lookup_round_trip_through_a_shard() {
        let cache: BlockCache<Vec<u8>> = BlockCache::new(&options(1024 * 1024));
        let session = SessionId::new();
        let key = BlockCacheKey::new(session, FileNumber::new(1), 0);

        cache.insert(key, vec![9, 9], 2, false).unwrap();
        let handle = cache.lookup(key).expect("inserted entry is found");
        assert_eq!(**handle.value(), vec![9, 9]);
        assert!(!cache.release(handle, false), "entry stays cached, so this isn't its last reference being freed");
    }

    #[test]
    fn erase_removes_a_visible_entry() {
        let cache: BlockCache<Vec<u8>> = BlockCache::new(&options(1024 * 1024));
        let key = BlockCacheKey::new(SessionId::new(), FileNumber::new(1), 0);

        cache.insert(key, vec![1], 1, false).unwrap();
        cache.erase(key);
        assert!(cache.lookup(key).is_none());
    }

    #[test]
    fn usage_tracks_inserted_charges() {
        let cache: BlockCache<Vec<u8>> = BlockCache::new(&options(1024 * 1024));
        let key = BlockCacheKey::new(SessionId::new(), FileNumber::new(1), 0);
        cache.insert(key, vec![0u8; 64], 64, false).unwrap();
        assert_eq!(cache.usage(), 64);
    }

    #[test]
    fn multi_shard_cache_distributes_keys() {
        let cache: BlockCache<Vec<u8>> = BlockCache::new(&BlockCacheOptions {
            num_shard_bits: Some(2),
            ..options(1024 * 1024)
        });
        let session = SessionId::new();
        for offset in 0..64 {
            let key = BlockCacheKey::new(session, FileNumber::new(1), offset);
            cache.insert(key, vec![0u8; 8], 8, false).unwrap();
        }
        assert_eq!(cache.usage(), 64 * 8);
    }
}

//! Token interner.
//!
//! Maps token strings to dense positive integer ids that fit in the 28-bit
//! token field of a trie node key. The map is sharded so that lookups on
//! the request path only contend on a single shard's read lock while list
//! ingestion keeps inserting.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Ids must fit in 28 bits; see [`crate::ruletree::NodeKey`].
pub const MAX_TOKEN_ID: u32 = (1 << 28) - 1;

const SHARD_COUNT: usize = 64;

pub struct TokenInterner {
    shards: Vec<RwLock<FxHashMap<Box<str>, u32>>>,
    next_id: AtomicU32,
}

impl Default for TokenInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenInterner {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(RwLock::new(FxHashMap::default()));
        }
        TokenInterner {
            shards,
            // 0 is reserved for non-exact node kinds.
            next_id: AtomicU32::new(1),
        }
    }

    /// Returns the id for `token`, allocating one on first sight.
    pub fn intern(&self, token: &str) -> u32 {
        let shard = &self.shards[Self::shard_index(token)];

        if let Some(&id) = shard.read().get(token) {
            return id;
        }

        let mut map = shard.write();
        if let Some(&id) = map.get(token) {
            return id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id > MAX_TOKEN_ID {
            panic!("token interner overflow: more than 2^28 distinct tokens");
        }
        map.insert(Box::from(token), id);
        id
    }

    /// Lookup without allocation. Query paths use this: a token that was
    /// never interned cannot label any trie edge.
    pub fn get(&self, token: &str) -> Option<u32> {
        self.shards[Self::shard_index(token)].read().get(token).copied()
    }

    pub fn len(&self) -> usize {
        (self.next_id.load(Ordering::Relaxed) - 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_index(token: &str) -> usize {
        // FNV-1a, folded onto the shard count.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in token.as_bytes() {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x100_0000_01b3);
        }
        (h as usize) % SHARD_COUNT
    }
}

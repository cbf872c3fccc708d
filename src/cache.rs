//! The position cache (C2, spec §4.2): a bounded, sharded, concurrent map
//! from Zobrist hash to cached NN evaluation. Eviction is FIFO-approximate
//! per shard (a ring buffer of recently-inserted keys), not strict LRU —
//! spec §4.2 explicitly allows this relaxation.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::evaluator::EvalOutput;

/// Cached entry: the parts of `EvalOutput` worth remembering.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub value: f32,
    pub wdl: (f32, f32, f32),
    pub moves_left: f32,
    pub policy: Vec<f32>,
}

impl From<&EvalOutput> for CacheEntry {
    fn from(out: &EvalOutput) -> Self {
        CacheEntry {
            value: out.value,
            wdl: out.wdl,
            moves_left: out.moves_left,
            policy: out.policy.clone(),
        }
    }
}

/// Read/write mode for a `PositionCache` (spec §6 `cache_mode`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    Off,
    ReadOnly,
    ReadWrite,
}

const NUM_SHARDS: usize = 16;

struct Shard {
    table: RwLock<HashMap<u64, CacheEntry>>,
    /// FIFO ring of inserted keys, used to pick an approximately-oldest
    /// victim once the shard is full. Guarded by the same lock as `table`
    /// to keep eviction and insertion atomic with respect to each other.
    ring: RwLock<std::collections::VecDeque<u64>>,
}

impl Shard {
    fn new() -> Self {
        Shard {
            table: RwLock::new(HashMap::new()),
            ring: RwLock::new(std::collections::VecDeque::new()),
        }
    }
}

/// A bounded, sharded position cache. A tree may optionally expose its
/// cache to a peer tree for cross-engine reuse (spec §4.2, §4.10); peers
/// are only ever handed a `lookup`-capable view, never eviction rights.
pub struct PositionCache {
    shards: Vec<Shard>,
    capacity_per_shard: usize,
    mode: CacheMode,
}

impl PositionCache {
    pub fn new(total_capacity: usize, mode: CacheMode) -> Self {
        let capacity_per_shard = (total_capacity / NUM_SHARDS).max(1);
        let mut shards = Vec::with_capacity(NUM_SHARDS);
        shards.resize_with(NUM_SHARDS, Shard::new);
        PositionCache {
            shards,
            capacity_per_shard,
            mode,
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: CacheMode) {
        self.mode = mode;
    }

    fn shard_for(&self, hash: u64) -> &Shard {
        &self.shards[(hash as usize) % self.shards.len()]
    }

    /// Looks up `hash`. Always permitted, even in `Off` mode read from a
    /// peer — `Off` only disables this tree's own reads/writes, which
    /// callers enforce by checking `mode()` before calling in.
    pub fn lookup(&self, hash: u64) -> Option<CacheEntry> {
        if self.mode == CacheMode::Off {
            return None;
        }
        let shard = self.shard_for(hash);
        shard.table.read().unwrap().get(&hash).cloned()
    }

    pub fn insert(&self, hash: u64, entry: CacheEntry) {
        if self.mode != CacheMode::ReadWrite {
            return;
        }
        let shard = self.shard_for(hash);
        let mut table = shard.table.write().unwrap();
        if !table.contains_key(&hash) && table.len() >= self.capacity_per_shard {
            let mut ring = shard.ring.write().unwrap();
            if let Some(victim) = ring.pop_front() {
                table.remove(&victim);
            }
            ring.push_back(hash);
        } else if !table.contains_key(&hash) {
            shard.ring.write().unwrap().push_back(hash);
        }
        table.insert(hash, entry);
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.table.read().unwrap().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! In-memory counter storage.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::serial::ShardPrefix;


//------------ MemoryCounters ------------------------------------------------

/// Counters kept in memory.
///
/// Clones share the same counters and the same holds. Nothing survives
/// the process, so this is only suitable for tests and throw-away setups.
#[derive(Clone, Debug, Default)]
pub struct MemoryCounters {
    counters: Arc<Mutex<HashMap<ShardPrefix, u64>>>,
    held: Arc<Mutex<HashSet<ShardPrefix>>>,
}

impl MemoryCounters {
    pub fn get(&self, prefix: ShardPrefix) -> u64 {
        let counters = self.counters.lock().expect("poisoned lock");
        counters.get(&prefix).copied().unwrap_or_default()
    }

    pub fn set(&self, prefix: ShardPrefix, value: u64) {
        let mut counters = self.counters.lock().expect("poisoned lock");
        counters.insert(prefix, value);
    }

    /// Takes the exclusive hold on the counter for `prefix`.
    ///
    /// Returns `None` if the counter is held already.
    pub fn try_hold(&self, prefix: ShardPrefix) -> Option<MemoryHold> {
        let mut held = self.held.lock().expect("poisoned lock");
        if !held.insert(prefix) {
            return None;
        }
        Some(MemoryHold { counters: self.clone(), prefix })
    }
}


//------------ MemoryHold ----------------------------------------------------

/// The exclusive hold on one in-memory counter.
///
/// The hold is released when the value is dropped.
#[derive(Debug)]
pub struct MemoryHold {
    counters: MemoryCounters,
    prefix: ShardPrefix,
}

impl MemoryHold {
    pub fn get(&self) -> u64 {
        self.counters.get(self.prefix)
    }

    pub fn set(&self, value: u64) {
        self.counters.set(self.prefix, value)
    }
}

impl Drop for MemoryHold {
    fn drop(&mut self) {
        self.counters
            .held
            .lock()
            .expect("poisoned lock")
            .remove(&self.prefix);
    }
}


//------------ Tests ---------------------------------------------------------

//! Generation-tagged identifier allocator shared by block files and the node pool.
//!
//! Identifiers move through three states once handed out:
//!
//! * **fresh**: allocated in the current, unsealed generation. Nothing but the writer can see
//!   them, so freeing one makes it reusable straight away.
//! * **pending**: freed while some older phase or reader may still reach them. Each carries
//!   the generation in which it was freed and is released by [`FreeList::reclaim`] once the
//!   oldest pinned generation has caught up.
//! * **reusable**: handed out again by [`FreeList::allocate`], lowest first.
//!
//! The first mutation after a commit or rollback snapshots the reusable and pending sets so
//! [`FreeList::rollback_tx`] can undo the transaction's allocator effects.

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::FxHashSet;

use crate::types::{Result, StoreError};

/// Persisted allocator state for one phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FreeListImage {
    /// Smallest identifier never handed out.
    pub high_water: u64,
    /// Identifiers below `high_water` that the phase does not reference, ascending.
    pub ids: Vec<u64>,
}

#[derive(Debug)]
struct TxSnapshot {
    high_water: u64,
    reusable: BTreeSet<u64>,
    pending: VecDeque<(u64, u64)>,
    allocated: FxHashSet<u64>,
}

/// Allocator for 64-bit identifiers with copy-on-write aware reclamation.
#[derive(Debug)]
pub struct FreeList {
    first: u64,
    high_water: u64,
    reusable: BTreeSet<u64>,
    pending: VecDeque<(u64, u64)>,
    pending_ids: FxHashSet<u64>,
    fresh: FxHashSet<u64>,
    generation: u64,
    mutated_since_seal: bool,
    tx: Option<TxSnapshot>,
}

impl FreeList {
    /// Creates an empty allocator whose first identifier is `first`.
    pub fn new(first: u64) -> Self {
        Self {
            first,
            high_water: first,
            reusable: BTreeSet::new(),
            pending: VecDeque::new(),
            pending_ids: FxHashSet::default(),
            fresh: FxHashSet::default(),
            generation: 1,
            mutated_since_seal: false,
            tx: None,
        }
    }

    /// Rebuilds an allocator from a persisted image. Every listed identifier is immediately
    /// reusable since no reader survives a reopen.
    pub fn from_image(first: u64, image: &FreeListImage, sealed_generation: u64) -> Result<Self> {
        if image.high_water < first {
            return Err(StoreError::corruption(format!(
                "free list high-water {} below first id {first}",
                image.high_water
            )));
        }
        let mut reusable = BTreeSet::new();
        for &id in &image.ids {
            if id < first || id >= image.high_water {
                return Err(StoreError::corruption(format!(
                    "free id {id} outside [{first}, {})",
                    image.high_water
                )));
            }
            if !reusable.insert(id) {
                return Err(StoreError::corruption(format!("free id {id} listed twice")));
            }
        }
        Ok(Self {
            first,
            high_water: image.high_water,
            reusable,
            pending: VecDeque::new(),
            pending_ids: FxHashSet::default(),
            fresh: FxHashSet::default(),
            generation: sealed_generation + 1,
            mutated_since_seal: false,
            tx: None,
        })
    }

    fn begin(&mut self) {
        if self.tx.is_none() {
            self.tx = Some(TxSnapshot {
                high_water: self.high_water,
                reusable: self.reusable.clone(),
                pending: self.pending.clone(),
                allocated: FxHashSet::default(),
            });
        }
        self.mutated_since_seal = true;
    }

    /// Hands out the lowest reusable identifier, or extends the high-water mark.
    pub fn allocate(&mut self) -> u64 {
        self.begin();
        let id = match self.reusable.pop_first() {
            Some(id) => id,
            None => {
                let id = self.high_water;
                self.high_water += 1;
                id
            }
        };
        self.fresh.insert(id);
        if let Some(tx) = self.tx.as_mut() {
            tx.allocated.insert(id);
        }
        id
    }

    /// Returns `id` to the allocator. Fresh identifiers are reusable at once; others wait
    /// for [`FreeList::reclaim`].
    pub fn free(&mut self, id: u64) -> Result<()> {
        if id < self.first || id >= self.high_water {
            return Err(StoreError::invalid(format!("id {id} was never allocated")));
        }
        if self.is_free(id) {
            return Err(StoreError::invalid(format!("id {id} is already free")));
        }
        self.begin();
        if self.fresh.remove(&id) {
            self.reusable.insert(id);
        } else {
            self.pending.push_back((self.generation, id));
            self.pending_ids.insert(id);
        }
        Ok(())
    }

    /// True when `id` was allocated in the current unsealed generation.
    pub fn is_fresh(&self, id: u64) -> bool {
        self.fresh.contains(&id)
    }

    /// True when `id` is reusable or waiting for reclamation.
    pub fn is_free(&self, id: u64) -> bool {
        self.reusable.contains(&id) || self.pending_ids.contains(&id)
    }

    /// True when `id` has been handed out and not freed.
    pub fn is_allocated(&self, id: u64) -> bool {
        id >= self.first && id < self.high_water && !self.is_free(id)
    }

    /// Closes the current generation and returns its number. Identifiers allocated so far
    /// stop being fresh.
    pub fn seal(&mut self) -> u64 {
        self.fresh.clear();
        self.mutated_since_seal = false;
        let sealed = self.generation;
        self.generation += 1;
        sealed
    }

    /// Number of the most recently sealed generation.
    pub fn last_sealed(&self) -> u64 {
        self.generation - 1
    }

    /// The open generation new frees are tagged with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when something was allocated or freed since the last seal.
    pub fn mutated_since_seal(&self) -> bool {
        self.mutated_since_seal
    }

    /// Moves pending identifiers whose free generation is at or below `oldest_pin` to the
    /// reusable set. With no pin everything pending is released.
    pub fn reclaim(&mut self, oldest_pin: Option<u64>) -> usize {
        let mut released = 0;
        while let Some(&(tag, id)) = self.pending.front() {
            if matches!(oldest_pin, Some(pin) if pin < tag) {
                break;
            }
            self.pending.pop_front();
            self.pending_ids.remove(&id);
            self.reusable.insert(id);
            released += 1;
        }
        released
    }

    /// True when there is nothing reusable but something pending.
    pub fn starved(&self) -> bool {
        self.reusable.is_empty() && !self.pending.is_empty()
    }

    /// Makes the transaction's allocator effects permanent.
    pub fn commit_tx(&mut self) {
        self.tx = None;
    }

    /// Undoes the transaction's allocator effects and returns the identifiers that were
    /// fresh, whose unsealed contents the caller must discard.
    ///
    /// Identifiers that were live when the transaction began become live again even if the
    /// transaction freed and reused them.
    pub fn rollback_tx(&mut self) -> Vec<u64> {
        let Some(tx) = self.tx.take() else {
            return Vec::new();
        };
        let snapshot_pending: FxHashSet<u64> = tx.pending.iter().map(|&(_, id)| id).collect();
        let mut allocated: Vec<(u64, bool)> = tx
            .allocated
            .iter()
            .map(|&id| {
                let was_free = id >= tx.high_water
                    || tx.reusable.contains(&id)
                    || snapshot_pending.contains(&id);
                (id, was_free)
            })
            .collect();
        allocated.sort_unstable();
        self.reusable = tx.reusable;
        self.pending = tx.pending;
        self.reusable.retain(|id| !tx.allocated.contains(id));
        self.pending.retain(|(_, id)| !tx.allocated.contains(id));
        let mut discarded = Vec::new();
        for (id, was_free) in allocated {
            let fresh = self.fresh.remove(&id);
            if fresh {
                discarded.push(id);
            }
            if !was_free {
                continue;
            }
            if fresh {
                self.reusable.insert(id);
            } else {
                self.pending.push_back((self.generation, id));
            }
        }
        self.pending_ids = self.pending.iter().map(|&(_, id)| id).collect();
        self.fresh.clear();
        self.mutated_since_seal = false;
        discarded
    }

    /// True between the first mutation and the following commit or rollback.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Snapshot of the allocator for persistence.
    pub fn image(&self) -> FreeListImage {
        let mut ids: Vec<u64> = self
            .reusable
            .iter()
            .copied()
            .chain(self.pending.iter().map(|&(_, id)| id))
            .collect();
        ids.sort_unstable();
        FreeListImage {
            high_water: self.high_water,
            ids,
        }
    }

    /// Smallest identifier never handed out.
    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Identifier the next [`FreeList::allocate`] would return if nothing changes first.
    pub fn peek_next(&self) -> u64 {
        self.reusable
            .first()
            .copied()
            .unwrap_or(self.high_water)
    }

    /// Number of reusable identifiers.
    pub fn reusable_len(&self) -> usize {
        self.reusable.len()
    }

    /// Number of identifiers waiting for reclamation.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of identifiers currently handed out.
    pub fn live_len(&self) -> u64 {
        self.high_water - self.first - (self.reusable.len() + self.pending.len()) as u64
    }
}

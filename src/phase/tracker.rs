use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::types::PhaseNumber;

/// Counts live references to sealed generations so the allocator knows what it may reuse.
#[derive(Default)]
pub struct PhaseTracker {
    pins: Mutex<BTreeMap<u64, usize>>,
}

impl PhaseTracker {
    /// Creates a tracker with no pins.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pins `generation` until the returned guard drops.
    pub fn pin(self: &Arc<Self>, generation: u64) -> PinGuard {
        *self.pins.lock().entry(generation).or_insert(0) += 1;
        PinGuard {
            tracker: Arc::clone(self),
            generation,
        }
    }

    /// Oldest pinned generation, if any.
    pub fn oldest(&self) -> Option<u64> {
        self.pins.lock().keys().next().copied()
    }

    /// Total number of live pins.
    pub fn live(&self) -> usize {
        self.pins.lock().values().sum()
    }

    fn unpin(&self, generation: u64) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&generation);
            }
        }
    }
}

impl fmt::Debug for PhaseTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseTracker")
            .field("pins", &*self.pins.lock())
            .finish()
    }
}

/// Keeps one generation pinned.
pub struct PinGuard {
    tracker: Arc<PhaseTracker>,
    generation: u64,
}

impl PinGuard {
    /// The pinned generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.tracker.unpin(self.generation);
    }
}

impl fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinGuard")
            .field("generation", &self.generation)
            .finish()
    }
}

/// A phase's roots together with the pin that keeps its blocks alive.
#[derive(Debug)]
pub struct PinnedPhase<P> {
    /// Phase number the roots belong to.
    pub phase: PhaseNumber,
    /// Sealed generation the roots were written in.
    pub generation: u64,
    /// Resource-specific roots.
    pub payload: P,
    _pin: PinGuard,
}

impl<P> PinnedPhase<P> {
    /// Pins `generation` on `tracker` and wraps the roots.
    pub fn new(
        tracker: &Arc<PhaseTracker>,
        phase: PhaseNumber,
        generation: u64,
        payload: P,
    ) -> Arc<Self> {
        Arc::new(Self {
            phase,
            generation,
            payload,
            _pin: tracker.pin(generation),
        })
    }
}

/// Latest committed phase, swapped at commit and cloned by readers.
pub struct Published<P> {
    current: RwLock<Option<Arc<PinnedPhase<P>>>>,
}

impl<P> Published<P> {
    /// Creates an empty slot.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(None),
        })
    }

    /// Returns the current phase, if one has been published.
    pub fn get(&self) -> Option<Arc<PinnedPhase<P>>> {
        self.current.read().clone()
    }

    /// Replaces the published phase, returning the previous one.
    pub fn publish(&self, phase: Arc<PinnedPhase<P>>) -> Option<Arc<PinnedPhase<P>>> {
        self.current.write().replace(phase)
    }

    /// Withdraws the published phase.
    pub fn clear(&self) -> Option<Arc<PinnedPhase<P>>> {
        self.current.write().take()
    }
}

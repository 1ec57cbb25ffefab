use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn, Span};

use super::metaroot::{
    read_free_list, write_free_list, Metaroot, MetarootFile, ResourceKind, SlotState, PAYLOAD_LEN,
};
use crate::primitives::freelist::FreeListImage;
use crate::primitives::io::{FileIo, MemFileIo, StdFileIo};
use crate::types::{PhaseNumber, Result, StoreError};

/// Resource-specific roots stored in the metaroot payload region.
pub trait PhasePayload: Clone + fmt::Debug + Send + Sync + 'static {
    /// Encodes into `dst`, which is exactly [`PAYLOAD_LEN`] bytes of zeros.
    fn encode(&self, dst: &mut [u8]) -> Result<()>;
    /// Decodes from a payload region.
    fn decode(src: &[u8]) -> Result<Self>;
}

/// Where a phase manager is in the prepare/commit protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseState {
    /// Opened or recovered; waiting for `select_phase` or `clear`.
    Unselected,
    /// A committed phase is current and writes are accepted.
    Stable,
    /// Writing the prepared metaroot.
    Preparing,
    /// A prepared metaroot is durable; waiting for commit or rollback.
    Prepared,
    /// Retiring the previous committed metaroot.
    Committing,
    /// Retiring the prepared metaroot.
    RollingBack,
    /// A commit or rollback failed part way; reopen and recover.
    Failed,
}

/// Files backing one phase manager.
#[derive(Clone)]
pub struct PhaseFiles {
    /// The two-slot metaroot file.
    pub meta: Arc<dyn FileIo>,
    /// Free-list sidecars, one per slot.
    pub free: [Arc<dyn FileIo>; 2],
}

impl PhaseFiles {
    /// Opens `<stem>.meta`, `<stem>.free0` and `<stem>.free1` under `dir`, creating them
    /// when missing.
    pub fn open_dir(dir: &Path, stem: &str) -> Result<Self> {
        let open = |ext: &str| -> Result<Arc<dyn FileIo>> {
            Ok(Arc::new(StdFileIo::open(dir.join(format!("{stem}.{ext}")))?))
        };
        Ok(Self {
            meta: open("meta")?,
            free: [open("free0")?, open("free1")?],
        })
    }

    /// Fresh in-memory files.
    pub fn memory() -> Self {
        Self {
            meta: Arc::new(MemFileIo::new()),
            free: [Arc::new(MemFileIo::new()), Arc::new(MemFileIo::new())],
        }
    }
}

/// Everything persisted for a phase besides its number and salt.
#[derive(Clone, Debug)]
pub struct PhaseImage<P> {
    /// Resource roots.
    pub payload: P,
    /// Allocator state.
    pub free: FreeListImage,
    /// Sealed allocator generation.
    pub generation: u64,
}

/// A recovered phase read through [`PhaseManager::load_phase`].
#[derive(Clone, Debug)]
pub struct RecoveredPhase<P> {
    /// The adopted phase number.
    pub phase: PhaseNumber,
    /// Block checksum salt.
    pub salt: u64,
    /// Roots, allocator state and generation.
    pub image: PhaseImage<P>,
}

#[derive(Clone, Debug)]
struct SlotPhase {
    slot: usize,
    phase: PhaseNumber,
    salt: u64,
}

/// Drives the two-metaroot prepare/commit/rollback/recover protocol for one resource.
///
/// At most two slots are valid at once: the committed phase and, between `prepare` and
/// `commit`/`rollback`, the prepared phase in the other slot.
pub struct PhaseManager<P> {
    name: String,
    meta: MetarootFile,
    free: [Arc<dyn FileIo>; 2],
    state: PhaseState,
    committed: Option<SlotPhase>,
    prepared: Option<SlotPhase>,
    recovered: Vec<(usize, Metaroot)>,
    span: Span,
    _payload: std::marker::PhantomData<fn() -> P>,
}

impl<P: PhasePayload> PhaseManager<P> {
    /// Creates a manager in the `Unselected` state.
    pub fn new(name: impl Into<String>, kind: ResourceKind, files: PhaseFiles, parent: &Span) -> Self {
        let name = name.into();
        let span = tracing::debug_span!(parent: parent, "phase", resource = %name);
        Self {
            name,
            meta: MetarootFile::new(files.meta, kind),
            free: files.free,
            state: PhaseState::Unselected,
            committed: None,
            prepared: None,
            recovered: Vec::new(),
            span,
            _payload: std::marker::PhantomData,
        }
    }

    /// Name used in errors and diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current protocol state.
    pub fn state(&self) -> PhaseState {
        self.state
    }

    /// Salt of the committed phase.
    pub fn salt(&self) -> Option<u64> {
        self.committed.as_ref().map(|c| c.salt)
    }

    /// Scans both metaroot slots and returns the valid phase numbers in ascending order.
    ///
    /// A never-written file yields an empty list. A written file with no valid slot is
    /// [`StoreError::NoValidPhase`].
    pub fn recover(&mut self) -> Result<Vec<PhaseNumber>> {
        if matches!(
            self.state,
            PhaseState::Preparing | PhaseState::Committing | PhaseState::RollingBack
        ) {
            return Err(StoreError::Protocol("recover called during a phase transition"));
        }
        let mut valid = Vec::new();
        let mut problems = Vec::new();
        for slot in 0..2 {
            match self.meta.read_slot(slot)? {
                SlotState::Valid(root) => valid.push((slot, root)),
                SlotState::Corrupt(reason) => {
                    warn!(parent: &self.span, slot, %reason, "phase.recover.corrupt_slot");
                    problems.push(format!("slot {slot}: {reason}"));
                }
                SlotState::Empty | SlotState::Retired(_) => {}
            }
        }
        if let [(_, a), (_, b)] = valid.as_slice() {
            if a.phase == b.phase {
                return Err(StoreError::corruption(format!(
                    "both metaroot slots of {} claim phase {}",
                    self.name, a.phase
                )));
            }
        }
        if valid.is_empty() && !self.meta.is_empty()? {
            let detail = if problems.is_empty() {
                self.name.clone()
            } else {
                format!("{} ({})", self.name, problems.join("; "))
            };
            return Err(StoreError::NoValidPhase(detail));
        }
        valid.sort_by_key(|(_, root)| root.phase);
        let phases: Vec<PhaseNumber> = valid.iter().map(|(_, root)| root.phase).collect();
        self.recovered = valid;
        self.committed = None;
        self.prepared = None;
        self.state = PhaseState::Unselected;
        info!(parent: &self.span, phases = ?phases, "phase.recover.complete");
        Ok(phases)
    }

    /// Reads and decodes a phase returned by [`PhaseManager::recover`] without changing
    /// any state, so the caller can validate it before [`PhaseManager::select_phase`].
    pub fn load_phase(&self, phase: PhaseNumber) -> Result<RecoveredPhase<P>> {
        if self.state != PhaseState::Unselected {
            return Err(StoreError::Protocol("select_phase requires a fresh recover"));
        }
        let (slot, root) = self.recovered_slot(phase)?;
        let ids = read_free_list(&*self.free[slot], root.free_len, root.free_crc)?;
        let payload = P::decode(&root.payload)?;
        Ok(RecoveredPhase {
            phase,
            salt: root.salt,
            image: PhaseImage {
                payload,
                free: FreeListImage {
                    high_water: root.high_water,
                    ids,
                },
                generation: root.generation,
            },
        })
    }

    /// Adopts a recovered phase and retires the other slot.
    ///
    /// On error the manager stays `Unselected` and the recovered slots are kept.
    pub fn select_phase(&mut self, phase: PhaseNumber) -> Result<()> {
        if self.state != PhaseState::Unselected {
            return Err(StoreError::Protocol("select_phase requires a fresh recover"));
        }
        let (slot, root) = self.recovered_slot(phase)?;
        for (other, _) in self.recovered.iter().filter(|(s, _)| *s != slot) {
            self.meta.invalidate(*other)?;
        }
        self.recovered.clear();
        self.committed = Some(SlotPhase {
            slot,
            phase,
            salt: root.salt,
        });
        self.state = PhaseState::Stable;
        info!(parent: &self.span, phase = phase.0, slot, "phase.select.complete");
        Ok(())
    }

    fn recovered_slot(&self, phase: PhaseNumber) -> Result<(usize, Metaroot)> {
        self.recovered
            .iter()
            .find(|(_, root)| root.phase == phase)
            .cloned()
            .ok_or_else(|| {
                StoreError::invalid(format!("phase {phase} is not valid for {}", self.name))
            })
    }

    /// Discards both slots and commits `image` as phase `phase` in slot 0.
    pub fn clear_at(&mut self, phase: PhaseNumber, image: &PhaseImage<P>, salt: u64) -> Result<()> {
        self.meta.reset()?;
        self.free[1].truncate(0)?;
        self.write_phase(0, phase, salt, image)?;
        self.committed = Some(SlotPhase { slot: 0, phase, salt });
        self.prepared = None;
        self.recovered.clear();
        self.state = PhaseState::Stable;
        info!(parent: &self.span, phase = phase.0, "phase.clear.complete");
        Ok(())
    }

    /// Rejects mutations unless a committed phase is current and nothing is prepared.
    pub fn check_writable(&self) -> Result<()> {
        match self.state {
            PhaseState::Stable => Ok(()),
            PhaseState::Prepared => Err(StoreError::Protocol("mutation while prepared")),
            PhaseState::Unselected => Err(StoreError::Protocol("no phase selected")),
            PhaseState::Failed => Err(StoreError::Failed(self.name.clone())),
            _ => Err(StoreError::Protocol("phase transition in progress")),
        }
    }

    /// Persists `image` as the next phase in the slot not holding the committed phase.
    pub fn prepare(&mut self, image: &PhaseImage<P>) -> Result<PhaseNumber> {
        match self.state {
            PhaseState::Stable => {}
            PhaseState::Prepared => return Err(StoreError::Protocol("prepare called twice")),
            _ => {
                self.check_writable()?;
                return Err(StoreError::Protocol("phase transition in progress"));
            }
        }
        let committed = self
            .committed
            .clone()
            .ok_or(StoreError::Protocol("no phase selected"))?;
        let slot = 1 - committed.slot;
        let phase = committed.phase.next();
        self.state = PhaseState::Preparing;
        if let Err(err) = self.write_phase(slot, phase, committed.salt, image) {
            warn!(parent: &self.span, phase = phase.0, error = %err, "phase.prepare.failed");
            if let Err(cleanup) = self.meta.invalidate(slot) {
                warn!(parent: &self.span, error = %cleanup, "phase.prepare.cleanup_failed");
            }
            self.state = PhaseState::Stable;
            return Err(err);
        }
        self.prepared = Some(SlotPhase {
            slot,
            phase,
            salt: committed.salt,
        });
        self.state = PhaseState::Prepared;
        debug!(parent: &self.span, phase = phase.0, slot, "phase.prepare.complete");
        Ok(phase)
    }

    /// Retires the committed slot and promotes the prepared phase.
    pub fn commit(&mut self) -> Result<PhaseNumber> {
        match self.state {
            PhaseState::Prepared => {}
            PhaseState::Failed => return Err(StoreError::Failed(self.name.clone())),
            _ => return Err(StoreError::Protocol("commit called without prepare")),
        }
        let (Some(prepared), Some(committed)) = (self.prepared.clone(), self.committed.clone())
        else {
            return Err(StoreError::Protocol("commit called without prepare"));
        };
        self.state = PhaseState::Committing;
        if let Err(err) = self.meta.invalidate(committed.slot) {
            warn!(parent: &self.span, phase = prepared.phase.0, error = %err, "phase.commit.failed");
            self.state = PhaseState::Failed;
            return Err(err);
        }
        self.committed = Some(prepared.clone());
        self.prepared = None;
        self.state = PhaseState::Stable;
        debug!(parent: &self.span, phase = prepared.phase.0, "phase.commit.complete");
        Ok(prepared.phase)
    }

    /// Retires the prepared slot if there is one.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            PhaseState::Stable => Ok(()),
            PhaseState::Prepared => {
                let Some(prepared) = self.prepared.clone() else {
                    return Err(StoreError::Protocol("prepared phase missing"));
                };
                self.state = PhaseState::RollingBack;
                if let Err(err) = self.meta.invalidate(prepared.slot) {
                    warn!(parent: &self.span, phase = prepared.phase.0, error = %err, "phase.rollback.failed");
                    self.state = PhaseState::Failed;
                    return Err(err);
                }
                self.prepared = None;
                self.state = PhaseState::Stable;
                debug!(parent: &self.span, phase = prepared.phase.0, "phase.rollback.complete");
                Ok(())
            }
            PhaseState::Failed => Err(StoreError::Failed(self.name.clone())),
            PhaseState::Unselected => Err(StoreError::Protocol("no phase selected")),
            _ => Err(StoreError::Protocol("phase transition in progress")),
        }
    }

    /// The prepared phase number while prepared, otherwise the committed one.
    pub fn phase_number(&self) -> Result<PhaseNumber> {
        if let (PhaseState::Prepared, Some(prepared)) = (self.state, &self.prepared) {
            return Ok(prepared.phase);
        }
        self.committed
            .as_ref()
            .map(|c| c.phase)
            .ok_or(StoreError::Protocol("no phase selected"))
    }

    /// Committed phase number, if one is selected.
    pub fn committed_phase(&self) -> Option<PhaseNumber> {
        self.committed.as_ref().map(|c| c.phase)
    }

    /// Raw view of both slots, for diagnostics.
    pub fn inspect(&self) -> Result<[SlotState; 2]> {
        Ok([self.meta.read_slot(0)?, self.meta.read_slot(1)?])
    }

    fn write_phase(
        &self,
        slot: usize,
        phase: PhaseNumber,
        salt: u64,
        image: &PhaseImage<P>,
    ) -> Result<()> {
        let free_crc = write_free_list(&*self.free[slot], &image.free.ids)?;
        let mut payload = vec![0u8; PAYLOAD_LEN];
        image.payload.encode(&mut payload)?;
        self.meta.write_slot(
            slot,
            &Metaroot {
                phase,
                generation: image.generation,
                salt,
                high_water: image.free.high_water,
                free_len: image.free.ids.len() as u64,
                free_crc,
                payload,
            },
        )
    }
}

//! Durable record of coordinator commit decisions.
//!
//! The log is two fixed-size slots written alternately by sequence number. Each slot holds
//! the participants' prepared phase numbers and whether the commit they describe finished.
//! Recovery uses the newest valid slot.

use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::primitives::bytes::{buf::Reader, ord};
use crate::primitives::io::FileIo;
use crate::types::{block_crc32, PhaseNumber, Result, StoreError};

/// Bytes per decision slot.
pub const DECISION_SLOT_LEN: usize = 4096;
/// Longest participant name the log can record.
pub const MAX_PARTICIPANT_NAME: usize = 255;

const DECISION_MAGIC: u32 = 0xdec1_5e01;
const DECISION_VERSION: u16 = 1;

const MAGIC: Range<usize> = 0..4;
const VERSION: Range<usize> = 4..6;
const STATE: Range<usize> = 6..8;
const SEQ: Range<usize> = 8..16;
const COUNT: Range<usize> = 16..20;
const CRC: Range<usize> = 20..24;
const ENTRIES: usize = 24;

/// Whether a recorded commit has been carried out by every participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    /// Decided; participants may still hold the prepared phase.
    Committing,
    /// Every participant committed or recovery resolved the decision.
    Completed,
    /// Withdrawn before any participant committed; the prepared phases are discarded.
    Aborted,
}

impl DecisionState {
    fn code(self) -> u16 {
        match self {
            DecisionState::Committing => 1,
            DecisionState::Completed => 2,
            DecisionState::Aborted => 3,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(DecisionState::Committing),
            2 => Some(DecisionState::Completed),
            3 => Some(DecisionState::Aborted),
            _ => None,
        }
    }
}

/// One commit decision.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Decision {
    /// Write sequence number; the slot is `seq % 2`.
    pub seq: u64,
    /// Resolution state.
    pub state: DecisionState,
    /// Prepared phase per participant, in registration order.
    pub phases: Vec<(String, PhaseNumber)>,
}

impl Decision {
    /// Phase recorded for `participant`.
    pub fn phase_for(&self, participant: &str) -> Option<PhaseNumber> {
        self.phases
            .iter()
            .find(|(name, _)| name == participant)
            .map(|(_, phase)| *phase)
    }

    fn encode(&self, slot: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; DECISION_SLOT_LEN];
        ord::put_u32_be(&mut buf[MAGIC], DECISION_MAGIC);
        ord::put_u16_be(&mut buf[VERSION], DECISION_VERSION);
        ord::put_u16_be(&mut buf[STATE], self.state.code());
        ord::put_u64_be(&mut buf[SEQ], self.seq);
        ord::put_u32_be(&mut buf[COUNT], self.phases.len() as u32);
        let mut at = ENTRIES;
        for (name, phase) in &self.phases {
            let bytes = name.as_bytes();
            if bytes.len() > MAX_PARTICIPANT_NAME {
                return Err(StoreError::invalid(format!(
                    "participant name {name:?} exceeds {MAX_PARTICIPANT_NAME} bytes"
                )));
            }
            let end = at + 2 + bytes.len() + 8;
            if end > DECISION_SLOT_LEN {
                return Err(StoreError::invalid("too many participants for the decision log"));
            }
            ord::put_u16_be(&mut buf[at..at + 2], bytes.len() as u16);
            buf[at + 2..at + 2 + bytes.len()].copy_from_slice(bytes);
            ord::put_u64_be(&mut buf[end - 8..end], phase.0);
            at = end;
        }
        let crc = block_crc32(slot as u64, self.seq, &buf);
        ord::put_u32_be(&mut buf[CRC], crc);
        Ok(buf)
    }

    fn decode(slot: usize, buf: &mut [u8]) -> std::result::Result<Option<Self>, String> {
        if buf.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        let magic = ord::get_u32_be(&buf[MAGIC]).map_err(|e| e.to_string())?;
        if magic != DECISION_MAGIC {
            return Err(format!("bad magic {magic:#010x}"));
        }
        let version = ord::get_u16_be(&buf[VERSION]).map_err(|e| e.to_string())?;
        if version != DECISION_VERSION {
            return Err(format!("unsupported version {version}"));
        }
        let seq = ord::get_u64_be(&buf[SEQ]).map_err(|e| e.to_string())?;
        let stored = ord::get_u32_be(&buf[CRC]).map_err(|e| e.to_string())?;
        buf[CRC].fill(0);
        let actual = block_crc32(slot as u64, seq, buf);
        if stored != actual {
            return Err(format!(
                "checksum mismatch (stored {stored:#010x}, computed {actual:#010x})"
            ));
        }
        let code = ord::get_u16_be(&buf[STATE]).map_err(|e| e.to_string())?;
        let state = DecisionState::from_code(code).ok_or_else(|| format!("unknown state {code}"))?;
        let count = ord::get_u32_be(&buf[COUNT]).map_err(|e| e.to_string())?;
        let mut reader = Reader::new(&buf[ENTRIES..]);
        let mut phases = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = reader.u16().map_err(|e| e.to_string())? as usize;
            let name = reader.take(len).map_err(|e| e.to_string())?;
            let name = String::from_utf8(name.to_vec()).map_err(|e| e.to_string())?;
            let phase = PhaseNumber(reader.u64().map_err(|e| e.to_string())?);
            phases.push((name, phase));
        }
        Ok(Some(Self { seq, state, phases }))
    }
}

/// Double-buffered commit decision log.
pub struct DecisionLog {
    io: Arc<dyn FileIo>,
    latest: Option<Decision>,
}

impl DecisionLog {
    /// Opens the log and loads the newest valid decision. A corrupt slot is skipped; the
    /// other slot still describes the previous decision.
    pub fn open(io: Arc<dyn FileIo>) -> Result<Self> {
        let latest = read_latest(&*io)?;
        Ok(Self { io, latest })
    }

    /// Re-reads both slots. A write whose outcome was reported as failed may still have
    /// reached the disk; this picks it up.
    pub fn reload(&mut self) -> Result<()> {
        self.latest = read_latest(&*self.io)?;
        Ok(())
    }

    /// Newest valid decision.
    pub fn latest(&self) -> Option<&Decision> {
        self.latest.as_ref()
    }

    /// The newest decision if it has not been resolved.
    pub fn pending(&self) -> Option<&Decision> {
        self.latest
            .as_ref()
            .filter(|d| d.state == DecisionState::Committing)
    }

    /// Durably records that the given prepared phases are to be committed.
    pub fn record_commit(&mut self, phases: Vec<(String, PhaseNumber)>) -> Result<()> {
        self.write(DecisionState::Committing, phases)
    }

    /// Durably withdraws a commit of `phases`, replacing a decision for them that may
    /// have been written.
    pub fn record_abort(&mut self, phases: Vec<(String, PhaseNumber)>) -> Result<()> {
        self.write(DecisionState::Aborted, phases)
    }

    /// Marks a pending decision as carried out.
    pub fn mark_completed(&mut self) -> Result<()> {
        self.resolve(DecisionState::Completed)
    }

    /// Marks a pending decision as abandoned.
    pub fn mark_aborted(&mut self) -> Result<()> {
        self.resolve(DecisionState::Aborted)
    }

    fn resolve(&mut self, state: DecisionState) -> Result<()> {
        let Some(pending) = self.pending() else {
            return Ok(());
        };
        let phases = pending.phases.clone();
        self.write(state, phases)
    }

    fn write(&mut self, state: DecisionState, phases: Vec<(String, PhaseNumber)>) -> Result<()> {
        let seq = self.latest.as_ref().map_or(0, |d| d.seq + 1);
        let decision = Decision { seq, state, phases };
        let slot = (seq % 2) as usize;
        let buf = decision.encode(slot)?;
        self.io.write_at((slot * DECISION_SLOT_LEN) as u64, &buf)?;
        self.io.sync_all()?;
        debug!(seq, ?state, participants = decision.phases.len(), "decision.write");
        self.latest = Some(decision);
        Ok(())
    }
}

fn read_latest(io: &dyn FileIo) -> Result<Option<Decision>> {
    let mut latest: Option<Decision> = None;
    for slot in 0..2 {
        let mut buf = vec![0u8; DECISION_SLOT_LEN];
        match io.read_at((slot * DECISION_SLOT_LEN) as u64, &mut buf) {
            Ok(()) => {}
            Err(StoreError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => continue,
            Err(err) => return Err(err),
        }
        match Decision::decode(slot, &mut buf) {
            Ok(Some(decision)) if decision.seq % 2 == slot as u64 => {
                if latest.as_ref().map_or(true, |l| decision.seq > l.seq) {
                    latest = Some(decision);
                }
            }
            Ok(Some(decision)) => {
                warn!(slot, seq = decision.seq, "decision.open.misplaced_slot");
            }
            Ok(None) => {}
            Err(reason) => warn!(slot, %reason, "decision.open.corrupt_slot"),
        }
    }
    Ok(latest)
}

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_database;
use crate::admin::Result;
use crate::db::Database;
use crate::phase::SlotState;
use crate::session::RegisteredResource;

/// Decoded view of one metaroot slot.
#[derive(Clone, Debug, Serialize)]
pub struct SlotReport {
    /// Slot index, 0 or 1.
    pub slot: usize,
    /// `empty`, `corrupt`, `retired` or `valid`.
    pub status: &'static str,
    /// Phase number, for valid and retired slots.
    pub phase: Option<u64>,
    /// Allocator generation sealed with the phase.
    pub generation: Option<u64>,
    /// Allocator high-water mark.
    pub high_water: Option<u64>,
    /// Entries in the slot's free-list sidecar.
    pub free_len: Option<u64>,
    /// Free-list checksum as hex.
    pub free_crc: Option<String>,
    /// Why a corrupt slot was rejected.
    pub detail: Option<String>,
}

/// Both metaroot slots of one participant.
#[derive(Clone, Debug, Serialize)]
pub struct MetarootReport {
    /// Participant name.
    pub resource: String,
    /// Slot 0, then slot 1.
    pub slots: Vec<SlotReport>,
}

/// Opens the database and dumps every participant's metaroot slots.
pub fn inspect_metaroots(opts: &AdminOpenOptions) -> Result<Vec<MetarootReport>> {
    let db = open_database(opts)?;
    inspect_database(&db)
}

/// Dumps the metaroot slots of an open database. Participants of unknown type are skipped.
pub fn inspect_database(db: &Database) -> Result<Vec<MetarootReport>> {
    let mut reports = Vec::new();
    for (name, resource) in db.resources() {
        let slots = match resource {
            RegisteredResource::Statements(store) => store.lock().inspect_metaroots()?,
            RegisteredResource::Nodes(pool) => pool.lock().inspect_metaroots()?,
            RegisteredResource::Other(_) => continue,
        };
        reports.push(MetarootReport {
            resource: name.to_string(),
            slots: slots
                .iter()
                .enumerate()
                .map(|(slot, state)| slot_report(slot, state))
                .collect(),
        });
    }
    Ok(reports)
}

fn slot_report(slot: usize, state: &SlotState) -> SlotReport {
    let (status, root, detail) = match state {
        SlotState::Empty => ("empty", None, None),
        SlotState::Corrupt(reason) => ("corrupt", None, Some(reason.clone())),
        SlotState::Retired(root) => ("retired", Some(root), None),
        SlotState::Valid(root) => ("valid", Some(root), None),
    };
    SlotReport {
        slot,
        status,
        phase: root.map(|r| r.phase.0),
        generation: root.map(|r| r.generation),
        high_water: root.map(|r| r.high_water),
        free_len: root.map(|r| r.free_len),
        free_crc: root.map(|r| hex::encode(r.free_crc.to_be_bytes())),
        detail,
    }
}

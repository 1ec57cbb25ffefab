use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_database;
use crate::admin::Result;
use crate::db::Database;
use crate::nodepool::NodePool;
use crate::phase::{PhaseResource, PhaseState, SlotState};
use crate::session::RegisteredResource;
use crate::storage::btree::{walk, Node};
use crate::storage::{IndexKey, StatementStore};
use crate::types::{BlockId, StoreError};

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Metaroot slots, decision log and allocator counts.
    Fast,
    /// Also walks every index, re-reads every reachable block and cross-checks the
    /// indexes against each other and the allocator.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Data corruption or integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Participant the finding concerns, if any.
    pub resource: Option<String>,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Participants examined.
    pub resources: u64,
    /// Quads enumerated, summed over every index.
    pub keys_scanned: u64,
    /// Distinct blocks reached from committed roots.
    pub blocks_checked: u64,
    /// Node identifiers live in node pools.
    pub live_nodes: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification passed without errors.
    pub success: bool,
    /// Issues discovered, capped at a fixed number.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the structures examined.
    pub counts: VerifyCounts,
}

struct Findings {
    list: Vec<VerifyFinding>,
    errors: usize,
}

impl Findings {
    fn push(&mut self, severity: VerifySeverity, resource: Option<&str>, message: impl Into<String>) {
        if severity == VerifySeverity::Error {
            self.errors += 1;
        }
        if self.list.len() < MAX_FINDINGS {
            self.list.push(VerifyFinding {
                severity,
                resource: resource.map(str::to_string),
                message: message.into(),
            });
        }
    }

    fn error(&mut self, resource: &str, message: impl Into<String>) {
        self.push(VerifySeverity::Error, Some(resource), message);
    }

    fn warn(&mut self, resource: &str, message: impl Into<String>) {
        self.push(VerifySeverity::Warning, Some(resource), message);
    }

    fn full(&self) -> bool {
        self.list.len() >= MAX_FINDINGS
    }
}

/// Opens the database and checks it.
pub fn verify(opts: &AdminOpenOptions, level: VerifyLevel) -> Result<VerifyReport> {
    let db = open_database(opts)?;
    verify_database(&db, level)
}

/// Checks an open database.
pub fn verify_database(db: &Database, level: VerifyLevel) -> Result<VerifyReport> {
    let mut findings = Findings {
        list: Vec::new(),
        errors: 0,
    };
    let mut counts = VerifyCounts::default();

    if db.coordinator().is_poisoned() {
        findings.push(
            VerifySeverity::Error,
            None,
            "coordinator has an incomplete commit; reopen to recover",
        );
    }
    if let Some(decision) = db.coordinator().decision_log().pending() {
        findings.push(
            VerifySeverity::Warning,
            None,
            format!("decision {} is still committing", decision.seq),
        );
    }

    for (name, resource) in db.resources() {
        counts.resources += 1;
        let state = resource.shared().lock().state();
        if state != PhaseState::Stable {
            findings.error(name, format!("resource is {state:?}, not stable"));
            continue;
        }
        match resource {
            RegisteredResource::Statements(store) => {
                let store = store.lock();
                check_slots(name, store.inspect_metaroots(), &mut findings);
                if level == VerifyLevel::Full {
                    verify_statements(name, &store, &mut findings, &mut counts)?;
                }
            }
            RegisteredResource::Nodes(pool) => {
                let pool = pool.lock();
                check_slots(name, pool.inspect_metaroots(), &mut findings);
                verify_nodes(name, &pool, &mut findings, &mut counts);
            }
            RegisteredResource::Other(_) => {
                findings.push(
                    VerifySeverity::Info,
                    Some(name),
                    "resource type has no structural checks",
                );
            }
        }
    }

    Ok(VerifyReport {
        level,
        success: findings.errors == 0,
        findings: findings.list,
        counts,
    })
}

fn check_slots(
    name: &str,
    slots: crate::types::Result<[SlotState; 2]>,
    findings: &mut Findings,
) {
    let slots = match slots {
        Ok(slots) => slots,
        Err(err) => {
            findings.error(name, format!("cannot read metaroot: {err}"));
            return;
        }
    };
    let valid = slots
        .iter()
        .filter(|s| matches!(s, SlotState::Valid(_)))
        .count();
    if valid != 1 {
        findings.error(name, format!("{valid} valid metaroot slots while stable"));
    }
    for (slot, state) in slots.iter().enumerate() {
        if let SlotState::Corrupt(reason) = state {
            findings.warn(name, format!("metaroot slot {slot} is corrupt: {reason}"));
        }
    }
}

fn verify_nodes(name: &str, pool: &NodePool, findings: &mut Findings, counts: &mut VerifyCounts) {
    let live = pool.allocator().live_len();
    counts.live_nodes += live;
    if live != pool.nr_nodes() {
        findings.error(
            name,
            format!("allocator holds {live} live ids but the pool counts {}", pool.nr_nodes()),
        );
    }
    if let Some((_, state)) = pool.committed() {
        if !pool.allocator().in_transaction() && state.nr_live != live {
            findings.error(
                name,
                format!("committed phase records {} live ids, allocator has {live}", state.nr_live),
            );
        }
    }
}

fn verify_statements(
    name: &str,
    store: &StatementStore,
    findings: &mut Findings,
    counts: &mut VerifyCounts,
) -> Result<()> {
    let Some(committed) = store.committed() else {
        findings.error(name, "no committed phase published");
        return Ok(());
    };
    let roots = &committed.payload;
    let node_store = store.node_store();
    let mut reachable: FxHashSet<u64> = FxHashSet::default();
    let mut reference: Option<(String, Vec<[u64; 4]>)> = None;

    for index in store.indexes() {
        let root = roots.root(*index);
        let mut quads: Vec<[u64; 4]> = Vec::with_capacity(roots.nr_quads as usize);
        let mut last: Option<IndexKey> = None;
        let mut out_of_order = false;
        let mut visit = |id: BlockId, node: &Node| -> crate::types::Result<()> {
            if !reachable.insert(id.0) {
                return Err(StoreError::corruption(format!(
                    "block {} reachable twice",
                    id.0
                )));
            }
            node_store.blocks().read(id)?;
            if let Node::Leaf(keys) = node {
                for key in keys {
                    if last.is_some_and(|prev| prev >= *key) {
                        out_of_order = true;
                    }
                    last = Some(*key);
                    quads.push(index.quad(key).to_array().map(|n| n.0));
                }
            }
            Ok(())
        };
        if let Err(err) = walk(node_store.as_ref(), root, &mut visit) {
            findings.error(name, format!("index {}: {err}", index.name()));
            continue;
        }
        counts.keys_scanned += quads.len() as u64;
        if out_of_order {
            findings.error(name, format!("index {} keys are not strictly ascending", index.name()));
        }
        if quads.len() as u64 != roots.nr_quads {
            findings.error(
                name,
                format!(
                    "index {} holds {} quads, metaroot records {}",
                    index.name(),
                    quads.len(),
                    roots.nr_quads
                ),
            );
        }
        quads.sort_unstable();
        match &reference {
            None => reference = Some((index.name().to_string(), quads)),
            Some((first, expected)) => {
                if *expected != quads {
                    findings.error(
                        name,
                        format!("index {} disagrees with index {first}", index.name()),
                    );
                }
            }
        }
        if findings.full() {
            break;
        }
    }
    counts.blocks_checked += reachable.len() as u64;

    if store.is_dirty() {
        findings.warn(name, "uncommitted changes present; allocator checks skipped");
        return Ok(());
    }
    let alloc = store.allocator();
    for id in 1..alloc.high_water() {
        let live = reachable.contains(&id);
        let free = alloc.is_free(id);
        if live && free {
            findings.error(name, format!("block {id} is reachable and free"));
        } else if !live && !free {
            findings.warn(name, format!("block {id} is neither reachable nor free"));
        }
        if findings.full() {
            break;
        }
    }
    Ok(())
}
